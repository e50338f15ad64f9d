//! 通过真实的 TCP / WebSocket 对端测试关联引擎

use std::time::Duration;

use gomoku_client::game::GameSession;
use gomoku_client::{ConnectionState, RpcClient, RpcConfig, RpcError};
use protocol::{
    Connection, Connector, Envelope, Listener, MessageReader, MessageWriter, TcpConnector,
    TcpListener, WsConnector, WsListener,
};
use serde_json::{json, Value};

/// 测试用对端
///
/// - `slow`：不回复
/// - `bye`：关闭连接
/// - `notify`：先推送 `board`，再回复
/// - `calculate`：回复已下着法中最大的格子编号加一
/// - 其它主题：原样回显负载
async fn serve<L>(mut listener: L)
where
    L: Listener + 'static,
{
    while let Ok(conn) = listener.accept().await {
        tokio::spawn(handle(conn));
    }
}

async fn handle<T: Connection>(conn: T) {
    let (mut reader, mut writer) = conn.split();
    while let Ok(bytes) = reader.recv().await {
        let Ok(req) = Envelope::decode(&bytes) else {
            continue;
        };
        let reply = match req.subject.as_str() {
            "slow" => continue,
            "bye" => {
                let _ = writer.close().await;
                return;
            }
            "notify" => {
                let push = Envelope::push("board", req.data.clone());
                writer.send(&push.encode().unwrap()).await.unwrap();
                req.reply(json!("ok"))
            }
            "calculate" => {
                let moves: Vec<u32> = serde_json::from_value(req.data["moves"].clone()).unwrap();
                let answer = moves.iter().max().map_or(0, |m| m + 1);
                req.reply(json!(answer))
            }
            _ => req.reply(req.data.clone()),
        };
        if writer.send(&reply.encode().unwrap()).await.is_err() {
            return;
        }
    }
}

async fn tcp_client() -> RpcClient<TcpConnector> {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = format!("tcp://{}", listener.local_addr().unwrap());
    tokio::spawn(serve(listener));
    RpcClient::new(TcpConnector, RpcConfig::new(addr).with_call_timeout(Duration::from_secs(5)))
}

async fn ws_client() -> RpcClient<WsConnector> {
    let listener = WsListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve(listener));
    RpcClient::new(
        WsConnector::new().with_subprotocol("rust-websocket"),
        RpcConfig::new(addr).with_call_timeout(Duration::from_secs(5)),
    )
}

async fn concurrent_calls<C: Connector>(client: RpcClient<C>) {
    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..20 {
        let c = client.clone();
        tasks.spawn(async move { (i, c.call("echo", json!({"n": i})).await) });
    }

    while let Some(joined) = tasks.join_next().await {
        let (i, reply) = joined.unwrap();
        assert_eq!(reply.unwrap(), json!({"n": i}));
    }
    assert_eq!(client.pending_calls(), 0);
    assert_eq!(client.state(), ConnectionState::Open);
}

async fn push_reaches_subscriber<C: Connector>(client: RpcClient<C>) {
    let (_handle, mut pushes) = client.subscribe_channel("board").unwrap();

    let reply = client.call("notify", json!([1, 2])).await.unwrap();
    assert_eq!(reply, json!("ok"));
    assert_eq!(pushes.recv().await.unwrap(), json!([1, 2]));
}

async fn close_fails_pending_then_reconnects<C: Connector>(client: RpcClient<C>) {
    let c = client.clone();
    let slow = tokio::spawn(async move { c.call("slow", Value::Null).await });

    // 确保 slow 已登记
    tokio::time::timeout(Duration::from_secs(5), async {
        while client.pending_calls() == 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    let bye = client.call("bye", Value::Null).await;
    assert!(matches!(bye, Err(RpcError::ConnectionLost(_))));
    assert!(matches!(slow.await.unwrap(), Err(RpcError::ConnectionLost(_))));
    assert_eq!(client.state(), ConnectionState::Closed);
    assert_eq!(client.pending_calls(), 0);

    let reply = client.call("echo", json!("again")).await.unwrap();
    assert_eq!(reply, json!("again"));
    assert_eq!(client.state(), ConnectionState::Open);
}

async fn timeout_leaves_connection_usable<C: Connector>(client: RpcClient<C>) {
    let err = client
        .call_with_timeout("slow", Value::Null, Duration::from_millis(50))
        .await
        .unwrap_err();
    assert_eq!(err, RpcError::Timeout(Duration::from_millis(50)));
    assert_eq!(client.pending_calls(), 0);

    let reply = client.call("echo", json!(1)).await.unwrap();
    assert_eq!(reply, json!(1));
}

#[tokio::test]
async fn test_tcp_concurrent_calls() {
    concurrent_calls(tcp_client().await).await;
}

#[tokio::test]
async fn test_ws_concurrent_calls() {
    concurrent_calls(ws_client().await).await;
}

#[tokio::test]
async fn test_tcp_push() {
    push_reaches_subscriber(tcp_client().await).await;
}

#[tokio::test]
async fn test_ws_push() {
    push_reaches_subscriber(ws_client().await).await;
}

#[tokio::test]
async fn test_tcp_close_and_reconnect() {
    close_fails_pending_then_reconnects(tcp_client().await).await;
}

#[tokio::test]
async fn test_ws_close_and_reconnect() {
    close_fails_pending_then_reconnects(ws_client().await).await;
}

#[tokio::test]
async fn test_tcp_timeout() {
    timeout_leaves_connection_usable(tcp_client().await).await;
}

#[tokio::test]
async fn test_ws_timeout() {
    timeout_leaves_connection_usable(ws_client().await).await;
}

#[tokio::test]
async fn test_tcp_refused() {
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let client = RpcClient::new(TcpConnector, RpcConfig::new(addr.to_string()));

    let err = client.call("echo", Value::Null).await.unwrap_err();
    assert!(matches!(err, RpcError::TransportUnavailable(_)));
    assert_eq!(client.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_ws_game_session() {
    let session = GameSession::new(ws_client().await);

    let state = session.submit_move(40).await.unwrap();
    assert_eq!(state.moves, vec![40, 41]);

    let state = session.submit_move(10).await.unwrap();
    assert_eq!(state.moves, vec![40, 41, 10, 42]);
    assert_eq!(session.history().len(), 2);
}
