//! WebSocket 传输实现
//!
//! 每条 WebSocket 文本/二进制消息对应一条完整的信封。Ping/Pong 由
//! tungstenite 自动处理，对上层不可见。

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::{ProtocolError, Result};
use crate::transport::{Connection, Connector, Listener, MessageReader, MessageWriter};
use crate::{CONNECT_TIMEOUT, MAX_FRAME_SIZE};

/// WebSocket 连接器
#[derive(Clone, Debug, Default)]
pub struct WsConnector {
    /// 握手时声明的子协议（Sec-WebSocket-Protocol）
    subprotocol: Option<String>,
}

impl WsConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// 声明子协议
    pub fn with_subprotocol(mut self, subprotocol: impl Into<String>) -> Self {
        self.subprotocol = Some(subprotocol.into());
        self
    }
}

#[async_trait]
impl Connector for WsConnector {
    type Conn = WsConnection<MaybeTlsStream<TcpStream>>;

    async fn connect(&self, addr: &str) -> Result<Self::Conn> {
        let mut request = addr.into_client_request()?;
        if let Some(subprotocol) = &self.subprotocol {
            let value = HeaderValue::from_str(subprotocol)
                .map_err(|e| ProtocolError::WebSocket(e.to_string()))?;
            request.headers_mut().insert("Sec-WebSocket-Protocol", value);
        }

        tracing::debug!("WebSocket connecting to {}", addr);
        let (stream, _response) = timeout(CONNECT_TIMEOUT, tokio_tungstenite::connect_async(request))
            .await
            .map_err(|_| ProtocolError::ConnectionTimeout)??;

        Ok(WsConnection {
            stream,
            peer_addr: Some(addr.to_string()),
        })
    }
}

/// WebSocket 连接
pub struct WsConnection<S> {
    stream: WebSocketStream<S>,
    peer_addr: Option<String>,
}

impl<S> Connection for WsConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    type Reader = WsReader<S>;
    type Writer = WsWriter<S>;

    fn peer_addr(&self) -> Option<String> {
        self.peer_addr.clone()
    }

    fn split(self) -> (Self::Reader, Self::Writer) {
        let (sink, stream) = self.stream.split();
        (WsReader { stream }, WsWriter { sink })
    }
}

/// WebSocket 读取端
pub struct WsReader<S> {
    stream: SplitStream<WebSocketStream<S>>,
}

#[async_trait]
impl<S> MessageReader for WsReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn recv(&mut self) -> Result<Vec<u8>> {
        loop {
            let Some(msg) = self.stream.next().await else {
                return Err(ProtocolError::ConnectionClosed);
            };

            match msg? {
                Message::Text(text) => return Ok(text.as_bytes().to_vec()),
                Message::Binary(data) => return Ok(data.to_vec()),
                Message::Close(_) => return Err(ProtocolError::ConnectionClosed),
                // Ping/Pong/原始帧
                _ => continue,
            }
        }
    }
}

/// WebSocket 写入端
pub struct WsWriter<S> {
    sink: SplitSink<WebSocketStream<S>, Message>,
}

#[async_trait]
impl<S> MessageWriter for WsWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: bytes.len(),
                max: MAX_FRAME_SIZE,
            });
        }

        let msg = match String::from_utf8(bytes.to_vec()) {
            Ok(text) => Message::text(text),
            Err(e) => Message::binary(e.into_bytes()),
        };
        self.sink.send(msg).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.sink.close().await?;
        Ok(())
    }
}

/// WebSocket 监听器（对端 / 测试使用）
pub struct WsListener {
    listener: tokio::net::TcpListener,
}

#[async_trait]
impl Listener for WsListener {
    type Conn = WsConnection<TcpStream>;

    async fn bind(addr: &str) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        Ok(Self { listener })
    }

    async fn accept(&mut self) -> Result<Self::Conn> {
        let (stream, addr) = self.listener.accept().await?;
        let stream = tokio_tungstenite::accept_hdr_async(stream, echo_subprotocol).await?;
        tracing::debug!("WebSocket handshake completed: {}", addr);
        Ok(WsConnection {
            stream,
            peer_addr: Some(addr.to_string()),
        })
    }

    fn local_addr(&self) -> Option<String> {
        self.listener
            .local_addr()
            .ok()
            .map(|a| format!("ws://{}", a))
    }
}

/// 回显客户端请求的第一个子协议，否则客户端握手校验会失败
fn echo_subprotocol(
    req: &Request,
    mut resp: Response,
) -> std::result::Result<Response, ErrorResponse> {
    let first = req
        .headers()
        .get("Sec-WebSocket-Protocol")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .and_then(|v| HeaderValue::from_str(v).ok());

    if let Some(value) = first {
        resp.headers_mut().insert("Sec-WebSocket-Protocol", value);
    }
    Ok(resp)
}
