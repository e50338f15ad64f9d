//! 连接生命周期
//!
//! 连接尝试在独立任务中进行，结果通过 watch 通道广播给所有等待者，
//! 因此并发的 `connect()` 只会产生一次尝试。连接打开后由读任务和写任务
//! 驱动传输层，两者只持有引擎的弱引用。

use std::sync::{Arc, Weak};

use protocol::{Connection, Connector, MessageReader, MessageWriter, ProtocolError, READY_SUBJECT};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::engine::{Core, Inner};
use super::ConnectionState;
use crate::error::{Result, RpcError};

/// 一次连接尝试的结果，失败时携带原因
pub(super) type ConnectOutcome = std::result::Result<(), String>;

/// 待写出的消息，写完后通过 ack 回报结果
pub(super) struct Outbound {
    pub(super) bytes: Vec<u8>,
    pub(super) ack: oneshot::Sender<protocol::Result<()>>,
}

/// 已打开的连接
pub(super) struct Link {
    pub(super) outbound: mpsc::UnboundedSender<Outbound>,
    reader: JoinHandle<()>,
}

impl Drop for Link {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl<C: Connector> Inner<C> {
    pub(super) async fn connect(self: &Arc<Self>) -> Result<()> {
        let mut attempt = {
            let mut core = self.lock();
            let in_flight = match core.state {
                ConnectionState::Open => return Ok(()),
                ConnectionState::Connecting => core.connecting.clone(),
                _ => None,
            };
            match in_flight {
                Some(rx) => rx,
                None => self.start_attempt(&mut core),
            }
        };

        let outcome = match attempt.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        };

        match outcome {
            Some(Ok(())) => Ok(()),
            Some(Err(reason)) => Err(RpcError::TransportUnavailable(reason)),
            None => Err(RpcError::TransportUnavailable(
                "connection attempt abandoned".to_string(),
            )),
        }
    }

    fn start_attempt(self: &Arc<Self>, core: &mut Core) -> watch::Receiver<Option<ConnectOutcome>> {
        core.epoch += 1;
        core.state = ConnectionState::Connecting;

        let epoch = core.epoch;
        let (tx, rx) = watch::channel(None);
        core.connecting = Some(rx.clone());

        info!(addr = %self.config.server_address, "Connecting to server");

        let inner = self.clone();
        tokio::spawn(async move {
            let result = inner.connector.connect(&inner.config.server_address).await;
            let outcome = inner.finish_connect(epoch, result);
            tx.send_replace(Some(outcome));
        });

        rx
    }

    fn finish_connect(
        self: &Arc<Self>,
        epoch: u64,
        result: protocol::Result<C::Conn>,
    ) -> ConnectOutcome {
        let mut core = self.lock();
        if core.epoch != epoch || core.state != ConnectionState::Connecting {
            debug!(epoch, "Discarding result of cancelled connection attempt");
            return Err("connection attempt cancelled".to_string());
        }
        core.connecting = None;

        let conn = match result {
            Ok(conn) => conn,
            Err(e) => {
                core.state = ConnectionState::Closed;
                warn!(addr = %self.config.server_address, error = %e, "Connection failed");
                return Err(e.to_string());
            }
        };

        let peer = conn.peer_addr();
        let (reader, writer) = conn.split();
        let (outbound, queue) = mpsc::unbounded_channel();

        let weak = Arc::downgrade(self);
        tokio::spawn(write_loop(weak.clone(), epoch, writer, queue));
        let reader = tokio::spawn(read_loop(weak, epoch, reader));

        core.link = Some(Link { outbound, reader });
        core.state = ConnectionState::Open;
        let ready = core.subscribers.snapshot(READY_SUBJECT);
        drop(core);

        info!(
            peer = peer.as_deref().unwrap_or("unknown"),
            ready_subscribers = ready.len(),
            "Connection open"
        );
        for callback in ready {
            callback(&Value::Null);
        }
        Ok(())
    }

    /// 连接关闭或出错：失败所有未完成的调用
    ///
    /// 只处理当前纪元且处于 Open 的连接，过期事件被忽略。
    pub(super) fn teardown(&self, epoch: u64, reason: &str) {
        let (link, calls) = {
            let mut core = self.lock();
            if core.epoch != epoch || core.state != ConnectionState::Open {
                return;
            }
            core.state = ConnectionState::Closed;
            (core.link.take(), core.pending.drain())
        };

        warn!(%reason, pending = calls.len(), "Connection closed");
        for call in calls {
            call.reject(RpcError::ConnectionLost(reason.to_string()));
        }
        drop(link);
    }

    pub(super) fn disconnect(&self) {
        let (link, calls) = {
            let mut core = self.lock();
            core.epoch += 1;
            if core.state != ConnectionState::Disconnected {
                core.state = ConnectionState::Closed;
            }
            core.connecting = None;
            (core.link.take(), core.pending.drain())
        };

        info!(pending = calls.len(), "Disconnected by client");
        for call in calls {
            call.reject(RpcError::ConnectionLost("disconnected by client".to_string()));
        }
        drop(link);
    }
}

async fn read_loop<C, R>(inner: Weak<Inner<C>>, epoch: u64, mut reader: R)
where
    C: Connector,
    R: MessageReader,
{
    loop {
        let received = reader.recv().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };

        match received {
            Ok(bytes) => {
                // 格式错误的消息只记录日志，不影响连接
                let _ = inner.dispatch(&bytes);
            }
            Err(ProtocolError::ConnectionClosed) => {
                inner.teardown(epoch, "closed by server");
                break;
            }
            Err(e) => {
                inner.teardown(epoch, &e.to_string());
                break;
            }
        }
    }
}

async fn write_loop<C, W>(
    inner: Weak<Inner<C>>,
    epoch: u64,
    mut writer: W,
    mut queue: mpsc::UnboundedReceiver<Outbound>,
) where
    C: Connector,
    W: MessageWriter,
{
    while let Some(Outbound { bytes, ack }) = queue.recv().await {
        match writer.send(&bytes).await {
            Ok(()) => {
                let _ = ack.send(Ok(()));
            }
            // 超长消息在写出前被拒绝，连接仍然可用
            Err(e @ ProtocolError::FrameTooLarge { .. }) => {
                warn!(error = %e, "Outbound message rejected");
                let _ = ack.send(Err(e));
            }
            Err(e) => {
                warn!(error = %e, "Write failed, closing connection");
                let reason = e.to_string();
                let _ = ack.send(Err(e));
                if let Some(inner) = inner.upgrade() {
                    inner.teardown(epoch, &reason);
                }
                break;
            }
        }
    }

    if let Err(e) = writer.close().await {
        debug!(error = %e, "Writer close failed");
    }
}
