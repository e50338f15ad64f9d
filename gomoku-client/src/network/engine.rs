//! 关联引擎

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use protocol::{Connector, CorrelationId, Envelope, ProtocolError, MAX_FRAME_SIZE};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::connection::{ConnectOutcome, Link, Outbound};
use super::pending::{PendingCall, PendingKey, PendingTable};
use super::subscription::{SubscriberRegistry, SubscriptionHandle};
use super::{ConnectionState, RpcConfig};
use crate::error::{Result, RpcError};

/// 引擎共享状态
///
/// 所有字段都在同一把锁下修改，锁从不跨越 await 持有；
/// 订阅回调在锁外调用，回调内可以再次订阅或发起调用。
pub(super) struct Core {
    pub(super) state: ConnectionState,
    /// 每次发起连接或主动断开时递增，用于识别过期的传输事件
    pub(super) epoch: u64,
    pub(super) link: Option<Link>,
    pub(super) connecting: Option<watch::Receiver<Option<ConnectOutcome>>>,
    pub(super) pending: PendingTable,
    pub(super) subscribers: SubscriberRegistry,
}

pub(super) struct Inner<C: Connector> {
    pub(super) connector: C,
    pub(super) config: RpcConfig,
    core: Mutex<Core>,
}

impl<C: Connector> Inner<C> {
    pub(super) fn lock(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 解码入站消息，交给等待中的调用或主题订阅者
    pub(super) fn dispatch(&self, raw: &[u8]) -> Result<()> {
        let envelope = match Envelope::decode(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "Discarding malformed envelope");
                return Err(RpcError::MalformedEnvelope(e.to_string()));
            }
        };
        debug!(key = %envelope.dispatch_key(), data = %envelope.data, "IN");

        let Envelope {
            subject,
            correlation_id,
            data,
        } = envelope;

        let callbacks = {
            let mut core = self.lock();
            if let Some(id) = &correlation_id {
                if let Some(call) = core.pending.take(&subject, id) {
                    if !call.resolve(data) {
                        debug!(%subject, correlation_id = %id, "Caller abandoned the call before its reply");
                    }
                    return Ok(());
                }
                debug!(%subject, correlation_id = %id, "Reply matches no pending call, treating as notification");
            }
            core.subscribers.snapshot(&subject)
        };

        if callbacks.is_empty() {
            debug!(%subject, "No subscribers, notification dropped");
            return Ok(());
        }
        for callback in callbacks {
            callback(&data);
        }
        Ok(())
    }

    /// 移除调用方放弃的待回复调用
    fn forget(&self, key: &PendingKey) {
        if self.lock().pending.remove(key).is_some() {
            debug!(%key, "Pending call removed");
        }
    }
}

/// 调用返回前（回复、超时、取消）确保待回复表中的条目被移除
struct PendingGuard<'a, C: Connector> {
    inner: &'a Inner<C>,
    key: PendingKey,
}

impl<C: Connector> Drop for PendingGuard<'_, C> {
    fn drop(&mut self) {
        self.inner.forget(&self.key);
    }
}

/// 关联引擎客户端
///
/// 克隆得到的句柄共享同一条连接、同一张待回复表和订阅表。
///
/// ```no_run
/// use gomoku_client::network::{RpcClient, RpcConfig};
/// use protocol::WsConnector;
/// use serde_json::json;
///
/// # async fn example() -> gomoku_client::Result<()> {
/// let client = RpcClient::new(WsConnector::new(), RpcConfig::new("ws://localhost:8000"));
/// let score = client.call("evaluate", json!({"board": {}})).await?;
/// # Ok(())
/// # }
/// ```
pub struct RpcClient<C: Connector> {
    inner: Arc<Inner<C>>,
}

impl<C: Connector> Clone for RpcClient<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C: Connector> RpcClient<C> {
    /// 创建客户端，不会立即连接
    pub fn new(connector: C, config: RpcConfig) -> Self {
        let subscribers = SubscriberRegistry::new(config.max_subscribers_per_subject);
        Self {
            inner: Arc::new(Inner {
                connector,
                config,
                core: Mutex::new(Core {
                    state: ConnectionState::Disconnected,
                    epoch: 0,
                    link: None,
                    connecting: None,
                    pending: PendingTable::new(),
                    subscribers,
                }),
            }),
        }
    }

    /// 底层连接器
    pub fn connector(&self) -> &C {
        &self.inner.connector
    }

    pub fn config(&self) -> &RpcConfig {
        &self.inner.config
    }

    /// 当前连接状态
    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// 未完成的调用数量
    pub fn pending_calls(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// 建立连接
    ///
    /// 已连接时立即返回；并发调用者共享同一次连接尝试。
    pub async fn connect(&self) -> Result<()> {
        self.inner.connect().await
    }

    /// 主动断开，所有未完成的调用以 `ConnectionLost` 失败
    pub fn disconnect(&self) {
        self.inner.disconnect();
    }

    /// 使用默认超时发起调用
    pub async fn call(&self, subject: &str, payload: Value) -> Result<Value> {
        self.call_with_timeout(subject, payload, self.inner.config.call_timeout)
            .await
    }

    /// 发起调用并等待匹配的回复
    ///
    /// 未连接时先尝试连接一次，失败即返回 `TransportUnavailable`，不会发送任何消息。
    pub async fn call_with_timeout(
        &self,
        subject: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<Value> {
        if subject.is_empty() {
            return Err(RpcError::InvalidSubject);
        }
        if timeout.is_zero() {
            return Err(RpcError::InvalidTimeout);
        }

        if self.state() != ConnectionState::Open {
            self.connect().await?;
        }

        let correlation_id = CorrelationId::generate();
        let envelope = Envelope::request(subject, correlation_id.clone(), payload);
        let bytes = envelope
            .encode()
            .map_err(|e| RpcError::InvalidPayload(e.to_string()))?;
        if bytes.len() > MAX_FRAME_SIZE {
            return Err(RpcError::SendFailed(
                ProtocolError::FrameTooLarge {
                    size: bytes.len(),
                    max: MAX_FRAME_SIZE,
                }
                .to_string(),
            ));
        }

        let key = PendingKey::new(subject, correlation_id);
        let (call, reply) = PendingCall::new(key.clone(), Instant::now() + timeout);
        let deadline = call.deadline();
        let (ack_tx, ack_rx) = oneshot::channel();

        {
            let mut core = self.inner.lock();
            let outbound = match (&core.link, core.state) {
                (Some(link), ConnectionState::Open) => link.outbound.clone(),
                (_, state) => {
                    return Err(RpcError::SendFailed(format!("not connected ({})", state)));
                }
            };
            core.pending.register(call)?;
            if outbound.send(Outbound { bytes, ack: ack_tx }).is_err() {
                core.pending.remove(&key);
                return Err(RpcError::SendFailed("writer stopped".to_string()));
            }
        }
        let _guard = PendingGuard {
            inner: &self.inner,
            key: key.clone(),
        };
        debug!(%key, data = %envelope.data, "OUT");

        // 截止时间同时覆盖写出和等待回复
        let outcome = tokio::time::timeout_at(deadline, async {
            match ack_rx.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(RpcError::SendFailed(e.to_string())),
                Err(_) => return Err(RpcError::SendFailed("writer stopped".to_string())),
            }
            match reply.await {
                Ok(result) => result,
                Err(_) => Err(RpcError::ConnectionLost("call dropped".to_string())),
            }
        })
        .await;

        match outcome {
            Ok(result) => result,
            Err(_) => {
                warn!(%key, ?timeout, "Server did not respond in time");
                Err(RpcError::Timeout(timeout))
            }
        }
    }

    /// 带类型的调用：请求序列化为 JSON，回复反序列化为 `Res`
    pub async fn request<Req, Res>(&self, subject: &str, request: &Req) -> Result<Res>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        let payload = serde_json::to_value(request)?;
        let reply = self.call(subject, payload).await?;
        Ok(serde_json::from_value(reply)?)
    }

    /// 注入一条入站消息（传输层的 received 事件）
    pub fn on_message(&self, raw: &[u8]) -> Result<()> {
        self.inner.dispatch(raw)
    }

    /// 订阅某个主题的推送
    pub fn subscribe<F>(&self, subject: &str, callback: F) -> Result<SubscriptionHandle>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner
            .lock()
            .subscribers
            .subscribe(subject, Arc::new(callback))
    }

    /// 订阅某个主题，推送通过通道送出
    pub fn subscribe_channel(
        &self,
        subject: &str,
    ) -> Result<(SubscriptionHandle, mpsc::UnboundedReceiver<Value>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = self.subscribe(subject, move |value| {
            let _ = tx.send(value.clone());
        })?;
        Ok((handle, rx))
    }

    /// 取消订阅
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        self.inner.lock().subscribers.unsubscribe(handle)
    }
}
