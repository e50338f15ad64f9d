//! 待回复调用表
//!
//! 每个未完成的调用以 `(subject, correlationId)` 为键登记在表中，
//! 直到收到回复、超时或连接断开时移除。完成通过 oneshot 通道送达
//! 等待中的调用方。

use std::collections::HashMap;
use std::fmt;

use protocol::CorrelationId;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{Result, RpcError};

/// 调用结果接收端
pub type CompletionReceiver = oneshot::Receiver<Result<Value>>;

/// 待回复调用的键
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PendingKey {
    pub subject: String,
    pub correlation_id: CorrelationId,
}

impl PendingKey {
    pub fn new(subject: impl Into<String>, correlation_id: CorrelationId) -> Self {
        Self {
            subject: subject.into(),
            correlation_id,
        }
    }
}

impl fmt::Display for PendingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.subject, self.correlation_id)
    }
}

/// 一个等待回复的调用
pub struct PendingCall {
    key: PendingKey,
    deadline: Instant,
    completion: oneshot::Sender<Result<Value>>,
}

impl PendingCall {
    /// 创建调用及其结果接收端
    pub fn new(key: PendingKey, deadline: Instant) -> (Self, CompletionReceiver) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                key,
                deadline,
                completion: tx,
            },
            rx,
        )
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// 以回复负载完成；调用方已放弃时返回 false
    pub fn resolve(self, payload: Value) -> bool {
        self.completion.send(Ok(payload)).is_ok()
    }

    /// 以错误完成
    pub fn reject(self, error: RpcError) -> bool {
        self.completion.send(Err(error)).is_ok()
    }
}

/// 待回复调用表
#[derive(Default)]
pub struct PendingTable {
    calls: HashMap<PendingKey, PendingCall>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记调用；同一个键重复登记是编程错误
    pub fn register(&mut self, call: PendingCall) -> Result<()> {
        if self.calls.contains_key(&call.key) {
            return Err(RpcError::DuplicateCall {
                subject: call.key.subject.clone(),
                correlation_id: call.key.correlation_id.to_string(),
            });
        }
        self.calls.insert(call.key.clone(), call);
        Ok(())
    }

    /// 取出匹配的调用
    pub fn take(&mut self, subject: &str, correlation_id: &CorrelationId) -> Option<PendingCall> {
        self.calls
            .remove(&PendingKey::new(subject, correlation_id.clone()))
    }

    pub fn remove(&mut self, key: &PendingKey) -> Option<PendingCall> {
        self.calls.remove(key)
    }

    /// 取出所有调用（断线时使用）
    pub fn drain(&mut self) -> Vec<PendingCall> {
        self.calls.drain().map(|(_, call)| call).collect()
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}
