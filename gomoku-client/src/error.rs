//! 错误类型定义

use std::time::Duration;

use thiserror::Error;

/// 调用错误
///
/// 实现 `Clone`：一次断线需要同时通知所有等待中的调用。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// 调用前无法建立（或重建）连接
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    /// 传输层拒绝写出
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// 截止时间前没有收到匹配的回复
    #[error("Server did not respond within {0:?}")]
    Timeout(Duration),

    /// 调用未完成时连接断开
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// 无法解码的入站消息
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// 主题为空
    #[error("Subject must not be empty")]
    InvalidSubject,

    /// 超时时间必须为正
    #[error("Timeout must be positive")]
    InvalidTimeout,

    /// 同一 (subject, correlationId) 重复注册
    #[error("Duplicate pending call: {subject}:{correlation_id}")]
    DuplicateCall {
        subject: String,
        correlation_id: String,
    },

    /// 订阅者数量超限
    #[error("Too many subscribers for '{subject}' (max: {max})")]
    TooManySubscribers { subject: String, max: usize },

    /// 负载序列化/反序列化失败
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}

impl From<serde_json::Error> for RpcError {
    fn from(e: serde_json::Error) -> Self {
        RpcError::InvalidPayload(e.to_string())
    }
}

/// 调用结果类型
pub type Result<T> = std::result::Result<T, RpcError>;
