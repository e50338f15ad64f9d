//! 网络通信模块
//!
//! 在一条持久双工连接上复用多个并发调用：
//! - 每个调用分配关联 ID，回复按 `(subject, correlationId)` 匹配
//! - 超时、断线都会让对应调用失败并从待回复表中移除
//! - 没有关联 ID 的推送按主题分发给订阅者

mod connection;
mod engine;
mod pending;
mod subscription;

pub use engine::RpcClient;
pub use pending::{PendingCall, PendingKey, PendingTable};
pub use subscription::{Callback, SubscriberRegistry, SubscriptionHandle};

use std::fmt;
use std::time::Duration;

use protocol::{DEFAULT_CALL_TIMEOUT, DEFAULT_SERVER_URL, MAX_SUBSCRIBERS_PER_SUBJECT};

/// 连接状态
///
/// 状态转换只由传输层事件和 `connect()` 驱动：
///
/// ```text
/// Disconnected --connect()--> Connecting
/// Connecting   --opened-->    Open
/// Connecting   --failed-->    Closed
/// Open         --closed-->    Closed
/// Closed       --connect()--> Connecting
/// ```
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Open,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// 关联引擎配置
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// 服务器地址，交给 Connector 解释
    pub server_address: String,
    /// 调用默认超时
    pub call_timeout: Duration,
    /// 每个主题的订阅者上限
    pub max_subscribers_per_subject: usize,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            server_address: DEFAULT_SERVER_URL.to_string(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            max_subscribers_per_subject: MAX_SUBSCRIBERS_PER_SUBJECT,
        }
    }
}

impl RpcConfig {
    pub fn new(server_address: impl Into<String>) -> Self {
        Self {
            server_address: server_address.into(),
            ..Self::default()
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_max_subscribers(mut self, max: usize) -> Self {
        self.max_subscribers_per_subject = max;
        self
    }
}
