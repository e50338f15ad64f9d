//! 协议常量定义

use std::time::Duration;

/// 协议版本号（TCP 帧头第一个字节）
pub const PROTOCOL_VERSION: u8 = 1;

/// 消息帧最大大小
pub const MAX_FRAME_SIZE: usize = 65536;

/// 连接超时（秒）
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// 调用默认超时（毫秒）- 2 分钟，远端引擎搜索可能很慢
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 120_000;

/// 每个主题最多允许的订阅者数量
pub const MAX_SUBSCRIBERS_PER_SUBJECT: usize = 64;

/// 保留主题：连接可用
pub const READY_SUBJECT: &str = "ready";

/// 默认服务器地址
pub const DEFAULT_SERVER_URL: &str = "ws://localhost:8000";

/// WebSocket 子协议
pub const WS_SUBPROTOCOL: &str = "rust-websocket";

/// 连接超时 Duration
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(CONNECT_TIMEOUT_SECS);

/// 调用默认超时 Duration
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_millis(DEFAULT_CALL_TIMEOUT_MS);
