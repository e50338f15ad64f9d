//! 五子棋客户端
//!
//! 通过一条持久连接向远端五子棋引擎发起请求-回复式调用：
//! - `network`：关联引擎，负责连接、调用匹配、超时与推送分发
//! - `game`：对局会话，在引擎之上维护本地局面
//! - `settings`：客户端设置与持久化

pub mod error;
pub mod game;
pub mod network;
pub mod settings;

pub use error::{Result, RpcError};
pub use network::{ConnectionState, RpcClient, RpcConfig, SubscriptionHandle};
pub use settings::{ClientSettings, LogLevel};
