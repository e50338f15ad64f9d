//! 五子棋客户端共享协议库
//!
//! 包含:
//! - 消息信封与关联 ID (Envelope, CorrelationId)
//! - 传输层抽象 (Connector, Connection, Listener traits)
//! - TCP 帧传输、WebSocket 传输、进程内传输
//! - 协议常量

mod constants;
mod error;
pub mod memory;
mod message;
mod transport;
mod ws;

pub use constants::*;
pub use error::{ProtocolError, Result};
pub use message::{CorrelationId, Envelope};
pub use transport::{
    Connection, Connector, Listener, MessageReader, MessageWriter,
    TcpConnection, TcpConnector, TcpListener,
    TransportType,
    FrameReader, FrameWriter,
};
pub use ws::{WsConnection, WsConnector, WsListener, WsReader, WsWriter};
