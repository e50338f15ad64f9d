//! 传输层抽象
//!
//! 提供 Connector/Connection/Listener traits 使关联引擎与具体传输实现解耦。
//! 传输层只搬运离散的字节消息，不理解信封内容，也不做任何重试。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::{ProtocolError, Result};
use crate::{CONNECT_TIMEOUT, MAX_FRAME_SIZE, PROTOCOL_VERSION};

/// 传输协议类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TransportType {
    Tcp,
    #[default]
    WebSocket,
}

/// 消息读取端
#[async_trait]
pub trait MessageReader: Send + 'static {
    /// 接收一条完整消息；对端关闭时返回 `ConnectionClosed`
    async fn recv(&mut self) -> Result<Vec<u8>>;
}

/// 消息写入端
#[async_trait]
pub trait MessageWriter: Send + 'static {
    /// 发送一条完整消息
    async fn send(&mut self, bytes: &[u8]) -> Result<()>;

    /// 关闭写入端
    async fn close(&mut self) -> Result<()>;
}

/// 连接抽象 trait
pub trait Connection: Send + 'static {
    type Reader: MessageReader;
    type Writer: MessageWriter;

    /// 获取远端地址
    fn peer_addr(&self) -> Option<String>;

    /// 分离读写端
    fn split(self) -> (Self::Reader, Self::Writer);
}

/// 连接器 trait（客户端使用）
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Conn: Connection;

    /// 建立连接
    async fn connect(&self, addr: &str) -> Result<Self::Conn>;
}

/// 监听器 trait（对端使用）
#[async_trait]
pub trait Listener: Send + Sync + Sized {
    type Conn: Connection;

    /// 绑定地址
    async fn bind(addr: &str) -> Result<Self>;

    /// 接受连接
    async fn accept(&mut self) -> Result<Self::Conn>;

    /// 获取本地地址
    fn local_addr(&self) -> Option<String>;
}

// ============================================================================
// TCP 实现
// ============================================================================

/// TCP 连接器
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    type Conn = TcpConnection;

    async fn connect(&self, addr: &str) -> Result<Self::Conn> {
        let addr = addr.strip_prefix("tcp://").unwrap_or(addr);
        tracing::debug!("TCP connecting to {}", addr);
        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| ProtocolError::ConnectionTimeout)?
            .map_err(ProtocolError::Io)?;

        TcpConnection::from_stream(stream)
    }
}

/// TCP 连接
pub struct TcpConnection {
    reader: FrameReader<OwnedReadHalf>,
    writer: FrameWriter<OwnedWriteHalf>,
    peer_addr: Option<String>,
}

impl TcpConnection {
    /// 从 TcpStream 创建
    pub fn from_stream(stream: TcpStream) -> Result<Self> {
        stream.set_nodelay(true)?;
        let peer_addr = stream.peer_addr().ok().map(|a| a.to_string());
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            reader: FrameReader::new(read_half),
            writer: FrameWriter::new(write_half),
            peer_addr,
        })
    }
}

impl Connection for TcpConnection {
    type Reader = FrameReader<OwnedReadHalf>;
    type Writer = FrameWriter<OwnedWriteHalf>;

    fn peer_addr(&self) -> Option<String> {
        self.peer_addr.clone()
    }

    fn split(self) -> (Self::Reader, Self::Writer) {
        (self.reader, self.writer)
    }
}

/// TCP 监听器
pub struct TcpListener {
    listener: tokio::net::TcpListener,
}

#[async_trait]
impl Listener for TcpListener {
    type Conn = TcpConnection;

    async fn bind(addr: &str) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(ProtocolError::Io)?;
        Ok(Self { listener })
    }

    async fn accept(&mut self) -> Result<Self::Conn> {
        let (stream, _addr) = self.listener.accept().await.map_err(ProtocolError::Io)?;
        TcpConnection::from_stream(stream)
    }

    fn local_addr(&self) -> Option<String> {
        self.listener.local_addr().ok().map(|a| a.to_string())
    }
}

// ============================================================================
// 帧编解码
// ============================================================================

/// 帧头大小: 1 字节版本 + 4 字节长度
const HEADER_SIZE: usize = 5;

fn map_eof(e: std::io::Error) -> ProtocolError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        ProtocolError::ConnectionClosed
    } else {
        ProtocolError::Io(e)
    }
}

/// 帧读取器
pub struct FrameReader<R> {
    reader: R,
}

impl<R: AsyncRead + Unpin + Send> FrameReader<R> {
    /// 创建新的帧读取器
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// 读取一帧
    pub async fn read_frame(&mut self) -> Result<Vec<u8>> {
        let mut header = [0u8; HEADER_SIZE];
        self.reader.read_exact(&mut header).await.map_err(map_eof)?;

        let version = header[0];
        if version != PROTOCOL_VERSION {
            tracing::warn!("Frame version mismatch: expected {}, got {}", PROTOCOL_VERSION, version);
            return Err(ProtocolError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                actual: version,
            });
        }

        // 长度（大端序）
        let length = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
        if length > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: length,
                max: MAX_FRAME_SIZE,
            });
        }

        let mut body = vec![0u8; length];
        self.reader.read_exact(&mut body).await.map_err(map_eof)?;
        Ok(body)
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send + 'static> MessageReader for FrameReader<R> {
    async fn recv(&mut self) -> Result<Vec<u8>> {
        self.read_frame().await
    }
}

/// 帧写入器
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin + Send> FrameWriter<W> {
    /// 创建新的帧写入器
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// 写入一帧
    pub async fn write_frame(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: payload.len(),
                max: MAX_FRAME_SIZE,
            });
        }

        let length = payload.len() as u32;
        let mut header = [0u8; HEADER_SIZE];
        header[0] = PROTOCOL_VERSION;
        header[1..5].copy_from_slice(&length.to_be_bytes());

        self.writer.write_all(&header).await?;
        self.writer.write_all(payload).await?;
        self.writer.flush().await?;

        Ok(())
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send + 'static> MessageWriter for FrameWriter<W> {
    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.write_frame(bytes).await
    }

    async fn close(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{CorrelationId, Envelope};
    use serde_json::json;

    #[tokio::test]
    async fn test_tcp_connection() {
        let mut listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client_handle = tokio::spawn(async move {
            let conn = TcpConnector.connect(&addr).await.unwrap();
            let (mut reader, mut writer) = conn.split();

            let req = Envelope::request("calculate", CorrelationId::from("c1"), json!([7]));
            writer.send(&req.encode().unwrap()).await.unwrap();

            let reply = Envelope::decode(&reader.recv().await.unwrap()).unwrap();
            assert_eq!(reply.correlation_id, Some(CorrelationId::from("c1")));
            assert_eq!(reply.data, json!(8));
        });

        let conn = listener.accept().await.unwrap();
        assert!(conn.peer_addr().is_some());
        let (mut reader, mut writer) = conn.split();

        let req = Envelope::decode(&reader.recv().await.unwrap()).unwrap();
        assert_eq!(req.subject, "calculate");
        writer.send(&req.reply(json!(8)).encode().unwrap()).await.unwrap();

        client_handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_tcp_closed_by_peer() {
        let mut listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move { TcpConnector.connect(&addr).await.unwrap() });
        let server_conn = listener.accept().await.unwrap();
        let (mut reader, _writer) = client.await.unwrap().split();

        drop(server_conn);
        assert!(matches!(reader.recv().await, Err(ProtocolError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_frame_version_mismatch() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(client);

        server.write_all(&[9, 0, 0, 0, 1, b'x']).await.unwrap();
        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(err, ProtocolError::VersionMismatch { expected: 1, actual: 9 }));
    }

    #[tokio::test]
    async fn test_frame_too_large() {
        let (client, _server) = tokio::io::duplex(64);
        let mut writer = FrameWriter::new(client);

        let payload = vec![0u8; MAX_FRAME_SIZE + 1];
        let err = writer.write_frame(&payload).await.unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge { .. }));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // 先绑定再释放，拿到一个没有监听者的端口
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        assert!(TcpConnector.connect(&addr).await.is_err());
    }
}
