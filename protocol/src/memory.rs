//! 进程内传输
//!
//! 用 tokio mpsc 通道模拟一条双工连接。`pair()` 返回客户端使用的
//! `MemoryConnector` 和对端使用的 `MemoryAcceptor`。连接器会统计
//! 建立连接的次数，并可被设置为拒绝连接或写入失败。

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{ProtocolError, Result};
use crate::message::Envelope;
use crate::transport::{Connection, Connector, MessageReader, MessageWriter};
use crate::MAX_FRAME_SIZE;

/// 连接器与对端共享的控制状态
#[derive(Debug, Default)]
struct Controls {
    attempts: AtomicUsize,
    refuse: AtomicBool,
    fail_writes: AtomicBool,
    /// 写入永不完成（对端不再读取）
    stall_writes: AtomicBool,
    /// 握手延迟（毫秒）
    delay_ms: AtomicUsize,
}

/// 创建一对进程内连接器和接受器
pub fn pair() -> (MemoryConnector, MemoryAcceptor) {
    let (tx, rx) = mpsc::unbounded_channel();
    let controls = Arc::new(Controls::default());
    (
        MemoryConnector {
            peers: tx,
            controls: controls.clone(),
        },
        MemoryAcceptor { incoming: rx },
    )
}

/// 进程内连接器
#[derive(Clone, Debug)]
pub struct MemoryConnector {
    peers: mpsc::UnboundedSender<MemoryPeer>,
    controls: Arc<Controls>,
}

impl MemoryConnector {
    /// 已发起的连接次数（含失败）
    pub fn attempts(&self) -> usize {
        self.controls.attempts.load(Ordering::SeqCst)
    }

    /// 设置是否拒绝新连接
    pub fn set_refuse(&self, refuse: bool) {
        self.controls.refuse.store(refuse, Ordering::SeqCst);
    }

    /// 设置写入是否失败
    pub fn set_fail_writes(&self, fail: bool) {
        self.controls.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// 设置写入是否挂起
    pub fn set_stall_writes(&self, stall: bool) {
        self.controls.stall_writes.store(stall, Ordering::SeqCst);
    }

    /// 设置握手延迟
    pub fn set_delay(&self, delay: Duration) {
        self.controls
            .delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    type Conn = MemoryConnection;

    async fn connect(&self, addr: &str) -> Result<Self::Conn> {
        self.controls.attempts.fetch_add(1, Ordering::SeqCst);

        let delay = self.controls.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }

        if self.controls.refuse.load(Ordering::SeqCst) {
            return Err(ProtocolError::ConnectionRefused(addr.to_string()));
        }

        let (to_peer, from_client) = mpsc::unbounded_channel();
        let (to_client, from_peer) = mpsc::unbounded_channel();

        self.peers
            .send(MemoryPeer {
                incoming: from_client,
                outgoing: to_client,
            })
            .map_err(|_| ProtocolError::ConnectionRefused(addr.to_string()))?;

        Ok(MemoryConnection {
            reader: MemoryReader { rx: from_peer },
            writer: MemoryWriter {
                tx: Some(to_peer),
                controls: self.controls.clone(),
            },
            addr: addr.to_string(),
        })
    }
}

/// 进程内连接（客户端一侧）
pub struct MemoryConnection {
    reader: MemoryReader,
    writer: MemoryWriter,
    addr: String,
}

impl Connection for MemoryConnection {
    type Reader = MemoryReader;
    type Writer = MemoryWriter;

    fn peer_addr(&self) -> Option<String> {
        Some(self.addr.clone())
    }

    fn split(self) -> (Self::Reader, Self::Writer) {
        (self.reader, self.writer)
    }
}

/// 客户端读取端
pub struct MemoryReader {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

#[async_trait]
impl MessageReader for MemoryReader {
    async fn recv(&mut self) -> Result<Vec<u8>> {
        self.rx.recv().await.ok_or(ProtocolError::ConnectionClosed)
    }
}

/// 客户端写入端
pub struct MemoryWriter {
    tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    controls: Arc<Controls>,
}

#[async_trait]
impl MessageWriter for MemoryWriter {
    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        if self.controls.fail_writes.load(Ordering::SeqCst) {
            return Err(ProtocolError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "write rejected",
            )));
        }
        if self.controls.stall_writes.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if bytes.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: bytes.len(),
                max: MAX_FRAME_SIZE,
            });
        }

        let tx = self.tx.as_ref().ok_or(ProtocolError::ConnectionClosed)?;
        tx.send(bytes.to_vec())
            .map_err(|_| ProtocolError::ConnectionClosed)
    }

    async fn close(&mut self) -> Result<()> {
        self.tx = None;
        Ok(())
    }
}

/// 接受器（对端一侧）
pub struct MemoryAcceptor {
    incoming: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryAcceptor {
    /// 等待下一条连接
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.incoming.recv().await
    }

    /// 非阻塞地取出已建立的连接
    pub fn try_accept(&mut self) -> Option<MemoryPeer> {
        self.incoming.try_recv().ok()
    }
}

/// 对端持有的连接；丢弃即断开
pub struct MemoryPeer {
    incoming: mpsc::UnboundedReceiver<Vec<u8>>,
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
}

impl MemoryPeer {
    /// 接收客户端发来的原始消息，客户端关闭时返回 None
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.incoming.recv().await
    }

    /// 接收并解码一个信封
    pub async fn recv_envelope(&mut self) -> Result<Envelope> {
        let bytes = self.recv().await.ok_or(ProtocolError::ConnectionClosed)?;
        Envelope::decode(&bytes)
    }

    /// 向客户端发送原始消息
    pub fn send_raw(&self, bytes: impl Into<Vec<u8>>) -> Result<()> {
        self.outgoing
            .send(bytes.into())
            .map_err(|_| ProtocolError::ConnectionClosed)
    }

    /// 向客户端发送信封
    pub fn send(&self, envelope: &Envelope) -> Result<()> {
        self.send_raw(envelope.encode()?)
    }
}
