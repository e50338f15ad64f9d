//! 对局会话
//!
//! 在关联引擎之上维护本地对局状态：提交着法、请求评估和可落子位置。

mod state;

pub use state::{GameState, Stone, BLACK, WHITE};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use protocol::{Connector, READY_SUBJECT};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::RpcError;
use crate::network::{RpcClient, SubscriptionHandle};

/// 求解下一手
pub const CALCULATE_SUBJECT: &str = "calculate";
/// 可落子位置
pub const MOVES_SUBJECT: &str = "moves";
/// 局面评估
pub const EVALUATE_SUBJECT: &str = "evaluate";

/// 会话错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GameError {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// 远端引擎没有给出应手
    #[error("Server returned no answering move")]
    MissingReply,

    #[error("Invalid reply: {0}")]
    InvalidReply(String),

    #[error("Cell {0} is already occupied")]
    CellOccupied(u32),
}

impl From<serde_json::Error> for GameError {
    fn from(e: serde_json::Error) -> Self {
        GameError::InvalidReply(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GameError>;

#[derive(Default)]
struct SessionState {
    current: GameState,
    history: Vec<GameState>,
    legal_moves: Vec<u32>,
}

/// 对局会话
///
/// 克隆的会话共享同一份对局状态。
pub struct GameSession<C: Connector> {
    client: RpcClient<C>,
    state: Arc<Mutex<SessionState>>,
}

impl<C: Connector> Clone for GameSession<C> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            state: self.state.clone(),
        }
    }
}

impl<C: Connector> GameSession<C> {
    pub fn new(client: RpcClient<C>) -> Self {
        Self {
            client,
            state: Arc::new(Mutex::new(SessionState::default())),
        }
    }

    pub fn client(&self) -> &RpcClient<C> {
        &self.client
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 当前局面
    pub fn current(&self) -> GameState {
        self.lock().current.clone()
    }

    /// 之前的局面，按时间顺序
    pub fn history(&self) -> Vec<GameState> {
        self.lock().history.clone()
    }

    /// 最近一次获取的可落子位置
    pub fn legal_moves(&self) -> Vec<u32> {
        self.lock().legal_moves.clone()
    }

    /// 重新开局
    pub fn reset(&self) {
        *self.lock() = SessionState::default();
    }

    /// 落子并等待远端引擎应手
    ///
    /// 回复可以是完整的局面，也可以只是应手的格子编号。
    /// 回复中没有新着法时返回 `MissingReply`，本地局面保持不变。
    pub async fn submit_move(&self, cell: u32) -> Result<GameState> {
        let mut submitted = self.current();
        if submitted.is_occupied(cell) {
            return Err(GameError::CellOccupied(cell));
        }
        submitted.play(cell);

        let reply = self
            .client
            .call(CALCULATE_SUBJECT, serde_json::to_value(&submitted)?)
            .await?;

        let next = match reply {
            Value::Null => return Err(GameError::MissingReply),
            Value::Number(n) => {
                let answer = n
                    .as_u64()
                    .and_then(|v| u32::try_from(v).ok())
                    .ok_or_else(|| GameError::InvalidReply(format!("not a cell: {}", n)))?;
                if submitted.is_occupied(answer) {
                    return Err(GameError::InvalidReply(format!("cell {} is occupied", answer)));
                }
                let mut next = submitted.clone();
                next.play(answer);
                next
            }
            value @ Value::Object(_) => {
                let next: GameState = serde_json::from_value(value)?;
                if !submitted.is_extended_by(&next) {
                    return Err(GameError::MissingReply);
                }
                next
            }
            other => return Err(GameError::InvalidReply(other.to_string())),
        };

        debug!(cell, answer = ?next.last_move(), "Move answered");

        let mut session = self.lock();
        let previous = std::mem::replace(&mut session.current, next.clone());
        session.history.push(previous);
        Ok(next)
    }

    /// 评估当前局面
    pub async fn evaluate(&self) -> Result<f64> {
        let current = self.current();
        let reply = self
            .client
            .call(EVALUATE_SUBJECT, serde_json::to_value(&current)?)
            .await?;

        let score = match &reply {
            Value::Number(n) => n.as_f64(),
            Value::Object(map) => map.get("score").and_then(Value::as_f64),
            _ => None,
        }
        .ok_or_else(|| GameError::InvalidReply(reply.to_string()))?;

        self.lock().current.score = score;
        Ok(score)
    }

    /// 获取当前局面的可落子位置
    pub async fn refresh_moves(&self) -> Result<Vec<u32>> {
        let current = self.current();
        let reply = self
            .client
            .call(MOVES_SUBJECT, serde_json::to_value(&current)?)
            .await?;

        let moves: Vec<u32> = serde_json::from_value(reply)?;
        self.lock().legal_moves = moves.clone();
        Ok(moves)
    }

    /// 每次连接可用时刷新可落子位置
    ///
    /// 回调持有会话的引用，不再需要时用返回的句柄取消订阅。
    pub fn load_moves_on_ready(&self) -> Result<SubscriptionHandle> {
        let session = self.clone();
        let handle = self.client.subscribe(READY_SUBJECT, move |_| {
            let session = session.clone();
            tokio::spawn(async move {
                if let Err(e) = session.refresh_moves().await {
                    warn!(error = %e, "Failed to load moves");
                }
            });
        })?;
        Ok(handle)
    }
}
