//! 对局状态

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// 棋子
pub type Stone = u8;

/// 先手棋子
pub const BLACK: Stone = 1;
/// 后手棋子
pub const WHITE: Stone = 2;

/// 对局状态，与远端引擎交换的 JSON 结构
///
/// `board` 以格子编号为键；`current_turn` 是已落子数，
/// 偶数轮由黑方落子。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GameState {
    pub board: BTreeMap<u32, Stone>,
    pub current_turn: u32,
    pub score: f64,
    pub moves: Vec<u32>,
}

impl GameState {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前轮到的棋子
    pub fn to_move(&self) -> Stone {
        if self.current_turn % 2 == 0 {
            BLACK
        } else {
            WHITE
        }
    }

    pub fn is_occupied(&self, cell: u32) -> bool {
        self.board.contains_key(&cell)
    }

    /// 落子并轮换
    pub fn play(&mut self, cell: u32) {
        let stone = self.to_move();
        self.board.insert(cell, stone);
        self.moves.push(cell);
        self.current_turn += 1;
    }

    /// `other` 的着法序列是否严格延续了本状态
    pub fn is_extended_by(&self, other: &GameState) -> bool {
        other.moves.len() > self.moves.len() && other.moves.starts_with(&self.moves)
    }

    pub fn last_move(&self) -> Option<u32> {
        self.moves.last().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_format() {
        let mut state = GameState::new();
        state.play(112);

        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(
            value,
            json!({"board": {"112": 1}, "currentTurn": 1, "score": 0.0, "moves": [112]})
        );

        let back: GameState = serde_json::from_value(value).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn test_partial_state_decodes() {
        let state: GameState = serde_json::from_value(json!({"moves": [1, 2]})).unwrap();
        assert_eq!(state.moves, vec![1, 2]);
        assert!(state.board.is_empty());
    }

    #[test]
    fn test_play_alternates() {
        let mut state = GameState::new();
        state.play(10);
        state.play(11);
        assert_eq!(state.board[&10], BLACK);
        assert_eq!(state.board[&11], WHITE);
        assert_eq!(state.to_move(), BLACK);
        assert_eq!(state.last_move(), Some(11));
    }

    #[test]
    fn test_is_extended_by() {
        let mut before = GameState::new();
        before.play(1);

        let mut after = before.clone();
        assert!(!before.is_extended_by(&after));
        after.play(2);
        assert!(before.is_extended_by(&after));

        let unrelated = GameState {
            moves: vec![5, 2],
            ..GameState::default()
        };
        assert!(!before.is_extended_by(&unrelated));
    }
}
