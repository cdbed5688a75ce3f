//! Board state reconciliation for late joiners.
//!
//! The relay keeps no copy of the board. A client that joins an active room
//! sends a state request (`markboardReq`); it is fanned out like any other
//! event, and any member may answer with a full-board snapshot
//! (`markboard`), which again reaches the whole room. There is no
//! coordinator: several members may answer, and receivers keep the last
//! snapshot they saw.

use serde_json::Value;

use crate::error::RelayError;
use crate::protocol::{BoardEvent, RoomId};
use crate::registry::ConnectionId;
use crate::relay::{EventRelay, FanOut};

impl EventRelay {
    /// Ask the other members of `room` to share their board.
    pub async fn request_board(
        &self,
        requester: ConnectionId,
        room: &RoomId,
    ) -> Result<FanOut, RelayError> {
        self.relay(requester, room, BoardEvent::MarkboardReq).await
    }

    /// Send a full-board snapshot to the other members of `room`.
    pub async fn share_board(
        &self,
        responder: ConnectionId,
        room: &RoomId,
        board: Value,
    ) -> Result<FanOut, RelayError> {
        self.relay(responder, room, BoardEvent::Markboard(board)).await
    }
}

/// Receiver-side view of the board: the most recent snapshot wins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LatestBoard {
    room: Option<RoomId>,
    board: Option<Value>,
    received: u64,
}

impl LatestBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a snapshot for `room`. A snapshot for a different room than
    /// the previous one replaces it outright.
    pub fn apply(&mut self, room: RoomId, board: Value) {
        if self.room.as_ref() != Some(&room) {
            self.received = 0;
        }
        self.room = Some(room);
        self.board = Some(board);
        self.received += 1;
    }

    /// Forget everything, e.g. after switching rooms.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn room(&self) -> Option<&RoomId> {
        self.room.as_ref()
    }

    pub fn board(&self) -> Option<&Value> {
        self.board.as_ref()
    }

    /// Snapshots applied for the current room, duplicates included.
    pub fn received(&self) -> u64 {
        self.received
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ServerEvent;
    use crate::registry::ConnectionHandle;
    use crate::state::RelayState;
    use serde_json::json;
    use std::sync::Arc;

    fn room(name: &str) -> RoomId {
        RoomId::parse(name).unwrap()
    }

    #[tokio::test]
    async fn test_request_then_share() {
        let state = Arc::new(RelayState::new());
        let relay = EventRelay::new(state.clone());

        let (handle_a, mut rx_a) = ConnectionHandle::channel(8);
        let (handle_b, mut rx_b) = ConnectionHandle::channel(8);
        let (handle_c, mut rx_c) = ConnectionHandle::channel(8);
        let (a, b, c) = {
            let mut m = state.write().await;
            let ids = (m.register(handle_a), m.register(handle_b), m.register(handle_c));
            m.switch_room(ids.0, room("r1")).unwrap();
            m.switch_room(ids.1, room("r1")).unwrap();
            m.switch_room(ids.2, room("r1")).unwrap();
            ids
        };

        relay.request_board(a, &room("r1")).await.unwrap();
        for rx in [&mut rx_b, &mut rx_c] {
            let event = ServerEvent::decode(rx.try_recv().unwrap().as_str()).unwrap();
            assert_eq!(event, ServerEvent::MarkboardReq { room: room("r1") });
        }

        // both peers answer; the requester sees two equivalent snapshots
        let board = json!({"shapes": [{"kind": "line", "points": [0, 0, 4, 4]}]});
        relay.share_board(b, &room("r1"), board.clone()).await.unwrap();
        relay.share_board(c, &room("r1"), board.clone()).await.unwrap();

        let mut latest = LatestBoard::new();
        while let Ok(frame) = rx_a.try_recv() {
            if let ServerEvent::Markboard { room, markboard } = ServerEvent::decode(frame.as_str()).unwrap() {
                latest.apply(room, markboard);
            }
        }
        assert_eq!(latest.board(), Some(&board));
        assert_eq!(latest.received(), 2);
    }

    #[test]
    fn test_latest_board_last_write_wins() {
        let mut latest = LatestBoard::new();
        assert!(latest.board().is_none());

        latest.apply(room("r1"), json!({"v": 1}));
        latest.apply(room("r1"), json!({"v": 2}));
        assert_eq!(latest.board(), Some(&json!({"v": 2})));
        assert_eq!(latest.received(), 2);

        latest.apply(room("r2"), json!({"v": 9}));
        assert_eq!(latest.room(), Some(&room("r2")));
        assert_eq!(latest.received(), 1);

        latest.reset();
        assert_eq!(latest, LatestBoard::default());
    }
}
