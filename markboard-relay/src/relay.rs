//! Fan-out of room events to every member except the sender.
//!
//! Each event is encoded once and the shared frame is pushed to every
//! target's outbound queue. Delivery is best-effort and at most once: a
//! target whose transport closed or whose queue is full misses the frame,
//! and nobody else notices.

use std::sync::Arc;

use crate::error::RelayError;
use crate::protocol::{BoardEvent, RoomId};
use crate::registry::ConnectionId;
use crate::state::{RelayCounters, RelayState};

/// Delivery report for one relayed event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOut {
    /// Members other than the sender at broadcast time
    pub targets: usize,
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct EventRelay {
    state: Arc<RelayState>,
}

impl EventRelay {
    pub fn new(state: Arc<RelayState>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &Arc<RelayState> {
        &self.state
    }

    /// Push `event` to every member of `room` except `sender`.
    ///
    /// Fails with `NotMember` if `sender` is not currently in `room`; in that
    /// case nothing is delivered. Per-target failures only show up in the
    /// returned [`FanOut`].
    pub async fn relay(
        &self,
        sender: ConnectionId,
        room: &RoomId,
        event: BoardEvent,
    ) -> Result<FanOut, RelayError> {
        let kind = event.kind();
        let frame = event.into_server_event(room.clone()).encode()?;

        // Delivery happens under the read lock so a concurrent switch can
        // never be observed half done.
        let membership = self.state.read().await;
        if membership.registry().room(sender) != Some(room) {
            return Err(RelayError::NotMember {
                connection: sender,
                room: room.clone(),
            });
        }

        let mut report = FanOut::default();
        for target in membership.rooms().members_except(room, sender) {
            report.targets += 1;
            let Some(handle) = membership.registry().handle(target) else {
                report.failed += 1;
                continue;
            };
            match handle.deliver(frame.clone()) {
                Ok(()) => report.delivered += 1,
                Err(failure) => {
                    report.failed += 1;
                    log::debug!("Dropped {kind} for {target} in room {room}: {failure}");
                }
            }
        }
        drop(membership);

        let counters = self.state.counters();
        RelayCounters::bump(&counters.events_relayed, 1);
        RelayCounters::bump(&counters.deliveries, report.delivered as u64);
        RelayCounters::bump(&counters.delivery_failures, report.failed as u64);

        log::debug!(
            "Relayed {kind} from {sender} in room {room} to {}/{} peers",
            report.delivered,
            report.targets
        );
        Ok(report)
    }
}
