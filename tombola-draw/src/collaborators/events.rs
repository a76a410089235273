use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tombola_core::{LotteryId, UserId, Winner};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WinnerSummary {
    pub user_id: UserId,
    pub position: u32,
}

impl From<&Winner> for WinnerSummary {
    fn from(winner: &Winner) -> Self {
        Self {
            user_id: winner.user_id,
            position: winner.position,
        }
    }
}

/// Fire-and-forget events emitted by the engine. Delivery and formatting
/// belong to the notifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LotteryEvent {
    ParticipantJoined {
        lottery_id: LotteryId,
        count: u32,
    },
    ParticipantLeft {
        lottery_id: LotteryId,
        count: u32,
    },
    DrawCompleted {
        lottery_id: LotteryId,
        winners: Vec<WinnerSummary>,
    },
    LotteryCancelled {
        lottery_id: LotteryId,
        reason: String,
    },
    /// Operator alert.
    DrawFailed {
        lottery_id: LotteryId,
        error: String,
    },
    PostLockDue {
        lottery_id: LotteryId,
    },
    WinnersNotificationDue {
        lottery_id: LotteryId,
        winners: Vec<WinnerSummary>,
    },
}

impl LotteryEvent {
    pub fn lottery_id(&self) -> LotteryId {
        match self {
            LotteryEvent::ParticipantJoined { lottery_id, .. }
            | LotteryEvent::ParticipantLeft { lottery_id, .. }
            | LotteryEvent::DrawCompleted { lottery_id, .. }
            | LotteryEvent::LotteryCancelled { lottery_id, .. }
            | LotteryEvent::DrawFailed { lottery_id, .. }
            | LotteryEvent::PostLockDue { lottery_id }
            | LotteryEvent::WinnersNotificationDue { lottery_id, .. } => *lottery_id,
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, event: LotteryEvent);
}

/// Writes every event to the log as JSON.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: LotteryEvent) {
        let payload = serde_json::to_string(&event).unwrap_or_else(|e| e.to_string());
        match event {
            LotteryEvent::DrawFailed { .. } => tracing::error!("lottery event: {}", payload),
            _ => tracing::info!("lottery event: {}", payload),
        }
    }
}

/// Keeps events in memory, in emission order.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    events: Mutex<Vec<LotteryEvent>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LotteryEvent> {
        self.events.lock().clone()
    }

    pub fn events_for(&self, lottery_id: LotteryId) -> Vec<LotteryEvent> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.lottery_id() == lottery_id)
            .cloned()
            .collect()
    }
}

impl Notifier for MemoryNotifier {
    fn notify(&self, event: LotteryEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_event_wire_shape() {
        let id = Uuid::nil();
        let event = LotteryEvent::DrawCompleted {
            lottery_id: id,
            winners: vec![WinnerSummary {
                user_id: 7,
                position: 1,
            }],
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "draw_completed");
        assert_eq!(json["winners"][0]["position"], 1);
    }
}
