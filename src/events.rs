use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::execution::{ExitLeg, Position};
use crate::feed::FeedState;
use crate::models::TradingSignal;
use crate::risk::SessionStats;

const DEFAULT_CAPACITY: usize = 256;

/// Notifications published by the engine for observers
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    SignalGenerated(TradingSignal),
    PositionOpened {
        position: Position,
    },
    PositionPartiallyClosed {
        position_id: Uuid,
        leg: ExitLeg,
        remaining_quantity: u64,
    },
    PositionClosed {
        position: Position,
        stats: SessionStats,
    },
    FeedStatusChanged {
        from: FeedState,
        to: FeedState,
        at: DateTime<Utc>,
    },
}

/// Fan-out of engine events
///
/// Publishing never blocks and never fails: with no subscribers the event
/// is discarded, and slow subscribers observe `Lagged`.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, event: EngineEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
