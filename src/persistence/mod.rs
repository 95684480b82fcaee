use chrono::{DateTime, NaiveDate, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};

use crate::error::PersistenceError;
use crate::events::EngineEvent;
use crate::execution::Position;
use crate::risk::SessionStats;

const CONNECT_TIMEOUT_SECS: u64 = 5;

/// Session state written after every closed trade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub symbol: String,
    pub trading_day: NaiveDate,
    pub stats: SessionStats,
    pub trade: Position,
    pub recorded_at: DateTime<Utc>,
}

impl SessionSnapshot {
    pub fn new(position: Position, stats: SessionStats) -> Self {
        let trading_day = stats
            .trading_day
            .unwrap_or_else(|| position.entry_time.date_naive());
        Self {
            symbol: position.symbol.clone(),
            trading_day,
            stats,
            trade: position,
            recorded_at: Utc::now(),
        }
    }
}

fn session_key(symbol: &str, day: NaiveDate) -> String {
    format!("session:{}:{}", symbol, day)
}

fn trades_key(symbol: &str, day: NaiveDate) -> String {
    format!("trades:{}:{}", symbol, day)
}

/// Best-effort Redis store for session snapshots
///
/// Latest snapshot lives at `session:{symbol}:{day}`; every closed trade is
/// also appended to the sorted set `trades:{symbol}:{day}` scored by exit
/// time.
pub struct SnapshotStore {
    conn: ConnectionManager,
}

impl SnapshotStore {
    /// Connect to Redis
    ///
    /// # Arguments
    /// * `redis_url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    pub async fn connect(redis_url: &str) -> Result<Self, PersistenceError> {
        let client = Client::open(redis_url)?;

        // Add 5 second timeout to connection attempt
        let conn = timeout(
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            ConnectionManager::new(client),
        )
        .await
        .map_err(|_| PersistenceError::Timeout(CONNECT_TIMEOUT_SECS))??;

        tracing::info!("Connected to Redis at {}", redis_url);

        Ok(Self { conn })
    }

    pub async fn save(&mut self, snapshot: &SessionSnapshot) -> Result<(), PersistenceError> {
        let value = serde_json::to_string(snapshot)?;
        let trade = serde_json::to_string(&snapshot.trade)?;
        let score = snapshot
            .trade
            .exit_legs
            .last()
            .map_or(snapshot.recorded_at, |leg| leg.timestamp)
            .timestamp_millis() as f64;

        self.conn
            .set::<_, _, ()>(session_key(&snapshot.symbol, snapshot.trading_day), value)
            .await?;
        self.conn
            .zadd::<_, _, _, ()>(trades_key(&snapshot.symbol, snapshot.trading_day), trade, score)
            .await?;

        tracing::debug!(
            symbol = %snapshot.symbol,
            day = %snapshot.trading_day,
            trades_today = snapshot.stats.trades_today,
            "Saved session snapshot"
        );
        Ok(())
    }

    pub async fn load_session(
        &mut self,
        symbol: &str,
        day: NaiveDate,
    ) -> Result<Option<SessionSnapshot>, PersistenceError> {
        let raw: Option<String> = self.conn.get(session_key(symbol, day)).await?;
        raw.map(|json| serde_json::from_str(&json))
            .transpose()
            .map_err(PersistenceError::from)
    }

    /// Closed trades of the day, oldest first
    pub async fn load_trades(&mut self, symbol: &str, day: NaiveDate) -> Result<Vec<Position>, PersistenceError> {
        let raw: Vec<String> = self.conn.zrange(trades_key(symbol, day), 0, -1).await?;
        raw.iter()
            .map(|json| serde_json::from_str(json).map_err(PersistenceError::from))
            .collect()
    }

    pub async fn clear_day(&mut self, symbol: &str, day: NaiveDate) -> Result<(), PersistenceError> {
        self.conn
            .del::<_, ()>(vec![session_key(symbol, day), trades_key(symbol, day)])
            .await?;
        Ok(())
    }
}

/// Write a snapshot for every closed position until the bus closes
///
/// Runs on its own task so the trading loop never waits on Redis. Write
/// failures are logged and dropped.
pub fn spawn_snapshot_writer(
    mut store: SnapshotStore,
    mut events: broadcast::Receiver<EngineEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(EngineEvent::PositionClosed { position, stats }) => {
                    let snapshot = SessionSnapshot::new(position, stats);
                    if let Err(e) = store.save(&snapshot).await {
                        tracing::warn!(error = %e, symbol = %snapshot.symbol, "Failed to persist session snapshot");
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Snapshot writer lagged behind event bus");
                }
                Err(RecvError::Closed) => break,
            }
        }
        tracing::debug!("Snapshot writer stopped");
    })
}
