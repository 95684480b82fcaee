use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::auth::AuthSession;
use super::buffer::TickBuffer;
use super::source::{StreamHandle, TickSource};
use crate::error::FeedError;
use crate::models::Tick;

/// Random-walk quote source for paper sessions without market access
pub struct SyntheticSource {
    rng: StdRng,
    price: f64,
    volatility: f64,
    interval: Duration,
    last_timestamp: Option<DateTime<Utc>>,
}

impl SyntheticSource {
    /// Create a new source with a seed for reproducibility
    ///
    /// # Arguments
    /// * `seed` - RNG seed
    /// * `start_price` - First price of the walk
    /// * `interval` - Delay before each quote, mimicking a live cadence
    pub fn new(seed: u64, start_price: f64, interval: Duration) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            price: start_price,
            volatility: 0.0005, // ±0.05% per tick
            interval,
            last_timestamp: None,
        }
    }

    pub fn with_volatility(mut self, volatility: f64) -> Self {
        self.volatility = volatility;
        self
    }

    fn next_tick(&mut self) -> Tick {
        let change = self.price * self.rng.gen_range(-self.volatility..=self.volatility);
        self.price = (self.price + change).max(0.05);

        // Keep timestamps strictly increasing even when polled within a millisecond
        let mut timestamp = Utc::now();
        if let Some(last) = self.last_timestamp {
            if timestamp <= last {
                timestamp = last + chrono::Duration::milliseconds(1);
            }
        }
        self.last_timestamp = Some(timestamp);

        let volume = self.rng.gen_range(1.0..500.0_f64).round();
        Tick::new(timestamp, self.price, volume)
    }
}

impl TickSource for SyntheticSource {
    fn name(&self) -> &str {
        "synthetic"
    }

    async fn open(&mut self, _session: &AuthSession) -> Result<(), FeedError> {
        tracing::info!(start_price = self.price, "Synthetic quote source ready");
        Ok(())
    }

    async fn subscribe(&mut self, _symbol: &str, _buffer: TickBuffer) -> Result<StreamHandle, FeedError> {
        Err(FeedError::StreamingUnsupported)
    }

    async fn poll(&mut self, _symbol: &str) -> Result<Tick, FeedError> {
        if !self.interval.is_zero() {
            tokio::time::sleep(self.interval).await;
        }
        Ok(self.next_tick())
    }

    async fn close(&mut self) {}
}
