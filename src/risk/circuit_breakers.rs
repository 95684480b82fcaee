use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Circuit breakers that stop new entries or halt the session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakers {
    pub max_daily_trades: u32,
    pub max_consecutive_failures: u32,
}

impl Default for CircuitBreakers {
    fn default() -> Self {
        Self {
            max_daily_trades: 5,         // Max 5 entries per day
            max_consecutive_failures: 5, // 5 failed ticks in a row
        }
    }
}

/// Per-session trading counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub trading_day: Option<NaiveDate>,
    pub trades_today: u32,
    pub pnl_today: f64,
    pub last_trade_time: Option<DateTime<Utc>>,
}

impl SessionStats {
    /// Reset counters at the start of a trading day
    pub fn begin_session(&mut self, day: NaiveDate) {
        *self = Self {
            trading_day: Some(day),
            ..Self::default()
        };
    }

    pub fn record_entry(&mut self, timestamp: DateTime<Utc>) {
        self.trades_today += 1;
        self.last_trade_time = Some(timestamp);
    }

    pub fn record_exit(&mut self, net_pnl: f64, timestamp: DateTime<Utc>) {
        self.pnl_today += net_pnl;
        self.last_trade_time = Some(timestamp);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CircuitBreakerTrip {
    DailyTradeLimit,
    ConsecutiveFailures,
}

impl CircuitBreakers {
    /// Check whether a new entry is allowed today
    pub fn check_entry(&self, stats: &SessionStats) -> Result<(), CircuitBreakerTrip> {
        if stats.trades_today >= self.max_daily_trades {
            return Err(CircuitBreakerTrip::DailyTradeLimit);
        }
        Ok(())
    }

    pub fn failure_streak(&self) -> FailureStreak {
        FailureStreak::new(self.max_consecutive_failures)
    }
}

/// Rolling count of consecutive per-tick failures, reset on success
#[derive(Debug, Clone)]
pub struct FailureStreak {
    count: u32,
    threshold: u32,
}

impl FailureStreak {
    pub fn new(threshold: u32) -> Self {
        Self {
            count: 0,
            threshold: threshold.max(1),
        }
    }

    /// Record a failure; trips once the threshold is reached
    pub fn record_failure(&mut self) -> Result<(), CircuitBreakerTrip> {
        self.count += 1;
        if self.count >= self.threshold {
            return Err(CircuitBreakerTrip::ConsecutiveFailures);
        }
        Ok(())
    }

    pub fn record_success(&mut self) {
        self.count = 0;
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}
