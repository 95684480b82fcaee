use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FeedError;

/// A single timestamped price/volume observation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Tick {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub volume: f64,
}

impl Tick {
    pub fn new(timestamp: DateTime<Utc>, price: f64, volume: f64) -> Self {
        Self {
            timestamp,
            price,
            volume,
        }
    }

    /// Reject quotes that would poison indicator state
    pub fn validate(&self) -> Result<(), FeedError> {
        if !self.price.is_finite() || self.price <= 0.0 {
            return Err(FeedError::DataFormat(format!(
                "price must be positive, got {}",
                self.price
            )));
        }
        if !self.volume.is_finite() || self.volume < 0.0 {
            return Err(FeedError::DataFormat(format!(
                "volume must be non-negative, got {}",
                self.volume
            )));
        }
        Ok(())
    }
}

/// Raw quote as delivered by upstream APIs (REST body or stream frame)
#[derive(Debug, Clone, Deserialize)]
pub struct RawQuote {
    #[serde(default)]
    pub symbol: Option<String>,
    pub price: Option<f64>,
    #[serde(default)]
    pub volume: Option<f64>,
    /// Milliseconds since epoch
    pub timestamp: Option<i64>,
}

impl RawQuote {
    pub fn into_tick(self) -> Result<Tick, FeedError> {
        let price = self
            .price
            .ok_or_else(|| FeedError::DataFormat("missing price".to_string()))?;
        let millis = self
            .timestamp
            .ok_or_else(|| FeedError::DataFormat("missing timestamp".to_string()))?;
        let timestamp = DateTime::<Utc>::from_timestamp_millis(millis)
            .ok_or_else(|| FeedError::DataFormat(format!("bad timestamp {}", millis)))?;

        let tick = Tick::new(timestamp, price, self.volume.unwrap_or(0.0));
        tick.validate()?;
        Ok(tick)
    }
}

/// Parse a JSON quote frame into a validated tick
pub fn parse_quote(text: &str) -> Result<Tick, FeedError> {
    let raw: RawQuote =
        serde_json::from_str(text).map_err(|e| FeedError::DataFormat(e.to_string()))?;
    raw.into_tick()
}

/// Trading signal action
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SignalAction {
    Buy,
    Close,
    Hold,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradingSignal {
    pub action: SignalAction,
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub reason: String,
}

impl TradingSignal {
    pub fn hold(tick: &Tick, reason: impl Into<String>) -> Self {
        Self {
            action: SignalAction::Hold,
            timestamp: tick.timestamp,
            price: tick.price,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_validation() {
        let ts = Utc::now();
        assert!(Tick::new(ts, 100.0, 10.0).validate().is_ok());
        assert!(Tick::new(ts, 0.0, 10.0).validate().is_err());
        assert!(Tick::new(ts, f64::NAN, 10.0).validate().is_err());
        assert!(Tick::new(ts, 100.0, -1.0).validate().is_err());
    }

    #[test]
    fn test_parse_quote() {
        let tick = parse_quote(r#"{"symbol":"NIFTY","price":101.5,"volume":20,"timestamp":1700000000000}"#)
            .unwrap();
        assert_eq!(tick.price, 101.5);
        assert_eq!(tick.volume, 20.0);
        assert_eq!(tick.timestamp.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn test_parse_quote_malformed() {
        assert!(matches!(
            parse_quote("not json"),
            Err(FeedError::DataFormat(_))
        ));
        assert!(matches!(
            parse_quote(r#"{"price":101.5}"#),
            Err(FeedError::DataFormat(_))
        ));
        assert!(matches!(
            parse_quote(r#"{"price":-3.0,"timestamp":1700000000000}"#),
            Err(FeedError::DataFormat(_))
        ));
    }
}
