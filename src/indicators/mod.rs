// Streaming technical indicators
pub mod atr;
pub mod bollinger;
pub mod moving_average;
pub mod rsi;
pub mod vwap;

pub use atr::Atr;
pub use bollinger::{BandReading, Bollinger};
pub use moving_average::{Ema, Macd, MacdReading, TrendEma};
pub use rsi::Rsi;
pub use vwap::Vwap;

use chrono::{FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::config::{IndicatorSettings, SignalSettings};
use crate::models::Tick;

/// Output of a single indicator update
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    /// Not enough samples yet. Never reported as zero.
    Unavailable,
    Value(f64),
    Macd(MacdReading),
    Band(BandReading),
}

impl Reading {
    fn value(self) -> Option<f64> {
        match self {
            Reading::Value(v) => Some(v),
            _ => None,
        }
    }
}

impl From<Option<f64>> for Reading {
    fn from(value: Option<f64>) -> Self {
        value.map_or(Reading::Unavailable, Reading::Value)
    }
}

/// Closed set of indicators the engine knows how to drive
#[derive(Debug, Clone)]
pub enum Indicator {
    Ema(Ema),
    TrendEma(TrendEma),
    Macd(Macd),
    Vwap(Vwap),
    Atr(Atr),
    Rsi(Rsi),
    Bollinger(Bollinger),
}

impl Indicator {
    /// Consume one tick. `day` is the tick's trading day in exchange time.
    pub fn update(&mut self, tick: &Tick, day: NaiveDate) -> Reading {
        let price = tick.price;
        match self {
            Indicator::Ema(ema) => {
                ema.update(price);
                ema.reading().into()
            }
            Indicator::TrendEma(trend) => trend.update(price, tick.timestamp.timestamp()).into(),
            Indicator::Macd(macd) => macd.update(price).map_or(Reading::Unavailable, Reading::Macd),
            Indicator::Vwap(vwap) => vwap.update(price, tick.volume, day).into(),
            Indicator::Atr(atr) => atr.update(price, price, price).into(),
            Indicator::Rsi(rsi) => rsi.update(price).into(),
            Indicator::Bollinger(bands) => {
                bands.update(price).map_or(Reading::Unavailable, Reading::Band)
            }
        }
    }

    pub fn reset(&mut self) {
        match self {
            Indicator::Ema(ema) => ema.reset(),
            Indicator::TrendEma(trend) => trend.reset(),
            Indicator::Macd(macd) => macd.reset(),
            Indicator::Vwap(vwap) => vwap.reset(),
            Indicator::Atr(atr) => atr.reset(),
            Indicator::Rsi(rsi) => rsi.reset(),
            Indicator::Bollinger(bands) => bands.reset(),
        }
    }
}

/// Which snapshot field an indicator feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorSlot {
    FastEma,
    SlowEma,
    TrendEma,
    Macd,
    Vwap,
    Atr,
    Rsi,
    Bollinger,
}

/// Latest readings, `None` where unavailable or not configured
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub fast_ema: Option<f64>,
    pub slow_ema: Option<f64>,
    pub trend_ema: Option<f64>,
    pub macd: Option<MacdReading>,
    pub vwap: Option<f64>,
    pub atr: Option<f64>,
    pub rsi: Option<f64>,
    pub bollinger: Option<BandReading>,
    pub samples: u64,
}

/// Owns every indicator state for the trading session
///
/// Indicators are selected once from configuration; each tick updates all of
/// them exactly once in O(1).
pub struct IndicatorEngine {
    indicators: Vec<(IndicatorSlot, Indicator)>,
    offset: FixedOffset,
    snapshot: IndicatorSnapshot,
}

impl IndicatorEngine {
    pub fn new(settings: &IndicatorSettings, signal: &SignalSettings, offset: FixedOffset) -> Self {
        let mut indicators = vec![
            (
                IndicatorSlot::FastEma,
                Indicator::Ema(Ema::new(settings.fast_ema_period)),
            ),
            (
                IndicatorSlot::SlowEma,
                Indicator::Ema(Ema::new(settings.slow_ema_period)),
            ),
            (IndicatorSlot::Vwap, Indicator::Vwap(Vwap::new())),
        ];

        if signal.use_macd || signal.exit_on_reversal {
            indicators.push((
                IndicatorSlot::Macd,
                Indicator::Macd(Macd::new(
                    settings.macd_fast,
                    settings.macd_slow,
                    settings.macd_signal,
                )),
            ));
        }
        if signal.use_htf_trend {
            indicators.push((
                IndicatorSlot::TrendEma,
                Indicator::TrendEma(TrendEma::new(
                    settings.htf_ema_period,
                    settings.htf_bucket_minutes,
                )),
            ));
        }
        if settings.atr_enabled {
            indicators.push((IndicatorSlot::Atr, Indicator::Atr(Atr::new(settings.atr_period))));
        }
        if signal.use_rsi {
            indicators.push((IndicatorSlot::Rsi, Indicator::Rsi(Rsi::new(settings.rsi_period))));
        }
        if signal.use_bollinger {
            indicators.push((
                IndicatorSlot::Bollinger,
                Indicator::Bollinger(Bollinger::new(
                    settings.bollinger_period,
                    settings.bollinger_std_dev,
                )),
            ));
        }

        tracing::debug!(count = indicators.len(), "Indicator engine configured");

        Self {
            indicators,
            offset,
            snapshot: IndicatorSnapshot::default(),
        }
    }

    /// Update every configured indicator with the tick
    pub fn update(&mut self, tick: &Tick) -> &IndicatorSnapshot {
        let day = tick.timestamp.with_timezone(&self.offset).date_naive();
        let mut snapshot = IndicatorSnapshot {
            samples: self.snapshot.samples + 1,
            ..IndicatorSnapshot::default()
        };

        for (slot, indicator) in self.indicators.iter_mut() {
            let reading = indicator.update(tick, day);
            match (*slot, reading) {
                (IndicatorSlot::Macd, Reading::Macd(m)) => snapshot.macd = Some(m),
                (IndicatorSlot::Bollinger, Reading::Band(b)) => snapshot.bollinger = Some(b),
                (IndicatorSlot::FastEma, r) => snapshot.fast_ema = r.value(),
                (IndicatorSlot::SlowEma, r) => snapshot.slow_ema = r.value(),
                (IndicatorSlot::TrendEma, r) => snapshot.trend_ema = r.value(),
                (IndicatorSlot::Vwap, r) => snapshot.vwap = r.value(),
                (IndicatorSlot::Atr, r) => snapshot.atr = r.value(),
                (IndicatorSlot::Rsi, r) => snapshot.rsi = r.value(),
                _ => {}
            }
        }

        tracing::trace!(?snapshot, "Indicators updated");
        self.snapshot = snapshot;
        &self.snapshot
    }

    pub fn snapshot(&self) -> &IndicatorSnapshot {
        &self.snapshot
    }

    pub fn has(&self, slot: IndicatorSlot) -> bool {
        self.indicators.iter().any(|(s, _)| *s == slot)
    }

    /// Start a fresh session: every indicator forgets its history
    pub fn reset(&mut self) {
        for (_, indicator) in self.indicators.iter_mut() {
            indicator.reset();
        }
        self.snapshot = IndicatorSnapshot::default();
    }
}
