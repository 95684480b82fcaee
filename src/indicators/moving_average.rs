use serde::{Deserialize, Serialize};

/// Streaming Exponential Moving Average (EMA)
///
/// value = price * k + previous * (1 - k), with k = 2 / (period + 1).
/// Seeded with the first sample; considered warmed up after `period` samples.
#[derive(Debug, Clone)]
pub struct Ema {
    period: usize,
    k: f64,
    value: Option<f64>,
    samples: usize,
}

impl Ema {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            k: 2.0 / (period as f64 + 1.0),
            value: None,
            samples: 0,
        }
    }

    /// Consume the newest price and return the updated EMA
    pub fn update(&mut self, price: f64) -> Option<f64> {
        let next = match self.value {
            Some(prev) => price * self.k + prev * (1.0 - self.k),
            None => price,
        };
        self.value = Some(next);
        self.samples += 1;
        self.value
    }

    /// Latest value, defined from the first sample on
    pub fn value(&self) -> Option<f64> {
        self.value
    }

    pub fn is_ready(&self) -> bool {
        self.samples >= self.period
    }

    /// Value only once warm-up is complete
    pub fn reading(&self) -> Option<f64> {
        if self.is_ready() {
            self.value
        } else {
            None
        }
    }

    pub fn period(&self) -> usize {
        self.period
    }

    pub fn reset(&mut self) {
        self.value = None;
        self.samples = 0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MacdReading {
    pub line: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// Streaming MACD: fast EMA - slow EMA, with a signal EMA of the difference
#[derive(Debug, Clone)]
pub struct Macd {
    fast: Ema,
    slow: Ema,
    signal: Ema,
}

impl Macd {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Self {
        Self {
            fast: Ema::new(fast),
            slow: Ema::new(slow),
            signal: Ema::new(signal),
        }
    }

    /// Update with the newest price
    ///
    /// The signal EMA only starts consuming the MACD line once the slow EMA is
    /// warm, so early noise never leaks into it.
    pub fn update(&mut self, price: f64) -> Option<MacdReading> {
        let fast = self.fast.update(price)?;
        let slow = self.slow.update(price)?;

        if !self.slow.is_ready() {
            return None;
        }

        let line = fast - slow;
        let signal = self.signal.update(line)?;

        if !self.signal.is_ready() {
            return None;
        }

        Some(MacdReading {
            line,
            signal,
            histogram: line - signal,
        })
    }

    pub fn reset(&mut self) {
        self.fast.reset();
        self.slow.reset();
        self.signal.reset();
    }
}

/// Higher-timeframe trend EMA
///
/// Buckets ticks into `bucket_minutes` bars and feeds the close of each
/// completed bar to an EMA, so the trend filter moves at bar speed rather
/// than tick speed.
#[derive(Debug, Clone)]
pub struct TrendEma {
    ema: Ema,
    bucket_secs: i64,
    current_bucket: Option<i64>,
    last_price: f64,
}

impl TrendEma {
    pub fn new(period: usize, bucket_minutes: i64) -> Self {
        Self {
            ema: Ema::new(period),
            bucket_secs: bucket_minutes.max(1) * 60,
            current_bucket: None,
            last_price: 0.0,
        }
    }

    pub fn update(&mut self, price: f64, epoch_secs: i64) -> Option<f64> {
        let bucket = epoch_secs.div_euclid(self.bucket_secs);

        match self.current_bucket {
            Some(current) if bucket != current => {
                // Previous bar closed at the last price seen inside it
                self.ema.update(self.last_price);
                self.current_bucket = Some(bucket);
            }
            None => self.current_bucket = Some(bucket),
            _ => {}
        }
        self.last_price = price;

        self.ema.reading()
    }

    pub fn reset(&mut self) {
        self.ema.reset();
        self.current_bucket = None;
        self.last_price = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ema_seeds_with_first_sample() {
        let mut ema = Ema::new(5);
        assert_eq!(ema.value(), None);
        assert_eq!(ema.update(100.0), Some(100.0));
        assert!(!ema.is_ready());
        assert_eq!(ema.reading(), None);
    }

    #[test]
    fn test_ema_formula() {
        let mut ema = Ema::new(3); // k = 0.5
        ema.update(10.0);
        let v = ema.update(20.0).unwrap();
        assert!((v - 15.0).abs() < 1e-12);
        let v = ema.update(30.0).unwrap();
        assert!((v - 22.5).abs() < 1e-12);
        assert!(ema.is_ready());
    }

    #[test]
    fn test_ema_converges_on_constant_price() {
        let mut ema = Ema::new(10);
        ema.update(50.0);
        for _ in 0..200 {
            ema.update(80.0);
        }
        assert!((ema.reading().unwrap() - 80.0).abs() < 1e-6);
    }

    #[test]
    fn test_ema_constant_feed_within_period() {
        let mut ema = Ema::new(14);
        for _ in 0..14 {
            ema.update(123.45);
        }
        assert!((ema.reading().unwrap() - 123.45).abs() < 1e-9);
    }

    #[test]
    fn test_macd_unavailable_until_warm() {
        let mut macd = Macd::new(3, 6, 3);
        let mut readings = Vec::new();
        for i in 0..10 {
            readings.push(macd.update(100.0 + i as f64));
        }
        // slow ready at sample 6, signal needs 3 more line values -> first at sample 8
        assert!(readings[..7].iter().all(|r| r.is_none()));
        assert!(readings[7].is_some());
    }

    #[test]
    fn test_macd_uptrend_positive_line() {
        let mut macd = Macd::new(3, 6, 3);
        let mut last = None;
        for i in 0..40 {
            last = macd.update(100.0 + i as f64);
        }
        let reading = last.unwrap();
        assert!(reading.line > 0.0);
        assert!((reading.histogram - (reading.line - reading.signal)).abs() < 1e-12);
    }

    #[test]
    fn test_trend_ema_updates_per_bucket() {
        let mut trend = TrendEma::new(2, 1);
        // Three ticks inside the first minute, nothing closed yet
        assert_eq!(trend.update(100.0, 0), None);
        assert_eq!(trend.update(101.0, 20), None);
        assert_eq!(trend.update(102.0, 40), None);
        // Minute 1 opens: bar 0 closed at 102
        assert_eq!(trend.update(103.0, 60), None);
        // Minute 2 opens: bar 1 closed at 104 -> two samples, ready
        trend.update(104.0, 90);
        let value = trend.update(105.0, 120).unwrap();
        // k = 2/3: 104*2/3 + 102/3
        assert!((value - (104.0 * 2.0 / 3.0 + 102.0 / 3.0)).abs() < 1e-9);
    }
}
