use std::collections::VecDeque;

/// Streaming Relative Strength Index (RSI)
///
/// RSI measures the magnitude of recent price changes to evaluate
/// overbought or oversold conditions. Average gain and loss are simple means
/// over the last `period` price changes, kept as running sums.
///
/// Values:
/// - RSI > 70: Overbought
/// - RSI < 30: Oversold
#[derive(Debug, Clone)]
pub struct Rsi {
    period: usize,
    changes: VecDeque<f64>,
    gain_sum: f64,
    loss_sum: f64,
    prev_price: Option<f64>,
}

impl Rsi {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            changes: VecDeque::with_capacity(period),
            gain_sum: 0.0,
            loss_sum: 0.0,
            prev_price: None,
        }
    }

    pub fn update(&mut self, price: f64) -> Option<f64> {
        if let Some(prev) = self.prev_price {
            let change = price - prev;
            self.changes.push_back(change);
            if change > 0.0 {
                self.gain_sum += change;
            } else {
                self.loss_sum += -change;
            }

            if self.changes.len() > self.period {
                if let Some(old) = self.changes.pop_front() {
                    if old > 0.0 {
                        self.gain_sum -= old;
                    } else {
                        self.loss_sum -= -old;
                    }
                }
            }
        }
        self.prev_price = Some(price);

        self.value()
    }

    pub fn value(&self) -> Option<f64> {
        if self.changes.len() < self.period {
            return None;
        }

        let avg_gain = self.gain_sum / self.period as f64;
        let avg_loss = self.loss_sum / self.period as f64;

        // Running sums can drift a hair below zero after many removals
        if avg_loss <= 1e-12 {
            return Some(100.0);
        }

        let rs = avg_gain / avg_loss;
        Some(100.0 - (100.0 / (1.0 + rs)))
    }

    pub fn reset(&mut self) {
        self.changes.clear();
        self.gain_sum = 0.0;
        self.loss_sum = 0.0;
        self.prev_price = None;
    }
}
