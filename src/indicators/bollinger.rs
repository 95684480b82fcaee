use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandReading {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

impl BandReading {
    pub fn contains(&self, price: f64) -> bool {
        price >= self.lower && price <= self.upper
    }
}

/// Bollinger bands: mean +/- k population standard deviations over `period`
/// samples, from running sums of x and x^2.
#[derive(Debug, Clone)]
pub struct Bollinger {
    period: usize,
    std_devs: f64,
    window: VecDeque<f64>,
    sum: f64,
    sum_sq: f64,
}

impl Bollinger {
    pub fn new(period: usize, std_devs: f64) -> Self {
        Self {
            period,
            std_devs,
            window: VecDeque::with_capacity(period),
            sum: 0.0,
            sum_sq: 0.0,
        }
    }

    pub fn update(&mut self, price: f64) -> Option<BandReading> {
        self.window.push_back(price);
        self.sum += price;
        self.sum_sq += price * price;

        if self.window.len() > self.period {
            if let Some(old) = self.window.pop_front() {
                self.sum -= old;
                self.sum_sq -= old * old;
            }
        }

        self.value()
    }

    pub fn value(&self) -> Option<BandReading> {
        if self.window.len() < self.period {
            return None;
        }

        let n = self.period as f64;
        let mean = self.sum / n;
        let variance = (self.sum_sq / n - mean * mean).max(0.0);
        let width = self.std_devs * variance.sqrt();

        Some(BandReading {
            upper: mean + width,
            middle: mean,
            lower: mean - width,
        })
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.sum = 0.0;
        self.sum_sq = 0.0;
    }
}
