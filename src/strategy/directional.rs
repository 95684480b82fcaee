use crate::config::{RiskSettings, SignalSettings};
use crate::execution::ExitReason;

/// Run length of consecutive rising ticks
///
/// With the noise filter on, a tick only counts when it rises by more than
/// `max(tick_size * min_ticks, prev * noise_percent / 100)`. Any tick that
/// does not qualify resets the run to zero.
#[derive(Debug, Clone)]
pub struct DirectionalTickCounter {
    count: u32,
    prev: Option<f64>,
    noise_filter: bool,
    min_move: f64,
    noise_percent: f64,
}

impl DirectionalTickCounter {
    pub fn new(signal: &SignalSettings, tick_size: f64) -> Self {
        Self {
            count: 0,
            prev: None,
            noise_filter: signal.noise_filter_enabled,
            min_move: tick_size * signal.noise_min_ticks as f64,
            noise_percent: signal.noise_percent,
        }
    }

    fn threshold(&self, prev: f64) -> f64 {
        if self.noise_filter {
            self.min_move.max(prev * self.noise_percent / 100.0)
        } else {
            0.0
        }
    }

    pub fn observe(&mut self, price: f64) -> u32 {
        if let Some(prev) = self.prev {
            if price - prev > self.threshold(prev) {
                self.count += 1;
            } else {
                self.count = 0;
            }
        }
        self.prev = Some(price);
        self.count
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Forget the current run but keep the reference price
    pub fn reset_run(&mut self) {
        self.count = 0;
    }

    pub fn reset(&mut self) {
        self.count = 0;
        self.prev = None;
    }
}

/// Entry-side state shared between evaluations
///
/// Receives position-close notifications so every new entry needs a
/// fresh run of green ticks.
#[derive(Debug, Clone)]
pub struct EntryGate {
    counter: DirectionalTickCounter,
    required: u32,
    last_exit: Option<ExitReason>,
}

impl EntryGate {
    pub fn new(signal: &SignalSettings, risk: &RiskSettings) -> Self {
        Self {
            counter: DirectionalTickCounter::new(signal, risk.tick_size),
            required: signal.required_green_ticks,
            last_exit: None,
        }
    }

    pub fn observe(&mut self, price: f64) -> u32 {
        self.counter.observe(price)
    }

    pub fn green_ticks(&self) -> u32 {
        self.counter.count()
    }

    pub fn required(&self) -> u32 {
        self.required
    }

    /// Enough consecutive green ticks for a new entry
    pub fn is_armed(&self) -> bool {
        self.counter.count() >= self.required
    }

    pub fn last_exit(&self) -> Option<ExitReason> {
        self.last_exit
    }

    pub fn on_position_closed(&mut self, reason: ExitReason) {
        self.counter.reset_run();
        self.last_exit = Some(reason);
        tracing::debug!(reason = reason.as_str(), "Entry gate re-armed");
    }

    pub fn reset(&mut self) {
        self.counter.reset();
        self.last_exit = None;
    }
}
