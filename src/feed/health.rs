use std::time::{Duration, Instant};

/// Detects a silent stream
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatMonitor {
    threshold: Duration,
}

impl HeartbeatMonitor {
    pub fn new(threshold: Duration) -> Self {
        Self { threshold }
    }

    /// True when nothing arrived for longer than the threshold
    ///
    /// Silence is measured from the later of the last tick and the moment
    /// streaming started, so a fresh subscription gets a full window.
    pub fn is_stale(&self, last_tick: Option<Instant>, streaming_since: Instant, now: Instant) -> bool {
        let reference = last_tick.map_or(streaming_since, |t| t.max(streaming_since));
        now.saturating_duration_since(reference) > self.threshold
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }
}

/// Rate limit for attempts to get back from polling to streaming
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    cooldown: Duration,
    max_attempts: u32,
    attempts: u32,
    last_mark: Option<Instant>,
}

impl ReconnectPolicy {
    pub fn new(cooldown: Duration, max_attempts: u32) -> Self {
        Self {
            cooldown,
            max_attempts,
            attempts: 0,
            last_mark: None,
        }
    }

    /// Start the cooldown clock at a downgrade
    pub fn mark_downgrade(&mut self, now: Instant) {
        self.last_mark = Some(now);
    }

    pub fn may_attempt(&self, now: Instant) -> bool {
        if self.attempts >= self.max_attempts {
            return false;
        }
        match self.last_mark {
            Some(mark) => now.saturating_duration_since(mark) >= self.cooldown,
            None => true,
        }
    }

    pub fn record_attempt(&mut self, now: Instant) {
        self.attempts += 1;
        self.last_mark = Some(now);
    }

    /// Streaming came back; the attempt budget starts over
    pub fn record_success(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}
