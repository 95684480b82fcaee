use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use crate::models::Tick;

/// Single-lock hand-off buffer between a streaming task and the trading loop
///
/// The producer pushes, the consumer pops. When full, the oldest tick is
/// discarded so the loop always sees the freshest prices.
#[derive(Clone)]
pub struct TickBuffer {
    inner: Arc<Mutex<BufferInner>>,
    capacity: usize,
}

struct BufferInner {
    ticks: VecDeque<Tick>,
    last_push_at: Option<Instant>,
    dropped: u64,
}

impl TickBuffer {
    /// Create a new tick buffer
    ///
    /// # Arguments
    /// * `capacity` - Maximum number of undelivered ticks to hold
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Mutex::new(BufferInner {
                ticks: VecDeque::with_capacity(capacity),
                last_push_at: None,
                dropped: 0,
            })),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BufferInner> {
        // A panicking producer must not wedge the trading loop
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push(&self, tick: Tick) {
        let mut inner = self.lock();
        inner.ticks.push_back(tick);
        while inner.ticks.len() > self.capacity {
            inner.ticks.pop_front();
            inner.dropped += 1;
        }
        inner.last_push_at = Some(Instant::now());
    }

    /// Oldest undelivered tick, never blocks on an empty buffer
    pub fn pop(&self) -> Option<Tick> {
        self.lock().ticks.pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// When the producer last delivered a tick
    pub fn last_push_at(&self) -> Option<Instant> {
        self.lock().last_push_at
    }

    /// Ticks discarded because the consumer fell behind
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.ticks.clear();
        inner.last_push_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn tick(offset_secs: i64, price: f64) -> Tick {
        Tick::new(Utc::now() + Duration::seconds(offset_secs), price, 1.0)
    }

    #[test]
    fn test_fifo_order() {
        let buffer = TickBuffer::new(10);
        buffer.push(tick(0, 100.0));
        buffer.push(tick(1, 101.0));

        assert_eq!(buffer.pop().unwrap().price, 100.0);
        assert_eq!(buffer.pop().unwrap().price, 101.0);
        assert!(buffer.pop().is_none());
    }

    #[test]
    fn test_drops_oldest_when_full() {
        let buffer = TickBuffer::new(2);
        buffer.push(tick(0, 1.0));
        buffer.push(tick(1, 2.0));
        buffer.push(tick(2, 3.0));

        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.dropped(), 1);
        assert_eq!(buffer.pop().unwrap().price, 2.0);
    }

    #[test]
    fn test_clones_share_state() {
        let producer = TickBuffer::new(4);
        let consumer = producer.clone();
        assert!(consumer.last_push_at().is_none());

        producer.push(tick(0, 42.0));
        assert!(consumer.last_push_at().is_some());
        assert_eq!(consumer.pop().unwrap().price, 42.0);
    }

    #[test]
    fn test_clear() {
        let buffer = TickBuffer::new(4);
        buffer.push(tick(0, 1.0));
        buffer.clear();
        assert!(buffer.is_empty());
        assert!(buffer.last_push_at().is_none());
    }
}
