use std::collections::VecDeque;

use super::auth::AuthSession;
use super::buffer::TickBuffer;
use super::source::{StreamHandle, TickSource};
use crate::error::FeedError;
use crate::models::{parse_quote, Tick};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayMode {
    /// Ticks are handed out one per `poll`
    Pull,
    /// Ticks are pushed into the subscriber's buffer
    Push,
}

/// Scripted tick source
///
/// Used by the `replay` binary and to drive the feed deterministically in
/// tests. Failures can be queued ahead of time for `open` and `poll`.
pub struct ReplaySource {
    mode: ReplayMode,
    pending: VecDeque<Tick>,
    buffer: Option<TickBuffer>,
    subscriptions: u32,
    open_failures: VecDeque<FeedError>,
    poll_failures: VecDeque<FeedError>,
    opened: bool,
}

impl ReplaySource {
    pub fn pull(ticks: impl IntoIterator<Item = Tick>) -> Self {
        Self::with_mode(ReplayMode::Pull, ticks)
    }

    pub fn push(ticks: impl IntoIterator<Item = Tick>) -> Self {
        Self::with_mode(ReplayMode::Push, ticks)
    }

    fn with_mode(mode: ReplayMode, ticks: impl IntoIterator<Item = Tick>) -> Self {
        Self {
            mode,
            pending: ticks.into_iter().collect(),
            buffer: None,
            subscriptions: 0,
            open_failures: VecDeque::new(),
            poll_failures: VecDeque::new(),
            opened: false,
        }
    }

    /// Make the next `open` calls fail with these errors, in order
    pub fn fail_open_with(mut self, errors: impl IntoIterator<Item = FeedError>) -> Self {
        self.open_failures.extend(errors);
        self
    }

    /// Make the next `poll` calls fail with these errors, in order
    pub fn fail_poll_with(mut self, errors: impl IntoIterator<Item = FeedError>) -> Self {
        self.poll_failures.extend(errors);
        self
    }

    /// Deliver a tick as if it just arrived from upstream
    pub fn inject(&mut self, tick: Tick) {
        match (&self.buffer, self.mode) {
            (Some(buffer), ReplayMode::Push) => buffer.push(tick),
            _ => self.pending.push_back(tick),
        }
    }

    pub fn subscriptions(&self) -> u32 {
        self.subscriptions
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    pub fn is_open(&self) -> bool {
        self.opened
    }
}

impl TickSource for ReplaySource {
    fn name(&self) -> &str {
        "replay"
    }

    async fn open(&mut self, _session: &AuthSession) -> Result<(), FeedError> {
        if let Some(err) = self.open_failures.pop_front() {
            return Err(err);
        }
        self.opened = true;
        Ok(())
    }

    async fn subscribe(&mut self, _symbol: &str, buffer: TickBuffer) -> Result<StreamHandle, FeedError> {
        if self.mode == ReplayMode::Pull {
            return Err(FeedError::StreamingUnsupported);
        }
        self.subscriptions += 1;
        for tick in self.pending.drain(..) {
            buffer.push(tick);
        }
        self.buffer = Some(buffer);
        Ok(StreamHandle::external())
    }

    async fn poll(&mut self, _symbol: &str) -> Result<Tick, FeedError> {
        if let Some(err) = self.poll_failures.pop_front() {
            return Err(err);
        }
        match (self.pending.pop_front(), self.mode) {
            (Some(tick), _) => Ok(tick),
            (None, ReplayMode::Pull) => Err(FeedError::EndOfStream),
            (None, ReplayMode::Push) => Err(FeedError::Connection("no quote available".to_string())),
        }
    }

    async fn close(&mut self) {
        self.opened = false;
        self.buffer = None;
    }
}

/// Parse a JSON-lines tick file
///
/// Each non-empty line is one quote in the upstream format. Malformed lines
/// are skipped and counted.
pub fn parse_jsonl(text: &str) -> (Vec<Tick>, usize) {
    let mut ticks = Vec::new();
    let mut skipped = 0;

    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_quote(line) {
            Ok(tick) => ticks.push(tick),
            Err(e) => {
                skipped += 1;
                tracing::warn!(line = line_no + 1, error = %e, "Skipping malformed replay line");
            }
        }
    }

    (ticks, skipped)
}
