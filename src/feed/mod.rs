// Market data feed: authentication, sources, push/pull delivery and health
pub mod auth;
pub mod buffer;
pub mod health;
pub mod http;
pub mod replay;
pub mod source;
pub mod synthetic;

pub use auth::{AuthSession, Authenticator, StaticTokenAuthenticator};
pub use buffer::TickBuffer;
pub use health::{HeartbeatMonitor, ReconnectPolicy};
pub use http::HttpQuoteSource;
pub use replay::{parse_jsonl, ReplayMode, ReplaySource};
pub use source::{StreamHandle, TickSource};
pub use synthetic::SyntheticSource;

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::FeedSettings;
use crate::error::FeedError;
use crate::events::{EngineEvent, EventBus};
use crate::models::Tick;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedState {
    Disconnected,
    Connecting,
    Streaming,
    Polling,
}

/// Ordered tick delivery for one instrument
///
/// Prefers a streaming subscription and falls back to polling when the
/// source cannot stream, the stream dies, or it goes silent past the
/// heartbeat. While polling, streaming is retried under the reconnect
/// policy. Sustained poll failures drop back to `Disconnected` and trigger
/// a full reconnect, which has a cooldown and attempt budget of its own.
pub struct MarketDataFeed<S: TickSource, A: Authenticator> {
    symbol: String,
    source: S,
    auth: A,
    settings: FeedSettings,
    events: EventBus,
    state: FeedState,
    session: Option<AuthSession>,
    buffer: TickBuffer,
    stream: Option<StreamHandle>,
    streaming_since: Option<Instant>,
    streaming_supported: bool,
    heartbeat: HeartbeatMonitor,
    reconnect: ReconnectPolicy,
    /// Budget for full teardown-and-connect cycles
    recovery: ReconnectPolicy,
    poll_failures: u32,
    last_delivered: Option<DateTime<Utc>>,
    downgrades: u32,
}

impl<S: TickSource, A: Authenticator> MarketDataFeed<S, A> {
    pub fn new(symbol: impl Into<String>, source: S, auth: A, settings: &FeedSettings, events: EventBus) -> Self {
        Self {
            symbol: symbol.into(),
            source,
            auth,
            events,
            state: FeedState::Disconnected,
            session: None,
            buffer: TickBuffer::new(settings.buffer_capacity),
            stream: None,
            streaming_since: None,
            streaming_supported: true,
            heartbeat: HeartbeatMonitor::new(Duration::from_secs(settings.heartbeat_secs)),
            reconnect: ReconnectPolicy::new(
                Duration::from_secs(settings.reconnect_cooldown_secs),
                settings.max_reconnect_attempts,
            ),
            recovery: ReconnectPolicy::new(
                Duration::from_secs(settings.reconnect_cooldown_secs),
                settings.max_reconnect_attempts,
            ),
            poll_failures: 0,
            last_delivered: None,
            downgrades: 0,
            settings: settings.clone(),
        }
    }

    pub fn state(&self) -> FeedState {
        self.state
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Number of Streaming -> Polling downgrades so far
    pub fn downgrades(&self) -> u32 {
        self.downgrades
    }

    fn set_state(&mut self, to: FeedState) {
        if self.state == to {
            return;
        }
        let from = self.state;
        self.state = to;
        tracing::info!(symbol = %self.symbol, ?from, ?to, "Feed state changed");
        self.events.publish(EngineEvent::FeedStatusChanged {
            from,
            to,
            at: Utc::now(),
        });
    }

    /// Authenticate and open the upstream
    ///
    /// Authentication failures are returned immediately. Connection failures
    /// are retried with a fixed delay up to `connect_retries` attempts; an
    /// expired upstream session renews the credentials once within that
    /// budget.
    pub async fn connect(&mut self) -> Result<(), FeedError> {
        self.set_state(FeedState::Connecting);

        let mut session = match self.auth.acquire().await {
            Ok(session) => session,
            Err(e) => {
                tracing::error!(symbol = %self.symbol, error = %e, "Authentication failed");
                self.set_state(FeedState::Disconnected);
                return Err(e);
            }
        };

        let retries = self.settings.connect_retries.max(1);
        let delay = Duration::from_millis(self.settings.connect_retry_delay_ms);
        let mut renewed = false;
        let mut last_error = FeedError::NotConnected;

        for attempt in 1..=retries {
            match self.source.open(&session).await {
                Ok(()) => {
                    tracing::info!(
                        symbol = %self.symbol,
                        source = self.source.name(),
                        attempt,
                        "Feed connected"
                    );
                    self.session = Some(session);
                    self.poll_failures = 0;
                    return Ok(());
                }
                Err(FeedError::SessionExpired) if !renewed => {
                    tracing::warn!(symbol = %self.symbol, "Upstream session expired, renewing");
                    renewed = true;
                    session = match self.auth.renew().await {
                        Ok(session) => session,
                        Err(e) => {
                            self.set_state(FeedState::Disconnected);
                            return Err(e);
                        }
                    };
                    last_error = FeedError::SessionExpired;
                }
                Err(e) if e.is_fatal() => {
                    tracing::error!(symbol = %self.symbol, error = %e, "Upstream rejected connection");
                    self.set_state(FeedState::Disconnected);
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(
                        symbol = %self.symbol,
                        error = %e,
                        "Connection attempt {}/{} failed",
                        attempt,
                        retries
                    );
                    last_error = e;
                }
            }

            if attempt < retries && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        tracing::error!(symbol = %self.symbol, error = %last_error, "Giving up on feed connection");
        self.set_state(FeedState::Disconnected);
        Err(FeedError::Connection(format!(
            "failed after {} attempts: {}",
            retries, last_error
        )))
    }

    /// Begin delivery, streaming when possible and polling otherwise
    pub async fn start(&mut self) -> Result<(), FeedError> {
        if self.session.is_none() {
            return Err(FeedError::NotConnected);
        }
        let now = Instant::now();
        if !self.try_subscribe(now).await {
            self.enter_polling(now);
        }
        Ok(())
    }

    async fn try_subscribe(&mut self, now: Instant) -> bool {
        match self.source.subscribe(&self.symbol, self.buffer.clone()).await {
            Ok(handle) => {
                self.stream = Some(handle);
                self.streaming_since = Some(now);
                self.set_state(FeedState::Streaming);
                true
            }
            Err(FeedError::StreamingUnsupported) => {
                tracing::info!(symbol = %self.symbol, source = self.source.name(), "Streaming unsupported, polling");
                self.streaming_supported = false;
                false
            }
            Err(e) => {
                tracing::warn!(symbol = %self.symbol, error = %e, "Streaming subscription failed");
                false
            }
        }
    }

    fn enter_polling(&mut self, now: Instant) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
        }
        self.streaming_since = None;
        self.reconnect.mark_downgrade(now);
        self.set_state(FeedState::Polling);
    }

    /// Downgrade to polling if the stream died or went silent
    ///
    /// Returns true when a downgrade happened.
    pub fn check_health_at(&mut self, now: Instant) -> bool {
        if self.state != FeedState::Streaming {
            return false;
        }
        let since = self.streaming_since.unwrap_or(now);
        let alive = self.stream.as_ref().is_some_and(StreamHandle::is_alive);
        let stale = self.heartbeat.is_stale(self.buffer.last_push_at(), since, now);

        if alive && !stale {
            return false;
        }

        tracing::warn!(
            symbol = %self.symbol,
            alive,
            stale,
            heartbeat_secs = self.heartbeat.threshold().as_secs(),
            "Stream unhealthy, downgrading to polling"
        );
        self.downgrades += 1;
        self.enter_polling(now);
        true
    }

    /// Try to get back to streaming, subject to cooldown and attempt budget
    ///
    /// Returns true when streaming was restored.
    pub async fn maybe_restore_streaming_at(&mut self, now: Instant) -> bool {
        if self.state != FeedState::Polling
            || !self.streaming_supported
            || !self.reconnect.may_attempt(now)
        {
            return false;
        }

        self.reconnect.record_attempt(now);
        tracing::info!(
            symbol = %self.symbol,
            attempt = self.reconnect.attempts(),
            "Attempting to restore streaming"
        );

        if self.try_subscribe(now).await {
            self.reconnect.record_success();
            true
        } else {
            false
        }
    }

    /// Next tick in timestamp order
    ///
    /// Returns `Ok(None)` when nothing is available right now. Malformed or
    /// out-of-order ticks are dropped here and never reach the caller.
    pub async fn next_tick(&mut self) -> Result<Option<Tick>, FeedError> {
        let now = Instant::now();
        match self.state {
            FeedState::Disconnected | FeedState::Connecting => return Err(FeedError::NotConnected),
            FeedState::Streaming => {
                self.check_health_at(now);
                if self.state == FeedState::Streaming {
                    return Ok(self.pop_buffered());
                }
            }
            FeedState::Polling => {}
        }

        if self.maybe_restore_streaming_at(now).await {
            return Ok(self.pop_buffered());
        }
        // Ticks left over from the stream go first
        if let Some(tick) = self.pop_buffered() {
            return Ok(Some(tick));
        }
        self.poll_once().await
    }

    fn pop_buffered(&mut self) -> Option<Tick> {
        while let Some(tick) = self.buffer.pop() {
            if let Some(tick) = self.accept(tick) {
                return Some(tick);
            }
        }
        None
    }

    fn accept(&mut self, tick: Tick) -> Option<Tick> {
        if let Err(e) = tick.validate() {
            tracing::warn!(symbol = %self.symbol, error = %e, "Dropping invalid tick");
            return None;
        }
        if let Some(last) = self.last_delivered {
            if tick.timestamp <= last {
                tracing::warn!(
                    symbol = %self.symbol,
                    timestamp = %tick.timestamp,
                    last = %last,
                    "Dropping out-of-order tick"
                );
                return None;
            }
        }
        self.last_delivered = Some(tick.timestamp);
        Some(tick)
    }

    async fn poll_once(&mut self) -> Result<Option<Tick>, FeedError> {
        match self.source.poll(&self.symbol).await {
            Ok(tick) => {
                self.poll_failures = 0;
                self.recovery.record_success();
                Ok(self.accept(tick))
            }
            Err(FeedError::DataFormat(reason)) => {
                tracing::warn!(symbol = %self.symbol, %reason, "Dropping malformed quote");
                Ok(None)
            }
            Err(FeedError::SessionExpired) => {
                tracing::warn!(symbol = %self.symbol, "Upstream session expired while polling");
                let session = self.auth.renew().await?;
                if let Err(e) = self.source.open(&session).await {
                    self.session = Some(session);
                    return self.record_poll_failure(e).await;
                }
                self.session = Some(session);
                Ok(None)
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => self.record_poll_failure(e).await,
        }
    }

    async fn record_poll_failure(&mut self, error: FeedError) -> Result<Option<Tick>, FeedError> {
        self.poll_failures += 1;
        tracing::warn!(
            symbol = %self.symbol,
            error = %error,
            "Poll failed ({}/{})",
            self.poll_failures,
            self.settings.poll_failure_limit
        );
        if self.poll_failures >= self.settings.poll_failure_limit.max(1) {
            self.poll_failures = 0;
            self.reconnect_from_scratch(Instant::now()).await?;
        }
        Ok(None)
    }

    async fn reconnect_from_scratch(&mut self, now: Instant) -> Result<(), FeedError> {
        if self.recovery.exhausted() {
            tracing::error!(
                symbol = %self.symbol,
                attempts = self.recovery.attempts(),
                "Reconnect budget exhausted"
            );
            return Err(FeedError::NotConnected);
        }
        if !self.recovery.may_attempt(now) {
            tracing::debug!(symbol = %self.symbol, "Reconnect cooling down, still polling");
            return Ok(());
        }

        self.recovery.record_attempt(now);
        tracing::warn!(
            symbol = %self.symbol,
            attempt = self.recovery.attempts(),
            "Sustained poll failures, reconnecting"
        );
        self.teardown().await;

        if let Err(e) = self.connect().await {
            tracing::error!(symbol = %self.symbol, error = %e, "Reconnect failed");
            return Err(match e {
                FeedError::Authentication(_) => e,
                _ => FeedError::NotConnected,
            });
        }
        self.resume_after_reconnect(now).await
    }

    /// Like `start`, but a new subscription has to pass the streaming policy
    async fn resume_after_reconnect(&mut self, now: Instant) -> Result<(), FeedError> {
        if self.session.is_none() {
            return Err(FeedError::NotConnected);
        }
        if self.streaming_supported && self.reconnect.may_attempt(now) {
            self.reconnect.record_attempt(now);
            if self.try_subscribe(now).await {
                self.reconnect.record_success();
                return Ok(());
            }
        }
        self.enter_polling(now);
        Ok(())
    }

    async fn teardown(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
        }
        self.streaming_since = None;
        self.source.close().await;
        self.session = None;
        self.poll_failures = 0;
        self.set_state(FeedState::Disconnected);
    }

    /// Stop delivery and release upstream resources
    pub async fn disconnect(&mut self) {
        self.teardown().await;
        self.auth.disconnect().await;
        self.buffer.clear();
        tracing::info!(symbol = %self.symbol, "Feed disconnected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tokio::sync::broadcast::error::TryRecvError;

    fn settings() -> FeedSettings {
        FeedSettings {
            connect_retry_delay_ms: 0,
            ..FeedSettings::default()
        }
    }

    fn tick(secs: i64, price: f64) -> Tick {
        let base = Utc.with_ymd_and_hms(2024, 3, 4, 4, 0, 0).unwrap();
        Tick::new(base + chrono::Duration::seconds(secs), price, 10.0)
    }

    fn feed(source: ReplaySource, bus: &EventBus) -> MarketDataFeed<ReplaySource, StaticTokenAuthenticator> {
        MarketDataFeed::new(
            "NIFTY",
            source,
            StaticTokenAuthenticator::new(None),
            &settings(),
            bus.clone(),
        )
    }

    fn transitions(rx: &mut tokio::sync::broadcast::Receiver<EngineEvent>) -> Vec<(FeedState, FeedState)> {
        let mut out = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(EngineEvent::FeedStatusChanged { from, to, .. }) => out.push((from, to)),
                Ok(_) => {}
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
                Err(TryRecvError::Lagged(_)) => {}
            }
        }
        out
    }

    #[tokio::test]
    async fn test_pull_source_falls_back_to_polling() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let mut feed = feed(ReplaySource::pull(vec![tick(0, 100.0), tick(1, 101.0)]), &bus);

        feed.connect().await.unwrap();
        feed.start().await.unwrap();
        assert_eq!(feed.state(), FeedState::Polling);

        assert_eq!(feed.next_tick().await.unwrap().unwrap().price, 100.0);
        assert_eq!(feed.next_tick().await.unwrap().unwrap().price, 101.0);
        assert_eq!(feed.next_tick().await.unwrap_err(), FeedError::EndOfStream);

        assert_eq!(
            transitions(&mut rx),
            vec![
                (FeedState::Disconnected, FeedState::Connecting),
                (FeedState::Connecting, FeedState::Polling),
            ]
        );
    }

    #[tokio::test]
    async fn test_next_tick_requires_connection() {
        let bus = EventBus::default();
        let mut feed = feed(ReplaySource::pull(vec![tick(0, 100.0)]), &bus);
        assert_eq!(feed.next_tick().await.unwrap_err(), FeedError::NotConnected);
    }

    #[tokio::test]
    async fn test_connect_retries_transient_errors() {
        let bus = EventBus::default();
        let source = ReplaySource::pull(vec![]).fail_open_with([
            FeedError::Connection("refused".into()),
            FeedError::Connection("refused".into()),
        ]);
        let mut feed = feed(source, &bus);

        feed.connect().await.unwrap();
        assert!(feed.source().is_open());
    }

    #[tokio::test]
    async fn test_connect_gives_up_after_retries() {
        let bus = EventBus::default();
        let source = ReplaySource::pull(vec![])
            .fail_open_with((0..3).map(|_| FeedError::Connection("refused".into())));
        let mut feed = feed(source, &bus);

        let err = feed.connect().await.unwrap_err();
        assert!(matches!(err, FeedError::Connection(_)));
        assert_eq!(feed.state(), FeedState::Disconnected);
    }

    #[tokio::test]
    async fn test_authentication_failure_not_retried() {
        let bus = EventBus::default();
        let source = ReplaySource::pull(vec![])
            .fail_open_with([FeedError::Authentication("bad token".into())]);
        let mut feed = feed(source, &bus);

        let err = feed.connect().await.unwrap_err();
        assert!(matches!(err, FeedError::Authentication(_)));
        // Only the failing attempt was consumed
        assert!(!feed.source().is_open());
    }

    #[tokio::test]
    async fn test_session_expired_renews_once() {
        let bus = EventBus::default();
        let source = ReplaySource::pull(vec![]).fail_open_with([FeedError::SessionExpired]);
        let mut feed = feed(source, &bus);

        feed.connect().await.unwrap();
        assert!(feed.source().is_open());
    }

    #[tokio::test]
    async fn test_drops_malformed_and_out_of_order_ticks() {
        let bus = EventBus::default();
        let source = ReplaySource::pull(vec![
            tick(5, 100.0),
            tick(4, 99.0),
            tick(5, 99.5),
            Tick::new(tick(6, 1.0).timestamp, -1.0, 1.0),
            tick(7, 101.0),
        ])
        .fail_poll_with([FeedError::DataFormat("garbage".into())]);
        let mut feed = feed(source, &bus);
        feed.connect().await.unwrap();
        feed.start().await.unwrap();

        let mut delivered = Vec::new();
        loop {
            match feed.next_tick().await {
                Ok(Some(t)) => delivered.push(t.price),
                Ok(None) => {}
                Err(FeedError::EndOfStream) => break,
                Err(e) => panic!("unexpected error {e}"),
            }
        }
        assert_eq!(delivered, vec![100.0, 101.0]);
    }

    #[tokio::test]
    async fn test_sustained_poll_failure_reconnects() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let source = ReplaySource::pull(vec![tick(0, 100.0)])
            .fail_poll_with((0..5).map(|_| FeedError::Connection("timeout".into())));
        let mut feed = feed(source, &bus);
        feed.connect().await.unwrap();
        feed.start().await.unwrap();
        transitions(&mut rx);

        for _ in 0..5 {
            assert_eq!(feed.next_tick().await.unwrap(), None);
        }
        assert_eq!(feed.state(), FeedState::Polling);
        assert_eq!(
            transitions(&mut rx),
            vec![
                (FeedState::Polling, FeedState::Disconnected),
                (FeedState::Disconnected, FeedState::Connecting),
                (FeedState::Connecting, FeedState::Polling),
            ]
        );
        assert_eq!(feed.next_tick().await.unwrap().unwrap().price, 100.0);
    }

    #[tokio::test]
    async fn test_poll_failures_after_downgrade_do_not_resubscribe() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let mut feed = feed(ReplaySource::push(vec![]), &bus);

        let t0 = Instant::now();
        feed.connect().await.unwrap();
        feed.start().await.unwrap();
        assert!(feed.check_health_at(t0 + Duration::from_secs(31)));
        transitions(&mut rx);

        // Push source without quotes: every poll fails
        for _ in 0..20 {
            assert_eq!(feed.next_tick().await.unwrap(), None);
        }

        assert_eq!(feed.source().subscriptions(), 1);
        assert_eq!(feed.state(), FeedState::Polling);
        let states: Vec<FeedState> = transitions(&mut rx).into_iter().map(|(_, to)| to).collect();
        assert!(!states.contains(&FeedState::Streaming));
        // One full reconnect, the rest waited out the cooldown
        assert_eq!(states.iter().filter(|s| **s == FeedState::Connecting).count(), 1);
    }

    #[tokio::test]
    async fn test_reconnect_budget_exhaustion_is_fatal() {
        let bus = EventBus::default();
        let settings = FeedSettings {
            reconnect_cooldown_secs: 0,
            max_reconnect_attempts: 2,
            poll_failure_limit: 1,
            ..settings()
        };
        let source = ReplaySource::pull(vec![tick(0, 100.0)])
            .fail_poll_with((0..5).map(|_| FeedError::Connection("timeout".into())));
        let mut feed = MarketDataFeed::new(
            "NIFTY",
            source,
            StaticTokenAuthenticator::new(None),
            &settings,
            bus.clone(),
        );
        feed.connect().await.unwrap();
        feed.start().await.unwrap();

        assert_eq!(feed.next_tick().await.unwrap(), None);
        assert_eq!(feed.next_tick().await.unwrap(), None);
        assert_eq!(feed.next_tick().await.unwrap_err(), FeedError::NotConnected);
    }

    #[tokio::test]
    async fn test_streaming_delivers_pushed_ticks() {
        let bus = EventBus::default();
        let mut feed = feed(ReplaySource::push(vec![tick(0, 100.0)]), &bus);
        feed.connect().await.unwrap();
        feed.start().await.unwrap();
        assert_eq!(feed.state(), FeedState::Streaming);

        assert_eq!(feed.next_tick().await.unwrap().unwrap().price, 100.0);
        assert_eq!(feed.next_tick().await.unwrap(), None);

        feed.source_mut().inject(tick(1, 100.5));
        assert_eq!(feed.next_tick().await.unwrap().unwrap().price, 100.5);
    }

    #[tokio::test]
    async fn test_silent_stream_downgrades_once_and_respects_cooldown() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let mut feed = feed(ReplaySource::push(vec![]), &bus);

        let t0 = Instant::now();
        feed.connect().await.unwrap();
        feed.start().await.unwrap();
        assert_eq!(feed.state(), FeedState::Streaming);

        // Healthy streaming for a while
        feed.source_mut().inject(tick(0, 100.0));
        assert_eq!(feed.next_tick().await.unwrap().unwrap().price, 100.0);
        assert!(!feed.check_health_at(t0 + Duration::from_secs(20)));
        transitions(&mut rx);

        // 31s+ of silence
        let downgrade_at = t0 + Duration::from_secs(32);
        assert!(feed.check_health_at(downgrade_at));
        assert_eq!(feed.state(), FeedState::Polling);
        assert!(!feed.check_health_at(downgrade_at + Duration::from_secs(5)));

        // No reconnect before the cooldown elapses
        assert!(!feed.maybe_restore_streaming_at(downgrade_at + Duration::from_secs(59)).await);
        assert_eq!(feed.source().subscriptions(), 1);

        assert!(feed.maybe_restore_streaming_at(downgrade_at + Duration::from_secs(60)).await);
        assert_eq!(feed.source().subscriptions(), 2);
        assert_eq!(feed.state(), FeedState::Streaming);

        assert_eq!(feed.downgrades(), 1);
        assert_eq!(
            transitions(&mut rx),
            vec![
                (FeedState::Streaming, FeedState::Polling),
                (FeedState::Polling, FeedState::Streaming),
            ]
        );
    }

    #[tokio::test]
    async fn test_disconnect() {
        let bus = EventBus::default();
        let mut feed = feed(ReplaySource::push(vec![tick(0, 1.0)]), &bus);
        feed.connect().await.unwrap();
        feed.start().await.unwrap();

        feed.disconnect().await;
        assert_eq!(feed.state(), FeedState::Disconnected);
        assert!(!feed.source().is_open());
        assert_eq!(feed.next_tick().await.unwrap_err(), FeedError::NotConnected);
    }
}
