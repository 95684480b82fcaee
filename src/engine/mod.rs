// Tick-driven control loop tying feed, indicators, signals and positions together
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::config::EngineConfig;
use crate::error::{EngineError, FeedError, Result};
use crate::events::{EngineEvent, EventBus};
use crate::execution::{ExitReason, Position, PositionEvent, PositionLifecycleManager};
use crate::feed::{Authenticator, FeedState, MarketDataFeed, TickSource};
use crate::indicators::{IndicatorEngine, IndicatorSnapshot};
use crate::models::{SignalAction, Tick, TradingSignal};
use crate::risk::{CircuitBreakers, FailureStreak, SessionStats};
use crate::strategy::{EntryGate, SessionClock, SignalContext, SignalEvaluator};

/// Cooperative cancellation flag, polled once per loop iteration
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Requested,
    EndOfStream,
    FeedFailure(String),
    ErrorThreshold,
}

impl StopReason {
    fn exit_reason(&self) -> ExitReason {
        match self {
            StopReason::Requested | StopReason::EndOfStream => ExitReason::Shutdown,
            StopReason::FeedFailure(_) => ExitReason::FeedFailure,
            StopReason::ErrorThreshold => ExitReason::ErrorThreshold,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// A tick went through the pipeline
    Processed,
    /// Nothing to do this iteration
    Idle,
    Stopped(StopReason),
}

/// What a finished run leaves behind
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub symbol: String,
    pub stop_reason: StopReason,
    pub ticks_processed: u64,
    pub stats: SessionStats,
    pub trades: Vec<Position>,
}

impl SessionSummary {
    pub fn total_pnl(&self) -> f64 {
        self.trades.iter().map(Position::realized_pnl).sum()
    }
}

/// Single-symbol trading loop
///
/// Owns every piece of mutable trading state. Each tick runs: session
/// rollover, session-end exit, indicators and entry gate, evaluation,
/// entry/close, then the exit chain.
pub struct TradingOrchestrator<S: TickSource, A: Authenticator> {
    config: EngineConfig,
    feed: MarketDataFeed<S, A>,
    indicators: IndicatorEngine,
    evaluator: SignalEvaluator,
    gate: EntryGate,
    positions: PositionLifecycleManager,
    clock: SessionClock,
    events: EventBus,
    failures: FailureStreak,
    stop: StopHandle,
    last_tick: Option<Tick>,
    last_signal: Option<TradingSignal>,
    closed_trades: Vec<Position>,
    ticks_processed: u64,
}

impl<S: TickSource, A: Authenticator> TradingOrchestrator<S, A> {
    pub fn new(config: EngineConfig, source: S, auth: A, events: EventBus) -> Result<Self> {
        config.validate()?;

        let clock = SessionClock::new(&config.session)?;
        let breakers = CircuitBreakers {
            max_daily_trades: config.risk.max_daily_trades,
            max_consecutive_failures: config.engine.max_consecutive_failures,
        };

        let feed = MarketDataFeed::new(config.symbol.clone(), source, auth, &config.feed, events.clone());
        let indicators = IndicatorEngine::new(&config.indicators, &config.signal, clock.offset());

        Ok(Self {
            feed,
            indicators,
            evaluator: SignalEvaluator::new(config.signal.clone(), breakers.clone()),
            gate: EntryGate::new(&config.signal, &config.risk),
            positions: PositionLifecycleManager::new(&config.risk),
            clock,
            events,
            failures: breakers.failure_streak(),
            stop: StopHandle::default(),
            last_tick: None,
            last_signal: None,
            closed_trades: Vec::new(),
            ticks_processed: 0,
            config,
        })
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn indicator_snapshot(&self) -> &IndicatorSnapshot {
        self.indicators.snapshot()
    }

    pub fn position(&self) -> Option<&Position> {
        self.positions.position()
    }

    pub fn session_stats(&self) -> &SessionStats {
        self.positions.stats()
    }

    pub fn last_signal(&self) -> Option<&TradingSignal> {
        self.last_signal.as_ref()
    }

    pub fn feed_state(&self) -> FeedState {
        self.feed.state()
    }

    pub fn feed(&self) -> &MarketDataFeed<S, A> {
        &self.feed
    }

    pub fn feed_mut(&mut self) -> &mut MarketDataFeed<S, A> {
        &mut self.feed
    }

    /// Every position closed since the orchestrator started
    pub fn closed_trades(&self) -> &[Position] {
        &self.closed_trades
    }

    /// Connect the feed and start delivery
    pub async fn start(&mut self) -> Result<()> {
        tracing::info!(
            symbol = %self.config.symbol,
            lot_size = self.config.risk.lot_size,
            base_sl_points = self.config.risk.base_sl_points,
            targets = ?self.config.risk.tp_points,
            "🚀 Starting trading session"
        );
        self.feed.connect().await?;
        self.feed.start().await?;
        Ok(())
    }

    /// Run until stopped, the stream ends, or a fatal failure
    pub async fn run(&mut self) -> Result<SessionSummary> {
        self.start().await?;
        let idle = Duration::from_millis(self.config.engine.idle_sleep_ms);

        let reason = loop {
            match self.step().await? {
                StepOutcome::Stopped(reason) => break reason,
                StepOutcome::Idle if !idle.is_zero() => tokio::time::sleep(idle).await,
                StepOutcome::Idle | StepOutcome::Processed => {}
            }
        };

        self.shutdown(reason).await
    }

    /// One loop iteration
    pub async fn step(&mut self) -> Result<StepOutcome> {
        if self.stop.is_stopped() {
            return Ok(StepOutcome::Stopped(StopReason::Requested));
        }

        match self.feed.next_tick().await {
            Ok(Some(tick)) => match self.on_tick(&tick) {
                Ok(()) => {
                    self.failures.record_success();
                    Ok(StepOutcome::Processed)
                }
                Err(e) => self.on_failure(e),
            },
            Ok(None) => Ok(StepOutcome::Idle),
            Err(FeedError::EndOfStream) => {
                tracing::info!(symbol = %self.config.symbol, "Tick stream finished");
                Ok(StepOutcome::Stopped(StopReason::EndOfStream))
            }
            Err(e) if e.is_fatal() => {
                tracing::error!(symbol = %self.config.symbol, error = %e, "Fatal feed failure");
                Ok(StepOutcome::Stopped(StopReason::FeedFailure(e.to_string())))
            }
            Err(e) => self.on_failure(e.into()),
        }
    }

    fn on_failure(&mut self, error: EngineError) -> Result<StepOutcome> {
        tracing::warn!(
            symbol = %self.config.symbol,
            error = %error,
            streak = self.failures.count() + 1,
            "Tick processing failed"
        );
        if self.failures.record_failure().is_ok() {
            return Ok(StepOutcome::Idle);
        }

        tracing::error!(
            symbol = %self.config.symbol,
            failures = self.failures.count(),
            "🛑 Consecutive failure threshold reached, halting"
        );
        self.force_close(ExitReason::ErrorThreshold)?;
        Ok(StepOutcome::Stopped(StopReason::ErrorThreshold))
    }

    /// Push one tick through the pipeline
    pub fn on_tick(&mut self, tick: &Tick) -> Result<()> {
        tick.validate()
            .map_err(|e| EngineError::InvalidTick(e.to_string()))?;
        self.last_tick = Some(*tick);
        self.ticks_processed += 1;

        let day = self.clock.trading_day(tick.timestamp);
        if self.positions.stats().trading_day != Some(day) {
            self.roll_session(day, tick)?;
        }

        let session_over = self.clock.is_session_over(tick.timestamp);
        if session_over && self.positions.has_open_position() {
            let event = self
                .positions
                .close_full(tick.price, tick.timestamp, ExitReason::SessionEnd)?;
            self.dispatch(event);
        }

        let indicators = self.indicators.update(tick).clone();
        self.gate.observe(tick.price);

        let signal = self.evaluator.evaluate(&SignalContext {
            tick,
            indicators: &indicators,
            gate: &self.gate,
            has_position: self.positions.has_open_position(),
            entry_window_open: self.clock.entry_window_open(tick.timestamp),
            stats: self.positions.stats(),
        });

        if signal.action != SignalAction::Hold {
            tracing::info!(
                symbol = %self.config.symbol,
                action = ?signal.action,
                price = signal.price,
                reason = %signal.reason,
                "Signal generated"
            );
            self.events.publish(EngineEvent::SignalGenerated(signal.clone()));
        } else {
            tracing::debug!(price = tick.price, reason = %signal.reason, "Hold");
        }

        match signal.action {
            SignalAction::Buy if !self.positions.has_open_position() => {
                let event = self.positions.open(
                    &self.config.symbol,
                    tick.price,
                    tick.timestamp,
                    self.config.risk.lot_size,
                    self.config.risk.tick_size,
                )?;
                self.dispatch(event);
            }
            SignalAction::Close if self.positions.has_open_position() => {
                let event = self
                    .positions
                    .close_full(tick.price, tick.timestamp, ExitReason::SignalExit)?;
                self.dispatch(event);
            }
            _ => {}
        }
        self.last_signal = Some(signal);

        for event in self.positions.process(tick.price, tick.timestamp, session_over)? {
            self.dispatch(event);
        }
        Ok(())
    }

    /// New trading day: square off anything left over and forget the old
    /// session's indicator history
    fn roll_session(&mut self, day: NaiveDate, tick: &Tick) -> Result<()> {
        let previous = self.positions.stats().trading_day;
        if previous.is_some() {
            if self.positions.has_open_position() {
                let event = self
                    .positions
                    .close_full(tick.price, tick.timestamp, ExitReason::SessionEnd)?;
                self.dispatch(event);
            }
            self.indicators.reset();
            self.gate.reset();
        }

        self.positions.begin_session(day);
        tracing::info!(symbol = %self.config.symbol, %day, ?previous, "📅 New trading session");
        Ok(())
    }

    fn dispatch(&mut self, event: PositionEvent) {
        match event {
            PositionEvent::Opened(position) => {
                self.events.publish(EngineEvent::PositionOpened { position });
            }
            PositionEvent::PartiallyClosed {
                position_id,
                leg,
                remaining_quantity,
            } => {
                self.events.publish(EngineEvent::PositionPartiallyClosed {
                    position_id,
                    leg,
                    remaining_quantity,
                });
            }
            PositionEvent::Closed { position, reason } => {
                self.gate.on_position_closed(reason);
                self.closed_trades.push(position.clone());
                self.events.publish(EngineEvent::PositionClosed {
                    position,
                    stats: self.positions.stats().clone(),
                });
            }
        }
    }

    /// Close any open position at the last seen price
    fn force_close(&mut self, reason: ExitReason) -> Result<()> {
        if !self.positions.has_open_position() {
            return Ok(());
        }
        let (price, timestamp) = self.last_mark();
        tracing::warn!(
            symbol = %self.config.symbol,
            reason = reason.as_str(),
            price,
            "Forcing position close"
        );
        let event = self.positions.close_full(price, timestamp, reason)?;
        self.dispatch(event);
        Ok(())
    }

    fn last_mark(&self) -> (f64, DateTime<Utc>) {
        match (&self.last_tick, self.positions.position()) {
            (Some(tick), _) => (tick.price, tick.timestamp),
            (None, Some(position)) => (position.entry_price, Utc::now()),
            (None, None) => (0.0, Utc::now()),
        }
    }

    /// Close out and disconnect
    ///
    /// Any open position is closed before the feed goes away.
    pub async fn shutdown(&mut self, reason: StopReason) -> Result<SessionSummary> {
        self.force_close(reason.exit_reason())?;
        self.feed.disconnect().await;

        let summary = SessionSummary {
            symbol: self.config.symbol.clone(),
            stop_reason: reason,
            ticks_processed: self.ticks_processed,
            stats: self.positions.stats().clone(),
            trades: self.closed_trades.clone(),
        };

        tracing::info!(
            symbol = %summary.symbol,
            reason = ?summary.stop_reason,
            ticks = summary.ticks_processed,
            trades = summary.trades.len(),
            pnl = summary.total_pnl(),
            "👋 Session stopped"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{ReplaySource, StaticTokenAuthenticator};
    use chrono::{FixedOffset, TimeZone};

    /// Config whose only entry condition is the session window
    fn permissive_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.signal.use_ema_crossover = false;
        config.signal.use_vwap = false;
        config.signal.use_macd = false;
        config.signal.required_green_ticks = 0;
        config.feed.connect_retry_delay_ms = 0;
        config.engine.idle_sleep_ms = 0;
        config.risk.lot_size = 50;
        config
    }

    fn ist(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        FixedOffset::east_opt(330 * 60)
            .unwrap()
            .with_ymd_and_hms(2024, 3, 4, h, m, s)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn orchestrator(
        config: EngineConfig,
        ticks: Vec<Tick>,
    ) -> TradingOrchestrator<ReplaySource, StaticTokenAuthenticator> {
        TradingOrchestrator::new(
            config,
            ReplaySource::pull(ticks),
            StaticTokenAuthenticator::new(None),
            EventBus::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = permissive_config();
        config.risk.lot_size = 0;
        let result = TradingOrchestrator::new(
            config,
            ReplaySource::pull(vec![]),
            StaticTokenAuthenticator::new(None),
            EventBus::default(),
        );
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[test]
    fn test_on_tick_opens_and_closes_at_target() {
        let mut engine = orchestrator(permissive_config(), vec![]);

        for (i, price) in [100.0, 101.0, 109.0, 111.0].into_iter().enumerate() {
            engine.on_tick(&Tick::new(ist(10, 0, i as u32), price, 10.0)).unwrap();
        }

        assert!(engine.position().is_none());
        let trades = engine.closed_trades();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].entry_price, 100.0);
        assert_eq!(trades[0].exit_legs[0].price, 111.0);
        assert_eq!(trades[0].exit_legs[0].reason, ExitReason::TargetProfit);
    }

    #[test]
    fn test_no_entry_before_window() {
        let mut engine = orchestrator(permissive_config(), vec![]);
        engine.on_tick(&Tick::new(ist(9, 16, 0), 100.0, 10.0)).unwrap();
        assert!(engine.position().is_none());
        assert_eq!(engine.session_stats().trades_today, 0);
    }

    #[test]
    fn test_session_end_forces_exit() {
        let mut engine = orchestrator(permissive_config(), vec![]);
        engine.on_tick(&Tick::new(ist(15, 0, 0), 100.0, 10.0)).unwrap();
        assert!(engine.position().is_some());

        // Entries stop at 15:15 but the position rides until the close
        engine.on_tick(&Tick::new(ist(15, 16, 0), 101.0, 10.0)).unwrap();
        assert!(engine.position().is_some());

        engine.on_tick(&Tick::new(ist(15, 30, 0), 102.0, 10.0)).unwrap();
        assert!(engine.position().is_none());
        assert_eq!(
            engine.closed_trades()[0].final_exit_reason(),
            Some(ExitReason::SessionEnd)
        );
    }

    #[test]
    fn test_day_rollover_resets_session() {
        let mut engine = orchestrator(permissive_config(), vec![]);
        engine.on_tick(&Tick::new(ist(10, 0, 0), 100.0, 10.0)).unwrap();
        assert_eq!(engine.session_stats().trades_today, 1);

        let next_day = ist(10, 0, 0) + chrono::Duration::days(1);
        engine.on_tick(&Tick::new(next_day, 100.0, 10.0)).unwrap();

        // The carried position was squared off and a fresh one opened
        assert_eq!(engine.closed_trades().len(), 1);
        assert_eq!(engine.session_stats().trades_today, 1);
        assert_eq!(
            engine.session_stats().trading_day,
            Some(next_day.with_timezone(&FixedOffset::east_opt(330 * 60).unwrap()).date_naive())
        );
        assert_eq!(engine.indicator_snapshot().samples, 1);
    }

    #[test]
    fn test_daily_trade_cap() {
        let mut config = permissive_config();
        config.risk.max_daily_trades = 1;
        config.risk.base_sl_points = 1.0;
        let mut engine = orchestrator(config, vec![]);

        engine.on_tick(&Tick::new(ist(10, 0, 0), 100.0, 10.0)).unwrap();
        engine.on_tick(&Tick::new(ist(10, 0, 1), 98.0, 10.0)).unwrap();
        assert!(engine.position().is_none());

        engine.on_tick(&Tick::new(ist(10, 0, 2), 99.0, 10.0)).unwrap();
        assert!(engine.position().is_none());
        assert_eq!(engine.last_signal().unwrap().reason, "daily trade limit reached");
    }

    #[test]
    fn test_failure_streak_halts_and_closes() {
        let mut config = permissive_config();
        config.engine.max_consecutive_failures = 3;
        let mut engine = orchestrator(config, vec![]);
        engine.on_tick(&Tick::new(ist(10, 0, 0), 100.0, 10.0)).unwrap();
        engine.on_tick(&Tick::new(ist(10, 0, 1), 103.0, 10.0)).unwrap();

        let failure = || EngineError::InvalidTick("bad quote".to_string());
        assert_eq!(engine.on_failure(failure()).unwrap(), StepOutcome::Idle);
        assert_eq!(engine.on_failure(failure()).unwrap(), StepOutcome::Idle);
        assert_eq!(
            engine.on_failure(failure()).unwrap(),
            StepOutcome::Stopped(StopReason::ErrorThreshold)
        );

        let trade = &engine.closed_trades()[0];
        assert_eq!(trade.final_exit_reason(), Some(ExitReason::ErrorThreshold));
        assert_eq!(trade.exit_legs[0].price, 103.0);
    }

    #[test]
    fn test_invalid_tick_rejected() {
        let mut engine = orchestrator(permissive_config(), vec![]);
        let err = engine
            .on_tick(&Tick::new(ist(10, 0, 0), -1.0, 10.0))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidTick(_)));
        assert!(engine.position().is_none());
    }

    #[tokio::test]
    async fn test_run_until_end_of_stream_closes_position() {
        let ticks = vec![
            Tick::new(ist(10, 0, 0), 100.0, 10.0),
            Tick::new(ist(10, 0, 1), 101.0, 10.0),
        ];
        let mut engine = orchestrator(permissive_config(), ticks);

        let summary = engine.run().await.unwrap();
        assert_eq!(summary.stop_reason, StopReason::EndOfStream);
        assert_eq!(summary.ticks_processed, 2);
        assert_eq!(summary.trades.len(), 1);
        assert_eq!(
            summary.trades[0].final_exit_reason(),
            Some(ExitReason::Shutdown)
        );
        assert_eq!(engine.feed_state(), FeedState::Disconnected);
    }

    #[tokio::test]
    async fn test_stop_handle_stops_before_next_tick() {
        let ticks = vec![Tick::new(ist(10, 0, 0), 100.0, 10.0)];
        let mut engine = orchestrator(permissive_config(), ticks);
        engine.stop_handle().stop();

        let summary = engine.run().await.unwrap();
        assert_eq!(summary.stop_reason, StopReason::Requested);
        assert_eq!(summary.ticks_processed, 0);
    }
}
