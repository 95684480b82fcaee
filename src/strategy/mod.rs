// Signal evaluation: entry checks, directional gate and session rules
pub mod directional;
pub mod session;
pub mod signals;

pub use directional::{DirectionalTickCounter, EntryGate};
pub use session::SessionClock;
pub use signals::{check_entry, is_reversal, EntryBlock};

use crate::config::SignalSettings;
use crate::indicators::IndicatorSnapshot;
use crate::models::{SignalAction, Tick, TradingSignal};
use crate::risk::{CircuitBreakers, SessionStats};

/// Everything the evaluator reads for one tick
pub struct SignalContext<'a> {
    pub tick: &'a Tick,
    pub indicators: &'a IndicatorSnapshot,
    pub gate: &'a EntryGate,
    pub has_position: bool,
    pub entry_window_open: bool,
    pub stats: &'a SessionStats,
}

/// Turns indicator readings into BUY / CLOSE / HOLD
///
/// Pure: the same context always yields the same signal and nothing is
/// mutated.
#[derive(Debug, Clone)]
pub struct SignalEvaluator {
    settings: SignalSettings,
    breakers: CircuitBreakers,
}

impl SignalEvaluator {
    pub fn new(settings: SignalSettings, breakers: CircuitBreakers) -> Self {
        Self { settings, breakers }
    }

    pub fn evaluate(&self, ctx: &SignalContext<'_>) -> TradingSignal {
        let tick = ctx.tick;

        if ctx.has_position {
            if self.settings.exit_on_reversal && is_reversal(ctx.indicators) {
                return TradingSignal {
                    action: SignalAction::Close,
                    timestamp: tick.timestamp,
                    price: tick.price,
                    reason: "signal_exit".to_string(),
                };
            }
            return TradingSignal::hold(tick, "position open");
        }

        if !ctx.entry_window_open {
            return TradingSignal::hold(tick, "outside entry window");
        }
        if self.breakers.check_entry(ctx.stats).is_err() {
            return TradingSignal::hold(tick, "daily trade limit reached");
        }
        if let Err(block) = check_entry(&self.settings, ctx.indicators, tick.price) {
            return TradingSignal::hold(tick, block.as_str());
        }
        if !ctx.gate.is_armed() {
            let progress = format!("{}/{}", ctx.gate.green_ticks(), ctx.gate.required());
            let reason = match ctx.gate.last_exit() {
                Some(exit) => format!("waiting for green ticks ({}) after {}", progress, exit),
                None => format!("waiting for green ticks ({})", progress),
            };
            return TradingSignal::hold(tick, reason);
        }

        TradingSignal {
            action: SignalAction::Buy,
            timestamp: tick.timestamp,
            price: tick.price,
            reason: format!("entry conditions met after {} green ticks", ctx.gate.green_ticks()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RiskSettings;
    use crate::execution::ExitReason;
    use crate::indicators::MacdReading;
    use chrono::Utc;

    fn evaluator(settings: SignalSettings) -> SignalEvaluator {
        SignalEvaluator::new(settings, CircuitBreakers::default())
    }

    fn bullish() -> IndicatorSnapshot {
        IndicatorSnapshot {
            fast_ema: Some(101.0),
            slow_ema: Some(100.0),
            macd: Some(MacdReading {
                line: 0.5,
                signal: 0.2,
                histogram: 0.3,
            }),
            vwap: Some(99.0),
            ..IndicatorSnapshot::default()
        }
    }

    /// Gate with `green` qualifying rises observed
    fn gate(green: u32) -> EntryGate {
        let mut gate = EntryGate::new(&SignalSettings::default(), &RiskSettings::default());
        for i in 0..=green {
            gate.observe(100.0 + i as f64);
        }
        gate
    }

    fn ctx<'a>(
        tick: &'a Tick,
        indicators: &'a IndicatorSnapshot,
        stats: &'a SessionStats,
        gate: &'a EntryGate,
        has_position: bool,
    ) -> SignalContext<'a> {
        SignalContext {
            tick,
            indicators,
            gate,
            has_position,
            entry_window_open: true,
            stats,
        }
    }

    #[test]
    fn test_buy_when_all_gates_pass() {
        let tick = Tick::new(Utc::now(), 102.0, 10.0);
        let indicators = bullish();
        let stats = SessionStats::default();
        let gate = gate(3);

        let signal = evaluator(SignalSettings::default()).evaluate(&ctx(&tick, &indicators, &stats, &gate, false));
        assert_eq!(signal.action, SignalAction::Buy);
        assert_eq!(signal.price, 102.0);
    }

    #[test]
    fn test_hold_until_enough_green_ticks() {
        let tick = Tick::new(Utc::now(), 102.0, 10.0);
        let indicators = bullish();
        let stats = SessionStats::default();

        let gate = gate(2);

        let signal = evaluator(SignalSettings::default()).evaluate(&ctx(&tick, &indicators, &stats, &gate, false));
        assert_eq!(signal.action, SignalAction::Hold);
        assert!(signal.reason.contains("2/3"));
    }

    #[test]
    fn test_hold_reason_names_previous_exit() {
        let tick = Tick::new(Utc::now(), 102.0, 10.0);
        let indicators = bullish();
        let stats = SessionStats::default();
        let mut gate = gate(3);
        gate.on_position_closed(ExitReason::StopLoss);

        let signal = evaluator(SignalSettings::default()).evaluate(&ctx(&tick, &indicators, &stats, &gate, false));
        assert_eq!(signal.action, SignalAction::Hold);
        assert_eq!(signal.reason, "waiting for green ticks (0/3) after base_sl");
    }

    #[test]
    fn test_hold_outside_entry_window() {
        let tick = Tick::new(Utc::now(), 102.0, 10.0);
        let indicators = bullish();
        let stats = SessionStats::default();
        let gate = gate(5);
        let mut context = ctx(&tick, &indicators, &stats, &gate, false);
        context.entry_window_open = false;

        let signal = evaluator(SignalSettings::default()).evaluate(&context);
        assert_eq!(signal.action, SignalAction::Hold);
    }

    #[test]
    fn test_daily_cap_blocks_entry() {
        let tick = Tick::new(Utc::now(), 102.0, 10.0);
        let indicators = bullish();
        let stats = SessionStats {
            trades_today: 5,
            ..SessionStats::default()
        };
        let gate = gate(5);

        let signal = evaluator(SignalSettings::default()).evaluate(&ctx(&tick, &indicators, &stats, &gate, false));
        assert_eq!(signal.action, SignalAction::Hold);
        assert_eq!(signal.reason, "daily trade limit reached");
    }

    #[test]
    fn test_close_on_reversal_only_when_enabled() {
        let tick = Tick::new(Utc::now(), 98.0, 10.0);
        let indicators = IndicatorSnapshot {
            fast_ema: Some(99.0),
            slow_ema: Some(100.0),
            macd: Some(MacdReading {
                line: -0.5,
                signal: -0.2,
                histogram: -0.3,
            }),
            ..IndicatorSnapshot::default()
        };
        let stats = SessionStats::default();
        let gate = gate(0);

        let signal = evaluator(SignalSettings::default()).evaluate(&ctx(&tick, &indicators, &stats, &gate, true));
        assert_eq!(signal.action, SignalAction::Hold);

        let settings = SignalSettings {
            exit_on_reversal: true,
            ..SignalSettings::default()
        };
        let signal = evaluator(settings).evaluate(&ctx(&tick, &indicators, &stats, &gate, true));
        assert_eq!(signal.action, SignalAction::Close);
        assert_eq!(signal.reason, "signal_exit");
    }

    #[test]
    fn test_evaluation_is_pure() {
        let tick = Tick::new(Utc::now(), 102.0, 10.0);
        let indicators = bullish();
        let stats = SessionStats::default();
        let eval = evaluator(SignalSettings::default());
        let gate = gate(3);
        let context = ctx(&tick, &indicators, &stats, &gate, false);

        assert_eq!(eval.evaluate(&context), eval.evaluate(&context));
    }
}
