use chrono::{DateTime, Utc};

use super::position_manager::{ExitReason, Position};
use crate::config::RiskSettings;

/// Market state an exit rule looks at
#[derive(Debug, Clone, Copy)]
pub struct ExitContext {
    pub price: f64,
    pub timestamp: DateTime<Utc>,
    pub session_over: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExitInstruction {
    /// Close everything that is left
    Full(ExitReason),
    /// Release one take-profit target
    Partial { quantity: u64, target_index: usize },
}

/// One link of the exit-priority chain
///
/// Rules run in order; the first one that returns an instruction wins the
/// tick. After a fill the chain starts again from the top.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExitRule {
    StopLoss,
    TakeProfit,
    TrailingStop { distance_points: f64 },
    SessionEnd,
}

impl ExitRule {
    /// StopLoss, TakeProfit, TrailingStop (when enabled), SessionEnd
    pub fn chain(risk: &RiskSettings) -> Vec<ExitRule> {
        let mut rules = vec![ExitRule::StopLoss, ExitRule::TakeProfit];
        if risk.trailing_enabled {
            rules.push(ExitRule::TrailingStop {
                distance_points: risk.trail_distance_points,
            });
        }
        rules.push(ExitRule::SessionEnd);
        rules
    }

    pub fn evaluate(&self, position: &mut Position, ctx: &ExitContext) -> Option<ExitInstruction> {
        match *self {
            ExitRule::StopLoss => (ctx.price <= position.stop_loss_price)
                .then_some(ExitInstruction::Full(ExitReason::StopLoss)),

            ExitRule::TakeProfit => position
                .targets
                .iter()
                .enumerate()
                .find(|(_, t)| !t.filled && ctx.price >= t.price)
                .map(|(index, t)| ExitInstruction::Partial {
                    quantity: t.quantity.min(position.remaining_quantity),
                    target_index: index,
                }),

            ExitRule::TrailingStop { distance_points } => {
                let trail = &mut position.trail;
                if ctx.price >= trail.activation_price {
                    let candidate = floor_to_tick(ctx.price - distance_points, position.tick_size);
                    if !trail.active {
                        tracing::info!(
                            position_id = %position.id,
                            price = ctx.price,
                            stop = candidate,
                            "Trailing stop activated"
                        );
                    }
                    trail.active = true;
                    // Ratchet only upwards
                    let stop = trail.current_stop_price.map_or(candidate, |s| s.max(candidate));
                    trail.current_stop_price = Some(stop);
                }

                match trail.current_stop_price {
                    Some(stop) if trail.active && ctx.price <= stop => {
                        Some(ExitInstruction::Full(ExitReason::TrailingStop))
                    }
                    _ => None,
                }
            }

            ExitRule::SessionEnd => ctx
                .session_over
                .then_some(ExitInstruction::Full(ExitReason::SessionEnd)),
        }
    }
}

/// Snap down so the stop never sits closer than the configured distance
fn floor_to_tick(price: f64, tick_size: f64) -> f64 {
    if tick_size > 0.0 {
        ((price / tick_size) + 1e-9).floor() * tick_size
    } else {
        price
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::position_manager::{PositionStatus, TakeProfitLeg, TrailState};
    use uuid::Uuid;

    fn position() -> Position {
        Position {
            id: Uuid::new_v4(),
            symbol: "NIFTY".to_string(),
            entry_price: 100.0,
            entry_time: Utc::now(),
            lot_size: 10,
            tick_size: 0.05,
            remaining_quantity: 10,
            exit_legs: Vec::new(),
            stop_loss_price: 95.0,
            targets: vec![
                TakeProfitLeg {
                    price: 110.0,
                    quantity: 5,
                    filled: false,
                },
                TakeProfitLeg {
                    price: 120.0,
                    quantity: 5,
                    filled: false,
                },
            ],
            trail: TrailState {
                active: false,
                activation_price: 108.0,
                current_stop_price: None,
            },
            status: PositionStatus::Open,
            entry_order_id: "SIM-test".to_string(),
            entry_commission: 0.0,
        }
    }

    fn ctx(price: f64) -> ExitContext {
        ExitContext {
            price,
            timestamp: Utc::now(),
            session_over: false,
        }
    }

    #[test]
    fn test_stop_loss_at_boundary() {
        let mut pos = position();
        assert_eq!(ExitRule::StopLoss.evaluate(&mut pos, &ctx(95.01)), None);
        assert_eq!(
            ExitRule::StopLoss.evaluate(&mut pos, &ctx(95.0)),
            Some(ExitInstruction::Full(ExitReason::StopLoss))
        );
    }

    #[test]
    fn test_take_profit_picks_lowest_unfilled_target() {
        let mut pos = position();
        assert_eq!(
            ExitRule::TakeProfit.evaluate(&mut pos, &ctx(125.0)),
            Some(ExitInstruction::Partial {
                quantity: 5,
                target_index: 0
            })
        );

        pos.targets[0].filled = true;
        assert_eq!(
            ExitRule::TakeProfit.evaluate(&mut pos, &ctx(125.0)),
            Some(ExitInstruction::Partial {
                quantity: 5,
                target_index: 1
            })
        );
        assert_eq!(ExitRule::TakeProfit.evaluate(&mut pos, &ctx(115.0)), None);
    }

    #[test]
    fn test_trailing_stop_ratchets_and_fires() {
        let rule = ExitRule::TrailingStop {
            distance_points: 4.0,
        };
        let mut pos = position();

        assert_eq!(rule.evaluate(&mut pos, &ctx(107.0)), None);
        assert!(!pos.trail.active);

        assert_eq!(rule.evaluate(&mut pos, &ctx(108.0)), None);
        assert!(pos.trail.active);
        assert!((pos.trail.current_stop_price.unwrap() - 104.0).abs() < 1e-9);

        assert_eq!(rule.evaluate(&mut pos, &ctx(112.0)), None);
        assert!((pos.trail.current_stop_price.unwrap() - 108.0).abs() < 1e-9);

        // Pullback never lowers the stop
        assert_eq!(rule.evaluate(&mut pos, &ctx(109.0)), None);
        assert!((pos.trail.current_stop_price.unwrap() - 108.0).abs() < 1e-9);

        assert_eq!(
            rule.evaluate(&mut pos, &ctx(107.9)),
            Some(ExitInstruction::Full(ExitReason::TrailingStop))
        );
    }

    #[test]
    fn test_trailing_stop_snaps_below_price() {
        let rule = ExitRule::TrailingStop {
            distance_points: 0.02,
        };
        let mut pos = position();

        // Distance under half a tick must not put the stop on the price
        assert_eq!(rule.evaluate(&mut pos, &ctx(108.0)), None);
        assert!(pos.trail.active);
        let stop = pos.trail.current_stop_price.unwrap();
        assert!((stop - 107.95).abs() < 1e-9);
        assert!(stop < 108.0);

        assert_eq!(
            rule.evaluate(&mut pos, &ctx(107.95)),
            Some(ExitInstruction::Full(ExitReason::TrailingStop))
        );
    }

    #[test]
    fn test_session_end() {
        let mut pos = position();
        let mut context = ctx(100.0);
        assert_eq!(ExitRule::SessionEnd.evaluate(&mut pos, &context), None);
        context.session_over = true;
        assert_eq!(
            ExitRule::SessionEnd.evaluate(&mut pos, &context),
            Some(ExitInstruction::Full(ExitReason::SessionEnd))
        );
    }

    #[test]
    fn test_chain_order() {
        let risk = RiskSettings {
            trailing_enabled: true,
            ..RiskSettings::default()
        };
        let chain = ExitRule::chain(&risk);
        assert_eq!(chain.len(), 4);
        assert_eq!(chain[0], ExitRule::StopLoss);
        assert_eq!(chain[1], ExitRule::TakeProfit);
        assert_eq!(chain[3], ExitRule::SessionEnd);

        assert_eq!(ExitRule::chain(&RiskSettings::default()).len(), 3);
    }
}
