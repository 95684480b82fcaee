use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::broker::{OrderRequest, SimulatedBroker};
use super::exit_rules::{ExitContext, ExitInstruction, ExitRule};
use crate::config::RiskSettings;
use crate::error::PositionError;
use crate::models::OrderSide;
use crate::risk::SessionStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Open,
    PartiallyClosed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExitReason {
    #[serde(rename = "base_sl")]
    StopLoss,
    #[serde(rename = "target_profit")]
    TargetProfit,
    #[serde(rename = "trailing_stop")]
    TrailingStop,
    #[serde(rename = "session_end")]
    SessionEnd,
    #[serde(rename = "signal_exit")]
    SignalExit,
    #[serde(rename = "error_threshold_exceeded")]
    ErrorThreshold,
    #[serde(rename = "feed_failure")]
    FeedFailure,
    #[serde(rename = "shutdown")]
    Shutdown,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "base_sl",
            ExitReason::TargetProfit => "target_profit",
            ExitReason::TrailingStop => "trailing_stop",
            ExitReason::SessionEnd => "session_end",
            ExitReason::SignalExit => "signal_exit",
            ExitReason::ErrorThreshold => "error_threshold_exceeded",
            ExitReason::FeedFailure => "feed_failure",
            ExitReason::Shutdown => "shutdown",
        }
    }

    /// Exits forced by a fault rather than by the trading rules
    pub fn is_fault_driven(&self) -> bool {
        matches!(
            self,
            ExitReason::ErrorThreshold | ExitReason::FeedFailure | ExitReason::Shutdown
        )
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One executed exit. Legs are append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitLeg {
    pub quantity: u64,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
    pub reason: ExitReason,
    pub gross_pnl: f64,
    pub commission: f64,
    pub net_pnl: f64,
    pub order_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TakeProfitLeg {
    pub price: f64,
    pub quantity: u64,
    pub filled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailState {
    pub active: bool,
    pub activation_price: f64,
    /// Only ever moves up once set
    pub current_stop_price: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub symbol: String,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub lot_size: u64,
    pub tick_size: f64,
    pub remaining_quantity: u64,
    pub exit_legs: Vec<ExitLeg>,
    pub stop_loss_price: f64,
    pub targets: Vec<TakeProfitLeg>,
    pub trail: TrailState,
    pub status: PositionStatus,
    pub entry_order_id: String,
    pub entry_commission: f64,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.status != PositionStatus::Closed
    }

    pub fn closed_quantity(&self) -> u64 {
        self.exit_legs.iter().map(|l| l.quantity).sum()
    }

    /// Net P&L of all legs, after entry and exit commissions
    pub fn realized_pnl(&self) -> f64 {
        self.exit_legs.iter().map(|l| l.net_pnl).sum::<f64>() - self.entry_commission
    }

    /// Reason of the leg that closed the position
    pub fn final_exit_reason(&self) -> Option<ExitReason> {
        match self.status {
            PositionStatus::Closed => self.exit_legs.last().map(|l| l.reason),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PositionEvent {
    Opened(Position),
    PartiallyClosed {
        position_id: Uuid,
        leg: ExitLeg,
        remaining_quantity: u64,
    },
    Closed {
        position: Position,
        reason: ExitReason,
    },
}

/// Owns the single open position and runs the exit chain on every tick
pub struct PositionLifecycleManager {
    risk: RiskSettings,
    rules: Vec<ExitRule>,
    broker: SimulatedBroker,
    position: Option<Position>,
    history: Vec<Position>,
    stats: SessionStats,
}

impl PositionLifecycleManager {
    pub fn new(risk: &RiskSettings) -> Self {
        Self {
            rules: ExitRule::chain(risk),
            risk: risk.clone(),
            broker: SimulatedBroker::new(),
            position: None,
            history: Vec::new(),
            stats: SessionStats::default(),
        }
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    pub fn has_open_position(&self) -> bool {
        self.position.is_some()
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Positions closed during the current session
    pub fn history(&self) -> &[Position] {
        &self.history
    }

    pub fn broker(&self) -> &SimulatedBroker {
        &self.broker
    }

    /// Start a new trading day: counters and history are cleared
    pub fn begin_session(&mut self, day: NaiveDate) {
        self.stats.begin_session(day);
        self.history.clear();
    }

    /// Open a long position
    ///
    /// Rejected without any state change while another position is open.
    pub fn open(
        &mut self,
        symbol: &str,
        price: f64,
        timestamp: DateTime<Utc>,
        lot_size: u64,
        tick_size: f64,
    ) -> Result<PositionEvent, PositionError> {
        if let Some(existing) = &self.position {
            return Err(PositionError::AlreadyOpen { id: existing.id });
        }
        if !price.is_finite() || price <= 0.0 {
            return Err(PositionError::InvalidPrice(price));
        }
        if lot_size == 0 {
            return Err(PositionError::InvalidQuantity {
                quantity: 0,
                remaining: 0,
            });
        }

        let targets = self.build_targets(price, lot_size);
        let entry_order_id = self.broker.place_order(&OrderRequest {
            symbol: symbol.to_string(),
            side: OrderSide::Buy,
            quantity: lot_size,
            price,
            timestamp,
        });
        let entry_commission = self.risk.fees.commission(price, lot_size);

        let position = Position {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            entry_price: price,
            entry_time: timestamp,
            lot_size,
            tick_size,
            remaining_quantity: lot_size,
            exit_legs: Vec::new(),
            stop_loss_price: price - self.risk.base_sl_points,
            targets,
            trail: TrailState {
                active: false,
                activation_price: price + self.risk.trail_activation_points,
                current_stop_price: None,
            },
            status: PositionStatus::Open,
            entry_order_id,
            entry_commission,
        };

        self.stats.record_entry(timestamp);
        self.stats.pnl_today -= entry_commission;

        tracing::info!(
            symbol = %position.symbol,
            position_id = %position.id,
            price,
            quantity = lot_size,
            stop = position.stop_loss_price,
            targets = position.targets.len(),
            "🟢 Position opened"
        );

        self.position = Some(position.clone());
        Ok(PositionEvent::Opened(position))
    }

    /// Targets at entry + tp_points[i], sized from the original lot
    ///
    /// When the percentages add up to 100 the last target takes whatever
    /// flooring left over. Targets that round to zero units are dropped.
    fn build_targets(&self, entry_price: f64, lot_size: u64) -> Vec<TakeProfitLeg> {
        let total_pct: f64 = self.risk.tp_percents.iter().sum();
        let absorb_residue = (total_pct - 100.0).abs() < 1e-9;
        let last = self.risk.tp_points.len().saturating_sub(1);

        let mut allocated = 0u64;
        let mut targets = Vec::with_capacity(self.risk.tp_points.len());

        for (i, (points, pct)) in self
            .risk
            .tp_points
            .iter()
            .zip(self.risk.tp_percents.iter())
            .enumerate()
        {
            let available = lot_size - allocated;
            let mut quantity = ((lot_size as f64 * pct / 100.0) + 1e-9).floor() as u64;
            if absorb_residue && i == last {
                quantity = available;
            }
            let quantity = quantity.min(available);

            if quantity == 0 {
                tracing::debug!(target = i, pct, lot_size, "Dropping zero-quantity target");
                continue;
            }
            allocated += quantity;
            targets.push(TakeProfitLeg {
                price: entry_price + points,
                quantity,
                filled: false,
            });
        }

        targets
    }

    /// Run the exit chain for one tick
    ///
    /// Every fill restarts the chain from the top, so several targets can be
    /// released by a single tick and a stop is always checked first.
    pub fn process(
        &mut self,
        price: f64,
        timestamp: DateTime<Utc>,
        session_over: bool,
    ) -> Result<Vec<PositionEvent>, PositionError> {
        let ctx = ExitContext {
            price,
            timestamp,
            session_over,
        };
        let mut events = Vec::new();

        loop {
            let Some(position) = self.position.as_mut() else {
                break;
            };
            let instruction = self.rules.iter().find_map(|rule| rule.evaluate(position, &ctx));

            match instruction {
                None => break,
                Some(ExitInstruction::Full(reason)) => {
                    events.push(self.close_full(price, timestamp, reason)?);
                }
                Some(ExitInstruction::Partial {
                    quantity,
                    target_index,
                }) => {
                    if let Some(target) = position.targets.get_mut(target_index) {
                        target.filled = true;
                    }
                    events.push(self.close_partial(quantity, price, timestamp, ExitReason::TargetProfit)?);
                }
            }
        }

        Ok(events)
    }

    /// Close whatever quantity is left
    pub fn close_full(
        &mut self,
        price: f64,
        timestamp: DateTime<Utc>,
        reason: ExitReason,
    ) -> Result<PositionEvent, PositionError> {
        let remaining = self
            .position
            .as_ref()
            .ok_or(PositionError::NoOpenPosition)?
            .remaining_quantity;
        self.close_partial(remaining, price, timestamp, reason)
    }

    /// Close `quantity` units; closing the remainder closes the position
    pub fn close_partial(
        &mut self,
        quantity: u64,
        price: f64,
        timestamp: DateTime<Utc>,
        reason: ExitReason,
    ) -> Result<PositionEvent, PositionError> {
        let position = self.position.as_mut().ok_or(PositionError::NoOpenPosition)?;
        if quantity == 0 || quantity > position.remaining_quantity {
            return Err(PositionError::InvalidQuantity {
                quantity,
                remaining: position.remaining_quantity,
            });
        }
        if !price.is_finite() || price <= 0.0 {
            return Err(PositionError::InvalidPrice(price));
        }

        let order_id = self.broker.place_order(&OrderRequest {
            symbol: position.symbol.clone(),
            side: OrderSide::Sell,
            quantity,
            price,
            timestamp,
        });

        let gross_pnl = (price - position.entry_price) * quantity as f64;
        let commission = self.risk.fees.commission(price, quantity);
        let leg = ExitLeg {
            quantity,
            price,
            timestamp,
            reason,
            gross_pnl,
            commission,
            net_pnl: gross_pnl - commission,
            order_id,
        };

        position.exit_legs.push(leg.clone());
        position.remaining_quantity -= quantity;
        self.stats.record_exit(leg.net_pnl, timestamp);

        if position.remaining_quantity > 0 {
            position.status = PositionStatus::PartiallyClosed;
            tracing::info!(
                position_id = %position.id,
                quantity,
                price,
                remaining = position.remaining_quantity,
                reason = reason.as_str(),
                net_pnl = leg.net_pnl,
                "Partial exit"
            );
            return Ok(PositionEvent::PartiallyClosed {
                position_id: position.id,
                leg,
                remaining_quantity: position.remaining_quantity,
            });
        }

        position.status = PositionStatus::Closed;
        let closed = match self.position.take() {
            Some(closed) => closed,
            None => return Err(PositionError::NoOpenPosition),
        };

        tracing::info!(
            symbol = %closed.symbol,
            position_id = %closed.id,
            price,
            reason = reason.as_str(),
            realized_pnl = closed.realized_pnl(),
            pnl_today = self.stats.pnl_today,
            "🔴 Position closed"
        );

        self.history.push(closed.clone());
        Ok(PositionEvent::Closed {
            position: closed,
            reason,
        })
    }
}
