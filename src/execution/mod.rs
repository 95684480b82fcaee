// Simulated execution and position lifecycle
pub mod broker;
pub mod exit_rules;
pub mod fees;
pub mod position_manager;

pub use broker::{OrderRequest, SimulatedBroker};
pub use exit_rules::{ExitContext, ExitInstruction, ExitRule};
pub use fees::FeeModel;
pub use position_manager::{
    ExitLeg, ExitReason, Position, PositionEvent, PositionLifecycleManager, PositionStatus,
    TakeProfitLeg, TrailState,
};
