// Core modules
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod execution;
pub mod feed;
pub mod indicators;
pub mod models;
pub mod persistence;
pub mod risk;
pub mod strategy;

// Re-export commonly used types
pub use config::EngineConfig;
pub use engine::{SessionSummary, StepOutcome, StopHandle, StopReason, TradingOrchestrator};
pub use error::{EngineError, FeedError, Result};
pub use events::{EngineEvent, EventBus};
pub use models::*;
