pub mod circuit_breakers;

pub use circuit_breakers::{CircuitBreakerTrip, CircuitBreakers, FailureStreak, SessionStats};
