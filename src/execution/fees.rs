use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Commission charged per simulated order
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum FeeModel {
    Zero,
    /// Fixed amount per order
    Flat { per_order: f64 },
    /// Fraction of traded value, optionally capped per order
    Percent {
        rate: f64,
        #[serde(default)]
        max_per_order: Option<f64>,
    },
}

impl Default for FeeModel {
    fn default() -> Self {
        FeeModel::Zero
    }
}

impl FeeModel {
    pub fn commission(&self, price: f64, quantity: u64) -> f64 {
        match *self {
            FeeModel::Zero => 0.0,
            FeeModel::Flat { per_order } => per_order,
            FeeModel::Percent {
                rate,
                max_per_order,
            } => {
                let fee = price * quantity as f64 * rate;
                max_per_order.map_or(fee, |cap| fee.min(cap))
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match *self {
            FeeModel::Zero => Ok(()),
            FeeModel::Flat { per_order } if per_order.is_finite() && per_order >= 0.0 => Ok(()),
            FeeModel::Flat { .. } => Err(ConfigError::invalid(
                "risk.fees.per_order",
                "must be a non-negative amount",
            )),
            FeeModel::Percent {
                rate,
                max_per_order,
            } => {
                if !(0.0..1.0).contains(&rate) {
                    return Err(ConfigError::invalid("risk.fees.rate", "must be in [0, 1)"));
                }
                if max_per_order.is_some_and(|cap| !cap.is_finite() || cap < 0.0) {
                    return Err(ConfigError::invalid(
                        "risk.fees.max_per_order",
                        "must be a non-negative amount",
                    ));
                }
                Ok(())
            }
        }
    }
}
