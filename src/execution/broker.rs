use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::OrderSide;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: u64,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

/// Paper broker: every order fills at the requested price
///
/// Nothing leaves the process; each order gets a synthetic `SIM-` id.
#[derive(Debug, Default)]
pub struct SimulatedBroker {
    orders_placed: u64,
}

impl SimulatedBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn place_order(&mut self, order: &OrderRequest) -> String {
        self.orders_placed += 1;
        let simple = Uuid::new_v4().simple().to_string();
        let order_id = format!("SIM-{}", &simple[..12]);

        tracing::info!(
            symbol = %order.symbol,
            side = ?order.side,
            quantity = order.quantity,
            price = order.price,
            %order_id,
            "📝 Simulated order filled"
        );
        order_id
    }

    pub fn orders_placed(&self) -> u64 {
        self.orders_placed
    }
}
