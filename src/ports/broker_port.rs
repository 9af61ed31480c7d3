//! Broker collaborator port (live and paper modes).

use async_trait::async_trait;

use crate::domain::error::BrokerError;
use crate::domain::position::Side;

pub type OrderId = String;

#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub instrument: String,
    pub side: Side,
    pub quantity: u64,
    /// Market-on-close hint; simulators fill at this price.
    pub reference_price: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OrderStatus {
    Working,
    Filled { price: f64, quantity: u64 },
    Rejected { reason: String },
}

/// A net position as the broker reports it.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerPosition {
    pub instrument: String,
    pub side: Side,
    pub quantity: u64,
}

#[async_trait]
pub trait BrokerPort: Send + Sync {
    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderId, BrokerError>;

    async fn order_status(&self, order_id: &str) -> Result<OrderStatus, BrokerError>;

    async fn list_positions(&self) -> Result<Vec<BrokerPosition>, BrokerError>;
}
