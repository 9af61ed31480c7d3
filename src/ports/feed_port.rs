//! Live market-event source.

use async_trait::async_trait;

use crate::domain::error::DeskError;
use crate::domain::timeline::MarketEvent;

#[async_trait]
pub trait FeedPort: Send + Sync {
    /// Events that arrived since the previous poll. May be empty.
    async fn poll(&self) -> Result<Vec<MarketEvent>, DeskError>;

    fn is_exhausted(&self) -> bool;
}
