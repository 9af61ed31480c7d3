//! In-memory broker simulator for paper trading.
//!
//! Orders fill immediately at their reference price and update a netted
//! position book. [`PaperFaults`] injects the failure modes the live driver
//! has to survive.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::error::BrokerError;
use crate::domain::position::Side;
use crate::ports::broker_port::{BrokerPort, BrokerPosition, OrderId, OrderRequest, OrderStatus};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaperFaults {
    /// The first N submissions fail with a transport error.
    pub failing_submissions: u32,
    /// Orders for these instruments are rejected.
    pub rejected_instruments: BTreeSet<String>,
    /// Submissions for these instruments always fail with a transport error.
    pub unreachable_instruments: BTreeSet<String>,
    /// Orders fill at the broker but status queries report Working forever.
    pub silent_fills: bool,
    /// Status queries answer Working this many times before the real status.
    pub ack_delay_polls: u32,
}

#[derive(Debug, Clone)]
struct PaperOrder {
    outcome: OrderStatus,
    queries: u32,
}

#[derive(Debug, Default)]
struct PaperState {
    next_order: u64,
    submissions: u32,
    failures_left: u32,
    orders: HashMap<OrderId, PaperOrder>,
    book: BTreeMap<String, BrokerPosition>,
}

impl PaperState {
    fn apply_fill(&mut self, request: &OrderRequest) {
        match self.book.get_mut(&request.instrument) {
            None => {
                self.book.insert(
                    request.instrument.clone(),
                    BrokerPosition {
                        instrument: request.instrument.clone(),
                        side: request.side,
                        quantity: request.quantity,
                    },
                );
            }
            Some(held) if held.side == request.side => held.quantity += request.quantity,
            Some(held) if held.quantity > request.quantity => held.quantity -= request.quantity,
            Some(held) if held.quantity < request.quantity => {
                held.quantity = request.quantity - held.quantity;
                held.side = request.side;
            }
            Some(_) => {
                self.book.remove(&request.instrument);
            }
        }
    }
}

pub struct PaperBroker {
    faults: PaperFaults,
    state: Mutex<PaperState>,
}

impl PaperBroker {
    pub fn new() -> Self {
        Self::with_faults(PaperFaults::default())
    }

    pub fn with_faults(faults: PaperFaults) -> Self {
        let state = PaperState {
            failures_left: faults.failing_submissions,
            ..PaperState::default()
        };
        Self {
            faults,
            state: Mutex::new(state),
        }
    }

    /// Every submission attempt, including failed ones.
    pub async fn submission_count(&self) -> u32 {
        self.state.lock().await.submissions
    }

    /// Overwrite the broker's book for one instrument (`None` flattens it).
    pub async fn set_position(&self, instrument: &str, position: Option<(Side, u64)>) {
        let mut state = self.state.lock().await;
        match position {
            Some((side, quantity)) => {
                state.book.insert(
                    instrument.to_string(),
                    BrokerPosition {
                        instrument: instrument.to_string(),
                        side,
                        quantity,
                    },
                );
            }
            None => {
                state.book.remove(instrument);
            }
        }
    }
}

impl Default for PaperBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerPort for PaperBroker {
    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderId, BrokerError> {
        let mut state = self.state.lock().await;
        state.submissions += 1;
        if state.failures_left > 0 {
            state.failures_left -= 1;
            return Err(BrokerError::Transport("simulated submission failure".to_string()));
        }
        if self.faults.unreachable_instruments.contains(&request.instrument) {
            return Err(BrokerError::Transport(format!("{} is unreachable", request.instrument)));
        }

        state.next_order += 1;
        let order_id = format!("PAPER-{}", state.next_order);
        let outcome = if self.faults.rejected_instruments.contains(&request.instrument) {
            OrderStatus::Rejected {
                reason: format!("{} is not tradable", request.instrument),
            }
        } else {
            state.apply_fill(request);
            OrderStatus::Filled {
                price: request.reference_price,
                quantity: request.quantity,
            }
        };
        state
            .orders
            .insert(order_id.clone(), PaperOrder { outcome, queries: 0 });
        Ok(order_id)
    }

    async fn order_status(&self, order_id: &str) -> Result<OrderStatus, BrokerError> {
        let mut state = self.state.lock().await;
        let order = state
            .orders
            .get_mut(order_id)
            .ok_or_else(|| BrokerError::Transport(format!("unknown order {order_id}")))?;
        if self.faults.silent_fills {
            return Ok(OrderStatus::Working);
        }
        if order.queries < self.faults.ack_delay_polls {
            order.queries += 1;
            return Ok(OrderStatus::Working);
        }
        Ok(order.outcome.clone())
    }

    async fn list_positions(&self) -> Result<Vec<BrokerPosition>, BrokerError> {
        Ok(self.state.lock().await.book.values().cloned().collect())
    }
}
