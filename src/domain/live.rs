//! Polling driver for paper and live trading.
//!
//! Each poll runs the same phases as the backtest, but orders go through a
//! [`BrokerPort`] and a new position waits in Pending until the broker
//! acknowledges it. The whole slice, broker round-trips included, runs under
//! the shared ledger lock, so several drivers can share one ledger without
//! breaking the per-instrument and capital limits.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use tokio::sync::{watch, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::error::{BrokerError, DeskError};
use super::ledger::{ExitOrder, PositionLedger, SliceReport};
use super::position::{Position, TradeRecord};
use super::risk::EntryCandidate;
use super::timeline::{slices_from_events, Slice};
use crate::ports::broker_port::{BrokerPort, BrokerPosition, OrderRequest, OrderStatus};
use crate::ports::feed_port::FeedPort;

pub type SharedLedger = Arc<Mutex<PositionLedger>>;

pub fn shared_ledger(ledger: PositionLedger) -> SharedLedger {
    Arc::new(Mutex::new(ledger))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveConfig {
    pub poll_interval: Duration,
    pub ack_timeout: Duration,
    pub ack_poll: Duration,
    /// Total submission attempts per order (at least one).
    pub max_submit_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            ack_timeout: Duration::from_millis(5000),
            ack_poll: Duration::from_millis(100),
            max_submit_retries: 3,
            retry_backoff: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Ack {
    Filled { price: f64, quantity: u64 },
    Rejected(String),
    TimedOut,
}

pub struct LiveDriver {
    ledger: SharedLedger,
    broker: Arc<dyn BrokerPort>,
    feed: Arc<dyn FeedPort>,
    config: LiveConfig,
}

impl LiveDriver {
    pub fn new(
        ledger: SharedLedger,
        broker: Arc<dyn BrokerPort>,
        feed: Arc<dyn FeedPort>,
        config: LiveConfig,
    ) -> Self {
        Self {
            ledger,
            broker,
            feed,
            config,
        }
    }

    pub fn ledger(&self) -> SharedLedger {
        Arc::clone(&self.ledger)
    }

    /// Poll on a fixed cadence until the feed runs dry or `shutdown` flips
    /// to true, then force-close what is still open.
    ///
    /// A closed shutdown channel counts as a shutdown request. A fatal error
    /// stops the loop through [`LiveDriver::abort`].
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<Vec<TradeRecord>, DeskError> {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            poll_ms = self.config.poll_interval.as_millis() as u64,
            "live driver started"
        );

        while !*shutdown.borrow() {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        info!("shutdown channel closed");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.poll_once().await {
                        return Err(self.abort(err).await);
                    }
                    if self.feed.is_exhausted() {
                        info!("feed exhausted");
                        break;
                    }
                }
            }
        }

        self.shutdown().await
    }

    /// Fatal error path for [`LiveDriver::run`]. Open positions are
    /// force-closed unless the ledger and the broker already disagree, in
    /// which case no further orders go out. Returns the original error.
    async fn abort(&self, err: DeskError) -> DeskError {
        if matches!(err, DeskError::Broker(BrokerError::ReconciliationMismatch { .. })) {
            error!(error = %err, "ledger and broker disagree, positions left for manual reconciliation");
            return err;
        }
        warn!(error = %err, "fatal error, closing open positions");
        match self.shutdown().await {
            Ok(closed) => info!(closed = closed.len(), "positions closed after fatal error"),
            Err(close_err) => error!(error = %close_err, "forced close after fatal error failed"),
        }
        err
    }

    /// Pull one batch from the feed and apply it slice by slice.
    pub async fn poll_once(&self) -> Result<SliceReport, DeskError> {
        let events = self.feed.poll().await?;
        let mut total = SliceReport::default();
        for slice in slices_from_events(&events)? {
            let report = self.process_slice(&slice).await?;
            total.closed += report.closed;
            total.opened += report.opened;
            total.rejected += report.rejected;
        }
        Ok(total)
    }

    /// Once the slice is marked, its equity point is recorded even if a
    /// broker call fails part way, so the curve reflects every fill that
    /// landed before the error.
    async fn process_slice(&self, slice: &Slice) -> Result<SliceReport, DeskError> {
        let mut guard = self.ledger.lock().await;
        let ledger = &mut *guard;
        let mut report = SliceReport::default();

        ledger.mark_slice(slice)?;
        let traded = self.trade_slice(ledger, slice, &mut report).await;
        ledger.record_equity(slice.timestamp);
        traded?;

        debug!(
            timestamp = %slice.timestamp,
            closed = report.closed,
            opened = report.opened,
            rejected = report.rejected,
            "live slice applied"
        );
        Ok(report)
    }

    async fn trade_slice(
        &self,
        ledger: &mut PositionLedger,
        slice: &Slice,
        report: &mut SliceReport,
    ) -> Result<(), DeskError> {
        for exit in ledger.exit_orders(slice) {
            if self.execute_exit(ledger, &exit, slice.timestamp).await?.is_some() {
                report.closed += 1;
            }
        }

        for bar in &slice.bars {
            let Some(direction) = slice.signal_for(&bar.instrument) else {
                continue;
            };
            match ledger.entry_candidate(&bar.instrument, direction, bar.close) {
                Ok(Some(candidate)) => {
                    if self.execute_entry(ledger, candidate, slice.timestamp).await? {
                        report.opened += 1;
                    }
                }
                Ok(None) => {}
                Err(reason) => {
                    ledger.reject(slice.timestamp, &bar.instrument, direction, reason);
                    report.rejected += 1;
                }
            }
        }
        Ok(())
    }

    /// Reserve, submit, await the fill. Returns whether a position opened.
    async fn execute_entry(
        &self,
        ledger: &mut PositionLedger,
        candidate: EntryCandidate,
        timestamp: NaiveDateTime,
    ) -> Result<bool, DeskError> {
        let request = OrderRequest {
            instrument: candidate.instrument.clone(),
            side: candidate.side,
            quantity: candidate.quantity,
            reference_price: candidate.entry_price,
        };
        let instrument = request.instrument.as_str();
        if ledger.reserve(candidate, timestamp, None).is_none() {
            return Ok(false);
        }

        let order_id = match self.submit_with_retry(&request).await {
            Ok(id) => id,
            Err(err) => {
                ledger.release_pending(instrument);
                return Err(err.into());
            }
        };
        ledger.attach_order(instrument, order_id.clone());

        match self.await_ack(&order_id).await? {
            Ack::Filled { price, quantity } => {
                if quantity != request.quantity {
                    ledger.release_pending(instrument);
                    return Err(BrokerError::ReconciliationMismatch {
                        instrument: instrument.to_string(),
                        ledger: format!("{} {}", request.side, request.quantity),
                        broker: format!("filled {quantity}"),
                    }
                    .into());
                }
                Ok(ledger.activate(instrument, price, timestamp).is_some())
            }
            Ack::Rejected(reason) => {
                warn!(instrument, %order_id, %reason, "entry order rejected by broker");
                ledger.release_pending(instrument);
                Ok(false)
            }
            Ack::TimedOut => {
                let held = self.broker_position(instrument).await?;
                match held {
                    Some(p) if p.side == request.side && p.quantity == request.quantity => {
                        info!(instrument, %order_id, "unacknowledged entry found at broker, activating");
                        Ok(ledger
                            .activate(instrument, request.reference_price, timestamp)
                            .is_some())
                    }
                    None => {
                        info!(instrument, %order_id, "unacknowledged entry absent at broker, releasing");
                        ledger.release_pending(instrument);
                        Ok(false)
                    }
                    Some(p) => {
                        ledger.release_pending(instrument);
                        Err(BrokerError::ReconciliationMismatch {
                            instrument: instrument.to_string(),
                            ledger: format!("pending {} {}", request.side, request.quantity),
                            broker: format!("{} {}", p.side, p.quantity),
                        }
                        .into())
                    }
                }
            }
        }
    }

    /// Submit the closing order and settle the ledger from the broker's answer.
    async fn execute_exit(
        &self,
        ledger: &mut PositionLedger,
        exit: &ExitOrder,
        timestamp: NaiveDateTime,
    ) -> Result<Option<TradeRecord>, DeskError> {
        let request = OrderRequest {
            instrument: exit.instrument.clone(),
            side: exit.side.opposite(),
            quantity: exit.quantity,
            reference_price: exit.price,
        };
        let order_id = self.submit_with_retry(&request).await?;

        let fill_price = match self.await_ack(&order_id).await? {
            Ack::Filled { price, .. } => price,
            Ack::Rejected(reason) => {
                warn!(instrument = %exit.instrument, %order_id, %reason, "exit order rejected by broker");
                return self.settle_unconfirmed_exit(ledger, exit, timestamp).await;
            }
            Ack::TimedOut => return self.settle_unconfirmed_exit(ledger, exit, timestamp).await,
        };
        Ok(ledger.close_position(&exit.instrument, fill_price, timestamp, exit.reason))
    }

    /// Exit without a fill: trust the broker's book. Gone means closed;
    /// unchanged means still open; anything else is drift.
    async fn settle_unconfirmed_exit(
        &self,
        ledger: &mut PositionLedger,
        exit: &ExitOrder,
        timestamp: NaiveDateTime,
    ) -> Result<Option<TradeRecord>, DeskError> {
        match self.broker_position(&exit.instrument).await? {
            None => Ok(ledger.close_position(&exit.instrument, exit.price, timestamp, exit.reason)),
            Some(p) if p.side == exit.side && p.quantity == exit.quantity => {
                warn!(instrument = %exit.instrument, "exit not executed, position stays open");
                Ok(None)
            }
            Some(p) => Err(BrokerError::ReconciliationMismatch {
                instrument: exit.instrument.clone(),
                ledger: format!("{} {}", exit.side, exit.quantity),
                broker: format!("{} {}", p.side, p.quantity),
            }
            .into()),
        }
    }

    async fn submit_with_retry(&self, request: &OrderRequest) -> Result<String, BrokerError> {
        let attempts = self.config.max_submit_retries.max(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match self.broker.submit_order(request).await {
                Ok(order_id) => {
                    debug!(instrument = %request.instrument, %order_id, attempt, "order submitted");
                    return Ok(order_id);
                }
                Err(err) => {
                    warn!(instrument = %request.instrument, attempt, error = %err, "order submission failed");
                    last_error = err.to_string();
                    if attempt < attempts {
                        tokio::time::sleep(self.config.retry_backoff).await;
                    }
                }
            }
        }
        Err(BrokerError::Submission {
            instrument: request.instrument.clone(),
            attempts,
            reason: last_error,
        })
    }

    async fn await_ack(&self, order_id: &str) -> Result<Ack, BrokerError> {
        match tokio::time::timeout(self.config.ack_timeout, self.poll_status(order_id)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(
                    order_id,
                    waited_ms = self.config.ack_timeout.as_millis() as u64,
                    "order not acknowledged in time, reconciling"
                );
                Ok(Ack::TimedOut)
            }
        }
    }

    async fn poll_status(&self, order_id: &str) -> Result<Ack, BrokerError> {
        loop {
            match self.broker.order_status(order_id).await? {
                OrderStatus::Working => tokio::time::sleep(self.config.ack_poll).await,
                OrderStatus::Filled { price, quantity } => return Ok(Ack::Filled { price, quantity }),
                OrderStatus::Rejected { reason } => return Ok(Ack::Rejected(reason)),
            }
        }
    }

    async fn broker_position(&self, instrument: &str) -> Result<Option<BrokerPosition>, BrokerError> {
        Ok(self
            .broker
            .list_positions()
            .await?
            .into_iter()
            .find(|p| p.instrument == instrument))
    }

    /// Compare every Open ledger position with the broker's book.
    pub async fn reconcile(&self) -> Result<(), DeskError> {
        let ledger = self.ledger.lock().await;
        let broker_positions = self.broker.list_positions().await?;

        let open: Vec<&Position> = ledger.account().positions().filter(|p| p.is_open()).collect();
        for position in &open {
            let held = broker_positions
                .iter()
                .find(|b| b.instrument == position.instrument);
            match held {
                Some(b) if b.side == position.side && b.quantity == position.quantity => {}
                other => {
                    return Err(BrokerError::ReconciliationMismatch {
                        instrument: position.instrument.clone(),
                        ledger: format!("{} {}", position.side, position.quantity),
                        broker: other
                            .map(|b| format!("{} {}", b.side, b.quantity))
                            .unwrap_or_else(|| "flat".to_string()),
                    }
                    .into());
                }
            }
        }

        if let Some(extra) = broker_positions
            .iter()
            .find(|b| !open.iter().any(|p| p.instrument == b.instrument))
        {
            return Err(BrokerError::ReconciliationMismatch {
                instrument: extra.instrument.clone(),
                ledger: "flat".to_string(),
                broker: format!("{} {}", extra.side, extra.quantity),
            }
            .into());
        }

        debug!(positions = open.len(), "ledger matches broker");
        Ok(())
    }

    /// Force-close every open position through the broker, under the lock.
    pub async fn shutdown(&self) -> Result<Vec<TradeRecord>, DeskError> {
        let mut guard = self.ledger.lock().await;
        let ledger = &mut *guard;
        let Some(timestamp) = ledger.equity_curve().last().map(|p| p.timestamp) else {
            return Ok(Vec::new());
        };

        let mut closed = Vec::new();
        for exit in ledger.forced_exit_orders() {
            if let Some(trade) = self.execute_exit(ledger, &exit, timestamp).await? {
                closed.push(trade);
            }
        }
        ledger.record_equity(timestamp);
        info!(closed = closed.len(), "live driver shut down");
        Ok(closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_live_config() {
        let config = LiveConfig::default();
        assert_eq!(config.ack_timeout, Duration::from_millis(5000));
        assert_eq!(config.ack_poll, Duration::from_millis(100));
        assert_eq!(config.max_submit_retries, 3);
    }

    #[test]
    fn shared_ledger_wraps_in_mutex() {
        let ledger = shared_ledger(PositionLedger::new(Default::default(), Default::default()));
        let other = Arc::clone(&ledger);
        assert_eq!(Arc::strong_count(&other), 2);
    }
}
