//! Bulk shipping of a group's pending orders.
//!
//! Backends differ in which bulk endpoints they expose, so the resolver walks a
//! fixed chain of strategies and stops at the first that succeeds:
//!
//! 1. direct bulk ship by buyer/date
//! 2. bulk status update by order ids
//! 3. create a group, then ship by group id
//! 4. per-order status updates in small concurrent batches
//!
//! Strategy 4 records every order independently and may end in partial success.
//! Progress is published as [`ShipProgress`] records on an optional channel.
use futures::future::join_all;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, instrument, warn};

use crate::api::{ApiError, BulkShipDirect, SellerApi};
use crate::grouping::{GroupKey, OrderGroup};
use crate::model::OrderStatus;

pub const DEFAULT_BATCH_SIZE: usize = 3;
pub const DEFAULT_BATCH_DELAY_MS: u64 = 300;

#[derive(Debug, Error, PartialEq)]
pub enum ShipError {
    #[error("no pending orders to ship in this group")]
    EmptyGroup,
    #[error("group {0} is not part of the current order list")]
    UnknownGroup(GroupKey),
    #[error("group {key} belongs to snapshot {expected}, current snapshot is {current}; refresh and retry")]
    StaleGroup {
        key: GroupKey,
        expected: u64,
        current: u64,
    },
    #[error("order {0} is not part of the current order list")]
    UnknownOrder(i64),
    #[error("order {order_id} is {status}, only pending orders can be shipped")]
    NotPending { order_id: i64, status: OrderStatus },
    #[error(transparent)]
    Api(#[from] ApiError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShipPolicy {
    /// Concurrent requests per batch in the per-order fallback.
    pub batch_size: usize,
    /// Pause between consecutive per-order batches.
    pub batch_delay: Duration,
}

impl Default for ShipPolicy {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            batch_delay: Duration::from_millis(DEFAULT_BATCH_DELAY_MS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    DirectBulkShip,
    BulkStatusUpdate,
    CreateGroupThenShip,
    PerOrder,
}

impl Strategy {
    pub fn number(&self) -> u8 {
        match self {
            Strategy::DirectBulkShip => 1,
            Strategy::BulkStatusUpdate => 2,
            Strategy::CreateGroupThenShip => 3,
            Strategy::PerOrder => 4,
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Strategy::DirectBulkShip => "direct bulk ship",
            Strategy::BulkStatusUpdate => "bulk status update",
            Strategy::CreateGroupThenShip => "create group and ship",
            Strategy::PerOrder => "per-order status updates",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "strategy {} ({})", self.number(), self.describe())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShipPhase {
    Attempt(Strategy),
    Success,
    PartialSuccess,
    Failure,
}

/// One entry of the progress stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShipProgress {
    pub completed: usize,
    pub total: usize,
    pub phase: ShipPhase,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedOrder {
    pub order_id: i64,
    pub error: String,
}

/// A strategy that was tried and abandoned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyFailure {
    pub strategy: Strategy,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShipSummary {
    /// Strategy that produced the terminal state.
    pub strategy: Strategy,
    pub total: usize,
    pub succeeded: Vec<i64>,
    pub failed: Vec<FailedOrder>,
    pub abandoned: Vec<StrategyFailure>,
}

impl ShipSummary {
    pub fn headline(&self) -> String {
        if self.failed.is_empty() {
            format!(
                "Shipped {} of {} orders via {}",
                self.succeeded.len(),
                self.total,
                self.strategy
            )
        } else {
            format!(
                "Shipped {} of {} orders, {} failed",
                self.succeeded.len(),
                self.total,
                self.failed.len()
            )
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShipOutcome {
    Success(ShipSummary),
    PartialSuccess(ShipSummary),
    /// Every strategy was exhausted without shipping a single order.
    Failure(ShipSummary),
}

impl ShipOutcome {
    pub fn summary(&self) -> &ShipSummary {
        match self {
            ShipOutcome::Success(s) | ShipOutcome::PartialSuccess(s) | ShipOutcome::Failure(s) => s,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ShipOutcome::Success(_))
    }
}

pub struct BulkShipResolver<'a> {
    api: &'a dyn SellerApi,
    policy: ShipPolicy,
    progress: Option<UnboundedSender<ShipProgress>>,
}

struct Run {
    total: usize,
    completed: usize,
    abandoned: Vec<StrategyFailure>,
}

impl<'a> BulkShipResolver<'a> {
    pub fn new(api: &'a dyn SellerApi, policy: ShipPolicy) -> Self {
        Self {
            api,
            policy,
            progress: None,
        }
    }

    pub fn with_progress(mut self, tx: UnboundedSender<ShipProgress>) -> Self {
        self.progress = Some(tx);
        self
    }

    fn emit(&self, run: &Run, phase: ShipPhase, message: String) {
        if let Some(tx) = &self.progress {
            // A dropped receiver never aborts shipping.
            let _ = tx.send(ShipProgress {
                completed: run.completed,
                total: run.total,
                phase,
                message,
            });
        }
    }

    fn abandon(&self, run: &mut Run, strategy: Strategy, err: &ApiError, next: Strategy) {
        warn!(%strategy, error = %err, "bulk ship strategy failed");
        run.abandoned.push(StrategyFailure {
            strategy,
            error: err.to_string(),
        });
        self.emit(
            run,
            ShipPhase::Attempt(next),
            format!("{} failed ({}); trying {}", strategy, err, next),
        );
    }

    fn finish_bulk(&self, mut run: Run, strategy: Strategy, order_ids: Vec<i64>) -> ShipOutcome {
        run.completed = run.total;
        let summary = ShipSummary {
            strategy,
            total: run.total,
            succeeded: order_ids,
            failed: Vec::new(),
            abandoned: run.abandoned.clone(),
        };
        info!(%strategy, shipped = run.total, "bulk ship succeeded");
        self.emit(&run, ShipPhase::Success, summary.headline());
        ShipOutcome::Success(summary)
    }

    /// Ship every order of `group` that is pending in this snapshot.
    #[instrument(skip_all, fields(group = %group.key))]
    pub async fn ship_group(&self, group: &OrderGroup) -> Result<ShipOutcome, ShipError> {
        let order_ids: Vec<i64> = group.pending_orders().map(|o| o.id).collect();
        if order_ids.is_empty() {
            return Err(ShipError::EmptyGroup);
        }

        let mut run = Run {
            total: order_ids.len(),
            completed: 0,
            abandoned: Vec::new(),
        };
        info!(total = run.total, "starting bulk ship");
        self.emit(
            &run,
            ShipPhase::Attempt(Strategy::DirectBulkShip),
            format!("Shipping {} orders via {}", run.total, Strategy::DirectBulkShip),
        );

        let direct = BulkShipDirect {
            order_ids: order_ids.clone(),
            buyer_id: group.buyer_id,
            order_date: group.order_date.to_rfc3339(),
        };
        match self.api.bulk_ship_direct(&direct).await {
            Ok(()) => return Ok(self.finish_bulk(run, Strategy::DirectBulkShip, order_ids)),
            Err(err) => self.abandon(
                &mut run,
                Strategy::DirectBulkShip,
                &err,
                Strategy::BulkStatusUpdate,
            ),
        }

        match self
            .api
            .bulk_update_status(&order_ids, OrderStatus::Shipped)
            .await
        {
            Ok(()) => return Ok(self.finish_bulk(run, Strategy::BulkStatusUpdate, order_ids)),
            Err(err) => self.abandon(
                &mut run,
                Strategy::BulkStatusUpdate,
                &err,
                Strategy::CreateGroupThenShip,
            ),
        }

        match self.create_and_ship(&order_ids).await {
            Ok(()) => return Ok(self.finish_bulk(run, Strategy::CreateGroupThenShip, order_ids)),
            Err(err) => self.abandon(
                &mut run,
                Strategy::CreateGroupThenShip,
                &err,
                Strategy::PerOrder,
            ),
        }

        Ok(self.ship_each(run, &order_ids).await)
    }

    async fn create_and_ship(&self, order_ids: &[i64]) -> Result<(), ApiError> {
        let group_id = self.api.create_group(order_ids).await?;
        self.api.bulk_ship_group(&group_id, order_ids).await
    }

    async fn ship_each(&self, mut run: Run, order_ids: &[i64]) -> ShipOutcome {
        let batch_size = self.policy.batch_size.max(1);
        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        let api = self.api;

        for (index, batch) in order_ids.chunks(batch_size).enumerate() {
            if index > 0 && !self.policy.batch_delay.is_zero() {
                tokio::time::sleep(self.policy.batch_delay).await;
            }

            let results = join_all(batch.iter().map(|&order_id| async move {
                (
                    order_id,
                    api.update_order_status(order_id, OrderStatus::Shipped).await,
                )
            }))
            .await;

            for (order_id, result) in results {
                match result {
                    Ok(()) => succeeded.push(order_id),
                    Err(err) => {
                        warn!(order_id, error = %err, "failed to ship order");
                        failed.push(FailedOrder {
                            order_id,
                            error: err.to_string(),
                        });
                    }
                }
            }

            run.completed = succeeded.len() + failed.len();
            self.emit(
                &run,
                ShipPhase::Attempt(Strategy::PerOrder),
                format!(
                    "Processed {}/{} orders ({} failed)",
                    run.completed,
                    run.total,
                    failed.len()
                ),
            );
        }

        let summary = ShipSummary {
            strategy: Strategy::PerOrder,
            total: run.total,
            succeeded,
            failed,
            abandoned: run.abandoned.clone(),
        };
        let headline = summary.headline();
        if summary.failed.is_empty() {
            info!(shipped = summary.total, "per-order shipping succeeded");
            self.emit(&run, ShipPhase::Success, headline);
            ShipOutcome::Success(summary)
        } else if summary.succeeded.is_empty() {
            warn!(failed = summary.failed.len(), "bulk ship failed for every order");
            self.emit(&run, ShipPhase::Failure, headline);
            ShipOutcome::Failure(summary)
        } else {
            warn!(
                shipped = summary.succeeded.len(),
                failed = summary.failed.len(),
                "bulk ship partially succeeded"
            );
            self.emit(&run, ShipPhase::PartialSuccess, headline);
            ShipOutcome::PartialSuccess(summary)
        }
    }
}
