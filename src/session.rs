//! Per-page-view controller: owns the fetched orders and their grouping.
use chrono::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, instrument, warn};

use crate::api::{ApiError, SellerApi};
use crate::config::Config;
use crate::grouping::{self, GroupKey, GroupMap, OrderGroup};
use crate::model::{Order, OrderStatus, ServerGroup, ViewMode};
use crate::shipping::{BulkShipResolver, ShipError, ShipOutcome, ShipPolicy, ShipProgress};
use crate::view_mode;

pub struct OrdersSession<A> {
    api: A,
    tolerance: Duration,
    policy: ShipPolicy,
    orders: Vec<Order>,
    groups: GroupMap,
    view_override: Option<ViewMode>,
    /// Bumped on every refresh; group keys are only valid for the snapshot they came from.
    generation: u64,
}

impl<A: SellerApi> OrdersSession<A> {
    pub fn new(api: A, tolerance: Duration, policy: ShipPolicy) -> Self {
        Self {
            api,
            tolerance,
            policy,
            orders: Vec::new(),
            groups: GroupMap::new(),
            view_override: None,
            generation: 0,
        }
    }

    pub fn from_config(api: A, cfg: &Config) -> Self {
        Self::new(api, cfg.tolerance(), cfg.ship_policy())
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    /// Fetch the seller's orders and regroup them.
    ///
    /// On failure the previous snapshot is dropped so nothing stale is shown.
    #[instrument(skip_all)]
    pub async fn refresh(&mut self) -> Result<ViewMode, ApiError> {
        self.generation += 1;
        match self.api.fetch_orders().await {
            Ok(orders) => {
                self.groups = grouping::group_orders(&orders, self.tolerance);
                self.orders = orders;
                let mode = self.view_mode();
                info!(
                    orders = self.orders.len(),
                    groups = self.groups.len(),
                    generation = self.generation,
                    view = %mode,
                    "orders refreshed"
                );
                Ok(mode)
            }
            Err(err) => {
                warn!(error = %err, "failed to fetch orders");
                self.orders.clear();
                self.groups.clear();
                Err(err)
            }
        }
    }

    pub async fn fetch_server_groups(&self) -> Result<Vec<ServerGroup>, ApiError> {
        self.api.fetch_grouped_orders().await
    }

    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    pub fn groups(&self) -> &GroupMap {
        &self.groups
    }

    pub fn groups_newest_first(&self) -> Vec<&OrderGroup> {
        grouping::newest_first(&self.groups)
    }

    pub fn group(&self, key: &GroupKey) -> Option<&OrderGroup> {
        self.groups.get(key)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn set_view_override(&mut self, mode: Option<ViewMode>) {
        self.view_override = mode;
    }

    pub fn view_mode(&self) -> ViewMode {
        view_mode::decide_from_groups(&self.groups, self.view_override)
    }

    /// Bulk-ship the pending orders of `key` as seen in snapshot `generation`.
    ///
    /// The snapshot is not updated afterwards; call [`refresh`](Self::refresh).
    #[instrument(skip_all, fields(group = %key, generation = generation))]
    pub async fn bulk_ship(
        &mut self,
        key: &GroupKey,
        generation: u64,
        progress: Option<UnboundedSender<ShipProgress>>,
    ) -> Result<ShipOutcome, ShipError> {
        if generation != self.generation {
            return Err(ShipError::StaleGroup {
                key: key.clone(),
                expected: generation,
                current: self.generation,
            });
        }
        let group = self
            .groups
            .get(key)
            .ok_or_else(|| ShipError::UnknownGroup(key.clone()))?;

        let mut resolver = BulkShipResolver::new(&self.api, self.policy);
        if let Some(tx) = progress {
            resolver = resolver.with_progress(tx);
        }
        resolver.ship_group(group).await
    }

    /// Ship a single pending order from the current snapshot.
    #[instrument(skip_all, fields(order_id = order_id))]
    pub async fn ship_order(&mut self, order_id: i64) -> Result<(), ShipError> {
        let order = self
            .orders
            .iter()
            .find(|o| o.id == order_id)
            .ok_or(ShipError::UnknownOrder(order_id))?;
        if !order.is_pending() {
            return Err(ShipError::NotPending {
                order_id,
                status: order.status,
            });
        }
        self.api
            .update_order_status(order_id, OrderStatus::Shipped)
            .await?;
        info!(order_id, "order shipped");
        Ok(())
    }
}
