use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeZone, Utc};
use seller_orders::api::{ApiError, BulkShipDirect, SellerApi};
use seller_orders::grouping::{default_tolerance, group_orders, GroupKey, OrderGroup};
use seller_orders::model::{Order, OrderStatus, ServerGroup};
use seller_orders::shipping::{
    BulkShipResolver, ShipError, ShipOutcome, ShipPhase, ShipPolicy, ShipProgress, Strategy,
};
use tokio::sync::{mpsc, Mutex};

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Direct(BulkShipDirect),
    BulkUpdate(Vec<i64>, OrderStatus),
    CreateGroup(Vec<i64>),
    ShipGroup(String, Vec<i64>),
    Status(i64, OrderStatus),
}

#[derive(Clone, Default)]
struct RecordingApi {
    direct: Arc<Mutex<VecDeque<Result<(), ApiError>>>>,
    bulk_update: Arc<Mutex<VecDeque<Result<(), ApiError>>>>,
    create_group: Arc<Mutex<VecDeque<Result<String, ApiError>>>>,
    ship_group: Arc<Mutex<VecDeque<Result<(), ApiError>>>>,
    failing_orders: Arc<Mutex<HashMap<i64, ApiError>>>,
    calls: Arc<Mutex<Vec<Call>>>,
    /// How long each per-order update stays in flight.
    status_latency: Option<Duration>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    /// (order id, started) pairs in the order they happened.
    status_timeline: Arc<Mutex<Vec<(i64, bool)>>>,
}

impl RecordingApi {
    /// Strategies 1-3 all rejected by the backend.
    fn bulk_endpoints_unavailable() -> Self {
        let api = Self::default();
        api.direct.try_lock().unwrap().push_back(Err(http(404)));
        api.bulk_update.try_lock().unwrap().push_back(Err(http(405)));
        api.create_group.try_lock().unwrap().push_back(Err(network()));
        api
    }

    async fn fail_order(&self, order_id: i64, err: ApiError) {
        self.failing_orders.lock().await.insert(order_id, err);
    }

    async fn calls(&self) -> Vec<Call> {
        self.calls.lock().await.clone()
    }

    async fn record(&self, call: Call) {
        self.calls.lock().await.push(call);
    }
}

async fn pop_unit(queue: &Mutex<VecDeque<Result<(), ApiError>>>) -> Result<(), ApiError> {
    queue.lock().await.pop_front().unwrap_or(Ok(()))
}

#[async_trait::async_trait]
impl SellerApi for RecordingApi {
    async fn fetch_orders(&self) -> Result<Vec<Order>, ApiError> {
        Ok(Vec::new())
    }

    async fn fetch_grouped_orders(&self) -> Result<Vec<ServerGroup>, ApiError> {
        Ok(Vec::new())
    }

    async fn bulk_ship_direct(&self, request: &BulkShipDirect) -> Result<(), ApiError> {
        self.record(Call::Direct(request.clone())).await;
        pop_unit(&self.direct).await
    }

    async fn bulk_update_status(
        &self,
        order_ids: &[i64],
        status: OrderStatus,
    ) -> Result<(), ApiError> {
        self.record(Call::BulkUpdate(order_ids.to_vec(), status)).await;
        pop_unit(&self.bulk_update).await
    }

    async fn create_group(&self, order_ids: &[i64]) -> Result<String, ApiError> {
        self.record(Call::CreateGroup(order_ids.to_vec())).await;
        self.create_group
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Ok("grp-1".into()))
    }

    async fn bulk_ship_group(&self, group_id: &str, order_ids: &[i64]) -> Result<(), ApiError> {
        self.record(Call::ShipGroup(group_id.to_string(), order_ids.to_vec()))
            .await;
        pop_unit(&self.ship_group).await
    }

    async fn update_order_status(
        &self,
        order_id: i64,
        status: OrderStatus,
    ) -> Result<(), ApiError> {
        self.record(Call::Status(order_id, status)).await;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.status_timeline.lock().await.push((order_id, true));
        if let Some(latency) = self.status_latency {
            tokio::time::sleep(latency).await;
        }
        self.status_timeline.lock().await.push((order_id, false));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        match self.failing_orders.lock().await.get(&order_id) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

fn http(status: u16) -> ApiError {
    ApiError::Http {
        status,
        body: format!("status {}", status),
    }
}

fn network() -> ApiError {
    ApiError::Network("connection refused".into())
}

fn at(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap() + chrono::Duration::seconds(secs)
}

fn order(id: i64, status: OrderStatus) -> Order {
    Order {
        id,
        buyer_id: 77,
        buyer_name: "Grace".into(),
        product_id: 1000 + id,
        product_name: format!("item-{}", id),
        total_price: 5.0,
        order_date: at(id),
        status,
        grouped_order_id: None,
    }
}

/// Single synthetic group built from `orders` (all same buyer, seconds apart).
fn group_of(orders: Vec<Order>) -> OrderGroup {
    let groups = group_orders(&orders, default_tolerance());
    assert_eq!(groups.len(), 1, "fixture must form exactly one group");
    groups.into_values().next().unwrap()
}

fn pending(ids: &[i64]) -> Vec<Order> {
    ids.iter().map(|&id| order(id, OrderStatus::Pending)).collect()
}

fn no_delay() -> ShipPolicy {
    ShipPolicy {
        batch_size: 3,
        batch_delay: Duration::ZERO,
    }
}

async fn run(
    api: &RecordingApi,
    group: &OrderGroup,
    policy: ShipPolicy,
) -> (Result<ShipOutcome, ShipError>, Vec<ShipProgress>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let outcome = BulkShipResolver::new(api, policy)
        .with_progress(tx)
        .ship_group(group)
        .await;
    let mut events = Vec::new();
    while let Ok(p) = rx.try_recv() {
        events.push(p);
    }
    (outcome, events)
}

fn sent_order_ids(calls: &[Call]) -> Vec<i64> {
    calls
        .iter()
        .flat_map(|c| match c {
            Call::Direct(r) => r.order_ids.clone(),
            Call::BulkUpdate(ids, _) | Call::CreateGroup(ids) | Call::ShipGroup(_, ids) => {
                ids.clone()
            }
            Call::Status(id, _) => vec![*id],
        })
        .collect()
}

#[tokio::test]
async fn direct_bulk_ship_succeeds_first() {
    let api = RecordingApi::default();
    let group = group_of(pending(&[1, 2, 3]));

    let (outcome, events) = run(&api, &group, no_delay()).await;
    let outcome = outcome.unwrap();

    assert!(outcome.is_success());
    assert_eq!(outcome.summary().strategy, Strategy::DirectBulkShip);
    assert_eq!(outcome.summary().succeeded, vec![1, 2, 3]);

    let calls = api.calls().await;
    assert_eq!(
        calls,
        vec![Call::Direct(BulkShipDirect {
            order_ids: vec![1, 2, 3],
            buyer_id: 77,
            order_date: at(1).to_rfc3339(),
        })]
    );

    let last = events.last().unwrap();
    assert_eq!(last.phase, ShipPhase::Success);
    assert_eq!((last.completed, last.total), (3, 3));
}

#[tokio::test]
async fn falls_back_to_create_group_without_per_order_updates() {
    let api = RecordingApi::default();
    api.direct.lock().await.push_back(Err(http(404)));
    api.bulk_update.lock().await.push_back(Err(http(500)));
    api.create_group.lock().await.push_back(Ok("srv-9".into()));

    let group = group_of(pending(&[1, 2]));
    let (outcome, events) = run(&api, &group, no_delay()).await;
    let outcome = outcome.unwrap();

    assert!(outcome.is_success());
    let summary = outcome.summary();
    assert_eq!(summary.strategy, Strategy::CreateGroupThenShip);
    assert_eq!(
        summary
            .abandoned
            .iter()
            .map(|a| a.strategy)
            .collect::<Vec<_>>(),
        vec![Strategy::DirectBulkShip, Strategy::BulkStatusUpdate]
    );

    let calls = api.calls().await;
    assert_eq!(calls.len(), 4);
    assert_eq!(calls[1], Call::BulkUpdate(vec![1, 2], OrderStatus::Shipped));
    assert_eq!(calls[2], Call::CreateGroup(vec![1, 2]));
    assert_eq!(calls[3], Call::ShipGroup("srv-9".into(), vec![1, 2]));
    assert!(!calls.iter().any(|c| matches!(c, Call::Status(..))));

    let attempted: Vec<ShipPhase> = events.iter().map(|e| e.phase).collect();
    assert_eq!(
        attempted,
        vec![
            ShipPhase::Attempt(Strategy::DirectBulkShip),
            ShipPhase::Attempt(Strategy::BulkStatusUpdate),
            ShipPhase::Attempt(Strategy::CreateGroupThenShip),
            ShipPhase::Success,
        ]
    );
    assert!(events[1].message.contains("404"));
}

#[tokio::test]
async fn failed_ship_after_group_creation_moves_to_per_order() {
    let api = RecordingApi::default();
    api.direct.lock().await.push_back(Err(network()));
    api.bulk_update.lock().await.push_back(Err(network()));
    api.ship_group.lock().await.push_back(Err(http(409)));

    let group = group_of(pending(&[4]));
    let (outcome, _) = run(&api, &group, no_delay()).await;
    let outcome = outcome.unwrap();

    assert!(outcome.is_success());
    assert_eq!(outcome.summary().strategy, Strategy::PerOrder);
    let calls = api.calls().await;
    assert_eq!(calls.last(), Some(&Call::Status(4, OrderStatus::Shipped)));
}

#[tokio::test]
async fn partial_success_reports_exact_failures() {
    let api = RecordingApi::bulk_endpoints_unavailable();
    api.fail_order(2, http(500)).await;
    api.fail_order(4, network()).await;

    let group = group_of(pending(&[1, 2, 3, 4, 5]));
    let (outcome, events) = run(&api, &group, no_delay()).await;

    let summary = match outcome.unwrap() {
        ShipOutcome::PartialSuccess(summary) => summary,
        other => panic!("expected partial success, got {:?}", other),
    };
    assert_eq!(summary.succeeded, vec![1, 3, 5]);
    assert_eq!(summary.failed.len(), 2);
    assert_eq!(summary.failed[0].order_id, 2);
    assert!(summary.failed[0].error.contains("500"));
    assert_eq!(summary.failed[1].order_id, 4);
    assert!(summary.failed[1].error.contains("connection refused"));
    assert_eq!(summary.headline(), "Shipped 3 of 5 orders, 2 failed");

    let batches: Vec<usize> = events
        .iter()
        .filter(|e| e.phase == ShipPhase::Attempt(Strategy::PerOrder) && e.completed > 0)
        .map(|e| e.completed)
        .collect();
    assert_eq!(batches, vec![3, 5]);
    assert_eq!(events.last().unwrap().phase, ShipPhase::PartialSuccess);
}

#[tokio::test]
async fn every_order_failing_is_total_failure() {
    let api = RecordingApi::bulk_endpoints_unavailable();
    for id in [1, 2] {
        api.fail_order(id, http(503)).await;
    }

    let group = group_of(pending(&[1, 2]));
    let (outcome, events) = run(&api, &group, no_delay()).await;

    match outcome.unwrap() {
        ShipOutcome::Failure(summary) => {
            assert!(summary.succeeded.is_empty());
            assert_eq!(summary.failed.len(), 2);
            assert_eq!(summary.abandoned.len(), 3);
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(events.last().unwrap().phase, ShipPhase::Failure);
}

#[tokio::test]
async fn non_pending_orders_never_leave_the_client() {
    let api = RecordingApi::bulk_endpoints_unavailable();
    let mut orders = pending(&[1, 2, 3]);
    orders.push(order(4, OrderStatus::Delivered));
    orders.push(order(5, OrderStatus::Delivered));
    let group = group_of(orders);

    let (outcome, events) = run(&api, &group, no_delay()).await;
    let outcome = outcome.unwrap();

    assert!(outcome.is_success());
    assert_eq!(outcome.summary().total, 3);
    assert!(events.iter().all(|e| e.total == 3));

    let sent = sent_order_ids(&api.calls().await);
    assert!(!sent.is_empty());
    assert!(sent.iter().all(|id| [1, 2, 3].contains(id)));
}

#[tokio::test]
async fn group_without_pending_orders_is_rejected_before_any_request() {
    let api = RecordingApi::default();
    let group = group_of(vec![
        order(1, OrderStatus::Shipped),
        order(2, OrderStatus::Cancelled),
    ]);

    let (outcome, events) = run(&api, &group, no_delay()).await;

    assert_eq!(outcome.unwrap_err(), ShipError::EmptyGroup);
    assert!(events.is_empty());
    assert!(api.calls().await.is_empty());
}

#[tokio::test]
async fn singleton_group_follows_the_same_chain() {
    let single = RecordingApi::bulk_endpoints_unavailable();
    let many = RecordingApi::bulk_endpoints_unavailable();

    let (one, _) = run(&single, &group_of(pending(&[1])), no_delay()).await;
    let (several, _) = run(&many, &group_of(pending(&[1, 2, 3, 4])), no_delay()).await;
    let (one, several) = (one.unwrap(), several.unwrap());

    assert!(one.is_success() && several.is_success());
    assert_eq!(one.summary().strategy, several.summary().strategy);
    assert_eq!(one.summary().abandoned, several.summary().abandoned);

    let kinds = |calls: Vec<Call>| -> Vec<&'static str> {
        let mut kinds: Vec<&'static str> = calls
            .iter()
            .map(|c| match c {
                Call::Direct(_) => "direct",
                Call::BulkUpdate(..) => "bulk-update",
                Call::CreateGroup(_) => "create-group",
                Call::ShipGroup(..) => "ship-group",
                Call::Status(..) => "status",
            })
            .collect();
        kinds.dedup();
        kinds
    };
    assert_eq!(kinds(single.calls().await), kinds(many.calls().await));
}

#[tokio::test]
async fn progress_is_monotonic_with_fixed_total() {
    let api = RecordingApi::bulk_endpoints_unavailable();
    api.fail_order(3, http(400)).await;
    let group = group_of(pending(&[1, 2, 3, 4, 5, 6, 7]));

    let (outcome, events) = run(&api, &group, no_delay()).await;
    assert!(matches!(outcome, Ok(ShipOutcome::PartialSuccess(_))));

    assert!(events.len() >= 4 + 3);
    assert!(events.iter().all(|e| e.total == 7));
    assert!(events.windows(2).all(|w| w[0].completed <= w[1].completed));
    assert_eq!(events.last().unwrap().completed, 7);
    assert!(events.iter().all(|e| !e.message.is_empty()));
}

#[tokio::test]
async fn per_order_batches_are_spaced_by_the_delay() {
    let api = RecordingApi::bulk_endpoints_unavailable();
    let group = group_of(pending(&[1, 2, 3, 4]));
    let policy = ShipPolicy {
        batch_size: 3,
        batch_delay: Duration::from_millis(300),
    };

    let started = Instant::now();
    let (outcome, _) = run(&api, &group, policy).await;
    assert!(outcome.unwrap().is_success());
    // Two batches, one pause between them.
    assert!(started.elapsed() >= Duration::from_millis(300));

    let statuses: Vec<i64> = api
        .calls()
        .await
        .iter()
        .filter_map(|c| match c {
            Call::Status(id, _) => Some(*id),
            _ => None,
        })
        .collect();
    assert_eq!(statuses, vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn per_order_batch_runs_concurrently_and_batches_do_not_overlap() {
    let mut api = RecordingApi::bulk_endpoints_unavailable();
    api.status_latency = Some(Duration::from_millis(50));
    let group = group_of(pending(&[1, 2, 3, 4, 5, 6]));

    let (outcome, _) = run(&api, &group, no_delay()).await;
    assert!(outcome.unwrap().is_success());
    assert_eq!(api.max_in_flight.load(Ordering::SeqCst), 3);

    let timeline = api.status_timeline.lock().await.clone();
    let first_batch = [1, 2, 3];
    let last_first_batch_end = timeline
        .iter()
        .rposition(|&(id, started)| !started && first_batch.contains(&id))
        .unwrap();
    let first_second_batch_start = timeline
        .iter()
        .position(|&(id, started)| started && !first_batch.contains(&id))
        .unwrap();
    assert!(last_first_batch_end < first_second_batch_start);
    // Every request of the first batch starts before any of them completes.
    assert!(timeline[..3].iter().all(|&(id, started)| started && first_batch.contains(&id)));
}

#[tokio::test]
async fn dropped_progress_receiver_does_not_stop_shipping() {
    let api = RecordingApi::bulk_endpoints_unavailable();
    let group = group_of(pending(&[1, 2]));
    let (tx, rx) = mpsc::unbounded_channel();
    drop(rx);

    let outcome = BulkShipResolver::new(&api, no_delay())
        .with_progress(tx)
        .ship_group(&group)
        .await
        .unwrap();
    assert!(outcome.is_success());
    assert_eq!(outcome.summary().succeeded, vec![1, 2]);
}

#[test]
fn fixture_group_key_is_synthetic() {
    let group = group_of(pending(&[1, 2]));
    assert!(matches!(group.key, GroupKey::Synthetic { buyer_id: 77, .. }));
}
