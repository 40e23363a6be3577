//! Client-side clustering of a seller's orders into checkout groups.
//!
//! Orders carrying a server-assigned `grouped_order_id` are grouped by that id.
//! Ungrouped orders are folded into a synthetic group when the buyer matches and
//! the order timestamp lies within the tolerance of the group's anchor, which is
//! the timestamp of the order that opened the group. Results therefore depend on
//! iteration order, and the group's display date (earliest member) may differ
//! from its anchor.
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::model::{Order, OrderStatus};

pub const DEFAULT_TOLERANCE_SECS: u64 = 120;

pub fn default_tolerance() -> Duration {
    Duration::seconds(DEFAULT_TOLERANCE_SECS as i64)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GroupKey {
    /// Durable group assigned by the backend.
    Explicit(String),
    /// Inferred from buyer + anchor timestamp.
    Synthetic { buyer_id: i64, anchor_millis: i64 },
}

impl GroupKey {
    pub fn is_synthetic(&self) -> bool {
        matches!(self, GroupKey::Synthetic { .. })
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupKey::Explicit(id) => write!(f, "group:{}", id),
            GroupKey::Synthetic {
                buyer_id,
                anchor_millis,
            } => write!(f, "synthetic:{}:{}", buyer_id, anchor_millis),
        }
    }
}

impl FromStr for GroupKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(id) = s.strip_prefix("group:") {
            if id.is_empty() {
                return Err("group id must be non-empty".to_string());
            }
            return Ok(GroupKey::Explicit(id.to_string()));
        }
        if let Some(rest) = s.strip_prefix("synthetic:") {
            let (buyer, millis) = rest
                .split_once(':')
                .ok_or_else(|| format!("malformed synthetic key '{}'", s))?;
            let buyer_id = buyer
                .parse()
                .map_err(|_| format!("invalid buyer id in '{}'", s))?;
            let anchor_millis = millis
                .parse()
                .map_err(|_| format!("invalid timestamp in '{}'", s))?;
            return Ok(GroupKey::Synthetic {
                buyer_id,
                anchor_millis,
            });
        }
        Err(format!(
            "group key '{}' must start with 'group:' or 'synthetic:'",
            s
        ))
    }
}

/// A checkout group derived from one grouping pass. Never empty.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderGroup {
    pub key: GroupKey,
    pub buyer_id: i64,
    pub buyer_name: String,
    pub orders: Vec<Order>,
    pub total_amount: f64,
    /// Earliest member timestamp.
    pub order_date: DateTime<Utc>,
}

impl OrderGroup {
    fn open(key: GroupKey, order: &Order) -> Self {
        Self {
            key,
            buyer_id: order.buyer_id,
            buyer_name: order.buyer_name.clone(),
            orders: vec![order.clone()],
            total_amount: order.total_price,
            order_date: order.order_date,
        }
    }

    fn absorb(&mut self, order: &Order) {
        self.total_amount += order.total_price;
        self.orders.push(order.clone());
        if order.order_date < self.order_date {
            self.order_date = order.order_date;
        }
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Display-only rollup of member statuses. Member orders are left untouched.
    pub fn overall_status(&self) -> OrderStatus {
        OrderStatus::rollup(self.orders.iter().map(|o| o.status)).unwrap_or(OrderStatus::Pending)
    }

    pub fn pending_orders(&self) -> impl Iterator<Item = &Order> {
        self.orders.iter().filter(|o| o.is_pending())
    }
}

pub type GroupMap = HashMap<GroupKey, OrderGroup>;

struct SyntheticAnchor {
    buyer_id: i64,
    anchor: DateTime<Utc>,
    key: GroupKey,
}

/// Cluster `orders` into groups, visiting them in the given order.
pub fn group_orders(orders: &[Order], tolerance: Duration) -> GroupMap {
    let mut groups = GroupMap::new();
    let mut anchors: Vec<SyntheticAnchor> = Vec::new();

    for order in orders {
        let key = match &order.grouped_order_id {
            Some(id) => GroupKey::Explicit(id.clone()),
            None => {
                let existing = anchors.iter().find(|a| {
                    a.buyer_id == order.buyer_id
                        && (order.order_date - a.anchor).abs() <= tolerance
                });
                match existing {
                    Some(a) => a.key.clone(),
                    None => {
                        let key = GroupKey::Synthetic {
                            buyer_id: order.buyer_id,
                            anchor_millis: order.order_date.timestamp_millis(),
                        };
                        anchors.push(SyntheticAnchor {
                            buyer_id: order.buyer_id,
                            anchor: order.order_date,
                            key: key.clone(),
                        });
                        key
                    }
                }
            }
        };

        match groups.get_mut(&key) {
            Some(group) => group.absorb(order),
            None => {
                groups.insert(key.clone(), OrderGroup::open(key, order));
            }
        }
    }

    groups
}

/// Whether any group in `groups` has more than one member.
pub fn has_multi_member_group(groups: &GroupMap) -> bool {
    groups.values().any(|g| g.len() > 1)
}

/// Groups sorted newest first by display date; ties broken by key.
pub fn newest_first(groups: &GroupMap) -> Vec<&OrderGroup> {
    let mut sorted: Vec<&OrderGroup> = groups.values().collect();
    sorted.sort_by(|a, b| {
        b.order_date
            .cmp(&a.order_date)
            .then_with(|| a.key.cmp(&b.key))
    });
    sorted
}
