use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::OrderStatus;

/// Response envelope for list endpoints.
///
/// Deployments answer either with a bare array, `{"orders": [...]}` or
/// `{"data": [...]}`. The variant is picked once here; callers only see items.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
pub enum OrdersEnvelope<T> {
    Bare(Vec<T>),
    Orders { orders: Vec<T> },
    Data { data: Vec<T> },
}

impl<T> OrdersEnvelope<T> {
    pub fn into_items(self) -> Vec<T> {
        match self {
            OrdersEnvelope::Bare(items)
            | OrdersEnvelope::Orders { orders: items }
            | OrdersEnvelope::Data { data: items } => items,
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct BulkShipDirect {
    pub order_ids: Vec<i64>,
    pub buyer_id: i64,
    /// RFC 3339 display date of the group.
    pub order_date: String,
}

#[derive(Serialize, Debug)]
pub(crate) struct BulkUpdateBody<'a> {
    pub order_ids: &'a [i64],
    pub status: OrderStatus,
}

#[derive(Serialize, Debug)]
pub(crate) struct CreateGroupBody<'a> {
    pub order_ids: &'a [i64],
}

#[derive(Serialize, Debug)]
pub(crate) struct BulkShipGroupBody<'a> {
    pub group_id: &'a str,
    pub order_ids: &'a [i64],
}

#[derive(Serialize, Debug)]
pub(crate) struct StatusBody {
    pub status: OrderStatus,
}

#[derive(Deserialize, Debug)]
pub(crate) struct CreateGroupResponse {
    #[serde(default)]
    pub group_id: Value,
}

impl CreateGroupResponse {
    pub fn group_id(&self) -> Option<String> {
        match &self.group_id {
            Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}
