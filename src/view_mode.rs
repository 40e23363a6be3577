use chrono::Duration;

use crate::grouping::{group_orders, has_multi_member_group, GroupMap};
use crate::model::{Order, ViewMode};

/// Pick the presentation for `orders`.
///
/// An explicit override always wins. Otherwise the grouped view is chosen only
/// when grouping produces at least one group with more than one member.
pub fn decide(orders: &[Order], explicit_override: Option<ViewMode>, tolerance: Duration) -> ViewMode {
    if let Some(mode) = explicit_override {
        return mode;
    }
    decide_from_groups(&group_orders(orders, tolerance), None)
}

/// Same as [`decide`], for orders that were already grouped.
pub fn decide_from_groups(groups: &GroupMap, explicit_override: Option<ViewMode>) -> ViewMode {
    match explicit_override {
        Some(mode) => mode,
        None if has_multi_member_group(groups) => ViewMode::Grouped,
        None => ViewMode::Individual,
    }
}
