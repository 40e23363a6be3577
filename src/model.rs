use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a single order line.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
pub enum OrderStatus {
    Pending,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::Shipped => "Shipped",
            OrderStatus::Delivered => "Delivered",
            OrderStatus::Cancelled => "Cancelled",
        }
    }

    /// Display priority for group rollups: Cancelled > Pending > Shipped > Delivered.
    fn rollup_rank(&self) -> u8 {
        match self {
            OrderStatus::Cancelled => 3,
            OrderStatus::Pending => 2,
            OrderStatus::Shipped => 1,
            OrderStatus::Delivered => 0,
        }
    }

    /// Highest-priority status among `statuses`, or `None` when empty.
    pub fn rollup<I>(statuses: I) -> Option<OrderStatus>
    where
        I: IntoIterator<Item = OrderStatus>,
    {
        statuses.into_iter().max_by_key(OrderStatus::rollup_rank)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(OrderStatus::Pending),
            "shipped" => Ok(OrderStatus::Shipped),
            "delivered" => Ok(OrderStatus::Delivered),
            "cancelled" | "canceled" => Ok(OrderStatus::Cancelled),
            other => Err(format!("unknown order status '{}'", other)),
        }
    }
}

impl<'de> Deserialize<'de> for OrderStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// One order line as returned by the seller orders endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: i64,
    pub buyer_id: i64,
    #[serde(default)]
    pub buyer_name: String,
    pub product_id: i64,
    #[serde(default)]
    pub product_name: String,
    #[serde(alias = "price", deserialize_with = "de::decimal")]
    pub total_price: f64,
    #[serde(deserialize_with = "de::timestamp")]
    pub order_date: DateTime<Utc>,
    pub status: OrderStatus,
    #[serde(default, deserialize_with = "de::opt_group_id")]
    pub grouped_order_id: Option<String>,
}

impl Order {
    pub fn is_pending(&self) -> bool {
        self.status == OrderStatus::Pending
    }
}

/// Aggregation computed by the backend for `?grouped=true`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerGroup {
    pub buyer_id: i64,
    #[serde(default)]
    pub buyer_name: String,
    #[serde(deserialize_with = "de::timestamp")]
    pub order_date: DateTime<Utc>,
    #[serde(default)]
    pub orders: Vec<Order>,
    #[serde(deserialize_with = "de::decimal")]
    pub total_amount: f64,
}

/// How the orders list is presented.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ViewMode {
    Individual,
    Grouped,
}

impl ViewMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViewMode::Individual => "individual",
            ViewMode::Grouped => "grouped",
        }
    }
}

impl fmt::Display for ViewMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ViewMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "individual" => Ok(ViewMode::Individual),
            "grouped" => Ok(ViewMode::Grouped),
            other => Err(format!("unknown view mode '{}'", other)),
        }
    }
}

/// Lenient decoders for the backend's loosely typed fields.
mod de {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(f64),
        Text(String),
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IdOrString {
        Int(i64),
        Text(String),
    }

    pub fn decimal<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match NumberOrString::deserialize(deserializer)? {
            NumberOrString::Number(n) => Ok(n),
            NumberOrString::Text(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| serde::de::Error::custom(format!("invalid decimal '{}'", s))),
        }
    }

    pub fn timestamp<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_timestamp(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{}'", raw)))
    }

    pub fn opt_group_id<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<String>, D::Error> {
        Ok(match Option::<IdOrString>::deserialize(deserializer)? {
            Some(IdOrString::Int(n)) => Some(n.to_string()),
            Some(IdOrString::Text(s)) if !s.trim().is_empty() => Some(s),
            _ => None,
        })
    }

    /// RFC 3339, or a naive ISO-8601 date-time taken as UTC.
    pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
        let raw = raw.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
            .map(|naive| naive.and_utc())
    }
}

pub use de::parse_timestamp;
