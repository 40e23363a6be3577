//! HTTP access to the seller backend.
//!
//! [`SellerApi`] is the seam used by the session and the bulk-ship resolver;
//! [`HttpSellerApi`] is the reqwest implementation. Every request carries the
//! seller identifier header. There are no automatic retries.
use async_trait::async_trait;
use reqwest::{Client, Method, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config;
use crate::model::{Order, OrderStatus, ServerGroup};

pub mod model;

pub use model::{BulkShipDirect, OrdersEnvelope};
use model::{BulkShipGroupBody, BulkUpdateBody, CreateGroupBody, CreateGroupResponse, StatusBody};

const USER_AGENT: &str = "seller-orders/0.1";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    /// The request was not sent or no response arrived.
    #[error("network error: {0}")]
    Network(String),
    #[error("backend returned {status}: {body}")]
    Http { status: u16, body: String },
    #[error("unexpected response body: {0}")]
    Decode(String),
    #[error("invalid endpoint: {0}")]
    Url(String),
}

impl ApiError {
    pub fn is_network(&self) -> bool {
        matches!(self, ApiError::Network(_))
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[async_trait]
pub trait SellerApi: Send + Sync {
    /// `GET /api/seller/orders`
    async fn fetch_orders(&self) -> Result<Vec<Order>, ApiError>;

    /// `GET /api/seller/orders?grouped=true`
    async fn fetch_grouped_orders(&self) -> Result<Vec<ServerGroup>, ApiError>;

    /// `PUT /api/seller/orders/bulk-ship-direct`
    async fn bulk_ship_direct(&self, request: &BulkShipDirect) -> Result<(), ApiError>;

    /// `PUT /api/seller/orders/bulk-update`
    async fn bulk_update_status(
        &self,
        order_ids: &[i64],
        status: OrderStatus,
    ) -> Result<(), ApiError>;

    /// `POST /api/seller/orders/group`, returning the new group id.
    async fn create_group(&self, order_ids: &[i64]) -> Result<String, ApiError>;

    /// `PUT /api/seller/orders/bulk-ship`
    async fn bulk_ship_group(&self, group_id: &str, order_ids: &[i64]) -> Result<(), ApiError>;

    /// `PUT /api/orders/{id}/status`
    async fn update_order_status(&self, order_id: i64, status: OrderStatus)
        -> Result<(), ApiError>;
}

#[derive(Clone)]
pub struct HttpSellerApi {
    http: Client,
    base_url: Url,
    user_header: String,
    seller_id: i64,
}

impl fmt::Debug for HttpSellerApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpSellerApi")
            .field("base_url", &self.base_url)
            .field("seller_id", &self.seller_id)
            .finish_non_exhaustive()
    }
}

impl HttpSellerApi {
    pub fn new(
        base_url: Url,
        seller_id: i64,
        user_header: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .no_proxy()
            .build()
            .map_err(|err| ApiError::Network(err.to_string()))?;
        Ok(Self {
            http,
            base_url: with_trailing_slash(base_url),
            user_header: user_header.into(),
            seller_id,
        })
    }

    pub fn from_config(backend: &config::Backend) -> Result<Self, ApiError> {
        let base_url = Url::parse(backend.base_url.trim())
            .map_err(|err| ApiError::Url(format!("{}: {}", backend.base_url, err)))?;
        Self::new(
            base_url,
            backend.seller_id,
            backend.user_header.clone(),
            backend.timeout(),
        )
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(path)
            .map_err(|err| ApiError::Url(format!("{}: {}", path, err)))
    }

    /// Build a request against `url` with the seller header and optional JSON body.
    pub fn build_request<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: Url,
        body: Option<&B>,
    ) -> Result<reqwest::Request, ApiError> {
        let mut builder = self
            .http
            .request(method, url)
            .header(self.user_header.as_str(), self.seller_id.to_string())
            .header("Accept", "application/json");
        if let Some(body) = body {
            builder = builder.json(body);
        }
        builder
            .build()
            .map_err(|err| ApiError::Url(err.to_string()))
    }

    /// Send `request`, returning the body text of a 2xx response.
    async fn execute(&self, request: reqwest::Request) -> Result<String, ApiError> {
        let method = request.method().clone();
        let url = request.url().clone();
        debug!(%method, %url, "sending backend request");

        let res = self.http.execute(request).await.map_err(|err| {
            warn!(%method, %url, error = %err, "backend unreachable");
            ApiError::Network(err.to_string())
        })?;

        let status = res.status();
        let body = res
            .text()
            .await
            .map_err(|err| ApiError::Network(format!("failed to read response: {}", err)))?;
        debug!(%method, %url, %status, "received backend response");

        if !status.is_success() {
            warn!(%method, %url, %status, body = %body, "backend returned error status");
            return Err(ApiError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }

    async fn send_unit<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<(), ApiError> {
        let url = self.endpoint(path)?;
        if let Ok(payload) = serde_json::to_string(body) {
            debug!(%url, payload = %payload, "request payload");
        }
        let request = self.build_request(method, url, Some(body))?;
        self.execute(request).await.map(|_| ())
    }

    async fn get_list<T: DeserializeOwned>(&self, url: Url) -> Result<Vec<T>, ApiError> {
        let request = self.build_request::<()>(Method::GET, url, None)?;
        let body = self.execute(request).await?;
        serde_json::from_str::<OrdersEnvelope<T>>(&body)
            .map(OrdersEnvelope::into_items)
            .map_err(|err| ApiError::Decode(err.to_string()))
    }
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

#[async_trait]
impl SellerApi for HttpSellerApi {
    async fn fetch_orders(&self) -> Result<Vec<Order>, ApiError> {
        let url = self.endpoint("api/seller/orders")?;
        self.get_list(url).await
    }

    async fn fetch_grouped_orders(&self) -> Result<Vec<ServerGroup>, ApiError> {
        let mut url = self.endpoint("api/seller/orders")?;
        url.query_pairs_mut().append_pair("grouped", "true");
        self.get_list(url).await
    }

    async fn bulk_ship_direct(&self, request: &BulkShipDirect) -> Result<(), ApiError> {
        self.send_unit(Method::PUT, "api/seller/orders/bulk-ship-direct", request)
            .await
    }

    async fn bulk_update_status(
        &self,
        order_ids: &[i64],
        status: OrderStatus,
    ) -> Result<(), ApiError> {
        let body = BulkUpdateBody { order_ids, status };
        self.send_unit(Method::PUT, "api/seller/orders/bulk-update", &body)
            .await
    }

    async fn create_group(&self, order_ids: &[i64]) -> Result<String, ApiError> {
        let url = self.endpoint("api/seller/orders/group")?;
        let request = self.build_request(Method::POST, url, Some(&CreateGroupBody { order_ids }))?;
        let body = self.execute(request).await?;
        let payload: CreateGroupResponse =
            serde_json::from_str(&body).map_err(|err| ApiError::Decode(err.to_string()))?;
        payload
            .group_id()
            .ok_or_else(|| ApiError::Decode(format!("missing group_id in {}", body)))
    }

    async fn bulk_ship_group(&self, group_id: &str, order_ids: &[i64]) -> Result<(), ApiError> {
        let body = BulkShipGroupBody {
            group_id,
            order_ids,
        };
        self.send_unit(Method::PUT, "api/seller/orders/bulk-ship", &body)
            .await
    }

    async fn update_order_status(
        &self,
        order_id: i64,
        status: OrderStatus,
    ) -> Result<(), ApiError> {
        let path = format!("api/orders/{}/status", order_id);
        self.send_unit(Method::PUT, &path, &StatusBody { status })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client(base: &str) -> HttpSellerApi {
        HttpSellerApi::new(
            Url::parse(base).unwrap(),
            42,
            "X-User-ID",
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn build_request_sets_headers_and_body() {
        let api = client("http://localhost:5000/");
        let url = api.endpoint("api/orders/9/status").unwrap();
        let body = json!({ "status": "Shipped" });
        let request = api.build_request(Method::PUT, url, Some(&body)).unwrap();

        assert_eq!(request.method(), Method::PUT);
        assert_eq!(request.url().path(), "/api/orders/9/status");
        let headers = request.headers();
        assert_eq!(
            headers.get("X-User-ID").and_then(|h| h.to_str().ok()).unwrap(),
            "42"
        );
        assert_eq!(
            headers
                .get("Content-Type")
                .and_then(|h| h.to_str().ok())
                .unwrap(),
            "application/json"
        );
        let sent: serde_json::Value =
            serde_json::from_slice(request.body().and_then(|b| b.as_bytes()).unwrap()).unwrap();
        assert_eq!(sent, body);
    }

    #[test]
    fn base_url_with_path_prefix_is_preserved() {
        let api = client("https://shop.example/backend");
        assert_eq!(api.base_url().as_str(), "https://shop.example/backend/");
        let url = api.endpoint("api/seller/orders").unwrap();
        assert_eq!(url.as_str(), "https://shop.example/backend/api/seller/orders");
    }

    #[test]
    fn get_request_has_no_body() {
        let api = client("http://localhost:5000/");
        let url = api.endpoint("api/seller/orders").unwrap();
        let request = api.build_request::<()>(Method::GET, url, None).unwrap();
        assert!(request.body().is_none());
        assert!(request.headers().get("Content-Type").is_none());
    }

    #[test]
    fn api_error_classification() {
        assert!(ApiError::Network("refused".into()).is_network());
        let err = ApiError::Http {
            status: 404,
            body: "nope".into(),
        };
        assert!(!err.is_network());
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.to_string(), "backend returned 404: nope");
    }
}
