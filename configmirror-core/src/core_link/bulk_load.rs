//! One-shot fetch of the full configuration set over HTTP

use crate::core_replica::ConfigItem;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum BulkLoadError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Unexpected status: {0}")]
    Status(u16),

    #[error("Failed to decode response: {0}")]
    Decode(String),
}

pub type BulkLoadResult<T> = Result<T, BulkLoadError>;

/// Source of the authoritative configuration set
#[async_trait]
pub trait BulkLoader: Send + Sync {
    async fn fetch_snapshot(&self) -> BulkLoadResult<Vec<ConfigItem>>;
}

/// `GET <endpoint>` returning a JSON array of configuration items
pub struct HttpBulkLoader {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpBulkLoader {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> BulkLoadResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BulkLoadError::Request(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl BulkLoader for HttpBulkLoader {
    async fn fetch_snapshot(&self) -> BulkLoadResult<Vec<ConfigItem>> {
        debug!("Fetching configuration snapshot from {}", self.endpoint);

        let response = self
            .client
            .get(&self.endpoint)
            .send()
            .await
            .map_err(|e| BulkLoadError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BulkLoadError::Status(status.as_u16()));
        }

        response
            .json::<Vec<ConfigItem>>()
            .await
            .map_err(|e| BulkLoadError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/api/configuration", addr)
    }

    #[tokio::test]
    async fn test_fetch_snapshot() {
        let app = Router::new().route(
            "/api/configuration",
            get(|| async {
                Json(json!([
                    {"id": 1, "key": "A", "value": "v1", "type": "string", "version": 3},
                    {"id": 2, "key": "B", "value": "v1", "version": 1, "domain": "edge"}
                ]))
            }),
        );
        let loader = HttpBulkLoader::new(serve(app).await, Duration::from_secs(5)).unwrap();

        let items = loader.fetch_snapshot().await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].item_type, "string");
        assert_eq!(items[0].version, 3);
        assert_eq!(items[1].domain.as_deref(), Some("edge"));
    }

    #[tokio::test]
    async fn test_server_error_status() {
        let app = Router::new().route(
            "/api/configuration",
            get(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        );
        let loader = HttpBulkLoader::new(serve(app).await, Duration::from_secs(5)).unwrap();

        assert!(matches!(
            loader.fetch_snapshot().await,
            Err(BulkLoadError::Status(500))
        ));
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let app = Router::new().route(
            "/api/configuration",
            get(|| async { Json(json!({"not": "an array"})) }),
        );
        let loader = HttpBulkLoader::new(serve(app).await, Duration::from_secs(5)).unwrap();

        assert!(matches!(
            loader.fetch_snapshot().await,
            Err(BulkLoadError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let loader = HttpBulkLoader::new(
            format!("http://127.0.0.1:{}/api/configuration", port),
            Duration::from_secs(2),
        )
        .unwrap();

        assert!(matches!(
            loader.fetch_snapshot().await,
            Err(BulkLoadError::Request(_))
        ));
    }
}
