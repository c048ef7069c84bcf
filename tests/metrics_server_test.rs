//! Metrics Server Integration Tests
//!
//! Tests for the Prometheus metrics and health endpoints.

use std::time::Duration;

mod tests {
    use super::*;
    use mizuchi_store::config::{BackendConfig, StorageConfig};
    use mizuchi_store::metrics::server::{MetricsServer, MetricsServerConfig};
    use mizuchi_store::server::assemble_storage;

    fn local_config() -> MetricsServerConfig {
        MetricsServerConfig {
            address: "127.0.0.1:0".to_string(), // Use port 0 for random available port
        }
    }

    #[tokio::test]
    async fn test_metrics_endpoint_returns_prometheus_format() {
        let mut server = MetricsServer::new(local_config());
        let addr = server.start().await.expect("Server should start");

        let client = reqwest::Client::new();
        let response = client
            .get(format!("http://{}/metrics", addr))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .expect("Should connect to metrics server");

        assert!(response.status().is_success());
        let content_type = response
            .headers()
            .get("content-type")
            .expect("Should have content-type");
        assert!(
            content_type.to_str().unwrap().contains("text/plain"),
            "Content-Type should be Prometheus text format"
        );

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_metrics_include_quota_activity() {
        let stack = assemble_storage(&StorageConfig {
            backend: BackendConfig::Memory,
            store_size: 100,
            max_size: 0,
        })
        .await
        .unwrap();
        let core = stack.composer.core().unwrap();

        // Second upload evicts the first, third is rejected by the cap
        core.new_upload(70).await.unwrap();
        core.new_upload(70).await.unwrap();
        assert!(core.new_upload(101).await.is_err());

        let mut server = MetricsServer::new(local_config());
        let addr = server.start().await.expect("Server should start");

        let body = reqwest::Client::new()
            .get(format!("http://{}/metrics", addr))
            .send()
            .await
            .expect("Should get metrics")
            .text()
            .await
            .unwrap();

        assert!(body.contains("mizuchi_store_uploads_total"));
        assert!(body.contains("mizuchi_store_evictions_total"));
        assert!(body.contains("mizuchi_store_quota_used_bytes"));

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_health_reports_capabilities_and_usage() {
        let stack = assemble_storage(&StorageConfig {
            backend: BackendConfig::Memory,
            store_size: 1000,
            max_size: 0,
        })
        .await
        .unwrap();
        stack.composer.core().unwrap().new_upload(250).await.unwrap();

        let mut server = MetricsServer::new(local_config()).with_health_probe(stack.health_probe());
        let addr = server.start().await.expect("Server should start");

        let health: serde_json::Value = reqwest::Client::new()
            .get(format!("http://{}/health", addr))
            .send()
            .await
            .expect("Should get health")
            .json()
            .await
            .unwrap();

        assert_eq!(health["status"], "ok");
        assert_eq!(
            health["capabilities"],
            serde_json::json!(["Core", "Terminater"])
        );
        assert_eq!(health["quota"]["used"], 250);
        assert_eq!(health["quota"]["capacity"], 1000);
        assert_eq!(health["max_size"], 1000);

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_path_returns_404() {
        let mut server = MetricsServer::new(local_config());
        let addr = server.start().await.expect("Server should start");

        let response = reqwest::Client::new()
            .get(format!("http://{}/uploads", addr))
            .send()
            .await
            .expect("Should connect");

        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

        server.shutdown().await;
    }
}
