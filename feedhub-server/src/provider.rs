//! HTTP lookup provider for aircraft identity detail.
//!
//! POSTs `{"icaos": [...]}` to the configured URL and expects
//! `{"aircraft": [...], "missing": [...]}` back.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use feedhub_core::aircraft::AircraftDetail;
use feedhub_core::config::OnlineLookupSettings;
use feedhub_core::lookup::{LookupBatch, LookupError, LookupProvider};

#[derive(Serialize)]
struct LookupRequest<'a> {
    icaos: &'a [String],
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct LookupResponse {
    aircraft: Vec<AircraftDetail>,
    missing: Vec<String>,
}

pub struct HttpLookupProvider {
    client: reqwest::Client,
    url: String,
    settings: OnlineLookupSettings,
}

impl HttpLookupProvider {
    pub fn new(url: &str, settings: &OnlineLookupSettings) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_seconds))
            .build()?;
        Ok(HttpLookupProvider {
            client,
            url: url.to_string(),
            settings: settings.clone(),
        })
    }
}

#[async_trait]
impl LookupProvider for HttpLookupProvider {
    fn max_batch_size(&self) -> usize {
        self.settings.max_batch_size
    }

    fn min_seconds_between_requests(&self) -> i64 {
        self.settings.min_seconds_between_requests
    }

    fn max_seconds_after_failed_request(&self) -> i64 {
        self.settings.max_seconds_after_failed_request
    }

    async fn lookup_batch(&self, icaos: &[String]) -> Result<LookupBatch, LookupError> {
        let response = self
            .client
            .post(&self.url)
            .json(&LookupRequest { icaos })
            .send()
            .await
            .map_err(|e| LookupError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(LookupError::Transport(format!("lookup service returned {status}")));
        }
        if !status.is_success() {
            return Err(LookupError::Provider(format!("lookup service returned {status}")));
        }

        let body: LookupResponse = response
            .json()
            .await
            .map_err(|e| LookupError::Provider(e.to_string()))?;
        Ok(LookupBatch {
            found: body.aircraft,
            missing: body.missing,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{address}/lookup")
    }

    #[tokio::test]
    async fn test_batch_round_trip() {
        let router = Router::new().route(
            "/lookup",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["icaos"], json!(["4840D6", "ABCDEF"]));
                Json(json!({
                    "aircraft": [{"icao24": "4840D6", "registration": "PH-BXA"}],
                    "missing": ["ABCDEF"]
                }))
            }),
        );
        let url = serve(router).await;
        let provider = HttpLookupProvider::new(&url, &OnlineLookupSettings::default()).unwrap();
        let batch = provider
            .lookup_batch(&["4840D6".to_string(), "ABCDEF".to_string()])
            .await
            .unwrap();
        assert_eq!(batch.found.len(), 1);
        assert_eq!(batch.found[0].registration.as_deref(), Some("PH-BXA"));
        assert_eq!(batch.missing, vec!["ABCDEF".to_string()]);
    }

    #[tokio::test]
    async fn test_server_error_is_transport_failure() {
        let router = Router::new().route(
            "/lookup",
            post(|| async { axum::http::StatusCode::SERVICE_UNAVAILABLE }),
        );
        let url = serve(router).await;
        let provider = HttpLookupProvider::new(&url, &OnlineLookupSettings::default()).unwrap();
        let result = provider.lookup_batch(&["4840D6".to_string()]).await;
        assert!(matches!(result, Err(LookupError::Transport(_))));
    }

    #[tokio::test]
    async fn test_bad_body_is_provider_error() {
        let router = Router::new().route("/lookup", post(|| async { "not json" }));
        let url = serve(router).await;
        let provider = HttpLookupProvider::new(&url, &OnlineLookupSettings::default()).unwrap();
        let result = provider.lookup_batch(&["4840D6".to_string()]).await;
        assert!(matches!(result, Err(LookupError::Provider(_))));
    }

    #[tokio::test]
    async fn test_unreachable_is_transport_failure() {
        let provider =
            HttpLookupProvider::new("http://127.0.0.1:9/lookup", &OnlineLookupSettings::default()).unwrap();
        let result = provider.lookup_batch(&["4840D6".to_string()]).await;
        assert!(matches!(result, Err(LookupError::Transport(_))));
    }
}
