//! Browserbase session API client.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::{BrowserSession, BrowserSessionProvider};
use crate::config::BrowserConfig;
use crate::providers::ProviderError;

pub struct BrowserbaseClient {
    client: Client,
    api_url: String,
    api_key: String,
    project_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedSession {
    id: String,
    connect_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DebugUrls {
    #[serde(default)]
    debugger_fullscreen_url: Option<String>,
}

impl BrowserbaseClient {
    pub fn new(api_url: String, api_key: String, project_id: String) -> Self {
        Self {
            client: Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key,
            project_id,
        }
    }

    /// Build a client when both the key and the project are configured.
    pub fn from_config(config: &BrowserConfig) -> Option<Self> {
        match (&config.api_key, &config.project_id) {
            (Some(key), Some(project)) => Some(Self::new(
                config.api_url.clone(),
                key.clone(),
                project.clone(),
            )),
            _ => None,
        }
    }

    async fn debug_url(&self, session_id: &str) -> Result<Option<String>, ProviderError> {
        let response = self
            .client
            .get(format!(
                "{}/v1/sessions/{}/debug",
                self.api_url,
                urlencoding::encode(session_id)
            ))
            .header("X-BB-API-Key", &self.api_key)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ProviderError::from_response(response).await);
        }
        let urls: DebugUrls = response.json().await?;
        Ok(urls.debugger_fullscreen_url)
    }
}

#[async_trait]
impl BrowserSessionProvider for BrowserbaseClient {
    async fn create_session(&self) -> Result<BrowserSession, ProviderError> {
        let response = self
            .client
            .post(format!("{}/v1/sessions", self.api_url))
            .header("X-BB-API-Key", &self.api_key)
            .json(&json!({ "projectId": self.project_id }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ProviderError::from_response(response).await);
        }
        let created: CreatedSession = response.json().await?;

        // The session is usable without a live view, so a failed lookup only loses the URL.
        let live_view_url = match self.debug_url(&created.id).await {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(browser_session_id = %created.id, "Failed to fetch live view url: {}", e);
                None
            }
        };

        tracing::info!(browser_session_id = %created.id, "Created remote browser session");
        Ok(BrowserSession {
            id: created.id,
            cdp_url: created.connect_url,
            live_view_url,
        })
    }

    async fn release_session(&self, session_id: &str) -> Result<(), ProviderError> {
        let response = self
            .client
            .post(format!(
                "{}/v1/sessions/{}",
                self.api_url,
                urlencoding::encode(session_id)
            ))
            .header("X-BB-API-Key", &self.api_key)
            .json(&json!({ "projectId": self.project_id, "status": "REQUEST_RELEASE" }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ProviderError::from_response(response).await);
        }
        tracing::info!(browser_session_id = %session_id, "Released remote browser session");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::http::HeaderMap;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::Value;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_create_and_release_session() {
        let released: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = released.clone();
        let router = Router::new()
            .route(
                "/v1/sessions",
                post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                    assert_eq!(headers["x-bb-api-key"], "bb-key");
                    assert_eq!(body["projectId"], "proj");
                    Json(json!({ "id": "bb-1", "connectUrl": "wss://connect/bb-1" }))
                }),
            )
            .route(
                "/v1/sessions/:id/debug",
                get(|Path(id): Path<String>| async move {
                    Json(json!({ "debuggerFullscreenUrl": format!("https://live/{}", id) }))
                }),
            )
            .route(
                "/v1/sessions/:id",
                post(move |Json(body): Json<Value>| {
                    let sink = sink.clone();
                    async move {
                        sink.lock().unwrap().push(body);
                        Json(json!({}))
                    }
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });

        let client = BrowserbaseClient::new(
            format!("http://{}", addr),
            "bb-key".to_string(),
            "proj".to_string(),
        );
        let session = client.create_session().await.unwrap();
        assert_eq!(session.id, "bb-1");
        assert_eq!(session.cdp_url, "wss://connect/bb-1");
        assert_eq!(session.live_view_url.as_deref(), Some("https://live/bb-1"));

        client.release_session("bb-1").await.unwrap();
        let bodies = released.lock().unwrap();
        assert_eq!(bodies[0]["status"], "REQUEST_RELEASE");
    }

    #[test]
    fn test_from_config_requires_key_and_project() {
        let mut config = BrowserConfig::default();
        assert!(BrowserbaseClient::from_config(&config).is_none());
        config.api_key = Some("k".to_string());
        assert!(BrowserbaseClient::from_config(&config).is_none());
        config.project_id = Some("p".to_string());
        assert!(BrowserbaseClient::from_config(&config).is_some());
    }
}
