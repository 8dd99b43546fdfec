//! OpenRouter API client implementation with automatic retry for transient errors.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{ChatMessage, ChatResponse, LlmClient, TokenUsage, ToolCall, ToolDefinition};
use crate::providers::{classify_http_status, parse_retry_after, ErrorClass};
use crate::util::truncate_chars;

const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

const MAX_RETRIES: u32 = 3;

/// OpenRouter API client with automatic retry for transient errors.
pub struct OpenRouterClient {
    client: Client,
    api_key: String,
    endpoint: String,
}

enum Attempt {
    Done(ChatResponse),
    Retry(Option<Duration>, String),
    Fail(String),
}

impl OpenRouterClient {
    pub fn new(api_key: String) -> Self {
        Self::with_endpoint(api_key, OPENROUTER_API_URL.to_string())
    }

    /// Point the client at another OpenAI-compatible endpoint.
    pub fn with_endpoint(api_key: String, endpoint: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            endpoint,
        }
    }

    async fn execute_request(&self, request: &OpenRouterRequest) -> Attempt {
        let response = match self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => return Attempt::Retry(None, format!("Request failed: {}", e)),
        };

        let status = response.status();
        let retry_after = parse_retry_after(
            response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok()),
        );
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            let message = format!("HTTP {}: {}", status.as_u16(), truncate_chars(&body, 500));
            return match classify_http_status(status.as_u16()) {
                ErrorClass::RateLimited => Attempt::Retry(retry_after, message),
                ErrorClass::Upstream if status.is_server_error() => Attempt::Retry(None, message),
                _ => Attempt::Fail(message),
            };
        }

        let parsed: OpenRouterResponse = match serde_json::from_str(&body) {
            Ok(parsed) => parsed,
            Err(e) => {
                return Attempt::Fail(format!(
                    "Failed to parse response: {}, body: {}",
                    e,
                    truncate_chars(&body, 500)
                ))
            }
        };

        let Some(choice) = parsed.choices.into_iter().next() else {
            return Attempt::Fail("No choices in response".to_string());
        };

        Attempt::Done(ChatResponse {
            content: choice.message.content,
            tool_calls: choice.message.tool_calls,
            finish_reason: choice.finish_reason,
            usage: parsed.usage.map(|u| TokenUsage {
                cached_tokens: u
                    .prompt_tokens_details
                    .and_then(|d| d.cached_tokens)
                    .unwrap_or(0),
                cost: u.cost,
                ..TokenUsage::new(u.prompt_tokens, u.completion_tokens)
            }),
            model: parsed.model.or_else(|| Some(request.model.clone())),
        })
    }
}

#[async_trait]
impl LlmClient for OpenRouterClient {
    async fn chat_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
    ) -> anyhow::Result<ChatResponse> {
        let request = OpenRouterRequest {
            model: model.to_string(),
            messages: messages.to_vec(),
            tools: tools.map(|t| t.to_vec()),
            tool_choice: tools.map(|_| "auto".to_string()),
            usage: UsageRequest { include: true },
        };

        tracing::debug!("Sending request to OpenRouter: model={}", model);

        let mut attempt = 0;
        loop {
            match self.execute_request(&request).await {
                Attempt::Done(response) => return Ok(response),
                Attempt::Fail(message) => {
                    tracing::error!("Request failed (non-retryable): {}", message);
                    return Err(anyhow::anyhow!(message));
                }
                Attempt::Retry(retry_after, message) => {
                    if attempt >= MAX_RETRIES {
                        tracing::error!("Request failed after {} retries: {}", attempt, message);
                        return Err(anyhow::anyhow!(message));
                    }
                    let delay = retry_after
                        .unwrap_or_else(|| Duration::from_secs(2u64.saturating_pow(attempt)))
                        .min(Duration::from_secs(60));
                    tracing::warn!(
                        "Retry attempt {} failed, retrying in {:?}: {}",
                        attempt + 1,
                        delay,
                        message
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// OpenRouter API request format.
#[derive(Debug, Serialize)]
struct OpenRouterRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ToolDefinition>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<String>,
    usage: UsageRequest,
}

#[derive(Debug, Serialize)]
struct UsageRequest {
    include: bool,
}

#[derive(Debug, Deserialize)]
struct OpenRouterResponse {
    choices: Vec<OpenRouterChoice>,
    #[serde(default)]
    usage: Option<OpenRouterUsage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenRouterChoice {
    message: OpenRouterMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenRouterMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCall>>,
}

/// Usage data (OpenAI-compatible, plus OpenRouter's cost accounting).
#[derive(Debug, Deserialize)]
struct OpenRouterUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
    #[serde(default)]
    prompt_tokens_details: Option<PromptTokensDetails>,
    #[serde(default)]
    cost: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct PromptTokensDetails {
    #[serde(default)]
    cached_tokens: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Json, Router};
    use serde_json::{json, Value};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/v1/chat/completions", addr)
    }

    #[tokio::test]
    async fn test_parses_tool_calls_and_usage() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["tool_choice"], "auto");
                Json(json!({
                    "model": "openai/gpt-4.1",
                    "choices": [{
                        "finish_reason": "tool_calls",
                        "message": {
                            "content": null,
                            "tool_calls": [{
                                "id": "call_1",
                                "type": "function",
                                "function": { "name": "navigate", "arguments": "{\"url\":\"https://example.com\"}" }
                            }]
                        }
                    }],
                    "usage": {
                        "prompt_tokens": 120,
                        "completion_tokens": 30,
                        "total_tokens": 150,
                        "prompt_tokens_details": { "cached_tokens": 20 },
                        "cost": 0.0012
                    }
                }))
            }),
        );
        let endpoint = serve(router).await;
        let client = OpenRouterClient::with_endpoint("key".to_string(), endpoint);
        let tools = vec![ToolDefinition::function("navigate", "go", json!({"type": "object"}))];
        let response = client
            .chat_completion(
                "openai/gpt-4.1",
                &[ChatMessage::new(super::super::Role::User, "hi")],
                Some(&tools),
            )
            .await
            .unwrap();
        let calls = response.tool_calls.unwrap();
        assert_eq!(calls[0].function.name, "navigate");
        let usage = response.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 120);
        assert_eq!(usage.cached_tokens, 20);
        assert_eq!(usage.total_tokens, 150);
        assert_eq!(usage.cost, Some(0.0012));
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let hits = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let counter = hits.clone();
        let router = Router::new().route(
            "/v1/chat/completions",
            post(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    (axum::http::StatusCode::UNAUTHORIZED, "bad key")
                }
            }),
        );
        let endpoint = serve(router).await;
        let client = OpenRouterClient::with_endpoint("key".to_string(), endpoint);
        let err = client
            .chat_completion("m", &[ChatMessage::new(super::super::Role::User, "hi")], None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("401"));
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
