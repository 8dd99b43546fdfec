//! Browser control over the Chrome DevTools Protocol.
//!
//! The step loop speaks in [`BrowserAction`]s; a [`BrowserDriver`] carries them
//! out against a remote browser's CDP endpoint.

use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::Browser;
use chromiumoxide::Page;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::task::JoinHandle;

use crate::llm::ToolDefinition;
use crate::util::truncate_chars;

/// Page text returned to the model is capped at this many characters.
const MAX_CONTENT_CHARS: usize = 50_000;

const DEFAULT_ELEMENT_LIMIT: u64 = 50;

/// One step the model asked for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum BrowserAction {
    Navigate {
        url: String,
    },
    Click {
        selector: String,
    },
    Type {
        selector: String,
        text: String,
    },
    ReadContent,
    ListElements {
        #[serde(default)]
        limit: Option<u64>,
    },
    /// Ends the run with the model's answer.
    Done {
        result: String,
        #[serde(default = "default_success")]
        success: bool,
    },
}

fn default_success() -> bool {
    true
}

impl BrowserAction {
    /// Parse a tool call into an action.
    pub fn from_tool_call(name: &str, arguments: &str) -> Result<Self, String> {
        let args: Value = if arguments.trim().is_empty() {
            json!({})
        } else {
            serde_json::from_str(arguments)
                .map_err(|e| format!("Invalid arguments for {}: {}", name, e))?
        };
        let mut tagged = match args {
            Value::Object(map) => map,
            _ => return Err(format!("Arguments for {} must be an object", name)),
        };
        tagged.insert("action".to_string(), Value::String(name.to_string()));
        serde_json::from_value(Value::Object(tagged))
            .map_err(|e| format!("Invalid call to {}: {}", name, e))
    }

    /// Entry for the run's action trace.
    pub fn to_trace(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Tools offered to the model.
    pub fn tool_definitions() -> Vec<ToolDefinition> {
        vec![
            ToolDefinition::function(
                "navigate",
                "Navigate the browser to a URL and wait for the page to load.",
                json!({
                    "type": "object",
                    "properties": { "url": { "type": "string", "description": "The URL to navigate to" } },
                    "required": ["url"]
                }),
            ),
            ToolDefinition::function(
                "click",
                "Click an element on the page.",
                json!({
                    "type": "object",
                    "properties": { "selector": { "type": "string", "description": "CSS selector for the element to click" } },
                    "required": ["selector"]
                }),
            ),
            ToolDefinition::function(
                "type",
                "Type text into an input field. Clicks the element first to focus it.",
                json!({
                    "type": "object",
                    "properties": {
                        "selector": { "type": "string", "description": "CSS selector for the input" },
                        "text": { "type": "string", "description": "Text to type" }
                    },
                    "required": ["selector", "text"]
                }),
            ),
            ToolDefinition::function(
                "read_content",
                "Read the visible text of the current page.",
                json!({ "type": "object", "properties": {} }),
            ),
            ToolDefinition::function(
                "list_elements",
                "List interactive elements (links, buttons, inputs) with selector hints.",
                json!({
                    "type": "object",
                    "properties": { "limit": { "type": "integer", "description": "Maximum number of elements (default: 50)" } }
                }),
            ),
            ToolDefinition::function(
                "done",
                "Finish the task and report the result.",
                json!({
                    "type": "object",
                    "properties": {
                        "result": { "type": "string", "description": "Final answer for the user" },
                        "success": { "type": "boolean", "description": "Whether the task was accomplished" }
                    },
                    "required": ["result"]
                }),
            ),
        ]
    }
}

/// Executes browser actions against one connected browser.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Perform an action and return a textual observation for the model.
    async fn perform(&self, action: &BrowserAction) -> anyhow::Result<String>;

    /// Disconnect. The remote session itself is released separately.
    async fn disconnect(&self);
}

/// Opens drivers for CDP endpoints.
#[async_trait]
pub trait BrowserConnector: Send + Sync {
    async fn connect(&self, cdp_url: &str) -> anyhow::Result<Box<dyn BrowserDriver>>;
}

/// chromiumoxide-backed connector.
#[derive(Debug, Clone, Default)]
pub struct CdpConnector;

struct CdpDriver {
    // Held so the connection stays open while the page is in use.
    _browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
}

#[async_trait]
impl BrowserConnector for CdpConnector {
    async fn connect(&self, cdp_url: &str) -> anyhow::Result<Box<dyn BrowserDriver>> {
        let (browser, mut handler) = Browser::connect(cdp_url)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to browser over CDP: {}", e))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::warn!("Browser event error: {}", e);
                }
            }
        });

        // Remote sessions usually come with a tab open already.
        let page = match browser.pages().await {
            Ok(pages) if !pages.is_empty() => pages.into_iter().next(),
            _ => None,
        };
        let page = match page {
            Some(page) => page,
            None => browser.new_page("about:blank").await?,
        };

        Ok(Box::new(CdpDriver {
            _browser: browser,
            page,
            handler,
        }))
    }
}

fn list_elements_script(limit: u64) -> String {
    format!(
        r#"
        (() => {{
            const elements = document.querySelectorAll("a, button, input, select, textarea, [onclick], [role='button']");
            const results = [];
            for (let i = 0; i < Math.min(elements.length, {}); i++) {{
                const el = elements[i];
                const rect = el.getBoundingClientRect();
                results.push({{
                    tag: el.tagName.toLowerCase(),
                    id: el.id || null,
                    text: (el.innerText || el.value || '').slice(0, 100).trim(),
                    href: el.href || null,
                    name: el.name || null,
                    visible: rect.width > 0 && rect.height > 0
                }});
            }}
            return results;
        }})()
        "#,
        limit
    )
}

#[async_trait]
impl BrowserDriver for CdpDriver {
    async fn perform(&self, action: &BrowserAction) -> anyhow::Result<String> {
        let page = &self.page;
        match action {
            BrowserAction::Navigate { url } => {
                page.goto(url.as_str()).await?;
                tokio::time::sleep(Duration::from_millis(1000)).await;
                let title = page.get_title().await?.unwrap_or_default();
                Ok(format!("Navigated to: {}\nTitle: {}", url, title))
            }
            BrowserAction::Click { selector } => {
                let element = page
                    .find_element(selector.as_str())
                    .await
                    .map_err(|e| anyhow::anyhow!("Element '{}' not found: {}", selector, e))?;
                element.click().await?;
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(format!("Clicked: {}", selector))
            }
            BrowserAction::Type { selector, text } => {
                let element = page
                    .find_element(selector.as_str())
                    .await
                    .map_err(|e| anyhow::anyhow!("Element '{}' not found: {}", selector, e))?;
                element.click().await?;
                element.type_str(text.as_str()).await?;
                Ok(format!("Typed {} characters into {}", text.chars().count(), selector))
            }
            BrowserAction::ReadContent => {
                let result = page.evaluate("document.body.innerText").await?;
                let content = result.into_value::<String>().unwrap_or_default();
                let total = content.chars().count();
                if total > MAX_CONTENT_CHARS {
                    Ok(format!(
                        "{}\n\n... [truncated, {} total characters]",
                        truncate_chars(&content, MAX_CONTENT_CHARS),
                        total
                    ))
                } else {
                    Ok(content)
                }
            }
            BrowserAction::ListElements { limit } => {
                let script = list_elements_script(limit.unwrap_or(DEFAULT_ELEMENT_LIMIT));
                let result = page.evaluate(script.as_str()).await?;
                let elements: Vec<Value> = result.into_value().unwrap_or_default();
                if elements.is_empty() {
                    return Ok("No interactive elements found".to_string());
                }
                Ok(serde_json::to_string(&elements)?)
            }
            BrowserAction::Done { result, .. } => Ok(result.clone()),
        }
    }

    async fn disconnect(&self) {
        self.handler.abort();
    }
}
