//! Local bounded-step agent: an LLM drives a remote browser over CDP for a fixed number of steps.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;

use super::tracker::CompletionTracker;
use super::{
    parse_provider_model, LaunchOutcome, LaunchRequest, ProviderAdapter, ProviderError,
    ProviderKind,
};
use crate::browser::{BrowserAction, BrowserConnector, BrowserSession, BrowserSessionProvider};
use crate::config::BoundedStepConfig;
use crate::cost::{browser_cost, llm_cost_or_reported, CostBreakdown, UsageSummary};
use crate::llm::{ChatMessage, LlmClient, Role};
use crate::store::{AgentCompletion, AgentResult, AgentStatus, ArenaStore, NewAgentRun};
use crate::util::{strip_selectors, truncate_chars};

/// Serialized results above this size lose their action trace.
pub const RESULT_SIZE_LIMIT: usize = 1024 * 1024;

/// Observations kept in the action trace are cut to this many characters.
const TRACE_OBSERVATION_CHARS: usize = 500;

const SYSTEM_PROMPT: &str = "You control a web browser to complete the user's task. \
Use the provided tools one step at a time. Inspect the page with read_content or \
list_elements before clicking or typing. When the task is complete, or cannot be \
completed, call done with the answer.";

/// What the step loop produced.
#[derive(Debug, Clone, Default)]
pub struct StepLoopOutput {
    pub final_result: Option<String>,
    pub success: bool,
    pub completed: bool,
    pub steps: u32,
    pub usage: UsageSummary,
    /// Sum of provider-reported LLM costs, if any were reported
    pub reported_cost: Option<f64>,
    pub actions: Vec<Value>,
    pub error: Option<String>,
}

/// The LLM/browser loop, independent of storage.
pub struct StepLoop {
    llm: Arc<dyn LlmClient>,
    connector: Arc<dyn BrowserConnector>,
    max_steps: u32,
}

impl StepLoop {
    pub fn new(llm: Arc<dyn LlmClient>, connector: Arc<dyn BrowserConnector>, max_steps: u32) -> Self {
        Self {
            llm,
            connector,
            max_steps,
        }
    }

    pub async fn run(&self, model: &str, instruction: &str, cdp_url: &str) -> StepLoopOutput {
        let mut output = StepLoopOutput::default();

        let driver = match self.connector.connect(cdp_url).await {
            Ok(driver) => driver,
            Err(e) => {
                output.error = Some(format!("Failed to connect to browser: {}", e));
                return output;
            }
        };

        let tools = BrowserAction::tool_definitions();
        let mut messages = vec![
            ChatMessage::new(Role::System, SYSTEM_PROMPT),
            ChatMessage::new(Role::User, instruction),
        ];

        'steps: while output.steps < self.max_steps {
            output.steps += 1;
            let step = output.steps;

            let response = match self.llm.chat_completion(model, &messages, Some(&tools)).await {
                Ok(response) => response,
                Err(e) => {
                    output.error = Some(format!("LLM request failed at step {}: {}", step, e));
                    break;
                }
            };

            if let Some(usage) = &response.usage {
                output.usage.add(&usage.to_summary());
                if let Some(cost) = usage.cost {
                    *output.reported_cost.get_or_insert(0.0) += cost;
                }
            }

            let tool_calls = response.tool_calls.unwrap_or_default();
            if tool_calls.is_empty() {
                // A plain answer without tools ends the run; a truncated one is not a success.
                let truncated = response.finish_reason.as_deref() == Some("length");
                if truncated {
                    tracing::warn!(step, "Final answer cut off by the token limit");
                }
                output.final_result = response.content;
                output.success = output.final_result.is_some() && !truncated;
                output.completed = true;
                break;
            }

            messages.push(ChatMessage::assistant_tool_calls(
                response.content,
                tool_calls.clone(),
            ));

            for call in &tool_calls {
                let action = match BrowserAction::from_tool_call(&call.function.name, &call.function.arguments) {
                    Ok(action) => action,
                    Err(e) => {
                        messages.push(ChatMessage::tool_result(&call.id, format!("Error: {}", e)));
                        continue;
                    }
                };

                if let BrowserAction::Done { result, success } = &action {
                    output.actions.push(trace_entry(step, &action, true, result));
                    output.final_result = Some(result.clone());
                    output.success = *success;
                    output.completed = true;
                    break 'steps;
                }

                let (ok, observation) = match driver.perform(&action).await {
                    Ok(observation) => (true, observation),
                    Err(e) => (false, format!("Error: {}", e)),
                };
                tracing::debug!(step, ok, action = %call.function.name, "Browser step");
                output.actions.push(trace_entry(step, &action, ok, &observation));
                messages.push(ChatMessage::tool_result(&call.id, observation));
            }
        }

        if !output.completed && output.error.is_none() {
            output.error = Some(format!(
                "Reached the step limit of {} without finishing",
                self.max_steps
            ));
        }

        driver.disconnect().await;
        output
    }
}

fn trace_entry(step: u32, action: &BrowserAction, ok: bool, observation: &str) -> Value {
    let mut entry = action.to_trace();
    if let Value::Object(map) = &mut entry {
        map.insert("step".to_string(), Value::from(step));
        map.insert("ok".to_string(), Value::Bool(ok));
        map.insert(
            "observation".to_string(),
            Value::String(truncate_chars(observation, TRACE_OBSERVATION_CHARS)),
        );
    }
    entry
}

/// Empty the action trace when the serialized result is over the size limit.
///
/// Usage, cost and extraction are left untouched.
pub fn enforce_result_size(result: &mut AgentResult) {
    let size = serde_json::to_vec(result).map(|v| v.len()).unwrap_or(0);
    if size > RESULT_SIZE_LIMIT {
        tracing::warn!(
            size,
            limit = RESULT_SIZE_LIMIT,
            actions = result.actions.len(),
            "Agent result too large, dropping action trace"
        );
        result.actions.clear();
    }
}

/// Build the stored result from a finished loop.
pub fn build_result(model: &str, output: &StepLoopOutput, duration_secs: f64) -> AgentResult {
    let llm = llm_cost_or_reported(model, &output.usage, output.reported_cost);
    let actions = match strip_selectors(Value::Array(output.actions.clone())) {
        Value::Array(items) => items,
        _ => Vec::new(),
    };
    let extraction = output
        .final_result
        .as_deref()
        .and_then(|s| serde_json::from_str::<Value>(s).ok())
        .filter(|v| v.is_object() || v.is_array());

    let mut result = AgentResult {
        provider: ProviderKind::BrowserUse,
        success: output.success,
        completed: output.completed,
        final_result: output.final_result.clone(),
        duration_secs,
        usage: Some(output.usage.clone()),
        cost: CostBreakdown::new(llm, browser_cost(duration_secs)),
        extraction,
        actions,
        status: Some(if output.completed { "done" } else { "failed" }.to_string()),
    };
    enforce_result_size(&mut result);
    result
}

pub struct BoundedStepAdapter {
    store: Arc<dyn ArenaStore>,
    tracker: CompletionTracker,
    step_loop: Arc<StepLoop>,
    browsers: Option<Arc<dyn BrowserSessionProvider>>,
    default_model: String,
}

impl BoundedStepAdapter {
    pub fn new(
        store: Arc<dyn ArenaStore>,
        tracker: CompletionTracker,
        step_loop: StepLoop,
        browsers: Option<Arc<dyn BrowserSessionProvider>>,
        config: &BoundedStepConfig,
    ) -> Self {
        Self {
            store,
            tracker,
            step_loop: Arc::new(step_loop),
            browsers,
            default_model: config.default_model.clone(),
        }
    }

    /// Resolve a model hint to the model id sent to the LLM endpoint.
    fn llm_model(&self, hint: Option<&str>) -> String {
        let (provider, model) = parse_provider_model(hint);
        match provider.as_str() {
            "browser-use" => self.default_model.clone(),
            "openrouter" => model,
            _ if provider == model => model,
            _ => format!("{}/{}", provider, model),
        }
    }

    async fn release(&self, session: &BrowserSession) {
        if let Some(browsers) = &self.browsers {
            if let Err(e) = browsers.release_session(&session.id).await {
                tracing::warn!(browser_session_id = %session.id, "Failed to release browser session: {}", e);
            }
        }
    }
}

#[async_trait]
impl ProviderAdapter for BoundedStepAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::BrowserUse
    }

    async fn launch(&self, request: LaunchRequest) -> Result<LaunchOutcome, ProviderError> {
        let (browser, acquired_here) = match request.browser.clone() {
            Some(browser) => (browser, false),
            None => {
                let browsers = self.browsers.as_ref().ok_or_else(|| {
                    ProviderError::Misconfigured("No remote browser provider configured".to_string())
                })?;
                (browsers.create_session().await?, true)
            }
        };

        let run = match self
            .store
            .create_agent_run(
                NewAgentRun::new(&request.session_id, ProviderKind::BrowserUse)
                    .with_model(request.model.clone())
                    .with_live_view_url(browser.live_view_url.clone())
                    .with_external_session_id(Some(browser.id.clone())),
            )
            .await
        {
            Ok(run) => run,
            Err(e) => {
                if acquired_here {
                    self.release(&browser).await;
                }
                return Err(e.into());
            }
        };

        if let Err(e) = self
            .store
            .update_agent_status(&run.id, AgentStatus::Running)
            .await
        {
            self.tracker
                .finish(&run.id, AgentCompletion::failed(format!("Failed to start run: {}", e)))
                .await;
            if acquired_here {
                self.release(&browser).await;
            }
            return Err(e.into());
        }

        let model = self.llm_model(request.model.as_deref());
        let step_loop = self.step_loop.clone();
        let browsers = self.browsers.clone();
        let instruction = request.instruction.clone();
        let job_browser = browser.clone();
        let agent_id = run.id.clone();

        self.tracker.run_job(run.id.clone(), async move {
            let started = Instant::now();
            let output = step_loop.run(&model, &instruction, &job_browser.cdp_url).await;
            let result = build_result(&model, &output, started.elapsed().as_secs_f64());

            if let Some(browsers) = browsers {
                if let Err(e) = browsers.release_session(&job_browser.id).await {
                    tracing::warn!(agent_id = %agent_id, browser_session_id = %job_browser.id, "Failed to release browser session: {}", e);
                }
            }

            match output.error {
                Some(error) if !output.completed => AgentCompletion::failed(error)
                    .with_result(result)
                    .with_steps(output.steps),
                _ => AgentCompletion::completed(result).with_steps(output.steps),
            }
        });

        Ok(LaunchOutcome {
            agent_run_id: run.id,
            live_view_url: browser.live_view_url,
            browser_session_id: Some(browser.id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::BrowserDriver;
    use crate::llm::{ChatResponse, FunctionCall, TokenUsage, ToolCall, ToolDefinition};
    use crate::store::{AgentRun, InMemoryArenaStore};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Mutex;

    struct ScriptedLlm {
        responses: Mutex<VecDeque<ChatResponse>>,
    }

    impl ScriptedLlm {
        fn new(responses: Vec<ChatResponse>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
            }
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn chat_completion(
            &self,
            _model: &str,
            _messages: &[ChatMessage],
            _tools: Option<&[ToolDefinition]>,
        ) -> anyhow::Result<ChatResponse> {
            self.responses
                .lock()
                .await
                .pop_front()
                .ok_or_else(|| anyhow::anyhow!("script exhausted"))
        }
    }

    struct EchoDriver;

    #[async_trait]
    impl BrowserDriver for EchoDriver {
        async fn perform(&self, action: &BrowserAction) -> anyhow::Result<String> {
            Ok(format!("did {:?}", action))
        }

        async fn disconnect(&self) {}
    }

    struct EchoConnector;

    #[async_trait]
    impl BrowserConnector for EchoConnector {
        async fn connect(&self, _cdp_url: &str) -> anyhow::Result<Box<dyn BrowserDriver>> {
            Ok(Box::new(EchoDriver))
        }
    }

    fn call(name: &str, args: &str) -> ChatResponse {
        ChatResponse {
            tool_calls: Some(vec![ToolCall {
                id: format!("call-{}", name),
                call_type: "function".to_string(),
                function: FunctionCall {
                    name: name.to_string(),
                    arguments: args.to_string(),
                },
            }]),
            usage: Some(TokenUsage::new(100, 10)),
            ..ChatResponse::default()
        }
    }

    #[tokio::test]
    async fn test_loop_finishes_on_done() {
        let llm = ScriptedLlm::new(vec![
            call("navigate", r#"{"url":"https://example.com"}"#),
            call("click", r##"{"selector":"#buy"}"##),
            call("done", r#"{"result":"bought"}"#),
        ]);
        let step_loop = StepLoop::new(Arc::new(llm), Arc::new(EchoConnector), 30);
        let output = step_loop.run("openai/gpt-4.1", "buy it", "wss://cdp").await;
        assert!(output.completed);
        assert!(output.success);
        assert_eq!(output.steps, 3);
        assert_eq!(output.final_result.as_deref(), Some("bought"));
        assert_eq!(output.usage.input_tokens, 300);
        assert_eq!(output.actions.len(), 3);
        assert!(output.error.is_none());

        let result = build_result("openai/gpt-4.1", &output, 10.0);
        assert!(result.actions.iter().all(|a| a.get("selector").is_none()));
        assert_eq!(result.actions[1]["action"], "click");
    }

    #[tokio::test]
    async fn test_loop_stops_at_step_limit() {
        let llm = ScriptedLlm::new((0..5).map(|_| call("read_content", "")).collect());
        let step_loop = StepLoop::new(Arc::new(llm), Arc::new(EchoConnector), 3);
        let output = step_loop.run("m", "loop forever", "wss://cdp").await;
        assert!(!output.completed);
        assert_eq!(output.steps, 3);
        assert!(output.error.unwrap().contains("step limit of 3"));
    }

    #[test]
    fn test_oversized_result_drops_actions_only() {
        let big = "x".repeat(4096);
        let output = StepLoopOutput {
            final_result: Some(r#"{"answer": 1}"#.to_string()),
            success: true,
            completed: true,
            steps: 300,
            usage: UsageSummary::new(1000, 100, 0),
            reported_cost: None,
            actions: (0..300)
                .map(|i| serde_json::json!({ "action": "read_content", "step": i, "observation": big }))
                .collect(),
            error: None,
        };
        let result = build_result("openai/gpt-4.1", &output, 60.0);
        assert!(result.actions.is_empty());
        assert_eq!(result.usage, Some(UsageSummary::new(1000, 100, 0)));
        assert_eq!(result.extraction, Some(serde_json::json!({ "answer": 1 })));
        assert!(result.cost.llm_cost > 0.0);
        assert!(serde_json::to_vec(&result).unwrap().len() <= RESULT_SIZE_LIMIT);
    }

    #[tokio::test]
    async fn test_truncated_plain_answer_is_not_a_success() {
        let llm = ScriptedLlm::new(vec![ChatResponse {
            content: Some("The cheapest flight is".to_string()),
            finish_reason: Some("length".to_string()),
            ..ChatResponse::default()
        }]);
        let step_loop = StepLoop::new(Arc::new(llm), Arc::new(EchoConnector), 30);
        let output = step_loop.run("m", "find a flight", "wss://cdp").await;
        assert!(output.completed);
        assert!(!output.success);
        assert_eq!(output.final_result.as_deref(), Some("The cheapest flight is"));
    }

    #[derive(Default)]
    struct CountingBrowsers {
        created: AtomicUsize,
        released: AtomicUsize,
    }

    #[async_trait]
    impl BrowserSessionProvider for CountingBrowsers {
        async fn create_session(&self) -> Result<BrowserSession, ProviderError> {
            let n = self.created.fetch_add(1, Ordering::SeqCst);
            Ok(BrowserSession {
                id: format!("bb-{}", n),
                cdp_url: "wss://cdp".to_string(),
                live_view_url: Some("https://live/bb".to_string()),
            })
        }

        async fn release_session(&self, _session_id: &str) -> Result<(), ProviderError> {
            self.released.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Harness {
        store: Arc<InMemoryArenaStore>,
        browsers: Arc<CountingBrowsers>,
        adapter: BoundedStepAdapter,
        session_id: String,
    }

    async fn harness(script: Vec<ChatResponse>) -> Harness {
        let store = Arc::new(InMemoryArenaStore::new());
        let browsers = Arc::new(CountingBrowsers::default());
        let step_loop = StepLoop::new(Arc::new(ScriptedLlm::new(script)), Arc::new(EchoConnector), 30);
        let adapter = BoundedStepAdapter::new(
            store.clone(),
            CompletionTracker::new(store.clone()),
            step_loop,
            Some(browsers.clone()),
            &BoundedStepConfig::default(),
        );
        let session_id = store.create_session("u", "go", false).await.unwrap().id;
        Harness {
            store,
            browsers,
            adapter,
            session_id,
        }
    }

    impl Harness {
        async fn launch(&self) -> LaunchOutcome {
            self.adapter
                .launch(LaunchRequest {
                    session_id: self.session_id.clone(),
                    instruction: "buy it".to_string(),
                    model: Some("openai/gpt-4.1".to_string()),
                    user_id: Some("u".to_string()),
                    browser: None,
                })
                .await
                .unwrap()
        }

        async fn wait_terminal(&self, agent_id: &str) -> AgentRun {
            for _ in 0..200 {
                let run = self.store.get_agent_run(agent_id).await.unwrap().unwrap();
                if run.status.is_terminal() {
                    return run;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            panic!("run {} never finished", agent_id);
        }
    }

    #[tokio::test]
    async fn test_launch_completes_in_background_and_releases_browser() {
        let h = harness(vec![
            call("navigate", r#"{"url":"https://example.com"}"#),
            call("done", r#"{"result":"bought"}"#),
        ])
        .await;
        let outcome = h.launch().await;
        assert_eq!(outcome.browser_session_id.as_deref(), Some("bb-0"));
        assert_eq!(outcome.live_view_url.as_deref(), Some("https://live/bb"));

        let run = h.wait_terminal(&outcome.agent_run_id).await;
        assert_eq!(run.status, AgentStatus::Completed);
        assert_eq!(run.steps, 2);
        assert_eq!(run.external_session_id.as_deref(), Some("bb-0"));
        let result = run.result.unwrap();
        assert_eq!(result.final_result.as_deref(), Some("bought"));
        assert!(result.success);
        assert_eq!(result.actions.len(), 2);

        assert_eq!(h.browsers.created.load(Ordering::SeqCst), 1);
        assert_eq!(h.browsers.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_llm_failure_fails_run_and_releases_browser() {
        let h = harness(Vec::new()).await;
        let outcome = h.launch().await;

        let run = h.wait_terminal(&outcome.agent_run_id).await;
        assert_eq!(run.status, AgentStatus::Failed);
        assert!(run.error.unwrap().contains("LLM request failed at step 1"));
        assert_eq!(run.steps, 1);
        assert!(!run.result.unwrap().completed);
        assert_eq!(h.browsers.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_oversized_run_result_is_stored_without_trace() {
        let answer = "y".repeat(RESULT_SIZE_LIMIT + 1024);
        let done = serde_json::json!({ "result": answer }).to_string();
        let h = harness(vec![
            call("read_content", ""),
            call("done", &done),
        ])
        .await;
        let outcome = h.launch().await;

        let run = h.wait_terminal(&outcome.agent_run_id).await;
        assert_eq!(run.status, AgentStatus::Completed);
        let result = run.result.unwrap();
        assert!(result.actions.is_empty());
        assert_eq!(result.final_result.as_deref().map(str::len), Some(answer.len()));
        assert_eq!(result.usage.unwrap().input_tokens, 200);
        assert!(result.cost.llm_cost > 0.0);
        assert_eq!(h.browsers.released.load(Ordering::SeqCst), 1);
    }
}
