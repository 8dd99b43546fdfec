use std::collections::HashMap;
use std::sync::Arc;

use super::bounded_step::{BoundedStepAdapter, StepLoop};
use super::direct::DirectRemoteAdapter;
use super::smooth::{SmoothAdapter, SmoothClient};
use super::tracker::{CompletionTracker, TrackerPolicy};
use super::{ProviderAdapter, ProviderBehavior, ProviderKind};
use crate::browser::{BrowserSessionProvider, CdpConnector};
use crate::config::Config;
use crate::llm::OpenRouterClient;
use crate::store::ArenaStore;

#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<ProviderKind, Arc<dyn ProviderAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.kind(), adapter);
    }

    pub fn get(&self, kind: ProviderKind) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&kind).cloned()
    }

    pub fn contains(&self, kind: ProviderKind) -> bool {
        self.adapters.contains_key(&kind)
    }

    /// Registered kinds in a stable order.
    pub fn kinds(&self) -> Vec<ProviderKind> {
        ProviderKind::ALL
            .into_iter()
            .filter(|kind| self.contains(*kind))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Register every provider whose settings are present.
    pub fn from_config(
        config: &Config,
        store: Arc<dyn ArenaStore>,
        tracker: CompletionTracker,
        browsers: Option<Arc<dyn BrowserSessionProvider>>,
    ) -> Self {
        let mut registry = Self::new();

        for kind in ProviderKind::ALL {
            match kind.behavior() {
                ProviderBehavior::DirectRemote => {
                    // The remote drives a browser we create for it over CDP.
                    if kind.needs_browser_session() && browsers.is_none() {
                        tracing::warn!(provider = %kind, "Provider disabled: remote browser sessions not configured");
                        continue;
                    }
                    match (config.direct.endpoint_for(kind), &config.direct.server_token) {
                        (Some(endpoint), Some(token)) => {
                            registry.register(Arc::new(DirectRemoteAdapter::new(
                                kind,
                                Some(endpoint.to_string()),
                                Some(token.clone()),
                                store.clone(),
                            )))
                        }
                        _ => tracing::warn!(provider = %kind, "Provider disabled: endpoint or AGENT_SERVER_TOKEN missing"),
                    }
                }
                ProviderBehavior::SubmitThenPoll => match SmoothClient::from_config(&config.smooth) {
                    Some(client) => registry.register(Arc::new(SmoothAdapter::new(
                        Some(client),
                        store.clone(),
                        tracker.clone(),
                        TrackerPolicy::from_config(&config.smooth),
                    ))),
                    None => tracing::warn!(provider = %kind, "Provider disabled: SMOOTH_API_KEY missing"),
                },
                ProviderBehavior::BoundedStep => {
                    match (&config.bounded_step.openrouter_api_key, &browsers) {
                        (Some(key), Some(_)) => {
                            let step_loop = StepLoop::new(
                                Arc::new(OpenRouterClient::new(key.clone())),
                                Arc::new(CdpConnector),
                                config.bounded_step.max_steps,
                            );
                            registry.register(Arc::new(BoundedStepAdapter::new(
                                store.clone(),
                                tracker.clone(),
                                step_loop,
                                browsers.clone(),
                                &config.bounded_step,
                            )));
                        }
                        _ => tracing::warn!(
                            provider = %kind,
                            "Provider disabled: OPENROUTER_API_KEY or browser session settings missing"
                        ),
                    }
                }
            }
        }

        registry
    }
}
