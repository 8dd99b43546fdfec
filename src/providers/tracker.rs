//! Background completion tracking.
//!
//! Work here outlives the request that started it. Every spawned job owns its
//! own handles and always ends by writing a terminal status for its agent run.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use super::smooth::SmoothClient;
use crate::config::SmoothConfig;
use crate::store::{AgentCompletion, ArenaStore};

/// How long to keep polling a remote task.
#[derive(Debug, Clone)]
pub struct TrackerPolicy {
    pub poll_interval: Duration,
    pub max_attempts: u32,
}

impl TrackerPolicy {
    pub fn from_config(config: &SmoothConfig) -> Self {
        Self {
            poll_interval: config.poll_interval,
            max_attempts: config.max_poll_attempts,
        }
    }

    pub fn max_wait(&self) -> Duration {
        self.poll_interval * self.max_attempts
    }
}

#[derive(Clone)]
pub struct CompletionTracker {
    store: Arc<dyn ArenaStore>,
}

impl CompletionTracker {
    pub fn new(store: Arc<dyn ArenaStore>) -> Self {
        Self { store }
    }

    /// Write the terminal status. Failures are logged; there is nobody left to report them to.
    pub async fn finish(&self, agent_id: &str, completion: AgentCompletion) {
        let status = completion.status;
        match self.store.complete_agent_run(agent_id, completion).await {
            Ok(()) => tracing::info!(agent_id = %agent_id, status = %status, "Agent run finished"),
            Err(e) => tracing::error!(agent_id = %agent_id, status = %status, "Failed to write terminal status: {}", e),
        }
    }

    /// Run a job to completion in the background and persist its outcome.
    pub fn run_job<F>(&self, agent_id: String, job: F) -> JoinHandle<()>
    where
        F: Future<Output = AgentCompletion> + Send + 'static,
    {
        let tracker = self.clone();
        tokio::spawn(async move {
            let completion = job.await;
            tracker.finish(&agent_id, completion).await;
        })
    }

    /// Poll a remote task until it is terminal or the policy runs out.
    pub fn track_task(
        &self,
        agent_id: String,
        task_id: String,
        client: SmoothClient,
        policy: TrackerPolicy,
    ) -> JoinHandle<()> {
        let tracker = self.clone();
        tokio::spawn(async move {
            let completion = tracker
                .poll_until_terminal(&agent_id, &task_id, &client, &policy)
                .await;
            tracker.finish(&agent_id, completion).await;
        })
    }

    async fn poll_until_terminal(
        &self,
        agent_id: &str,
        task_id: &str,
        client: &SmoothClient,
        policy: &TrackerPolicy,
    ) -> AgentCompletion {
        let started = Instant::now();
        let mut live_url_recorded = false;

        for attempt in 1..=policy.max_attempts {
            tokio::time::sleep(policy.poll_interval).await;

            let task = match client.get_task(task_id).await {
                Ok(task) => task,
                Err(e) => {
                    tracing::warn!(agent_id = %agent_id, task_id = %task_id, attempt, "Poll failed: {}", e);
                    continue;
                }
            };
            tracing::debug!(agent_id = %agent_id, task_id = %task_id, attempt, status = %task.status, "Polled task");

            if !live_url_recorded {
                if let Some(url) = task.live_url.as_deref() {
                    match self.store.set_live_view_url(agent_id, url).await {
                        Ok(_) => live_url_recorded = true,
                        Err(e) => tracing::warn!(agent_id = %agent_id, "Failed to record live view url: {}", e),
                    }
                }
            }

            if !task.is_terminal() {
                continue;
            }

            if let Some(url) = task.recording_url.as_deref() {
                if let Err(e) = self.store.set_recording_url(agent_id, url).await {
                    tracing::warn!(agent_id = %agent_id, "Failed to record recording url: {}", e);
                }
            }

            let result = task.to_result(started.elapsed());
            return if task.succeeded() {
                AgentCompletion::completed(result)
            } else {
                AgentCompletion::failed(format!("Task ended with status '{}'", task.status))
                    .with_result(result)
            };
        }

        AgentCompletion::failed(format!(
            "Task {} did not finish within {}s",
            task_id,
            policy.max_wait().as_secs()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ProviderKind;
    use crate::store::{AgentStatus, InMemoryArenaStore, NewAgentRun};

    #[tokio::test]
    async fn test_run_job_writes_terminal_status() {
        let store = Arc::new(InMemoryArenaStore::new());
        let session = store.create_session("u", "x", false).await.unwrap();
        let run = store
            .create_agent_run(NewAgentRun::new(&session.id, ProviderKind::BrowserUse))
            .await
            .unwrap();
        let tracker = CompletionTracker::new(store.clone());
        tracker
            .run_job(run.id.clone(), async { AgentCompletion::failed("no browser") })
            .await
            .unwrap();
        let stored = store.get_agent_run(&run.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AgentStatus::Failed);
        assert_eq!(stored.error.as_deref(), Some("no browser"));
    }

    #[tokio::test]
    async fn test_exhausted_polling_fails_the_run() {
        // Nothing listens on this port, so every poll fails.
        let client = SmoothClient::new("http://127.0.0.1:9".to_string(), "k".to_string());
        let store = Arc::new(InMemoryArenaStore::new());
        let session = store.create_session("u", "x", false).await.unwrap();
        let run = store
            .create_agent_run(NewAgentRun::new(&session.id, ProviderKind::Smooth))
            .await
            .unwrap();
        let tracker = CompletionTracker::new(store.clone());
        let policy = TrackerPolicy {
            poll_interval: Duration::from_millis(5),
            max_attempts: 3,
        };
        tracker
            .track_task(run.id.clone(), "t1".to_string(), client, policy)
            .await
            .unwrap();
        let stored = store.get_agent_run(&run.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AgentStatus::Failed);
        assert!(stored.error.unwrap().contains("did not finish"));
    }
}
