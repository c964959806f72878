//! LLM Orchestrator: moves requests from `pending` through the external call.
//!
//! Each call runs in its own task with a timeout, so a slow agent never holds
//! up the others. Results are written back with compare-and-set, which keeps a
//! manual override or a reset that raced the call from being overwritten.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use crate::engine::recovery;
use crate::providers::{LLMProvider, Message, ProviderFactory};
use crate::storage::Storage;
use crate::types::{LlmRequest, LlmStatus};

pub const NO_CREDENTIAL: &str = "No active LLM API key available.";
pub const INTERRUPTED: &str = "LLM call interrupted by shutdown.";

pub struct LlmOrchestrator {
    storage: Arc<dyn Storage>,
    factory: Arc<dyn ProviderFactory>,
    timeout: Duration,
    calls: Mutex<JoinSet<()>>,
}

impl LlmOrchestrator {
    pub fn new(
        storage: Arc<dyn Storage>,
        factory: Arc<dyn ProviderFactory>,
        timeout: Duration,
    ) -> Self {
        Self {
            storage,
            factory,
            timeout,
            calls: Mutex::new(JoinSet::new()),
        }
    }

    /// Claims every pending request and starts its call. Returns the number
    /// of calls started.
    pub async fn dispatch_pending(&self) -> Result<usize> {
        self.reap_finished().await;

        let mut started = 0;
        for request in self.storage.llm_requests_with_status(LlmStatus::Pending).await? {
            if !self
                .storage
                .transition_llm_request(request.id, LlmStatus::Pending, LlmStatus::Thinking, None)
                .await?
            {
                continue;
            }

            let credential = match self.storage.acquire_credential().await {
                Ok(Some(credential)) => credential,
                Ok(None) => {
                    log::warn!("LLM request {} failed: no active credential", request.id);
                    self.fail(&request, NO_CREDENTIAL).await?;
                    continue;
                }
                Err(e) => {
                    log::error!("Credential lookup for request {} failed: {:#}", request.id, e);
                    self.fail(&request, &format!("LLM credential lookup failed: {}", e))
                        .await?;
                    continue;
                }
            };

            let provider = match self.factory.create(&credential) {
                Ok(provider) => provider,
                Err(e) => {
                    log::error!("Could not build provider for request {}: {:#}", request.id, e);
                    self.fail(&request, &format!("LLM provider unavailable: {}", e)).await?;
                    continue;
                }
            };

            log::info!(
                "Dispatching LLM request {} for agent {} via {} (key {})",
                request.id,
                request.agent_id,
                provider.name(),
                credential.masked()
            );
            let storage = self.storage.clone();
            let timeout = self.timeout;
            self.calls
                .lock()
                .await
                .spawn(run_call(storage, provider, request, timeout));
            started += 1;
        }
        Ok(started)
    }

    /// Waits for every call in flight to finish and record its result.
    pub async fn wait_idle(&self) {
        let mut calls = self.calls.lock().await;
        while let Some(joined) = calls.join_next().await {
            if let Err(e) = joined {
                log::error!("LLM call task ended abnormally: {}", e);
            }
        }
    }

    /// Aborts calls in flight and fails the requests they were serving.
    pub async fn shutdown(&self) -> Result<u64> {
        {
            let mut calls = self.calls.lock().await;
            calls.abort_all();
            while calls.join_next().await.is_some() {}
        }
        recovery::fail_thinking_requests(self.storage.as_ref(), INTERRUPTED).await
    }

    pub async fn in_flight(&self) -> usize {
        self.calls.lock().await.len()
    }

    async fn reap_finished(&self) {
        let mut calls = self.calls.lock().await;
        while let Some(joined) = calls.try_join_next() {
            if let Err(e) = joined {
                log::error!("LLM call task ended abnormally: {}", e);
            }
        }
    }

    async fn fail(&self, request: &LlmRequest, diagnostic: &str) -> Result<()> {
        self.storage
            .transition_llm_request(
                request.id,
                LlmStatus::Thinking,
                LlmStatus::Failed,
                Some(diagnostic),
            )
            .await?;
        Ok(())
    }
}

async fn run_call(
    storage: Arc<dyn Storage>,
    provider: Arc<dyn LLMProvider>,
    request: LlmRequest,
    timeout: Duration,
) {
    let messages = vec![Message::user(&request.prompt)];
    let outcome = tokio::time::timeout(timeout, provider.complete(messages)).await;

    let (status, text) = match outcome {
        Ok(Ok(response)) => (LlmStatus::Completed, response),
        Ok(Err(e)) => {
            log::error!("LLM request {} failed: {:#}", request.id, e);
            (LlmStatus::Failed, format!("LLM call failed: {}", e))
        }
        Err(_) => {
            log::error!("LLM request {} timed out after {:?}", request.id, timeout);
            let diagnostic = format!("LLM call timed out after {}s", timeout.as_secs());
            (LlmStatus::Failed, diagnostic)
        }
    };

    match storage
        .transition_llm_request(request.id, LlmStatus::Thinking, status, Some(&text))
        .await
    {
        Ok(true) => log::info!("LLM request {} {}", request.id, status.as_str()),
        Ok(false) => log::info!(
            "LLM request {} changed while the call was running; result discarded",
            request.id
        ),
        Err(e) => log::error!(
            "Could not record result of LLM request {}: {:#}",
            request.id,
            e
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{MockLLMProvider, StaticProviderFactory};
    use crate::storage::flaky::FlakyStore;
    use crate::storage::InMemoryStore;
    use crate::types::{AgentId, ApiCredential};

    fn orchestrator(
        store: Arc<InMemoryStore>,
        provider: MockLLMProvider,
        timeout: Duration,
    ) -> LlmOrchestrator {
        LlmOrchestrator::new(
            store,
            Arc::new(StaticProviderFactory::new(Arc::new(provider))),
            timeout,
        )
    }

    async fn pending_request(store: &InMemoryStore) -> LlmRequest {
        let request = LlmRequest::new(AgentId::new_v4(), "You are in a hall.");
        store.create_llm_request(&request).await.unwrap();
        request
    }

    #[tokio::test]
    async fn test_completes_request() {
        let store = Arc::new(InMemoryStore::new());
        store.add_credential(&ApiCredential::new("key-1")).await.unwrap();
        let request = pending_request(&store).await;
        let orch = orchestrator(
            store.clone(),
            MockLLMProvider::with_response("[command|look]".to_string()),
            Duration::from_secs(5),
        );

        assert_eq!(orch.dispatch_pending().await.unwrap(), 1);
        orch.wait_idle().await;

        let stored = store.get_llm_request(request.id).await.unwrap().unwrap();
        assert_eq!(stored.status, LlmStatus::Completed);
        assert_eq!(stored.response.as_deref(), Some("[command|look]"));
    }

    #[tokio::test]
    async fn test_no_credential_fails_without_call() {
        let store = Arc::new(InMemoryStore::new());
        let request = pending_request(&store).await;
        let orch = orchestrator(store.clone(), MockLLMProvider::new(), Duration::from_secs(5));

        assert_eq!(orch.dispatch_pending().await.unwrap(), 0);
        let stored = store.get_llm_request(request.id).await.unwrap().unwrap();
        assert_eq!(stored.status, LlmStatus::Failed);
        assert_eq!(stored.response.as_deref(), Some(NO_CREDENTIAL));
    }

    #[tokio::test]
    async fn test_provider_error_is_recorded_and_not_retried() {
        let store = Arc::new(InMemoryStore::new());
        store.add_credential(&ApiCredential::new("key-1")).await.unwrap();
        let request = pending_request(&store).await;
        let orch = orchestrator(
            store.clone(),
            MockLLMProvider::failing("quota exhausted"),
            Duration::from_secs(5),
        );

        orch.dispatch_pending().await.unwrap();
        orch.wait_idle().await;
        assert_eq!(orch.dispatch_pending().await.unwrap(), 0);

        let stored = store.get_llm_request(request.id).await.unwrap().unwrap();
        assert_eq!(stored.status, LlmStatus::Failed);
        assert_eq!(stored.response.as_deref(), Some("LLM call failed: quota exhausted"));
    }

    #[tokio::test]
    async fn test_timeout_fails_request() {
        let store = Arc::new(InMemoryStore::new());
        store.add_credential(&ApiCredential::new("key-1")).await.unwrap();
        let request = pending_request(&store).await;
        let orch = orchestrator(
            store.clone(),
            MockLLMProvider::new().with_delay(Duration::from_secs(2)),
            Duration::from_millis(20),
        );

        orch.dispatch_pending().await.unwrap();
        orch.wait_idle().await;

        let stored = store.get_llm_request(request.id).await.unwrap().unwrap();
        assert_eq!(stored.status, LlmStatus::Failed);
        assert!(stored.response.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_late_result_does_not_overwrite_override() {
        let store = Arc::new(InMemoryStore::new());
        store.add_credential(&ApiCredential::new("key-1")).await.unwrap();
        let request = pending_request(&store).await;
        let orch = orchestrator(
            store.clone(),
            MockLLMProvider::with_response("late".to_string())
                .with_delay(Duration::from_millis(50)),
            Duration::from_secs(5),
        );

        orch.dispatch_pending().await.unwrap();
        let mut overridden = store.get_llm_request(request.id).await.unwrap().unwrap();
        overridden.status = LlmStatus::Completed;
        overridden.response = Some("operator answer".to_string());
        store.update_llm_request(&overridden).await.unwrap();
        orch.wait_idle().await;

        let stored = store.get_llm_request(request.id).await.unwrap().unwrap();
        assert_eq!(stored.response.as_deref(), Some("operator answer"));
    }

    #[tokio::test]
    async fn test_calls_for_different_agents_run_in_parallel() {
        let store = Arc::new(InMemoryStore::new());
        store.add_credential(&ApiCredential::new("key-1")).await.unwrap();
        for _ in 0..3 {
            pending_request(&store).await;
        }
        let orch = orchestrator(
            store.clone(),
            MockLLMProvider::new().with_delay(Duration::from_millis(200)),
            Duration::from_secs(5),
        );

        assert_eq!(orch.dispatch_pending().await.unwrap(), 3);
        assert_eq!(orch.in_flight().await, 3);
        let started = std::time::Instant::now();
        orch.wait_idle().await;
        assert!(started.elapsed() < Duration::from_millis(550));
    }

    #[tokio::test]
    async fn test_credential_error_fails_request() {
        let inner = Arc::new(InMemoryStore::new());
        let flaky = Arc::new(FlakyStore::new(inner.clone()));
        inner.add_credential(&ApiCredential::new("key-1")).await.unwrap();
        let request = pending_request(&inner).await;
        let orch = LlmOrchestrator::new(
            flaky.clone(),
            Arc::new(StaticProviderFactory::new(Arc::new(MockLLMProvider::new()))),
            Duration::from_secs(5),
        );

        flaky.fail("acquire_credential");
        assert_eq!(orch.dispatch_pending().await.unwrap(), 0);

        let stored = inner.get_llm_request(request.id).await.unwrap().unwrap();
        assert_eq!(stored.status, LlmStatus::Failed);
        assert!(stored.response.unwrap().starts_with("LLM credential lookup failed"));
    }

    #[tokio::test]
    async fn test_shutdown_fails_calls_in_flight() {
        let store = Arc::new(InMemoryStore::new());
        store.add_credential(&ApiCredential::new("key-1")).await.unwrap();
        let request = pending_request(&store).await;
        let orch = orchestrator(
            store.clone(),
            MockLLMProvider::new().with_delay(Duration::from_secs(30)),
            Duration::from_secs(60),
        );

        orch.dispatch_pending().await.unwrap();
        assert_eq!(orch.shutdown().await.unwrap(), 1);
        assert_eq!(orch.in_flight().await, 0);

        let stored = store.get_llm_request(request.id).await.unwrap().unwrap();
        assert_eq!(stored.status, LlmStatus::Failed);
        assert_eq!(stored.response.as_deref(), Some(INTERRUPTED));
    }
}
