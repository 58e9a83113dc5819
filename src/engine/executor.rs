//! Agent Executor
//!
//! Runs a workgroup's agents strictly in order. Each agent sees the user's
//! input and every earlier output; agents already present in the response map
//! are taken as-is without a model call.
//!
//! The synchronous form ([`AgentExecutor::run`]) and the streaming form
//! ([`AgentExecutor::run_with_progress`]) share one loop and differ only in
//! whether progress events have anywhere to go.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use backon::Retryable;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use super::stream::ProgressSender;
use crate::ai::prompt::build_agent_prompt;
use crate::ai::provider::{GenerationRequest, ProviderChain};
use crate::ai::validation::RetryPolicy;
use crate::config::EngineConfig;
use crate::types::{
    Agent, AgentOutput, ChaplinError, GeneratedOutput, OutputSource, ProgressEvent, Result,
    RunRequest, SessionSize, Workgroup, WorkgroupResponseMap,
};

const ALL_FILLED: &str = "All agents already filled";

// =============================================================================
// Settings
// =============================================================================

/// Generation parameters for agent steps
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub max_tokens: u32,
    pub temperature: f32,
    pub session: SessionSize,
    pub retry: RetryPolicy,
}

impl AgentSettings {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_tokens: config.agent_max_tokens,
            temperature: config.agent_temperature,
            session: config.agent_session,
            retry: RetryPolicy::new(config.agent_max_attempts)
                .with_delay(Duration::from_millis(config.retry_delay_ms)),
        }
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

// =============================================================================
// Request / Result
// =============================================================================

/// One pass over a workgroup
#[derive(Debug, Clone, Default)]
pub struct ExecutionRequest {
    pub input: String,
    pub workgroup: Workgroup,
    pub prefilled: WorkgroupResponseMap,
    /// Stop after this agent (case-insensitive); `None` runs every agent
    pub stop_at: Option<String>,
}

impl ExecutionRequest {
    pub fn new(input: impl Into<String>, workgroup: Workgroup) -> Self {
        Self {
            input: input.into(),
            workgroup,
            ..Default::default()
        }
    }

    pub fn with_prefilled(mut self, prefilled: WorkgroupResponseMap) -> Self {
        self.prefilled = prefilled;
        self
    }

    pub fn with_stop_at(mut self, name: impl Into<String>) -> Self {
        self.stop_at = Some(name.into());
        self
    }

    fn is_stop(&self, agent: &Agent) -> bool {
        self.stop_at.as_deref().is_some_and(|name| agent.matches(name))
    }
}

impl From<&RunRequest> for ExecutionRequest {
    fn from(request: &RunRequest) -> Self {
        Self::new(request.input.clone(), request.workgroup.clone())
            .with_prefilled(request.workgroup_response.clone())
    }
}

/// Outputs of one executor pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    /// Prefilled map merged with everything generated in this pass
    pub updated_workgroup_response: WorkgroupResponseMap,
    /// Only the outputs produced by model calls, in order
    pub generated: Vec<GeneratedOutput>,
    /// Every agent reached, prefilled or generated, in order
    pub per_agent: Vec<AgentOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

// =============================================================================
// Executor
// =============================================================================

/// Sequential agent runner over a provider chain
#[derive(Clone)]
pub struct AgentExecutor {
    chain: ProviderChain,
    settings: AgentSettings,
}

impl AgentExecutor {
    pub fn new(chain: ProviderChain, settings: AgentSettings) -> Self {
        Self { chain, settings }
    }

    pub fn chain(&self) -> &ProviderChain {
        &self.chain
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    /// Run to completion (or `stop_at`) and return the outputs
    pub async fn run(&self, request: &ExecutionRequest) -> Result<ExecutionResult> {
        self.execute(request, None).await
    }

    /// Same as [`run`](Self::run), pushing progress events as they happen
    pub async fn run_with_progress(
        &self,
        request: &ExecutionRequest,
        progress: &ProgressSender,
    ) -> Result<ExecutionResult> {
        self.execute(request, Some(progress)).await
    }

    /// Run up to and including one agent
    ///
    /// An explicit `target` must name a workgroup agent. Without one, the
    /// first agent lacking an output is the target; when every agent already
    /// has one, nothing runs and the map comes back unchanged.
    pub async fn run_single_agent(
        &self,
        request: &ExecutionRequest,
        target: Option<&str>,
    ) -> Result<ExecutionResult> {
        let stop_at = match target {
            Some(name) => match request.workgroup.find(name) {
                Some(agent) => agent.name.clone(),
                None => {
                    return Err(ChaplinError::validation(format!(
                        "Agent '{}' not found in workgroup",
                        name.trim()
                    )));
                }
            },
            None => match request
                .workgroup
                .iter()
                .find(|agent| !request.prefilled.has_value(&agent.name))
            {
                Some(agent) => agent.name.clone(),
                None => {
                    debug!("Every agent already has an output");
                    return Ok(Self::all_filled(request));
                }
            },
        };

        let bounded = ExecutionRequest {
            stop_at: Some(stop_at),
            ..request.clone()
        };
        self.run(&bounded).await
    }

    fn all_filled(request: &ExecutionRequest) -> ExecutionResult {
        let per_agent = request
            .workgroup
            .iter()
            .map(|agent| AgentOutput {
                name: agent.name.clone(),
                output: request.prefilled.get(&agent.name).unwrap_or_default().to_string(),
                source: OutputSource::Prefilled,
            })
            .collect();

        ExecutionResult {
            updated_workgroup_response: request.prefilled.clone(),
            generated: Vec::new(),
            per_agent,
            message: Some(ALL_FILLED.to_string()),
        }
    }

    #[instrument(skip_all, fields(agents = request.workgroup.len(), stop_at = ?request.stop_at))]
    async fn execute(
        &self,
        request: &ExecutionRequest,
        progress: Option<&ProgressSender>,
    ) -> Result<ExecutionResult> {
        let emit = |event: ProgressEvent| {
            if let Some(sender) = progress {
                sender.send(event);
            }
        };

        let mut responses = request.prefilled.clone();
        let mut generated = Vec::new();
        let mut per_agent: Vec<AgentOutput> = Vec::with_capacity(request.workgroup.len());

        for agent in request.workgroup.iter() {
            emit(ProgressEvent::AgentStart {
                name: agent.name.clone(),
            });

            if let Some(existing) = responses.filled(&agent.name) {
                let output = existing.to_string();
                debug!(agent = %agent.name, "Using prefilled output");
                emit(ProgressEvent::AgentResult {
                    name: agent.name.clone(),
                    output: output.clone(),
                });
                per_agent.push(AgentOutput {
                    name: agent.name.clone(),
                    output,
                    source: OutputSource::Prefilled,
                });
            } else {
                let previous: Vec<&str> = per_agent.iter().map(|o| o.output.as_str()).collect();
                let prompt = build_agent_prompt(agent, &request.input, &previous);

                let output = match self.generate(agent, prompt, progress).await {
                    Ok(output) => output,
                    Err(err) => {
                        emit(ProgressEvent::AgentError {
                            name: agent.name.clone(),
                            error: err.to_string(),
                        });
                        return Err(err);
                    }
                };

                info!(agent = %agent.name, chars = output.len(), "Agent completed");
                responses.insert(agent.name.clone(), output.clone());
                emit(ProgressEvent::AgentResult {
                    name: agent.name.clone(),
                    output: output.clone(),
                });
                generated.push(GeneratedOutput {
                    name: agent.name.clone(),
                    output: output.clone(),
                });
                per_agent.push(AgentOutput {
                    name: agent.name.clone(),
                    output,
                    source: OutputSource::Generated,
                });
            }

            if request.is_stop(agent) {
                debug!(agent = %agent.name, "Reached stop agent");
                break;
            }
        }

        Ok(ExecutionResult {
            updated_workgroup_response: responses,
            generated,
            per_agent,
            message: None,
        })
    }

    /// One agent's model call with its own attempt ceiling
    async fn generate(
        &self,
        agent: &Agent,
        prompt: String,
        progress: Option<&ProgressSender>,
    ) -> Result<String> {
        let policy = self.settings.retry;
        let agent_name = agent.name.clone();
        let observer = Arc::new(move |attempt: u32, max: u32| {
            debug!(agent = %agent_name, attempt, max, "Waiting for slow provider");
        });
        let request = GenerationRequest::new(prompt)
            .with_max_tokens(self.settings.max_tokens)
            .with_temperature(self.settings.temperature)
            .with_session(self.settings.session)
            .with_poll_observer(observer);

        let attempts = AtomicU32::new(0);
        let (attempts_ref, request_ref) = (&attempts, &request);

        let outcome = (|| async move {
            let attempt = attempts_ref.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(sender) = progress {
                sender.send(ProgressEvent::AgentAttempt {
                    name: agent.name.clone(),
                    attempt,
                    max_attempts: policy.max_attempts,
                });
            }
            self.chain.generate_text(request_ref).await
        })
        .retry(policy.backoff())
        .notify(|err: &ChaplinError, delay: Duration| {
            warn!(agent = %agent.name, error = %err, delay_ms = delay.as_millis() as u64, "Agent attempt failed, retrying");
        })
        .await;

        outcome.map_err(|err| ChaplinError::AgentFailed {
            agent: agent.name.clone(),
            attempts: attempts.load(Ordering::SeqCst),
            message: err.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::provider::scripted::{ScriptedProvider, single_chain};
    use crate::engine::stream::progress_channel;
    use crate::types::ErrorKind;

    fn workgroup() -> Workgroup {
        Workgroup::new(vec![
            Agent::new("Researcher", "Find facts."),
            Agent::new("Writer", "Write a draft."),
            Agent::new("Editor", "Polish the draft."),
        ])
    }

    fn executor(provider: &Arc<ScriptedProvider>) -> AgentExecutor {
        let settings = AgentSettings {
            retry: RetryPolicy::new(3).with_delay(Duration::from_millis(10)),
            ..AgentSettings::default()
        };
        AgentExecutor::new(single_chain(provider.clone()), settings)
    }

    #[tokio::test(start_paused = true)]
    async fn test_prefilled_first_agent_then_generated() {
        let provider = Arc::new(
            ScriptedProvider::new("p")
                .then_ok("draft")
                .then_ok("polished"),
        );
        let prefilled: WorkgroupResponseMap = [("researcher", "facts")].into_iter().collect();
        let request = ExecutionRequest::new("owls", workgroup()).with_prefilled(prefilled);

        let result = executor(&provider).run(&request).await.unwrap();

        let sources: Vec<_> = result.per_agent.iter().map(|o| o.source).collect();
        assert_eq!(
            sources,
            vec![
                OutputSource::Prefilled,
                OutputSource::Generated,
                OutputSource::Generated
            ]
        );
        assert_eq!(result.generated.len(), 2);
        assert_eq!(provider.calls(), 2);

        // existing key keeps its casing, new keys use the agent's name
        let keys: Vec<_> = result.updated_workgroup_response.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["researcher", "Writer", "Editor"]);

        // the writer saw the prefilled output, the editor saw both
        let prompts = provider.prompts();
        assert!(prompts[0].contains("Result from Step 0:\nfacts"));
        assert!(prompts[1].contains("Result from Step 1:\ndraft"));
    }

    #[tokio::test]
    async fn test_all_prefilled_makes_no_calls() {
        let provider = Arc::new(ScriptedProvider::new("p").always("unused"));
        let prefilled: WorkgroupResponseMap =
            [("RESEARCHER", "a"), ("writer", "b"), ("Editor", "c")]
                .into_iter()
                .collect();
        let request = ExecutionRequest::new("q", workgroup()).with_prefilled(prefilled.clone());

        let result = executor(&provider).run(&request).await.unwrap();
        assert_eq!(provider.calls(), 0);
        assert!(result.generated.is_empty());
        assert_eq!(result.updated_workgroup_response, prefilled);
    }

    #[tokio::test]
    async fn test_blank_prefill_counts_as_missing() {
        let provider = Arc::new(ScriptedProvider::new("p").always("x"));
        let prefilled: WorkgroupResponseMap = [("Researcher", "   ")].into_iter().collect();
        let request = ExecutionRequest::new("q", workgroup())
            .with_prefilled(prefilled)
            .with_stop_at("researcher");

        let result = executor(&provider).run(&request).await.unwrap();
        assert_eq!(provider.calls(), 1);
        assert_eq!(result.per_agent[0].source, OutputSource::Generated);
        assert_eq!(result.updated_workgroup_response.get("Researcher"), Some("x"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_agent_failure_aborts_run() {
        let provider = Arc::new(
            ScriptedProvider::new("p")
                .then_ok("facts")
                .then_err("down")
                .then_err("down")
                .then_err("still down"),
        );
        let (sender, stream) = progress_channel();
        let request = ExecutionRequest::new("q", workgroup());

        let err = executor(&provider)
            .run_with_progress(&request, &sender)
            .await
            .unwrap_err();
        drop(sender);

        match &err {
            ChaplinError::AgentFailed {
                agent,
                attempts,
                message,
            } => {
                assert_eq!(agent, "Writer");
                assert_eq!(*attempts, 3);
                assert!(message.contains("still down"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.kind(), ErrorKind::Provider);
        // the editor never ran
        assert_eq!(provider.calls(), 4);

        use futures::StreamExt;
        let events: Vec<ProgressEvent> = stream.collect().await;
        let types: Vec<_> = events.iter().map(|e| e.type_name()).collect();
        assert_eq!(
            types,
            vec![
                "agent_start",
                "agent_attempt",
                "agent_result",
                "agent_start",
                "agent_attempt",
                "agent_attempt",
                "agent_attempt",
                "agent_error",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_reports_attempts() {
        let provider = Arc::new(ScriptedProvider::new("p").then_err("flaky").always("ok"));
        let (sender, mut stream) = progress_channel();
        let request =
            ExecutionRequest::new("q", Workgroup::new(vec![Agent::new("Solo", "Do it.")]));

        executor(&provider)
            .run_with_progress(&request, &sender)
            .await
            .unwrap();
        drop(sender);

        let mut attempts = Vec::new();
        while let Some(event) = stream.recv().await {
            if let ProgressEvent::AgentAttempt {
                attempt,
                max_attempts,
                ..
            } = event
            {
                attempts.push((attempt, max_attempts));
            }
        }
        assert_eq!(attempts, vec![(1, 3), (2, 3)]);
    }

    #[tokio::test]
    async fn test_stop_at_is_case_insensitive() {
        let provider = Arc::new(ScriptedProvider::new("p").always("out"));
        let request = ExecutionRequest::new("q", workgroup()).with_stop_at("WRITER");

        let result = executor(&provider).run(&request).await.unwrap();
        assert_eq!(result.per_agent.len(), 2);
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_prefilled_stop_agent_ends_run_without_calls() {
        let provider = Arc::new(ScriptedProvider::new("p").always("unused"));
        let prefilled: WorkgroupResponseMap =
            [("Researcher", "facts"), ("Writer", "draft")].into_iter().collect();
        let request = ExecutionRequest::new("q", workgroup())
            .with_prefilled(prefilled.clone())
            .with_stop_at("writer");

        let result = executor(&provider).run(&request).await.unwrap();
        assert_eq!(provider.calls(), 0);
        assert_eq!(result.per_agent.len(), 2);
        assert!(result.generated.is_empty());
        assert!(result.per_agent.iter().all(|o| o.source == OutputSource::Prefilled));
        // the editor was never reached
        assert_eq!(result.updated_workgroup_response, prefilled);
    }

    #[tokio::test]
    async fn test_single_agent_explicit_target_fills_gaps_before_it() {
        let provider = Arc::new(
            ScriptedProvider::new("p")
                .then_ok("facts")
                .then_ok("draft"),
        );
        let request = ExecutionRequest::new("q", workgroup());

        let result = executor(&provider)
            .run_single_agent(&request, Some("writer"))
            .await
            .unwrap();
        assert_eq!(provider.calls(), 2);
        assert_eq!(result.per_agent.len(), 2);
        let names: Vec<_> = result.generated.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["Researcher", "Writer"]);
        assert_eq!(result.updated_workgroup_response.get("Writer"), Some("draft"));
        assert!(result.updated_workgroup_response.get("Editor").is_none());
    }

    #[tokio::test]
    async fn test_single_agent_targets_first_missing() {
        let provider = Arc::new(ScriptedProvider::new("p").always("draft"));
        let prefilled: WorkgroupResponseMap = [("Researcher", "facts")].into_iter().collect();
        let request = ExecutionRequest::new("q", workgroup()).with_prefilled(prefilled);

        let result = executor(&provider)
            .run_single_agent(&request, None)
            .await
            .unwrap();
        assert_eq!(provider.calls(), 1);
        assert_eq!(result.generated.len(), 1);
        assert_eq!(result.generated[0].name, "Writer");
        assert_eq!(result.per_agent.len(), 2);
    }

    #[tokio::test]
    async fn test_single_agent_unknown_target() {
        let provider = Arc::new(ScriptedProvider::new("p").always("x"));
        let request = ExecutionRequest::new("q", workgroup());

        let err = executor(&provider)
            .run_single_agent(&request, Some("Critic"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_single_agent_nothing_to_do() {
        let provider = Arc::new(ScriptedProvider::new("p").always("x"));
        let prefilled: WorkgroupResponseMap = [("Researcher", "a"), ("Writer", "b"), ("Editor", "c")]
            .into_iter()
            .collect();
        let request = ExecutionRequest::new("q", workgroup()).with_prefilled(prefilled.clone());

        let result = executor(&provider)
            .run_single_agent(&request, None)
            .await
            .unwrap();
        assert_eq!(provider.calls(), 0);
        assert_eq!(result.message.as_deref(), Some(ALL_FILLED));
        assert_eq!(result.updated_workgroup_response, prefilled);
        assert_eq!(result.per_agent.len(), 3);
    }
}
