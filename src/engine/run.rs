//! Full workgroup run: executor followed by the integrator

use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{info, instrument};

use super::executor::{AgentExecutor, AgentSettings, ExecutionRequest};
use super::integrator::{Integrator, IntegratorSettings};
use super::stream::{ProgressSender, ProgressStream, progress_channel};
use crate::ai::provider::ProviderChain;
use crate::config::EngineConfig;
use crate::types::{
    AgentOutput, GeneratedOutput, IntegratorValidation, ProgressEvent, Result, RunRequest,
    WorkgroupResponseMap,
};

/// Response of a synchronous run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResponse {
    pub per_agent: Vec<AgentOutput>,
    pub generated: Vec<GeneratedOutput>,
    pub updated_workgroup_response: WorkgroupResponseMap,
    #[serde(rename = "final")]
    pub final_output: Value,
    pub validation: IntegratorValidation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

#[derive(Clone)]
pub struct WorkgroupRunner {
    executor: AgentExecutor,
    integrator: Integrator,
}

impl WorkgroupRunner {
    pub fn new(executor: AgentExecutor, integrator: Integrator) -> Self {
        Self {
            executor,
            integrator,
        }
    }

    pub fn from_config(chain: ProviderChain, config: &EngineConfig) -> Self {
        Self::new(
            AgentExecutor::new(chain.clone(), AgentSettings::from_config(config)),
            Integrator::new(chain, IntegratorSettings::from_config(config)),
        )
    }

    pub fn executor(&self) -> &AgentExecutor {
        &self.executor
    }

    /// Run every agent, then integrate; returns once everything is done
    pub async fn run(&self, request: &RunRequest) -> Result<RunResponse> {
        self.execute(request, None).await
    }

    /// Like [`run`](Self::run), pushing progress events to `progress`
    ///
    /// Emits `integrator_start`, `integrator_result` and `done` after the
    /// agent events. An agent failure ends the sequence at `agent_error`.
    pub async fn run_with_progress(
        &self,
        request: &RunRequest,
        progress: &ProgressSender,
    ) -> Result<RunResponse> {
        self.execute(request, Some(progress)).await
    }

    /// Start a run on its own task and hand back its event stream
    ///
    /// The stream ends when the task finishes; the handle yields the final
    /// response (or the error that stopped the run).
    pub fn spawn_stream(
        &self,
        request: RunRequest,
    ) -> (ProgressStream, JoinHandle<Result<RunResponse>>) {
        let (sender, stream) = progress_channel();
        let runner = self.clone();
        let handle = tokio::spawn(async move { runner.run_with_progress(&request, &sender).await });
        (stream, handle)
    }

    #[instrument(skip_all, fields(agents = request.workgroup.len()))]
    async fn execute(
        &self,
        request: &RunRequest,
        progress: Option<&ProgressSender>,
    ) -> Result<RunResponse> {
        request.validate()?;
        let emit = |event: ProgressEvent| {
            if let Some(sender) = progress {
                sender.send(event);
            }
        };

        let execution = ExecutionRequest::from(request);
        let result = match progress {
            Some(sender) => self.executor.run_with_progress(&execution, sender).await?,
            None => self.executor.run(&execution).await?,
        };

        emit(ProgressEvent::IntegratorStart);
        let outcome = self
            .integrator
            .integrate(&request.response_format, &result.per_agent)
            .await;
        emit(ProgressEvent::IntegratorResult {
            final_output: outcome.final_output.clone(),
            validation: outcome.validation.clone(),
            raw: outcome.raw.clone(),
        });
        emit(ProgressEvent::Done);

        info!(
            generated = result.generated.len(),
            integrated = outcome.validation.success,
            "Workgroup run finished"
        );

        Ok(RunResponse {
            per_agent: result.per_agent,
            generated: result.generated,
            updated_workgroup_response: result.updated_workgroup_response,
            final_output: outcome.final_output,
            validation: outcome.validation,
            raw: outcome.raw,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::provider::scripted::{ScriptedProvider, single_chain};
    use crate::types::{Agent, ErrorKind, OutputSource, ResponseFormat, Workgroup};
    use futures::StreamExt;
    use serde_json::json;
    use std::sync::Arc;

    fn runner(provider: &Arc<ScriptedProvider>) -> WorkgroupRunner {
        let config = EngineConfig {
            retry_delay_ms: 1,
            ..EngineConfig::default()
        };
        WorkgroupRunner::from_config(single_chain(provider.clone()), &config)
    }

    fn request() -> RunRequest {
        RunRequest::new(
            "owls",
            Workgroup::new(vec![
                Agent::new("Researcher", "Find facts."),
                Agent::new("Writer", "Write."),
            ]),
        )
        .with_response_format(ResponseFormat::new().with_field("summary", "One line"))
    }

    #[tokio::test]
    async fn test_full_run() {
        let provider = Arc::new(
            ScriptedProvider::new("p")
                .then_ok("facts")
                .then_ok("draft")
                .then_ok(r#"{"summary": "Owls are birds."}"#),
        );

        let response = runner(&provider).run(&request()).await.unwrap();
        assert_eq!(response.per_agent.len(), 2);
        assert_eq!(response.generated.len(), 2);
        assert_eq!(response.final_output, json!({"summary": "Owls are birds."}));
        assert!(response.validation.success);

        let wire = serde_json::to_value(&response).unwrap();
        assert!(wire.get("perAgent").is_some());
        assert!(wire.get("updatedWorkgroupResponse").is_some());
        assert_eq!(wire["final"]["summary"], "Owls are birds.");
    }

    #[tokio::test(start_paused = true)]
    async fn test_integrator_failure_still_returns_agents() {
        let provider = Arc::new(
            ScriptedProvider::new("p")
                .then_ok("facts")
                .then_ok("draft")
                .always("no json here"),
        );

        let response = runner(&provider).run(&request()).await.unwrap();
        assert_eq!(response.generated.len(), 2);
        assert!(!response.validation.success);
        assert!(response.final_output.get("error").is_some());
        assert_eq!(response.validation.attempts, 3);
    }

    #[tokio::test]
    async fn test_invalid_request_rejected_before_calls() {
        let provider = Arc::new(ScriptedProvider::new("p").always("x"));
        let request = RunRequest::new("q", Workgroup::default());

        let err = runner(&provider).run(&request).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_stream_event_order() {
        let provider = Arc::new(
            ScriptedProvider::new("p")
                .then_ok("draft")
                .then_ok(r#"{"summary": "s"}"#),
        );
        let prefilled: WorkgroupResponseMap = [("researcher", "facts")].into_iter().collect();

        let (stream, handle) = runner(&provider).spawn_stream(request().with_prefilled(prefilled));
        let events: Vec<ProgressEvent> = stream.collect().await;
        let response = handle.await.unwrap().unwrap();

        let types: Vec<_> = events.iter().map(|e| e.type_name()).collect();
        assert_eq!(
            types,
            vec![
                "agent_start",
                "agent_result",
                "agent_start",
                "agent_attempt",
                "agent_result",
                "integrator_start",
                "integrator_result",
                "done",
            ]
        );
        assert_eq!(response.per_agent[0].source, OutputSource::Prefilled);
    }
}
