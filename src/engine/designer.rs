//! Workgroup Designer
//!
//! Drafts agent teams for a persona and rewrites individual role prompts.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::ai::prompt::{
    DesignMode, build_create_workgroup_prompt, build_enhance_prompt, build_summary_prompt,
    manual_summary,
};
use crate::ai::provider::{GenerationRequest, ProviderChain};
use crate::ai::validation::{JsonShape, RetryPolicy, generate_text_and_parse_json};
use crate::config::EngineConfig;
use crate::constants::{design, limits};
use crate::types::{Agent, ChaplinError, Persona, Result, SessionSize, Workgroup};

/// What to generate and with which existing team
#[derive(Debug, Clone)]
pub struct DesignOptions {
    pub mode: DesignMode,
    pub max_members: usize,
    pub previous: Vec<Agent>,
}

impl Default for DesignOptions {
    fn default() -> Self {
        Self {
            mode: DesignMode::Full,
            max_members: limits::MAX_WORKGROUP_MEMBERS,
            previous: Vec::new(),
        }
    }
}

/// Agents produced by a design call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DesignOutcome {
    pub workgroup: Workgroup,
    pub raw: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Clone)]
pub struct WorkgroupDesigner {
    chain: ProviderChain,
    retry: RetryPolicy,
    session: SessionSize,
}

impl WorkgroupDesigner {
    pub fn new(chain: ProviderChain, retry: RetryPolicy) -> Self {
        Self {
            chain,
            retry,
            session: SessionSize::Small,
        }
    }

    pub fn from_config(chain: ProviderChain, config: &EngineConfig) -> Self {
        Self::new(
            chain,
            RetryPolicy::new(config.json_max_attempts)
                .with_delay(Duration::from_millis(config.retry_delay_ms)),
        )
    }

    /// Generate agents for `persona`
    ///
    /// Any agent whose name mentions the integrator is dropped, and the team is
    /// capped at `max_members` (clamped to 1..=5).
    #[instrument(skip_all, fields(persona = %persona.name, mode = ?options.mode))]
    pub async fn generate(&self, persona: &Persona, options: &DesignOptions) -> Result<DesignOutcome> {
        persona.validate()?;
        if let DesignMode::ByName(name) = &options.mode
            && name.trim().is_empty()
        {
            return Err(ChaplinError::validation("agent name to generate must not be empty"));
        }

        let max_members = options.max_members.clamp(1, limits::MAX_WORKGROUP_MEMBERS);
        let previous = normalize_previous(&options.previous);
        let prompt = build_create_workgroup_prompt(persona, &previous, &options.mode, max_members);
        let request = GenerationRequest::new(prompt)
            .with_max_tokens(design::CREATE_MAX_TOKENS)
            .with_temperature(design::CREATE_TEMPERATURE)
            .with_session(self.session);

        let output =
            generate_text_and_parse_json(&self.chain, &request, JsonShape::Array, self.retry).await?;

        let mut agents = normalize_agents(&output.value);
        agents.truncate(max_members);
        if agents.is_empty() {
            return Err(ChaplinError::parse("design output contained no usable agents", &output.raw));
        }

        let (agents, warning) = select_single(agents, &options.mode);
        if let Some(warning) = &warning {
            warn!("{}", warning);
        }
        info!(agents = agents.len(), attempts = output.attempts, "Workgroup designed");

        Ok(DesignOutcome {
            workgroup: Workgroup::new(agents),
            raw: output.raw,
            warning,
        })
    }

    /// Rewrite one agent's role prompt in the context of its team
    ///
    /// The prompt to improve comes from `previous` when the agent is listed
    /// there, otherwise from `existing_prompt`.
    #[instrument(skip_all, fields(persona = %persona.name, agent = %agent_name))]
    pub async fn enhance(
        &self,
        persona: &Persona,
        agent_name: &str,
        existing_prompt: Option<&str>,
        previous: &[Agent],
    ) -> Result<DesignOutcome> {
        persona.validate()?;
        let previous = normalize_previous(previous);
        let existing = previous
            .iter()
            .find(|a| a.matches(agent_name))
            .map(|a| a.prompt.clone())
            .or_else(|| existing_prompt.map(|p| p.trim().to_string()))
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                ChaplinError::validation(format!("no existing prompt found for '{}'", agent_name))
            })?;

        let summary = self.summarize(persona, &previous).await;
        let request = GenerationRequest::new(build_enhance_prompt(
            persona,
            agent_name,
            &existing,
            &summary,
        ))
        .with_max_tokens(design::ENHANCE_MAX_TOKENS)
        .with_temperature(design::ENHANCE_TEMPERATURE)
        .with_session(self.session);

        let raw = self.chain.generate_text(&request).await?;
        let prompt = truncate_chars(raw.trim(), limits::AGENT_PROMPT_MAX);

        Ok(DesignOutcome {
            workgroup: Workgroup::new(vec![Agent::new(agent_name.trim(), prompt)]),
            raw,
            warning: None,
        })
    }

    /// One line per previous agent; falls back to a manual listing
    async fn summarize(&self, persona: &Persona, previous: &[Agent]) -> String {
        if previous.is_empty() {
            return manual_summary(previous);
        }

        let request = GenerationRequest::new(build_summary_prompt(persona, previous))
            .with_max_tokens(design::SUMMARY_MAX_TOKENS)
            .with_temperature(design::SUMMARY_TEMPERATURE)
            .with_session(self.session);

        match self.chain.generate_text(&request).await {
            Ok(text) if !text.trim().is_empty() => {
                truncate_chars(text.trim(), design::SUMMARY_MAX_CHARS)
            }
            Ok(_) => manual_summary(previous),
            Err(e) => {
                debug!(error = %e, "Team summary unavailable, using manual listing");
                manual_summary(previous)
            }
        }
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

fn normalize_previous(previous: &[Agent]) -> Vec<Agent> {
    previous
        .iter()
        .enumerate()
        .map(|(i, a)| {
            let name = match a.name.trim() {
                "" => format!("Agent{}", i),
                name => truncate_chars(name, limits::AGENT_NAME_MAX),
            };
            Agent::new(name, truncate_chars(a.prompt.trim(), limits::AGENT_PROMPT_MAX))
        })
        .collect()
}

/// `{name, prompt}` objects from a design response, integrators removed
fn normalize_agents(value: &Value) -> Vec<Agent> {
    let Some(items) = value.as_array() else {
        return Vec::new();
    };

    items
        .iter()
        .filter(|item| item.is_object())
        .enumerate()
        .map(|(i, item)| {
            let name = item
                .get("name")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(|n| truncate_chars(n, limits::AGENT_NAME_MAX))
                .unwrap_or_else(|| format!("Agent{}", i));
            let prompt = item
                .get("prompt")
                .and_then(Value::as_str)
                .map(|p| truncate_chars(p.trim(), limits::AGENT_PROMPT_MAX))
                .unwrap_or_default();
            Agent::new(name, prompt)
        })
        .filter(|agent| !agent.name.to_lowercase().contains("integrator"))
        .collect()
}

/// Narrow to the one requested agent when the model returned several
fn select_single(agents: Vec<Agent>, mode: &DesignMode) -> (Vec<Agent>, Option<String>) {
    if agents.len() <= 1 {
        return (agents, None);
    }

    match mode {
        DesignMode::Full => (agents, None),
        DesignMode::ByName(name) => match agents.iter().position(|a| a.matches(name)) {
            Some(i) => (vec![agents[i].clone()], None),
            None => (
                agents.into_iter().take(1).collect(),
                Some("Requested single agent not found exactly; returning first generated.".into()),
            ),
        },
        DesignMode::ByIndex(index) => match agents.get(*index) {
            Some(agent) => (vec![agent.clone()], None),
            None => (
                agents.into_iter().take(1).collect(),
                Some("Requested index out of range; returning first generated agent.".into()),
            ),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::provider::scripted::{ScriptedProvider, single_chain};
    use crate::types::ErrorKind;
    use serde_json::json;
    use std::sync::Arc;

    fn persona() -> Persona {
        Persona::new("Captain Nemo", "fiction", "Reclusive submarine captain")
    }

    fn designer(provider: &Arc<ScriptedProvider>) -> WorkgroupDesigner {
        WorkgroupDesigner::new(
            single_chain(provider.clone()),
            RetryPolicy::new(2).with_delay(Duration::from_millis(1)),
        )
    }

    #[tokio::test]
    async fn test_generate_drops_integrator_and_caps() {
        let provider = Arc::new(ScriptedProvider::new("p").always(
            r#"```json
[{"name": "Navigator", "prompt": "System: plot"},
 {"name": "Final Integrator", "prompt": "merge"},
 {"name": "Engineer", "prompt": "System: fix"},
 {"name": "Cook", "prompt": "System: cook"}]
```"#,
        ));
        let options = DesignOptions {
            max_members: 2,
            ..DesignOptions::default()
        };

        let outcome = designer(&provider).generate(&persona(), &options).await.unwrap();
        let names: Vec<_> = outcome.workgroup.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["Navigator", "Engineer"]);
        assert!(outcome.warning.is_none());
    }

    #[test]
    fn test_normalize_agents_fills_missing_names() {
        let agents = normalize_agents(&json!([{"prompt": " p "}, 3, {"name": "B"}]));
        assert_eq!(agents, vec![Agent::new("Agent0", "p"), Agent::new("B", "")]);
    }

    #[test]
    fn test_select_single_by_name_and_index() {
        let agents = vec![Agent::new("A", "a"), Agent::new("B", "b")];

        let (picked, warning) = select_single(agents.clone(), &DesignMode::ByName("b".into()));
        assert_eq!(picked, vec![Agent::new("B", "b")]);
        assert!(warning.is_none());

        let (picked, warning) = select_single(agents.clone(), &DesignMode::ByIndex(7));
        assert_eq!(picked, vec![Agent::new("A", "a")]);
        assert!(warning.is_some());

        let (picked, _) = select_single(agents, &DesignMode::ByIndex(1));
        assert_eq!(picked[0].name, "B");
    }

    #[tokio::test]
    async fn test_generate_rejects_incomplete_persona() {
        let provider = Arc::new(ScriptedProvider::new("p").always("[]"));
        let err = designer(&provider)
            .generate(&Persona::new("Nemo", "", ""), &DesignOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_enhance_falls_back_to_manual_summary() {
        let provider = Arc::new(
            ScriptedProvider::new("p")
                .then_err("summary backend down")
                .then_ok("  System: You run second. Critique the plan.  "),
        );
        let previous = vec![Agent::new("Planner", "Plan."), Agent::new("Critic", "Critique.")];

        let outcome = designer(&provider)
            .enhance(&persona(), "critic", None, &previous)
            .await
            .unwrap();
        assert_eq!(
            outcome.workgroup.agents()[0],
            Agent::new("critic", "System: You run second. Critique the plan.")
        );

        let prompts = provider.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("- Planner: Plan.\n- Critic: Critique."));
        assert!(prompts[1].contains("\"\"\"Critique.\"\"\""));
    }

    #[tokio::test]
    async fn test_enhance_requires_existing_prompt() {
        let provider = Arc::new(ScriptedProvider::new("p").always("x"));
        let err = designer(&provider)
            .enhance(&persona(), "Ghost", None, &[])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
