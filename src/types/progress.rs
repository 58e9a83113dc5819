//! Progress events emitted while a workgroup runs

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Integrator validation summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegratorValidation {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Generate+parse cycles actually used
    pub attempts: u32,
}

impl IntegratorValidation {
    pub fn succeeded(attempts: u32) -> Self {
        Self {
            success: true,
            error: None,
            attempts,
        }
    }

    pub fn failed(error: impl Into<String>, attempts: u32) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            attempts,
        }
    }
}

/// One step of a run, in execution order
///
/// Wire form is `{"type": "...", "data": {...}}`; unit variants omit `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ProgressEvent {
    AgentStart {
        name: String,
    },
    AgentAttempt {
        name: String,
        attempt: u32,
        #[serde(rename = "maxAttempts")]
        max_attempts: u32,
    },
    AgentResult {
        name: String,
        output: String,
    },
    AgentError {
        name: String,
        error: String,
    },
    IntegratorStart,
    IntegratorResult {
        #[serde(rename = "final")]
        final_output: Value,
        validation: IntegratorValidation,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        raw: Option<String>,
    },
    Done,
}

impl ProgressEvent {
    /// Wire tag of this event
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::AgentStart { .. } => "agent_start",
            Self::AgentAttempt { .. } => "agent_attempt",
            Self::AgentResult { .. } => "agent_result",
            Self::AgentError { .. } => "agent_error",
            Self::IntegratorStart => "integrator_start",
            Self::IntegratorResult { .. } => "integrator_result",
            Self::Done => "done",
        }
    }

    /// Agent the event belongs to, if any
    pub fn agent_name(&self) -> Option<&str> {
        match self {
            Self::AgentStart { name }
            | Self::AgentAttempt { name, .. }
            | Self::AgentResult { name, .. }
            | Self::AgentError { name, .. } => Some(name),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape_with_data() {
        let event = ProgressEvent::AgentAttempt {
            name: "Writer".into(),
            attempt: 2,
            max_attempts: 3,
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "agent_attempt", "data": {"name": "Writer", "attempt": 2, "maxAttempts": 3}})
        );
    }

    #[test]
    fn test_unit_variants_omit_data() {
        assert_eq!(
            serde_json::to_value(ProgressEvent::Done).unwrap(),
            json!({"type": "done"})
        );
        assert_eq!(
            serde_json::to_value(ProgressEvent::IntegratorStart).unwrap(),
            json!({"type": "integrator_start"})
        );
    }

    #[test]
    fn test_integrator_result_uses_final_key() {
        let event = ProgressEvent::IntegratorResult {
            final_output: json!({"title": "x"}),
            validation: IntegratorValidation::succeeded(1),
            raw: None,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["data"]["final"]["title"], "x");
        assert_eq!(value["data"]["validation"]["success"], true);
        assert!(value["data"].get("raw").is_none());

        let back: ProgressEvent = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_agent_name_and_type() {
        let event = ProgressEvent::AgentError {
            name: "Critic".into(),
            error: "boom".into(),
        };
        assert_eq!(event.agent_name(), Some("Critic"));
        assert_eq!(event.type_name(), "agent_error");
        assert_eq!(ProgressEvent::Done.agent_name(), None);
    }
}
