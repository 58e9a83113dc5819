//! Design Command
//!
//! Generate or improve workgroup agents for a persona.
//!
//! Usage:
//!   chaplin design --persona <file> [--agent-name NAME | --agent-index N] [--max-members N]
//!   chaplin design --persona <file> --enhance --agent-name NAME [--existing-prompt TEXT]

use std::path::Path;

use serde::Deserialize;

use crate::ai::DesignMode;
use crate::cli::util::{CommandContext, print_json, read_json};
use crate::constants::limits;
use crate::engine::DesignOptions;
use crate::types::{Agent, ChaplinError, Persona, Result};

/// Persona file: the persona fields plus the team designed so far
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DesignRequest {
    #[serde(flatten)]
    persona: Persona,
    #[serde(default)]
    previous_workgroup: Vec<Agent>,
}

#[derive(Debug, Default)]
pub struct DesignArgs {
    pub agent_name: Option<String>,
    pub agent_index: Option<usize>,
    pub max_members: Option<usize>,
    pub enhance: bool,
    pub existing_prompt: Option<String>,
}

impl DesignArgs {
    fn mode(&self) -> DesignMode {
        match (&self.agent_name, self.agent_index) {
            (Some(name), _) => DesignMode::ByName(name.clone()),
            (None, Some(index)) => DesignMode::ByIndex(index),
            (None, None) => DesignMode::Full,
        }
    }
}

pub async fn run(ctx: &CommandContext, persona_path: &Path, args: DesignArgs) -> Result<()> {
    let request: DesignRequest = read_json(persona_path)?;
    let designer = ctx.designer();

    let outcome = if args.enhance {
        let name = args
            .agent_name
            .as_deref()
            .ok_or_else(|| ChaplinError::validation("--enhance requires --agent-name"))?;
        designer
            .enhance(
                &request.persona,
                name,
                args.existing_prompt.as_deref(),
                &request.previous_workgroup,
            )
            .await?
    } else {
        let options = DesignOptions {
            mode: args.mode(),
            max_members: args.max_members.unwrap_or(limits::MAX_WORKGROUP_MEMBERS),
            previous: request.previous_workgroup,
        };
        designer.generate(&request.persona, &options).await?
    };

    print_json(&outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_from_args() {
        assert_eq!(DesignArgs::default().mode(), DesignMode::Full);

        let by_index = DesignArgs {
            agent_index: Some(2),
            ..Default::default()
        };
        assert_eq!(by_index.mode(), DesignMode::ByIndex(2));

        let by_name = DesignArgs {
            agent_name: Some("Editor".into()),
            agent_index: Some(2),
            ..Default::default()
        };
        assert_eq!(by_name.mode(), DesignMode::ByName("Editor".into()));
    }

    #[test]
    fn test_request_file_shape() {
        let request: DesignRequest = serde_json::from_str(
            r#"{"name": "Chef", "category": "Food", "description": "Cooks",
                "previousWorkgroup": [{"name": "Planner", "prompt": "Plan meals"}]}"#,
        )
        .unwrap();
        assert_eq!(request.persona.name, "Chef");
        assert_eq!(request.previous_workgroup.len(), 1);

        let bare: DesignRequest = serde_json::from_str(r#"{"name": "Chef"}"#).unwrap();
        assert!(bare.previous_workgroup.is_empty());
    }
}
