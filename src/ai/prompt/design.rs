//! Workgroup design prompts: create, summarise, enhance

use super::{PromptBuilder, squash};
use crate::types::{Agent, Persona};

const PREVIEW_CHARS: usize = 300;
const MANUAL_SUMMARY_CHARS: usize = 120;
const NO_PREVIOUS: &str = "No previous agents provided.";

/// What a create-workgroup call should produce
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DesignMode {
    /// The missing agents, in order
    #[default]
    Full,
    /// Exactly one agent with this role name
    ByName(String),
    /// Exactly one agent for this 0-based position
    ByIndex(usize),
}

fn persona_block(persona: &Persona) -> String {
    format!(
        "- name: \"{}\"\n- category: \"{}\"\n- description: \"{}\"",
        persona.name, persona.category, persona.description
    )
}

fn team_preview(previous: &[Agent]) -> String {
    if previous.is_empty() {
        return NO_PREVIOUS.to_string();
    }
    previous
        .iter()
        .map(|a| format!("- {}: {}", a.name.trim(), squash(&a.prompt, PREVIEW_CHARS)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Short team listing used when the summariser is unavailable
pub fn manual_summary(previous: &[Agent]) -> String {
    if previous.is_empty() {
        return NO_PREVIOUS.to_string();
    }
    previous
        .iter()
        .map(|a| {
            let prompt: String = a.prompt.chars().take(MANUAL_SUMMARY_CHARS).collect();
            format!("- {}: {}", a.name, prompt)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Instruction asking for a JSON array of `{name, prompt}` agents
pub fn build_create_workgroup_prompt(
    persona: &Persona,
    previous: &[Agent],
    mode: &DesignMode,
    max_members: usize,
) -> String {
    let mode_block = match mode {
        DesignMode::ByName(name) => format!(
            "Generate ONLY ONE agent with the exact role name \"{}\".\n\
             - Output MUST be a JSON ARRAY with a single object: [{{ \"name\": \"ExactlyThisName\", \"prompt\": \"...\" }}].\n\
             - Do NOT include other agents, do NOT include an Integrator.\n\
             - Ensure the role is coherent with the existing team and persona context.",
            name
        ),
        DesignMode::ByIndex(index) => format!(
            "Generate ONLY ONE agent to occupy position index {} (0-based) in the team ordering.\n\
             - Output MUST be a JSON ARRAY with a single object: [{{ \"name\": \"RoleName\", \"prompt\": \"...\" }}].\n\
             - Do NOT include other agents or an Integrator.\n\
             - The generated prompt must be appropriate to the persona and consistent with previous agents.",
            index
        ),
        DesignMode::Full => format!(
            "Generate the missing agents (in order) that are not present in the existing team.\n\
             - Output MUST be a JSON ARRAY of objects, each exactly: {{ \"name\": \"ShortRoleName\", \"prompt\": \"English prompt with System: preface ...\" }}.\n\
             - The array length must be <= {}.\n\
             - Do NOT include Integrator or any non-agent wrapper. Return only the array.",
            max_members
        ),
    };

    PromptBuilder::new()
        .text(
            "You are a prompt-engineering assistant. Use the persona context and the existing \
             team context to produce agent role prompts.",
        )
        .rules(
            "STRICT OUTPUT RULES",
            Some("Do not break them:"),
            [
                "Output EXACTLY a JSON ARRAY and NOTHING ELSE.".to_string(),
                "Each item must be an object with EXACTLY these keys: \"name\" (string), \"prompt\" (string).".to_string(),
                "Prompts MUST be in ENGLISH and each \"prompt\" MUST start with a \"System:\" preface stating that agents run SEQUENTIALLY and receive the outputs of previous agents.".to_string(),
                "DO NOT include any \"Integrator\" agent. Integration is handled separately.".to_string(),
                format!("Return at most {} agents.", max_members),
            ],
        )
        .section("PERSONA", persona_block(persona))
        .section("EXISTING TEAM", team_preview(previous))
        .section("MODE", mode_block)
        .rules(
            "COMPOSING EACH PROMPT",
            None,
            [
                "Make prompts actionable and explicit: role responsibility, expected output format (plain text unless otherwise stated), tone, constraints.",
                "Keep each prompt focused on one role and avoid duplication across roles.",
                "Tell each agent to return only its content, with no meta commentary.",
            ],
        )
        .text("Now output only the JSON array as specified.")
        .build()
}

/// Instruction asking for one summary line per previous agent
pub fn build_summary_prompt(persona: &Persona, previous: &[Agent]) -> String {
    PromptBuilder::new()
        .text(format!(
            "You are an assistant that summarizes agent roles and their objectives.\n\
             Context: persona name=\"{}\", category=\"{}\".",
            persona.name, persona.category
        ))
        .rules(
            "GUIDELINES",
            Some("For each agent produce ONE line: AgentName: <one-sentence objective>"),
            [
                "Each line must be at most about 20 words.",
                "Use active, clear verbs.",
                "If the prompt text is short or empty, infer the objective from the role name.",
                "Return ONLY the summary lines, in input order. No headings, no JSON.",
            ],
        )
        .section("AGENTS", team_preview(previous))
        .text("Now produce the summary lines, one per agent.")
        .build()
}

/// Instruction asking for an improved version of an existing role prompt
pub fn build_enhance_prompt(
    persona: &Persona,
    agent_name: &str,
    existing_prompt: &str,
    team_summary: &str,
) -> String {
    let team = if team_summary.trim().is_empty() {
        NO_PREVIOUS
    } else {
        team_summary
    };

    PromptBuilder::new()
        .text(
            "System: You are a prompt editor specialized in improving AI agent prompts for \
             sequential workgroups. Do not invent new agent roles. Edit, improve and finish the \
             GIVEN prompt, preserving its intent and tone. Output ONLY the final improved prompt \
             (no JSON, no commentary).",
        )
        .section("PERSONA", persona_block(persona))
        .section("TEAM", team)
        .section(
            "AGENT TO ENHANCE",
            format!(
                "- agent name: \"{}\"\n- existing prompt:\n\"\"\"{}\"\"\"",
                agent_name, existing_prompt
            ),
        )
        .rules(
            "ENHANCEMENT RULES",
            None,
            [
                "Keep the agent role and intent unchanged. Preserve any specific constraints in the existing prompt.",
                "Make the objective explicit and mention the output format when appropriate.",
                "Prefer precise instructions (length, style, tone) over vague ones.",
                "Keep the prompt in ENGLISH.",
                "Start with a short \"System:\" preface stating that this agent runs sequentially and receives the outputs of previous agents.",
                "Return ONLY the improved prompt text.",
                "If the existing prompt is very short, complete it from the persona context without asking questions.",
            ],
        )
        .text("Now produce the improved prompt.")
        .build()
}
