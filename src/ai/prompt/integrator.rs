//! Integrator prompt

use super::PromptBuilder;
use crate::types::{AgentOutput, ResponseFormat};

/// Prompt asking for one JSON object whose keys are exactly the format's keys
pub fn build_integrator_prompt(format: &ResponseFormat, outputs: &[AgentOutput]) -> String {
    let outputs_block = outputs
        .iter()
        .enumerate()
        .map(|(i, o)| format!("--- Agent {} ({}) output:\n{}", i, o.name, o.output.trim()))
        .collect::<Vec<_>>()
        .join("\n\n");

    let keys = format.keys().collect::<Vec<_>>().join(", ");

    PromptBuilder::new()
        .text(
            "System: You are the Integrator agent.\n\
             Your job: synthesize the textual outputs from previous agents into a SINGLE JSON OBJECT.",
        )
        .section("RESPONSE FORMAT (keys -> descriptions)", format.to_pretty_json())
        .section("AGENT OUTPUTS (in order)", outputs_block)
        .rules(
            "STRICT REQUIREMENTS",
            None,
            [
                "Produce ONLY one valid JSON object as the entire response. No additional text, no explanation, no markdown, no code fences.".to_string(),
                format!(
                    "The JSON object MUST contain exactly these top-level keys: {}. No extra keys, no missing keys.",
                    keys
                ),
                "For each key, provide a value (string or array) that matches its description. Keep values concise and relevant.".to_string(),
                "Ensure the JSON is syntactically valid (proper quoting, no trailing commas).".to_string(),
                "If uncertain, prioritize brevity and relevance.".to_string(),
            ],
        )
        .text("Return ONLY the JSON object (no surrounding text).")
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OutputSource;

    #[test]
    fn test_integrator_prompt_contents() {
        let format = ResponseFormat::new()
            .with_field("title", "Short title")
            .with_field("summary", "Two sentences");
        let outputs = vec![
            AgentOutput {
                name: "Researcher".into(),
                output: "facts".into(),
                source: OutputSource::Prefilled,
            },
            AgentOutput {
                name: "Writer".into(),
                output: "draft".into(),
                source: OutputSource::Generated,
            },
        ];

        let prompt = build_integrator_prompt(&format, &outputs);
        assert!(prompt.contains("\"title\": \"Short title\""));
        assert!(prompt.contains("exactly these top-level keys: title, summary"));
        let first = prompt.find("--- Agent 0 (Researcher) output:\nfacts").unwrap();
        let second = prompt.find("--- Agent 1 (Writer) output:\ndraft").unwrap();
        assert!(first < second);
    }
}
