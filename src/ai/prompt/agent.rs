//! Agent step prompt

use super::PromptBuilder;
use crate::constants::engine::END_OF_TURN;
use crate::types::Agent;

/// Strip the end-of-turn sentinel some models append, then trim
pub fn clean_output(output: &str) -> String {
    output.replace(END_OF_TURN, "").trim().to_string()
}

/// Prompt for one agent: the user input, every earlier output in order, then
/// the agent's role instructions
pub fn build_agent_prompt(agent: &Agent, input: &str, previous_outputs: &[&str]) -> String {
    let mut data = format!("User's Request: {}\n", input);
    if previous_outputs.is_empty() {
        data.push_str("Results from Previous Steps: None. You are the first.");
    } else {
        let results = previous_outputs
            .iter()
            .enumerate()
            .map(|(i, output)| format!("Result from Step {}:\n{}", i, clean_output(output)))
            .collect::<Vec<_>>()
            .join("\n\n");
        data.push_str("Results from Previous Steps:\n");
        data.push_str(&results);
    }

    PromptBuilder::new()
        .section("INPUT DATA", data)
        .section(
            "YOUR INSTRUCTIONS",
            format!(
                "You are the \"{}\". Your instructions are below. Follow them exactly.\n\n{}",
                agent.name, agent.prompt
            ),
        )
        .rules(
            "ACTION",
            Some("Generate your response now based on your instructions. Follow these critical rules:"),
            [
                "Your response MUST be plain text. Do NOT use JSON format.",
                "Your entire output must be ONLY the direct answer. Do not include \"Understood\", explanations, or any extra text.",
                "GENERATE THE TEXT RESPONSE IMMEDIATELY.",
            ],
        )
        .text("response:")
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_agent_prompt() {
        let agent = Agent::new("Researcher", "List three facts.");
        let prompt = build_agent_prompt(&agent, "Tell me about owls", &[]);
        assert!(prompt.contains("User's Request: Tell me about owls"));
        assert!(prompt.contains("None. You are the first."));
        assert!(prompt.contains("You are the \"Researcher\""));
        assert!(prompt.contains("List three facts."));
        assert!(prompt.ends_with("response:"));
    }

    #[test]
    fn test_previous_outputs_in_order_without_sentinel() {
        let agent = Agent::new("Writer", "Write.");
        let prompt = build_agent_prompt(&agent, "q", &["facts<end_of_turn>", " outline "]);
        let first = prompt.find("Result from Step 0:\nfacts").unwrap();
        let second = prompt.find("Result from Step 1:\noutline").unwrap();
        assert!(first < second);
        assert!(!prompt.contains(END_OF_TURN));
    }

    #[test]
    fn test_clean_output() {
        assert_eq!(clean_output("  done <end_of_turn>\n"), "done");
    }
}
