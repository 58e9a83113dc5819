//! Prompt Construction
//!
//! `PromptBuilder` assembles prompts from ordered sections so every prompt in
//! the engine shares one layout:
//!
//! ```text
//! == HEADING ==
//! content
//!
//! == RULES ==
//! 1. first rule
//! 2. second rule
//! ```
//!
//! The builders for each model call live in the submodules.

mod agent;
mod design;
mod integrator;

pub use agent::{build_agent_prompt, clean_output};
pub use design::{
    DesignMode, build_create_workgroup_prompt, build_enhance_prompt, build_summary_prompt,
    manual_summary,
};
pub use integrator::build_integrator_prompt;

/// Prompt section types
#[derive(Debug, Clone)]
pub enum PromptSection {
    /// Plain paragraph
    Text(String),
    /// `== HEADING ==` followed by content
    Section { heading: String, content: String },
    /// Numbered rules with an optional lead-in line
    Rules {
        heading: String,
        intro: Option<String>,
        rules: Vec<String>,
    },
}

/// Prompt builder for consistent prompt construction
#[derive(Debug, Clone, Default)]
pub struct PromptBuilder {
    sections: Vec<PromptSection>,
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a plain paragraph
    pub fn text(mut self, content: impl Into<String>) -> Self {
        self.sections.push(PromptSection::Text(content.into()));
        self
    }

    /// Add a headed section
    pub fn section(mut self, heading: &str, content: impl Into<String>) -> Self {
        self.sections.push(PromptSection::Section {
            heading: heading.to_string(),
            content: content.into(),
        });
        self
    }

    /// Add numbered rules
    pub fn rules<I, S>(mut self, heading: &str, intro: Option<&str>, rules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sections.push(PromptSection::Rules {
            heading: heading.to_string(),
            intro: intro.map(String::from),
            rules: rules.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Build the final prompt string
    pub fn build(self) -> String {
        let mut prompt = String::new();

        for section in self.sections {
            match section {
                PromptSection::Text(content) => {
                    prompt.push_str(content.trim_end());
                    prompt.push_str("\n\n");
                }
                PromptSection::Section { heading, content } => {
                    prompt.push_str(&format!("== {} ==\n", heading));
                    prompt.push_str(content.trim_end());
                    prompt.push_str("\n\n");
                }
                PromptSection::Rules {
                    heading,
                    intro,
                    rules,
                } => {
                    prompt.push_str(&format!("== {} ==\n", heading));
                    if let Some(intro) = intro {
                        prompt.push_str(&intro);
                        prompt.push('\n');
                    }
                    for (i, rule) in rules.iter().enumerate() {
                        prompt.push_str(&format!("{}. {}\n", i + 1, rule));
                    }
                    prompt.push('\n');
                }
            }
        }

        prompt.trim_end().to_string()
    }
}

/// Collapse whitespace runs and keep at most `max_chars` characters
pub(crate) fn squash(text: &str, max_chars: usize) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(max_chars)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sections_in_order() {
        let prompt = PromptBuilder::new()
            .section("INPUT DATA", "hello")
            .rules("ACTION", Some("Follow these rules:"), ["one", "two"])
            .text("response:")
            .build();

        let input = prompt.find("== INPUT DATA ==").unwrap();
        let action = prompt.find("== ACTION ==").unwrap();
        assert!(input < action);
        assert!(prompt.contains("Follow these rules:\n1. one\n2. two"));
        assert!(prompt.ends_with("response:"));
    }

    #[test]
    fn test_squash() {
        assert_eq!(squash("a  b\n\n c", 100), "a b c");
        assert_eq!(squash("abcdef", 3), "abc");
    }
}
