//! Console rendering of run progress
//!
//! Turns the progress events of a run (live or replayed from a job log) into
//! one line per event, with a bar counting finished agents.

use std::time::Instant;

use console::style;

use crate::engine::FollowEvent;
use crate::types::{JobStatus, ProgressEvent};

/// How much of each agent's output to echo
const PREVIEW_CHARS: usize = 160;

pub struct ConsoleRenderer {
    total_agents: usize,
    completed: usize,
    started: Instant,
    show_output: bool,
}

impl ConsoleRenderer {
    pub fn new(total_agents: usize) -> Self {
        Self {
            total_agents,
            completed: 0,
            started: Instant::now(),
            show_output: true,
        }
    }

    pub fn with_output(mut self, show: bool) -> Self {
        self.show_output = show;
        self
    }

    /// Render one event, advancing the agent counter on results
    pub fn render(&mut self, event: &ProgressEvent) -> String {
        match event {
            ProgressEvent::AgentStart { name } => format!(
                "{} {} {}",
                self.bar(),
                style("▸").cyan(),
                style(name).bold()
            ),
            ProgressEvent::AgentAttempt {
                name,
                attempt,
                max_attempts,
            } => format!(
                "  {} {} retrying ({}/{})",
                style("↻").yellow(),
                name,
                attempt,
                max_attempts
            ),
            ProgressEvent::AgentResult { name, output } => {
                self.completed += 1;
                let mut line = format!("{} {} {}", self.bar(), style("✓").green(), name);
                if self.show_output {
                    line.push_str(&format!("\n  {}", style(preview(output)).dim()));
                }
                line
            }
            ProgressEvent::AgentError { name, error } => {
                format!("  {} {}: {}", style("✗").red(), name, error)
            }
            ProgressEvent::IntegratorStart => {
                format!("{} Integrating outputs", style("▸").cyan())
            }
            ProgressEvent::IntegratorResult { validation, .. } => {
                if validation.success {
                    format!(
                        "{} Final output validated ({} attempt{})",
                        style("✓").green(),
                        validation.attempts,
                        if validation.attempts == 1 { "" } else { "s" }
                    )
                } else {
                    format!(
                        "{} Final output did not validate: {}",
                        style("⚠").yellow(),
                        validation.error.as_deref().unwrap_or("unknown error")
                    )
                }
            }
            ProgressEvent::Done => format!(
                "{} Done in {}",
                style("✓").green(),
                format_duration(self.started.elapsed().as_secs())
            ),
        }
    }

    /// Render an item from a followed job log
    pub fn render_follow(&mut self, event: &FollowEvent) -> String {
        match event {
            FollowEvent::Progress(event) => self.render(event),
            FollowEvent::Finished { status, error } => match (status, error) {
                (JobStatus::Failed, Some(error)) => {
                    format!("{} Job failed: {}", style("✗").red(), error)
                }
                (JobStatus::Failed, None) => format!("{} Job failed", style("✗").red()),
                (status, _) => format!("{} Job {}", style("✓").green(), status),
            },
            FollowEvent::Missing => {
                format!("{} Job not found or expired", style("✗").red())
            }
        }
    }

    fn bar(&self) -> String {
        format!(
            "{} {}/{}",
            render_progress_bar(self.completed, self.total_agents, 20),
            self.completed,
            self.total_agents
        )
    }
}

fn preview(output: &str) -> String {
    let flat = output.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > PREVIEW_CHARS {
        format!("{}…", flat.chars().take(PREVIEW_CHARS).collect::<String>())
    } else {
        flat
    }
}

/// Render a simple progress bar
fn render_progress_bar(completed: usize, total: usize, width: usize) -> String {
    if total == 0 {
        return format!("[{}]", " ".repeat(width));
    }

    let progress = (completed as f32 / total as f32).min(1.0);
    let filled = (progress * width as f32) as usize;
    let empty = width.saturating_sub(filled);

    format!("[{}{}]", "█".repeat(filled), "░".repeat(empty))
}

/// Format duration as human-readable string
fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IntegratorValidation;

    #[test]
    fn test_progress_bar() {
        assert_eq!(render_progress_bar(0, 0, 4), "[    ]");
        assert_eq!(render_progress_bar(1, 2, 4), "[██░░]");
        assert_eq!(render_progress_bar(5, 2, 4), "[████]");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(42), "42s");
        assert_eq!(format_duration(125), "2m 5s");
        assert_eq!(format_duration(3720), "1h 2m");
    }

    #[test]
    fn test_result_advances_counter() {
        let mut renderer = ConsoleRenderer::new(2).with_output(false);
        let line = renderer.render(&ProgressEvent::AgentResult {
            name: "Researcher".into(),
            output: "notes".into(),
        });
        assert!(line.contains("1/2"));
        assert!(line.contains("Researcher"));
        assert!(!line.contains("notes"));

        let start = renderer.render(&ProgressEvent::AgentStart {
            name: "Writer".into(),
        });
        assert!(start.contains("1/2"));
    }

    #[test]
    fn test_output_preview_is_flattened_and_cut() {
        let mut renderer = ConsoleRenderer::new(1);
        let long = format!("line one\n\nline two {}", "x".repeat(400));
        let line = renderer.render(&ProgressEvent::AgentResult {
            name: "A".into(),
            output: long,
        });
        assert!(line.contains("line one line two"));
        assert!(line.contains('…'));
    }

    #[test]
    fn test_integrator_failure_line() {
        let mut renderer = ConsoleRenderer::new(1);
        let line = renderer.render(&ProgressEvent::IntegratorResult {
            final_output: serde_json::json!({"error": "bad"}),
            validation: IntegratorValidation::failed("missing keys: summary", 3),
            raw: None,
        });
        assert!(line.contains("missing keys: summary"));
    }

    #[test]
    fn test_follow_terminal_lines() {
        let mut renderer = ConsoleRenderer::new(0);
        let failed = renderer.render_follow(&FollowEvent::Finished {
            status: JobStatus::Failed,
            error: Some("boom".into()),
        });
        assert!(failed.contains("boom"));
        assert!(
            renderer
                .render_follow(&FollowEvent::Missing)
                .contains("not found")
        );
    }
}
