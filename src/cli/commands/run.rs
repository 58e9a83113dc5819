//! Run Command
//!
//! Execute a workgroup synchronously.
//!
//! Usage:
//!   chaplin run --request <file> [--stream | --sse]

use std::path::Path;

use crate::cli::progress::ConsoleRenderer;
use crate::cli::ui::Output;
use crate::cli::util::{CommandContext, print_json, read_json};
use crate::engine::sse_frame;
use crate::types::{ChaplinError, Result, RunRequest};

/// How progress is shown while the run executes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressMode {
    /// Only the final response
    Quiet,
    /// Human-readable lines on stderr
    Console,
    /// `data: {...}` frames on stdout, no final response
    Sse,
}

pub async fn run(ctx: &CommandContext, request_path: &Path, mode: ProgressMode) -> Result<()> {
    let request: RunRequest = read_json(request_path)?;
    let runner = ctx.runner();

    if mode == ProgressMode::Quiet {
        let response = runner.run(&request).await?;
        return print_json(&response);
    }

    let output = Output::new();
    let mut renderer = ConsoleRenderer::new(request.workgroup.len());
    let (mut events, handle) = runner.spawn_stream(request);

    while let Some(event) = events.recv().await {
        match mode {
            ProgressMode::Sse => print!("{}", sse_frame(&event)),
            _ => output.progress(&renderer.render(&event)),
        }
    }

    let response = handle
        .await
        .map_err(|e| ChaplinError::Queue(format!("run task aborted: {}", e)))??;

    if mode == ProgressMode::Console {
        print_json(&response)?;
    }
    Ok(())
}
