//! Run-Agent Command
//!
//! Advance a workgroup by one agent.
//!
//! Usage:
//!   chaplin run-agent --request <file> [--target NAME]

use std::path::Path;

use crate::cli::util::{CommandContext, print_json, read_json};
use crate::engine::ExecutionRequest;
use crate::types::{Result, RunRequest};

pub async fn run(ctx: &CommandContext, request_path: &Path, target: Option<&str>) -> Result<()> {
    let request: RunRequest = read_json(request_path)?;
    request.workgroup.validate()?;

    let result = ctx
        .runner()
        .executor()
        .run_single_agent(&ExecutionRequest::from(&request), target)
        .await?;
    print_json(&result)
}
