//! Workgroup Execution Engine
//!
//! ## Architecture
//!
//! 1. **Executor**: agents run strictly in order, each seeing every earlier output
//! 2. **Integrator**: one structured call merges the outputs into the response format
//! 3. **Streaming**: progress events fan out to live consumers and the durable log
//!
//! The designer drafts workgroups for a persona and sits beside the run path.

pub mod designer;
pub mod executor;
pub mod integrator;
pub mod run;
pub mod stream;

pub use designer::{DesignOptions, DesignOutcome, WorkgroupDesigner};
pub use executor::{AgentExecutor, AgentSettings, ExecutionRequest, ExecutionResult};
pub use integrator::{Integrator, IntegratorOutcome, IntegratorSettings};
pub use run::{RunResponse, WorkgroupRunner};
pub use stream::{
    FollowEvent, ProgressSender, ProgressStream, done_frame, follow_job, progress_channel,
    sse_frame, start_frame,
};
