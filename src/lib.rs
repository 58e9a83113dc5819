//! Chaplin - Multi-Agent Workgroup Engine
//!
//! Runs a persona's workgroup of role-prompted agents in order, each seeing
//! the user input and every earlier agent's output, then asks an integrator
//! to fold the results into a JSON object shaped by the persona's response
//! format.
//!
//! ## Core Features
//!
//! - **Sequential Executor**: prefilled outputs are reused, missing ones generated
//! - **Structured Integration**: JSON extraction, repair and key validation with retries
//! - **Provider Chain**: priority lists per session size with fallback
//! - **Durable Jobs**: signed triggers, single-claim processing, replayable progress
//! - **Workgroup Design**: generate or enhance agents for a persona
//!
//! ## Quick Start
//!
//! ```ignore
//! use chaplin::{ConfigLoader, ProviderChain, RunRequest, WorkgroupRunner};
//!
//! let config = ConfigLoader::load()?;
//! let runner = WorkgroupRunner::from_config(ProviderChain::from_config(&config), &config.engine);
//! let response = runner.run(&request).await?;
//! println!("{}", response.final_output);
//! ```
//!
//! ## Modules
//!
//! - [`ai`]: provider abstraction, prompts, structured output
//! - [`engine`]: executor, integrator, runs, design, progress streams
//! - [`jobs`]: job lifecycle, trigger queue and signatures
//! - [`storage`]: SQLite persistence with connection pooling
//! - [`config`]: layered configuration

pub mod ai;
pub mod cli;
pub mod config;
pub mod constants;
pub mod engine;
pub mod jobs;
pub mod storage;
pub mod types;

// =============================================================================
// Core Re-exports
// =============================================================================

// Configuration
pub use config::{Config, ConfigLoader};

// Error Types
pub use types::error::{ChaplinError, ErrorKind, Result, ResultExt};

// Domain
pub use types::{
    Agent, ChaplinSnapshot, Job, JobId, JobStatus, Persona, ProgressEvent, ResponseFormat,
    RunRequest, Workgroup, WorkgroupResponseMap,
};

// Storage
pub use storage::database::PoolConfig;
pub use storage::{Database, JobStore, SharedDatabase};

// =============================================================================
// Engine Re-exports
// =============================================================================

pub use engine::{
    AgentExecutor, DesignOptions, DesignOutcome, ExecutionRequest, ExecutionResult, Integrator,
    RunResponse, WorkgroupDesigner, WorkgroupRunner,
};

// =============================================================================
// Jobs Re-exports
// =============================================================================

pub use jobs::{JobManager, SignatureVerifier, TriggerOutcome, TriggerPublisher};

// =============================================================================
// AI Re-exports
// =============================================================================

pub use ai::{DesignMode, GenerationRequest, LlmProvider, ProviderChain, RetryPolicy, with_timeout};
