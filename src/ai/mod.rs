//! AI Integration Layer
//!
//! Model providers, prompt construction and structured-output recovery.

pub mod prompt;
pub mod provider;
pub mod timeout;
pub mod validation;

pub use prompt::{DesignMode, PromptBuilder, PromptSection};
pub use provider::{
    ChainAttempt, ErrorCategory, ErrorClassifier, GenerationRequest, LlmError, LlmProvider,
    PollObserver, ProviderChain, ProviderRegistry, SharedProvider,
};
pub use timeout::{with_timeout, with_timeout_map};
pub use validation::{
    JsonRepairer, JsonShape, RetryPolicy, StructuredOutput, generate_json_with,
    generate_text_and_parse_json, try_parse_json,
};
