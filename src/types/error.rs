//! Unified Error Type System
//!
//! Centralized error types for the entire engine.
//! Provides provider-failure classification for retry decisions and a tagged
//! [`ErrorKind`] taxonomy for callers that need to branch on failure class.
//!
//! ## Error Categories (provider failures)
//!
//! - **Transient**: Temporary issues that may resolve (retry)
//! - **RateLimit**: API rate limiting (wait and retry)
//! - **Network**: Connectivity issues (retry with backoff)
//! - **Unavailable**: Provider unavailable (fallback to next)
//! - **Auth**: Authentication failures (fail fast)
//!
//! ## Error Kinds (run boundary)
//!
//! Validation, Provider, Parse, Timeout and Signature map one-to-one onto the
//! failure classes the executor and job manager reason about.

use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Error Categories
// =============================================================================

/// Provider failure categories used to decide whether a call may be retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Rate limited - wait then retry same provider
    RateLimit,
    /// Context/token limit exceeded
    TokenLimit,
    /// Authentication failed - fail fast, don't retry
    Auth,
    /// Network/connectivity issues - retry with backoff
    Network,
    /// Provider unavailable - fallback to next
    Unavailable,
    /// Invalid request - don't retry, fix request
    BadRequest,
    /// Temporary server issues - retry same provider
    Transient,
    /// Unknown error
    Unknown,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RateLimit => write!(f, "RATE_LIMIT"),
            Self::TokenLimit => write!(f, "TOKEN_LIMIT"),
            Self::Auth => write!(f, "AUTH"),
            Self::Network => write!(f, "NETWORK"),
            Self::Unavailable => write!(f, "UNAVAILABLE"),
            Self::BadRequest => write!(f, "BAD_REQUEST"),
            Self::Transient => write!(f, "TRANSIENT"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

impl ErrorCategory {
    /// Check if this category is retryable on the same provider
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimit | Self::Network | Self::Transient)
    }
}

// =============================================================================
// LLM Error
// =============================================================================

/// A single provider call failure with category and provider context
#[derive(Debug, Clone)]
pub struct LlmError {
    /// Error category for routing decisions
    pub category: ErrorCategory,
    /// Detailed error message
    pub message: String,
    /// Provider key that produced the error
    pub provider: Option<String>,
}

impl std::fmt::Display for LlmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(provider) = &self.provider {
            write!(f, "[{}:{}] {}", provider, self.category, self.message)
        } else {
            write!(f, "[{}] {}", self.category, self.message)
        }
    }
}

impl std::error::Error for LlmError {}

impl LlmError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            provider: None,
        }
    }

    pub fn with_provider(
        category: ErrorCategory,
        message: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            category,
            message: message.into(),
            provider: Some(provider.into()),
        }
    }

    /// Check if error is retryable on the same provider
    pub fn is_retryable(&self) -> bool {
        self.category.is_retryable()
    }
}

// =============================================================================
// Error Classifier
// =============================================================================

/// Error classifier for provider failures
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Classify an error message from any provider
    pub fn classify(message: &str, provider: &str) -> LlmError {
        let lower = message.to_lowercase();

        if lower.contains("rate limit")
            || lower.contains("429")
            || lower.contains("too many requests")
            || lower.contains("quota exceeded")
        {
            return LlmError::with_provider(ErrorCategory::RateLimit, message, provider);
        }

        if lower.contains("token")
            && (lower.contains("limit") || lower.contains("exceed") || lower.contains("maximum"))
            || lower.contains("context length")
        {
            return LlmError::with_provider(ErrorCategory::TokenLimit, message, provider);
        }

        if lower.contains("auth")
            || lower.contains("401")
            || lower.contains("403")
            || lower.contains("api key")
            || lower.contains("unauthorized")
            || lower.contains("permission denied")
        {
            return LlmError::with_provider(ErrorCategory::Auth, message, provider);
        }

        if lower.contains("network")
            || lower.contains("connection")
            || lower.contains("dns")
            || lower.contains("timeout")
            || lower.contains("timed out")
            || lower.contains("unreachable")
        {
            return LlmError::with_provider(ErrorCategory::Network, message, provider);
        }

        if lower.contains("503")
            || lower.contains("502")
            || lower.contains("service unavailable")
            || lower.contains("not found")
        {
            return LlmError::with_provider(ErrorCategory::Unavailable, message, provider);
        }

        if lower.contains("400") || lower.contains("bad request") || lower.contains("malformed") {
            return LlmError::with_provider(ErrorCategory::BadRequest, message, provider);
        }

        if lower.contains("retry")
            || lower.contains("temporary")
            || lower.contains("overloaded")
            || lower.contains("not ready")
        {
            return LlmError::with_provider(ErrorCategory::Transient, message, provider);
        }

        LlmError::with_provider(ErrorCategory::Unknown, message, provider)
    }

    /// Classify HTTP status code directly (more accurate than string matching)
    pub fn classify_http_status(status: u16, message: &str, provider: &str) -> LlmError {
        match status {
            429 => LlmError::with_provider(ErrorCategory::RateLimit, message, provider),
            401 | 403 => LlmError::with_provider(ErrorCategory::Auth, message, provider),
            400 | 422 => LlmError::with_provider(ErrorCategory::BadRequest, message, provider),
            500 | 502 | 503 | 504 => {
                LlmError::with_provider(ErrorCategory::Transient, message, provider)
            }
            404 => LlmError::with_provider(ErrorCategory::Unavailable, message, provider),
            _ => LlmError::with_provider(ErrorCategory::Unknown, message, provider),
        }
    }

    /// Classify an application error raised while talking to a provider
    pub fn classify_error(err: &ChaplinError, provider: &str) -> LlmError {
        match err {
            ChaplinError::Llm(llm_err) => llm_err.clone(),
            ChaplinError::Timeout { .. } => {
                LlmError::with_provider(ErrorCategory::Network, err.to_string(), provider)
            }
            ChaplinError::Io(_) => {
                LlmError::with_provider(ErrorCategory::Network, err.to_string(), provider)
            }
            ChaplinError::Config(_) => {
                LlmError::with_provider(ErrorCategory::BadRequest, err.to_string(), provider)
            }
            _ => Self::classify(&err.to_string(), provider),
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Structured validation error with context
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// What validation failed
    pub kind: ValidationErrorKind,
    /// Field or component that failed validation
    pub field: Option<String>,
    /// Detailed message
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(field) = &self.field {
            write!(f, "Validation failed for '{}': {}", field, self.message)
        } else {
            write!(f, "Validation failed: {}", self.message)
        }
    }
}

impl std::error::Error for ValidationError {}

impl ValidationError {
    pub fn new(kind: ValidationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            field: None,
            message: message.into(),
        }
    }

    /// Add field context
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn from_message(message: impl Into<String>) -> Self {
        Self::new(ValidationErrorKind::General, message)
    }
}

/// Validation error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationErrorKind {
    /// Required field missing or empty
    MissingField,
    /// Value exceeds a length or count limit
    Range,
    /// Names collide or reference something absent
    Consistency,
    /// General validation error
    General,
}

// =============================================================================
// Error Kind
// =============================================================================

/// Failure class of an error, for callers that branch on it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or out-of-contract caller input; never retried
    Validation,
    /// A model backend failed or returned nothing usable
    Provider,
    /// Model output could not be coerced into the expected JSON shape
    Parse,
    /// A polling backend exceeded its attempt ceiling
    Timeout,
    /// Trigger authentication failed
    Signature,
    /// Operation not allowed in the current job state
    Conflict,
    /// Referenced record does not exist
    NotFound,
    /// Durable store failure
    Storage,
    /// Invalid configuration
    Config,
    /// Anything else
    Internal,
}

// =============================================================================
// Application Error
// =============================================================================

#[derive(Debug, Error)]
pub enum ChaplinError {
    // -------------------------------------------------------------------------
    // System Errors (auto From impl)
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // -------------------------------------------------------------------------
    // Model Errors
    // -------------------------------------------------------------------------
    /// A single provider call failed
    #[error("LLM error: {0}")]
    Llm(LlmError),

    /// Every provider in a priority list failed
    #[error("{0}")]
    Provider(String),

    /// Model output could not be parsed into the expected shape
    #[error("Parse error: {message} (input: {snippet})")]
    Parse { message: String, snippet: String },

    /// Operation timeout with context
    #[error("Timeout after {duration:?}: {operation}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    /// An agent exhausted its attempts; the run is aborted
    #[error("Agent '{agent}' failed after {attempts} attempts: {message}")]
    AgentFailed {
        agent: String,
        attempts: u32,
        message: String,
    },

    /// A retried cycle exhausted its attempts; carries the last error
    #[error("Failed after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        last_raw: Option<String>,
        #[source]
        source: Box<ChaplinError>,
    },

    // -------------------------------------------------------------------------
    // Domain Errors
    // -------------------------------------------------------------------------
    #[error("{0}")]
    Validation(ValidationError),

    #[error("Invalid signature: {0}")]
    Signature(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Queue error: {0}")]
    Queue(String),
}

impl From<LlmError> for ChaplinError {
    fn from(err: LlmError) -> Self {
        ChaplinError::Llm(err)
    }
}

impl From<ValidationError> for ChaplinError {
    fn from(err: ValidationError) -> Self {
        ChaplinError::Validation(err)
    }
}

pub type Result<T> = std::result::Result<T, ChaplinError>;

// =============================================================================
// Helper Functions
// =============================================================================

impl ChaplinError {
    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a validation error from a message
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(ValidationError::from_message(message))
    }

    /// Create a parse error, keeping a bounded snippet of the offending text
    pub fn parse(message: impl Into<String>, text: &str) -> Self {
        Self::Parse {
            message: message.into(),
            snippet: text.chars().take(200).collect(),
        }
    }

    /// Failure class used at the run and job boundaries
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Llm(_) | Self::Provider(_) | Self::AgentFailed { .. } => ErrorKind::Provider,
            Self::Parse { .. } | Self::Json(_) => ErrorKind::Parse,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Signature(_) => ErrorKind::Signature,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Io(_) | Self::Database(_) | Self::Storage(_) => ErrorKind::Storage,
            Self::Config(_) => ErrorKind::Config,
            Self::Exhausted { source, .. } => source.kind(),
            Self::Queue(_) => ErrorKind::Internal,
        }
    }

    /// Check if this error may succeed on another attempt
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Llm(e) => e.is_retryable(),
            Self::Validation(_) | Self::Signature(_) | Self::Config(_) => false,
            _ => true,
        }
    }
}

/// Context extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn with_context<C: Into<String>>(self, context: C) -> Result<T>;

    /// Add context using a closure (lazy evaluation)
    fn with_context_fn<F, C>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>;
}

impl<T, E: std::error::Error + Send + Sync + 'static> ResultExt<T> for std::result::Result<T, E> {
    fn with_context<C: Into<String>>(self, context: C) -> Result<T> {
        self.map_err(|e| ChaplinError::Storage(format!("{}: {}", context.into(), e)))
    }

    fn with_context_fn<F, C>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>,
    {
        self.map_err(|e| ChaplinError::Storage(format!("{}: {}", f().into(), e)))
    }
}

// =============================================================================
// Tests
// =============================================================================
