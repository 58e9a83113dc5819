//! Global Constants
//!
//! Centralized constants for configuration and tuning.
//! All magic numbers should be defined here with documentation.

/// Workgroup data model limits
pub mod limits {
    /// Maximum characters in an agent name
    pub const AGENT_NAME_MAX: usize = 60;

    /// Maximum characters in an agent role prompt
    pub const AGENT_PROMPT_MAX: usize = 3000;

    /// Maximum characters in a response format key
    pub const RESPONSE_KEY_MAX: usize = 60;

    /// Maximum characters in a response format description
    pub const RESPONSE_DESC_MAX: usize = 100;

    /// Maximum keys in a response format
    pub const MAX_RESPONSE_KEYS: usize = 6;

    /// Maximum agents a designer may return in one workgroup
    pub const MAX_WORKGROUP_MEMBERS: usize = 5;
}

/// Agent executor constants
pub mod engine {
    /// Token budget for a single agent step
    pub const AGENT_MAX_TOKENS: u32 = 800;

    /// Sampling temperature for agent steps
    pub const AGENT_TEMPERATURE: f32 = 0.7;

    /// Attempts per agent before the run fails
    pub const AGENT_MAX_ATTEMPTS: u32 = 3;

    /// Token budget for the integrator
    pub const INTEGRATOR_MAX_TOKENS: u32 = 900;

    /// Sampling temperature for the integrator
    pub const INTEGRATOR_TEMPERATURE: f32 = 0.5;

    /// Attempts for the integrator generate+parse cycle
    pub const INTEGRATOR_MAX_ATTEMPTS: u32 = 3;

    /// Attempts for generic generate+parse cycles
    pub const JSON_MAX_ATTEMPTS: u32 = 3;

    /// Delay between retried attempts (milliseconds)
    pub const RETRY_DELAY_MS: u64 = 500;

    /// Sentinel some models append to each turn
    pub const END_OF_TURN: &str = "<end_of_turn>";

    /// Closing delimiter of a chain-of-thought prefix
    pub const REASONING_CLOSE: &str = "</think>";
}

/// Workgroup designer constants
pub mod design {
    /// Token budget for the create-workgroup call
    pub const CREATE_MAX_TOKENS: u32 = 800;

    /// Low temperature keeps the array format stable
    pub const CREATE_TEMPERATURE: f32 = 0.18;

    /// Token budget for the team summary
    pub const SUMMARY_MAX_TOKENS: u32 = 250;

    pub const SUMMARY_TEMPERATURE: f32 = 0.1;

    /// Summary text kept for the enhance prompt
    pub const SUMMARY_MAX_CHARS: usize = 1200;

    /// Token budget for a prompt enhancement
    pub const ENHANCE_MAX_TOKENS: u32 = 400;

    pub const ENHANCE_TEMPERATURE: f32 = 0.2;
}

/// Slow (submit-then-poll) backend constants
pub mod polling {
    /// Interval between result polls (seconds)
    pub const INTERVAL_SECS: u64 = 10;

    /// Polls before giving up
    pub const MAX_ATTEMPTS: u32 = 20;
}

/// Job lifecycle constants
pub mod jobs {
    /// Jobs older than this are eligible for purge (seconds)
    pub const DEFAULT_TTL_SECS: u64 = 3600;

    /// Random bytes in a job id (hex encoded, so ids are twice as long)
    pub const ID_BYTES: usize = 12;

    /// Interval between progress-log polls when following a job (milliseconds)
    pub const FOLLOW_INTERVAL_MS: u64 = 1500;

    /// Header carrying the trigger signature
    pub const SIGNATURE_HEADER: &str = "Upstash-Signature";

    /// Allowed clock skew when checking signature validity windows (seconds)
    pub const CLOCK_TOLERANCE_SECS: u64 = 0;

    /// Lifetime of a signature minted by this process (seconds)
    pub const SIGNATURE_TTL_SECS: u64 = 300;

    /// Delay before a published trigger is delivered (seconds)
    pub const PUBLISH_DELAY_SECS: u64 = 1;

    /// How long the in-process worker may finish in-flight triggers on exit (seconds)
    pub const DRAIN_GRACE_SECS: u64 = 10;

    /// Jobs shown by `job list` unless a limit is given
    pub const LIST_LIMIT: usize = 20;
}

/// HTTP/Network constants
pub mod network {
    /// Default request timeout (seconds)
    pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

    /// Connection timeout (seconds)
    pub const CONNECTION_TIMEOUT_SECS: u64 = 30;
}
