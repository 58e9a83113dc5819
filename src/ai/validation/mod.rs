//! Structured Output Recovery
//!
//! Converts free-form model text into JSON of an expected shape:
//! - `json_repair`: permissive repair of almost-JSON
//! - `extract`: the staged `try_parse_json` pipeline
//! - `structured`: generate+parse cycles retried as one unit

mod extract;
mod json_repair;
mod structured;

pub use extract::{JsonShape, strip_reasoning, try_parse_json};
pub use json_repair::{JsonRepairer, normalize_smart_quotes};
pub use structured::{
    RetryPolicy, StructuredOutput, generate_json_with, generate_text_and_parse_json,
};
