//! Timeout wrappers for provider calls
//!
//! ## Usage
//!
//! ```ignore
//! use crate::ai::timeout::with_timeout;
//!
//! let text = with_timeout(
//!     provider.timeout(),
//!     provider.generate_text(&request),
//!     "geminiflash generate",
//! ).await?;
//! ```

use std::future::Future;
use std::time::Duration;

use crate::types::{ChaplinError, Result};

/// Execute an async operation with a timeout
///
/// Returns [`ChaplinError::Timeout`] if the operation doesn't complete within
/// the specified duration. The inner future is dropped on expiry.
pub async fn with_timeout<T, F>(timeout: Duration, future: F, operation_name: &str) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(ChaplinError::timeout(operation_name, timeout)),
    }
}

/// Execute an async operation with a timeout, mapping the inner result
///
/// This variant accepts futures that return non-Result types and wraps them.
pub async fn with_timeout_map<T, F>(timeout: Duration, future: F, operation_name: &str) -> Result<T>
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => Ok(result),
        Err(_) => Err(ChaplinError::timeout(operation_name, timeout)),
    }
}
