// Utility functions for scheduling-service

pub mod clock;
pub mod retry;

pub use clock::{Clock, FixedClock, SystemClock};
pub use retry::{retry_transient, RetryConfig};

use crate::error::{EngineError, Result};
use std::future::Future;
use std::time::Duration;

/// Run `future` under a caller deadline.
///
/// On expiry the future is dropped and `EngineError::Timeout` is returned;
/// nothing computed so far escapes as a partial result.
pub async fn with_deadline<F, T>(deadline: Duration, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(deadline, future).await {
        Ok(result) => result,
        Err(_) => Err(EngineError::Timeout(deadline)),
    }
}

/// Clamp a value into [0, 1], mapping NaN to 0
pub fn unit_clamp(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
