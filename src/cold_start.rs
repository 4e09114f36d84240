//! Cold start detection for Lambda functions.
//!
//! Tracks whether the current invocation is the first one served by this
//! execution environment.

use std::sync::atomic::{AtomicBool, Ordering};

/// Global flag tracking whether we've seen an invocation yet.
/// Starts as `true` and is set to `false` after the first invocation.
static IS_COLD_START: AtomicBool = AtomicBool::new(true);

/// Checks if this is a cold start and clears the flag.
///
/// Returns `true` on the first call (cold start), and `false` on all
/// subsequent calls (warm starts).
///
/// This function also checks the `AWS_LAMBDA_INITIALIZATION_TYPE` environment
/// variable. If set to `"provisioned-concurrency"`, the function returns
/// `false` since provisioned concurrency pre-warms the Lambda container.
///
/// # Thread Safety
///
/// Safe to call from multiple threads. The atomic swap ensures that exactly
/// one invocation will see `true`.
pub fn check_cold_start() -> bool {
    // Provisioned concurrency is never a cold start.
    if std::env::var("AWS_LAMBDA_INITIALIZATION_TYPE")
        .map(|v| v == "provisioned-concurrency")
        .unwrap_or(false)
    {
        // Still clear the flag but return false
        IS_COLD_START.store(false, Ordering::SeqCst);
        return false;
    }

    // First call: swaps true -> false, returns true
    // Subsequent calls: swaps false -> false, returns false
    IS_COLD_START.swap(false, Ordering::SeqCst)
}

/// Resets the cold start flag for testing purposes.
#[cfg(test)]
pub(crate) fn reset_cold_start_for_testing() {
    IS_COLD_START.store(true, Ordering::SeqCst);
}
