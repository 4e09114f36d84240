//! Bounded, best-effort telemetry flushing.

use opentelemetry_sdk::error::OTelSdkResult;
use opentelemetry_sdk::trace::SdkTracerProvider;
use std::sync::Arc;
use std::time::Duration;

/// Narrow capability for forcing buffered spans out of the process.
///
/// Injected once at layer construction so the correlation core never
/// depends on a concrete SDK pipeline.
pub trait TelemetryFlush: Send + Sync {
    /// Flushes all buffered telemetry.
    ///
    /// # Errors
    ///
    /// Returns the underlying exporter error. Callers treat failure as
    /// best-effort and never propagate it.
    fn force_flush(&self) -> OTelSdkResult;
}

impl TelemetryFlush for SdkTracerProvider {
    fn force_flush(&self) -> OTelSdkResult {
        SdkTracerProvider::force_flush(self)
    }
}

/// Runs a flush under a timeout. Timeouts and flush errors are logged and
/// swallowed; with no flusher installed this is a no-op.
///
/// `force_flush` blocks, so it runs on the blocking pool; timing out
/// abandons the wedged flush rather than waiting for it.
pub(crate) async fn flush_bounded(flusher: Option<Arc<dyn TelemetryFlush>>, timeout: Duration) {
    let Some(flusher) = flusher else {
        return;
    };

    let flush = tokio::task::spawn_blocking(move || flusher.force_flush());
    match tokio::time::timeout(timeout, flush).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(error))) => {
            tracing::warn!(target: "lambda_correlation", error = ?error, "telemetry flush failed");
        }
        Ok(Err(join_error)) => {
            tracing::warn!(target: "lambda_correlation", error = %join_error, "telemetry flush panicked");
        }
        Err(_) => {
            tracing::warn!(
                target: "lambda_correlation",
                timeout_ms = timeout.as_millis() as u64,
                "telemetry flush timed out"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry_sdk::error::OTelSdkError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingFlusher {
        calls: AtomicUsize,
        fail: bool,
    }

    impl TelemetryFlush for CountingFlusher {
        fn force_flush(&self) -> OTelSdkResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(OTelSdkError::InternalFailure("exporter down".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn flushes_when_installed() {
        let flusher = Arc::new(CountingFlusher {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        flush_bounded(Some(flusher.clone()), Duration::from_secs(1)).await;
        assert_eq!(flusher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn flush_errors_are_swallowed() {
        let flusher = Arc::new(CountingFlusher {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        // Must not panic or propagate.
        flush_bounded(Some(flusher), Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn no_flusher_is_a_noop() {
        flush_bounded(None, Duration::from_millis(1)).await;
    }

    #[tokio::test]
    async fn hung_flush_is_abandoned_at_the_timeout() {
        struct HangingFlusher;

        impl TelemetryFlush for HangingFlusher {
            fn force_flush(&self) -> OTelSdkResult {
                std::thread::sleep(Duration::from_secs(5));
                Ok(())
            }
        }

        let started = std::time::Instant::now();
        flush_bounded(Some(Arc::new(HangingFlusher)), Duration::from_millis(50)).await;
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
