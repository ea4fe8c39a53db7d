use super::{Filter, NextFn};
use crate::context::Context;
use crate::error::StateError;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Request counters collected around the whole chain.
///
/// Runs outermost (`order` = `i32::MIN`) so its latency covers every filter
/// plus the backend call. All counters are atomics; the debug surface reads
/// them without locking.
#[derive(Default)]
pub struct MetricsFilter {
    request_count: AtomicUsize,
    error_count: AtomicUsize,
    total_latency_ns: AtomicU64,
}

impl MetricsFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> usize {
        self.error_count.load(Ordering::Relaxed)
    }

    /// Mean chain latency; zero before the first request completes.
    pub fn average_latency(&self) -> Duration {
        let count = self.request_count.load(Ordering::Relaxed) as u64;
        if count == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(self.total_latency_ns.load(Ordering::Relaxed) / count)
        }
    }

    /// Text-format dump served by the debug surface.
    pub fn render(&self) -> String {
        format!(
            "# HELP gantry_requests_total Total number of dispatched requests\n\
             # TYPE gantry_requests_total counter\n\
             gantry_requests_total {}\n\
             # HELP gantry_request_errors_total Requests that ended in a gateway error\n\
             # TYPE gantry_request_errors_total counter\n\
             gantry_request_errors_total {}\n\
             # HELP gantry_request_latency_seconds Average chain latency in seconds\n\
             # TYPE gantry_request_latency_seconds gauge\n\
             gantry_request_latency_seconds {}\n",
            self.request_count(),
            self.error_count(),
            self.average_latency().as_secs_f64()
        )
    }
}

impl Filter for MetricsFilter {
    fn type_id(&self) -> &'static str {
        "MetricsFilter"
    }

    fn order(&self) -> i32 {
        i32::MIN
    }

    fn invoke(&self, ctx: &Context, next: &NextFn) -> Result<(), StateError> {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        let start = Instant::now();
        let result = next(ctx);
        self.total_latency_ns
            .fetch_add(start.elapsed().as_nanos() as u64, Ordering::Relaxed);
        if result.is_err() {
            self.error_count.fetch_add(1, Ordering::Relaxed);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextPool;

    #[test]
    fn test_counters_track_requests_and_errors() {
        let metrics = MetricsFilter::new();
        let pool = ContextPool::new();
        let ctx = pool.acquire();
        metrics.invoke(&ctx, &|_| Ok(())).unwrap();
        metrics
            .invoke(&ctx, &|_| Err(StateError::bad_gateway("boom")))
            .unwrap_err();
        assert_eq!(metrics.request_count(), 2);
        assert_eq!(metrics.error_count(), 1);
        assert!(metrics.render().contains("gantry_requests_total 2"));
    }
}
