//! Progress reporting for long-running operations.

/// Receives status text and fractional progress in `[0.0, 1.0]`.
pub trait ProgressSink: Send + Sync {
    fn update(&self, status: &str, fraction: f64);
}

impl<F> ProgressSink for F
where
    F: Fn(&str, f64) + Send + Sync,
{
    fn update(&self, status: &str, fraction: f64) {
        self(status, fraction)
    }
}

/// Discards all progress updates.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn update(&self, _status: &str, _fraction: f64) {}
}

/// Logs progress updates at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn update(&self, status: &str, fraction: f64) {
        tracing::debug!(status, progress = fraction, "Progress");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_closures_are_sinks() {
        let seen = Mutex::new(Vec::new());
        let sink = |status: &str, fraction: f64| {
            seen.lock().unwrap().push((status.to_string(), fraction));
        };
        sink.update("Importing photos... 1/2", 0.5);
        let seen = seen.into_inner().unwrap();
        assert_eq!(seen, vec![("Importing photos... 1/2".to_string(), 0.5)]);
    }
}
