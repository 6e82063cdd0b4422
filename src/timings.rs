use std::future::Future;
use std::time::{Duration, Instant};

/// One measured pipeline phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub name: String,
    pub summary: String,
    pub duration: Duration,
}

/// Collects how long the named install phases took. The orchestrator
/// owns one per install and reads it back for its own reporting.
#[derive(Debug, Default)]
pub struct Timings {
    spans: Vec<Span>,
}

impl Timings {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn measure<T>(
        &mut self,
        name: &str,
        summary: &str,
        fut: impl Future<Output = T>,
    ) -> T {
        let start = Instant::now();
        let out = fut.await;
        let duration = start.elapsed();

        tracing::debug!(name, ?duration, "{summary}");
        self.spans.push(Span {
            name: name.to_string(),
            summary: summary.to_string(),
            duration,
        });

        out
    }

    pub fn spans(&self) -> &[Span] {
        &self.spans
    }
}
