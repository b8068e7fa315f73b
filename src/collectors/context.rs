use std::time::Duration;
use tokio::time::Instant;

/// Per-scrape context threaded through every `Collector::update` call.
///
/// Carries the optional deadline of the scrape. The execution wrapper bounds
/// each unit by it and the built-in collectors turn `remaining()` into a
/// server-side statement timeout (see `util::begin`).
#[derive(Clone, Copy, Debug, Default)]
pub struct ScrapeContext {
    deadline: Option<Instant>,
}

impl ScrapeContext {
    /// A context without deadline.
    #[must_use]
    pub const fn new() -> Self {
        Self { deadline: None }
    }

    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
        }
    }

    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` when unbounded.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbounded_context() {
        let ctx = ScrapeContext::new();
        assert!(ctx.deadline().is_none());
        assert!(ctx.remaining().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_expires() {
        let ctx = ScrapeContext::with_timeout(Duration::from_secs(2));
        assert_eq!(ctx.remaining(), Some(Duration::from_secs(2)));

        tokio::time::advance(Duration::from_secs(3)).await;

        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
    }
}
