//! Deadlines for correlated requests.

use crate::*;

/// The point in time after which a pending request gives up waiting for
/// its response. Copy it into every future that shares the deadline.
#[derive(Debug, Clone, Copy)]
pub struct ProxyTimeout(tokio::time::Instant);

impl ProxyTimeout {
    /// A deadline `duration` from now.
    pub fn new(duration: std::time::Duration) -> Self {
        let now = tokio::time::Instant::now();
        // durations too large to represent behave as "a very long time"
        let deadline = now
            .checked_add(duration)
            .unwrap_or_else(|| now + std::time::Duration::from_secs(60 * 60 * 24 * 365));
        Self(deadline)
    }

    /// A deadline `millis` milliseconds from now.
    pub fn from_millis(millis: u64) -> Self {
        Self::new(std::time::Duration::from_millis(millis))
    }

    /// Run `f` until it resolves or the deadline passes, whichever comes
    /// first. Passing the deadline yields [`MeshError::TimedOut`].
    pub fn mix<'a, R, F>(&self, f: F) -> impl std::future::Future<Output = MeshResult<R>> + 'a + Send
    where
        R: 'a,
        F: std::future::Future<Output = MeshResult<R>> + 'a + Send,
    {
        let deadline = self.0;
        async move {
            tokio::time::timeout_at(deadline, f)
                .await
                .unwrap_or(Err(MeshError::TimedOut))
        }
    }
}
