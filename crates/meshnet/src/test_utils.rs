//! Test helpers: an in-memory local store and an in-memory transport.

mod mem_store;
pub use mem_store::*;

mod switchboard;
pub use switchboard::*;

/// Poll `check` until it holds or `timeout_ms` elapses.
/// Returns the last result of `check`.
pub async fn wait_until(timeout_ms: u64, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_millis(timeout_ms);
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
}
