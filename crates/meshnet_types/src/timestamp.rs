//! Wall-clock timestamps used for lease bookkeeping and change times.

/// Milliseconds since the unix epoch.
///
/// Lease timestamps are logical: they may predate the in-memory object that
/// carries them, because they are persisted and restored across restarts.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
    derive_more::Display,
)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Marker for "never expires".
    pub const NEVER: Timestamp = Timestamp(-1);

    /// The current system time.
    pub fn now() -> Self {
        let millis = match std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
            Ok(d) => d.as_millis() as i64,
            // clock set before 1970
            Err(e) => -(e.duration().as_millis() as i64),
        };
        Self(millis)
    }

    /// Construct from raw milliseconds.
    pub fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Raw milliseconds.
    pub fn as_millis(&self) -> i64 {
        self.0
    }

    /// Is this the [`Timestamp::NEVER`] marker?
    pub fn is_never(&self) -> bool {
        *self == Self::NEVER
    }

    /// Add a number of milliseconds, saturating at the numeric bounds.
    pub fn saturating_add_millis(&self, millis: u64) -> Self {
        let millis = i64::try_from(millis).unwrap_or(i64::MAX);
        Self(self.0.saturating_add(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_is_distinct_from_now() {
        assert!(Timestamp::NEVER.is_never());
        assert!(!Timestamp::now().is_never());
    }

    #[test]
    fn saturating_add_does_not_wrap() {
        let t = Timestamp(i64::MAX - 1);
        assert_eq!(Timestamp(i64::MAX), t.saturating_add_millis(u64::MAX));
        assert_eq!(Timestamp(1500), Timestamp(1000).saturating_add_millis(500));
    }
}
