//! Refresh policy for replicas.
//!
//! A [`CoherenceSpec`] is a pure value. Whatever schedules refreshes asks it
//! for the next delay with [`CoherenceSpec::next_delay`], passing whether the
//! previous round found changes.

use crate::*;

/// One hour, the fallback delay of the default policy.
pub const DEFAULT_FALLBACK_DELAY_MS: u64 = 60 * 60 * 1000;

/// One week, the maximum delay of the default policy.
pub const DEFAULT_MAX_DELAY_MS: u64 = 7 * 24 * 60 * 60 * 1000;

/// Growth factor of the default policy.
pub const DEFAULT_GROWTH_FACTOR: f64 = 1.1;

/// How eagerly a replica is refreshed from its peers.
/// All delays are in milliseconds.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum CoherenceSpec {
    /// Obtain once, never refresh.
    OneTime,

    /// Refresh every `period` milliseconds.
    Periodic {
        /// refresh interval
        period: u64,
    },

    /// Back off while nothing changes, snap back when something does.
    AdaptivePeriodic {
        /// delay used initially and after a round that found changes
        fallback_delay: u64,
        /// upper bound on the delay
        max_delay: u64,
        /// multiplier applied after a round without changes
        growth_factor: f64,
    },
}

impl Default for CoherenceSpec {
    fn default() -> Self {
        CoherenceSpec::AdaptivePeriodic {
            fallback_delay: DEFAULT_FALLBACK_DELAY_MS,
            max_delay: DEFAULT_MAX_DELAY_MS,
            growth_factor: DEFAULT_GROWTH_FACTOR,
        }
    }
}

impl CoherenceSpec {
    /// The delay before the first refresh, `None` if there is none.
    pub fn initial_delay(&self) -> Option<u64> {
        match self {
            CoherenceSpec::OneTime => None,
            CoherenceSpec::Periodic { period } => Some(*period),
            CoherenceSpec::AdaptivePeriodic { fallback_delay, .. } => Some(*fallback_delay),
        }
    }

    /// The delay before the next refresh, given the delay just used and
    /// whether that round found changes. `None` means do not refresh again.
    pub fn next_delay(&self, current_delay: u64, found_changes: bool) -> Option<u64> {
        match self {
            CoherenceSpec::OneTime => None,
            CoherenceSpec::Periodic { period } => Some(*period),
            CoherenceSpec::AdaptivePeriodic {
                fallback_delay,
                max_delay,
                growth_factor,
            } => {
                if found_changes {
                    return Some(*fallback_delay);
                }
                let grown = (current_delay as f64 * growth_factor).round();
                if !grown.is_finite() || grown >= *max_delay as f64 {
                    Some(*max_delay)
                } else {
                    Some(grown.max(0.0) as u64)
                }
            }
        }
    }

    /// Compact canonical string form.
    pub fn to_external_form(&self) -> String {
        self.to_string()
    }
}

impl PartialEq for CoherenceSpec {
    fn eq(&self, other: &Self) -> bool {
        use CoherenceSpec::*;
        match (self, other) {
            (OneTime, OneTime) => true,
            (Periodic { period: a }, Periodic { period: b }) => a == b,
            (
                AdaptivePeriodic {
                    fallback_delay: fa,
                    max_delay: ma,
                    growth_factor: ga,
                },
                AdaptivePeriodic {
                    fallback_delay: fb,
                    max_delay: mb,
                    growth_factor: gb,
                },
            ) => fa == fb && ma == mb && ga.to_bits() == gb.to_bits(),
            _ => false,
        }
    }
}

impl Eq for CoherenceSpec {}

impl std::hash::Hash for CoherenceSpec {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            CoherenceSpec::OneTime => (),
            CoherenceSpec::Periodic { period } => period.hash(state),
            CoherenceSpec::AdaptivePeriodic {
                fallback_delay,
                max_delay,
                growth_factor,
            } => {
                fallback_delay.hash(state);
                max_delay.hash(state);
                growth_factor.to_bits().hash(state);
            }
        }
    }
}

impl std::fmt::Display for CoherenceSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoherenceSpec::OneTime => f.write_str("one-time"),
            CoherenceSpec::Periodic { period } => write!(f, "periodic{{{}}}", period),
            // f64 Display is the shortest form that parses back to the same bits
            CoherenceSpec::AdaptivePeriodic {
                fallback_delay,
                max_delay,
                growth_factor,
            } => write!(
                f,
                "adaptive-periodic{{{},{},{}}}",
                fallback_delay, max_delay, growth_factor
            ),
        }
    }
}

fn bad(s: &str, why: impl std::fmt::Display) -> MeshError {
    MeshError::InvalidCoherence(format!("{}: {}", s, why))
}

fn braced<'a>(s: &'a str, name: &str) -> Option<&'a str> {
    s.strip_prefix(name)
        .and_then(|r| r.strip_prefix('{'))
        .and_then(|r| r.strip_suffix('}'))
}

impl std::str::FromStr for CoherenceSpec {
    type Err = MeshError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim();
        if t == "one-time" {
            return Ok(CoherenceSpec::OneTime);
        }
        if let Some(inner) = braced(t, "adaptive-periodic") {
            let parts: Vec<&str> = inner.split(',').map(str::trim).collect();
            if parts.len() != 3 {
                return Err(bad(s, "expected three parameters"));
            }
            let fallback_delay = parts[0].parse().map_err(|e| bad(s, e))?;
            let max_delay = parts[1].parse().map_err(|e| bad(s, e))?;
            let growth_factor: f64 = parts[2].parse().map_err(|e| bad(s, e))?;
            if !growth_factor.is_finite() {
                return Err(bad(s, "growth factor must be finite"));
            }
            return Ok(CoherenceSpec::AdaptivePeriodic {
                fallback_delay,
                max_delay,
                growth_factor,
            });
        }
        if let Some(inner) = braced(t, "periodic") {
            let period = inner.trim().parse().map_err(|e| bad(s, e))?;
            return Ok(CoherenceSpec::Periodic { period });
        }
        Err(bad(s, "unknown coherence kind"))
    }
}

impl From<CoherenceSpec> for String {
    fn from(c: CoherenceSpec) -> Self {
        c.to_string()
    }
}

impl TryFrom<String> for CoherenceSpec {
    type Error = MeshError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test]
    fn adaptive_backoff_doubles_until_capped() {
        let c = CoherenceSpec::AdaptivePeriodic {
            fallback_delay: 1000,
            max_delay: 8000,
            growth_factor: 2.0,
        };
        let mut delay = c.initial_delay().unwrap();
        let mut seen = Vec::new();
        for _ in 0..3 {
            delay = c.next_delay(delay, false).unwrap();
            seen.push(delay);
        }
        assert_eq!(vec![2000, 4000, 8000], seen);
        assert_eq!(Some(8000), c.next_delay(delay, false));
        assert_eq!(Some(1000), c.next_delay(delay, true));
    }

    #[test]
    fn one_time_and_periodic() {
        assert_eq!(None, CoherenceSpec::OneTime.next_delay(10, false));
        assert_eq!(
            Some(500),
            CoherenceSpec::Periodic { period: 500 }.next_delay(10, true)
        );
    }

    #[test_case(CoherenceSpec::OneTime, "one-time")]
    #[test_case(CoherenceSpec::Periodic { period: 42 }, "periodic{42}")]
    #[test_case(CoherenceSpec::default(), "adaptive-periodic{3600000,604800000,1.1}")]
    fn external_form(c: CoherenceSpec, expected: &str) {
        assert_eq!(expected, c.to_string());
        assert_eq!(c, expected.parse::<CoherenceSpec>().unwrap());
    }

    #[test]
    fn rejects_garbage() {
        assert!("periodic{}".parse::<CoherenceSpec>().is_err());
        assert!("adaptive-periodic{1,2}".parse::<CoherenceSpec>().is_err());
        assert!("adaptive-periodic{1,2,inf}".parse::<CoherenceSpec>().is_err());
        assert!("sometimes".parse::<CoherenceSpec>().is_err());
    }

    #[test]
    fn serde_uses_external_form() {
        let json = serde_json::to_string(&CoherenceSpec::Periodic { period: 7 }).unwrap();
        assert_eq!("\"periodic{7}\"", json);
    }
}
