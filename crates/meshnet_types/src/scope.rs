//! Replication scope along the object graph.

use crate::*;

/// How far along the object graph a replication request reaches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ScopeSpec {
    /// Replicate neighbors up to this many steps away.
    StepCount(u32),
}

impl std::fmt::Display for ScopeSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScopeSpec::StepCount(n) => write!(f, "steps{{{}}}", n),
        }
    }
}

impl std::str::FromStr for ScopeSpec {
    type Err = MeshError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let inner = s
            .strip_prefix("steps{")
            .and_then(|s| s.strip_suffix('}'))
            .ok_or_else(|| MeshError::invalid_address(format!("bad scope: {}", s)))?;
        let n = inner
            .trim()
            .parse()
            .map_err(|e| MeshError::invalid_address(format!("bad scope '{}': {}", s, e)))?;
        Ok(ScopeSpec::StepCount(n))
    }
}
