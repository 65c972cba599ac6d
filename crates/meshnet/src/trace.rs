//! Structured logging setup.
//!
//! Everything in this crate logs through `tracing` with structured fields,
//! e.g. `tracing::debug!(%peer, ?id, "granted lock")`. Binaries pick an
//! [`Output`] and call [`init_fmt`] once; tests call [`test_run`].
//!
//! Filtering uses the usual `RUST_LOG` syntax:
//! ```bash
//! RUST_LOG='meshnet::proxy=trace,meshnet=debug' my_bin
//! ```

use crate::*;
use std::str::FromStr;
use tracing_subscriber::filter::EnvFilter;

/// Sets the kind of structured logging output you want
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    /// Regular logging (default)
    Log,
    /// More compact version of above
    Compact,
    /// Outputs everything as json
    Json,
    /// No logging to console
    None,
}

impl FromStr for Output {
    type Err = MeshError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Log" => Ok(Output::Log),
            "Compact" => Ok(Output::Compact),
            "Json" => Ok(Output::Json),
            "None" => Ok(Output::None),
            _ => Err(format!("Could not parse log output type: {}", s).into()),
        }
    }
}

/// Install a global subscriber for the given output, filtered by `RUST_LOG`.
pub fn init_fmt(output: Output) -> MeshResult<()> {
    let filter = EnvFilter::from_default_env();
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_file(true)
        .with_line_number(true);
    match output {
        Output::Log => builder.try_init(),
        Output::Compact => builder.compact().try_init(),
        Output::Json => builder.json().try_init(),
        Output::None => Ok(()),
    }
    .map_err(MeshError::other)
}

/// Run logging in a unit test.
///
/// RUST_LOG must be set or this is a no-op. Calling it more than once is fine.
pub fn test_run() -> MeshResult<()> {
    if std::env::var_os("RUST_LOG").is_none() {
        return Ok(());
    }

    // another test in this process may have installed it already
    let _ = init_fmt(Output::Log);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use test_case::test_case;

    #[test_case("Log", Output::Log)]
    #[test_case("Compact", Output::Compact)]
    #[test_case("Json", Output::Json)]
    #[test_case("None", Output::None)]
    fn parse_output(s: &str, expected: Output) {
        assert_eq!(expected, s.parse().unwrap());
    }

    #[test]
    fn reject_unknown_output() {
        assert!("Loud".parse::<Output>().is_err());
    }
}
