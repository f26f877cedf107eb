//! Log output setup
//!
//! One subscriber per process, installed by the binary before the
//! controller starts. `RUST_LOG` overrides the configured filter.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use super::{ObservabilityError, ObservabilityResult};

/// Install the global tracing subscriber.
///
/// `filter` uses `EnvFilter` directive syntax (e.g. `info,promoctl=debug`).
/// With `json` set, each event is written as one JSON object per line.
pub fn init_logging(filter: &str, json: bool) -> ObservabilityResult<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(from_env) => from_env,
        Err(_) => EnvFilter::try_new(filter)
            .map_err(|e| ObservabilityError::new(format!("invalid log filter {filter:?}: {e}")))?,
    };

    let (plain, json) = if json {
        (None, Some(fmt::layer().json().with_current_span(false)))
    } else {
        (Some(fmt::layer()), None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(plain)
        .with(json)
        .try_init()
        .map_err(|e| ObservabilityError::new(format!("failed to install log subscriber: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_filter_rejected() {
        // Only reachable when RUST_LOG is unset.
        if std::env::var_os("RUST_LOG").is_none() {
            assert!(init_logging("promoctl=notalevel[", false).is_err());
        }
    }
}
