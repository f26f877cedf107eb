//! # Chart Selection Errors

use thiserror::Error;

/// Boxed error returned by external lookups.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for chart selection
pub type ChartResult<T> = Result<T, ChartError>;

/// Chart selection errors
///
/// Each variant names the chart and repository it concerns.
#[derive(Debug, Error)]
pub enum ChartError {
    #[error("error obtaining credentials for chart {repo_url}/{name}: {source}")]
    Credentials {
        repo_url: String,
        name: String,
        #[source]
        source: BoxError,
    },

    #[error("error searching for latest version of chart {repo_url}/{name}: {source}")]
    VersionSearch {
        repo_url: String,
        name: String,
        #[source]
        source: BoxError,
    },

    /// The search succeeded but nothing satisfied the constraint.
    #[error("found no suitable version of chart {repo_url}/{name}")]
    NoSuitableVersion { repo_url: String, name: String },
}
