//! Chart Selection
//!
//! Turns chart subscriptions into concrete chart versions. Credential lookup
//! and the version search itself are supplied by the caller.
//!
//! An empty search result is not an error from the search, but it is an
//! error here: a subscription that resolves to nothing cannot be promoted.

mod errors;
mod selector;

pub use errors::{BoxError, ChartError, ChartResult};
pub use selector::{
    ChartSelector, CredentialType, Credentials, CredentialsDb, SelectChartVersionFn,
};
