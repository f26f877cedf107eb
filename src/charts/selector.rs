//! Chart version selection
//!
//! Resolves chart subscriptions to concrete chart versions using an
//! external credentials store and an external version search.

use std::fmt;
use std::sync::Arc;

use super::errors::{BoxError, ChartError, ChartResult};
use crate::api::{Chart, ChartSubscription};

/// Kind of repository a credential is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialType {
    Git,
    Helm,
    Image,
}

#[derive(Clone, PartialEq, Eq, Default)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Lookup of repository credentials.
pub trait CredentialsDb: Send + Sync {
    /// Credentials for `repo_url` in `namespace`, or `Ok(None)` when the
    /// repository needs none.
    fn get(
        &self,
        namespace: &str,
        cred_type: CredentialType,
        repo_url: &str,
    ) -> Result<Option<Credentials>, BoxError>;
}

/// Search for the newest chart version satisfying a semver constraint.
///
/// Arguments are registry URL, chart name, constraint and credentials. An
/// empty string means no version matched.
pub type SelectChartVersionFn = dyn Fn(&str, &str, &str, Option<&Credentials>) -> Result<String, BoxError>
    + Send
    + Sync;

/// Resolves chart subscriptions to chart versions.
#[derive(Clone)]
pub struct ChartSelector {
    credentials: Arc<dyn CredentialsDb>,
    select_version: Arc<SelectChartVersionFn>,
}

impl ChartSelector {
    pub fn new(credentials: Arc<dyn CredentialsDb>, select_version: Arc<SelectChartVersionFn>) -> Self {
        Self {
            credentials,
            select_version,
        }
    }

    /// Select the latest suitable version of every subscribed chart.
    ///
    /// Stops at the first chart that fails.
    pub fn select_charts(
        &self,
        namespace: &str,
        subscriptions: &[ChartSubscription],
    ) -> ChartResult<Vec<Chart>> {
        subscriptions
            .iter()
            .map(|sub| self.select_chart(namespace, sub))
            .collect()
    }

    fn select_chart(&self, namespace: &str, sub: &ChartSubscription) -> ChartResult<Chart> {
        let creds = self
            .credentials
            .get(namespace, CredentialType::Helm, &sub.registry_url)
            .map_err(|source| ChartError::Credentials {
                repo_url: sub.registry_url.clone(),
                name: sub.name.clone(),
                source,
            })?;

        let version = (self.select_version)(
            &sub.registry_url,
            &sub.name,
            &sub.semver_constraint,
            creds.as_ref(),
        )
        .map_err(|source| ChartError::VersionSearch {
            repo_url: sub.registry_url.clone(),
            name: sub.name.clone(),
            source,
        })?;

        if version.is_empty() {
            return Err(ChartError::NoSuitableVersion {
                repo_url: sub.registry_url.clone(),
                name: sub.name.clone(),
            });
        }

        tracing::debug!(
            namespace,
            chart = %sub.name,
            repo = %sub.registry_url,
            version = %version,
            "selected chart version"
        );
        Ok(Chart {
            repo_url: sub.registry_url.clone(),
            name: sub.name.clone(),
            version,
        })
    }
}
