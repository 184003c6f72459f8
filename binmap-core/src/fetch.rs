//! Fail-to-empty boundary around the remote collection ports.

use std::time::Duration;

use serde_json::Value;

use crate::model::EntityKind;
use crate::ports::{CollectionPort, FailureKind, FetchError};

/// Settled result of one collection fetch.
///
/// A failed fetch still yields an (empty) collection so that the other source
/// can be displayed; the failure is kept for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    /// Collection that was fetched.
    pub kind: EntityKind,
    /// Raw records, an empty array on failure.
    pub records: Value,
    /// Why the fetch failed, if it did.
    pub failure: Option<FetchError>,
}

impl FetchOutcome {
    /// Outcome of a failed fetch.
    #[must_use]
    pub fn failed(kind: EntityKind, error: FetchError) -> Self {
        Self {
            kind,
            records: Value::Array(Vec::new()),
            failure: Some(error),
        }
    }

    /// Whether the fetch succeeded.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

/// Fetch a collection, downgrading every failure to an empty collection.
///
/// The call is bounded by `timeout`; expiry counts as [`FetchError::Timeout`].
pub async fn fetch_or_empty(port: &dyn CollectionPort, timeout: Duration) -> FetchOutcome {
    let kind = port.kind();
    let result = match tokio::time::timeout(timeout, port.fetch()).await {
        Ok(result) => result,
        Err(_elapsed) => Err(FetchError::Timeout),
    };

    match result {
        Ok(records) => {
            let count = records.as_array().map_or(0, Vec::len);
            tracing::debug!(%kind, records = count, "fetched collection");
            FetchOutcome {
                kind,
                records,
                failure: None,
            }
        }
        Err(error) => {
            match error.kind() {
                FailureKind::AuthMissing => {
                    tracing::warn!(%kind, "no credential available, skipping fetch");
                }
                FailureKind::AuthExpired => {
                    tracing::warn!(%kind, %error, "credential rejected, token invalid or expired");
                }
                FailureKind::NetworkUnreachable => {
                    tracing::warn!(%kind, %error, "api unreachable");
                }
                FailureKind::Other => {
                    tracing::warn!(%kind, %error, "fetch failed");
                }
            }
            FetchOutcome::failed(kind, error)
        }
    }
}
