//! Traits describing the collaborators of the map-data layer and their errors.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::config::LocationOptions;
use crate::model::{EntityKind, UserLocation};
use crate::session::UserProfile;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
/// Errors that can occur while talking to the remote API.
pub enum FetchError {
    /// No credential is available, the request was not attempted.
    #[error("Authentication required")]
    AuthRequired,
    /// The transport failed before a response arrived.
    #[error("Network unreachable: {0}")]
    NetworkUnreachable(String),
    /// The request did not complete within the configured timeout.
    #[error("Request timed out")]
    Timeout,
    /// The API answered with a non-success status.
    #[error("Server error {status}: {body}")]
    ServerError {
        /// HTTP status code.
        status: u16,
        /// Response body, kept for diagnostics.
        body: String,
    },
    /// The API answered with a body that could not be understood.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

/// Coarse classification of a [`FetchError`] used when logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// No credential was present.
    AuthMissing,
    /// The credential was rejected by the API.
    AuthExpired,
    /// The API could not be reached in time.
    NetworkUnreachable,
    /// Any other failure.
    Other,
}

impl FetchError {
    /// Classify the error for logging.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            FetchError::AuthRequired => FailureKind::AuthMissing,
            FetchError::ServerError { status: 401, .. } => FailureKind::AuthExpired,
            FetchError::NetworkUnreachable(_) | FetchError::Timeout => {
                FailureKind::NetworkUnreachable
            }
            FetchError::ServerError { .. } | FetchError::MalformedResponse(_) => {
                FailureKind::Other
            }
        }
    }
}

/// Extract the record list from an API response body.
///
/// The API returns either a bare array or an envelope carrying the array in
/// `data` or `content`. A `null` body is an empty collection.
///
/// # Errors
///
/// Returns [`FetchError::MalformedResponse`] for any other shape.
pub fn unwrap_collection(body: Value) -> Result<Value, FetchError> {
    match body {
        Value::Array(_) => Ok(body),
        Value::Null => Ok(Value::Array(Vec::new())),
        Value::Object(mut envelope) => ["data", "content"]
            .into_iter()
            .find_map(|key| envelope.remove(key).filter(Value::is_array))
            .ok_or_else(|| {
                FetchError::MalformedResponse("object without data or content array".to_owned())
            }),
        other => Err(FetchError::MalformedResponse(format!(
            "expected an array, got {other}"
        ))),
    }
}

#[async_trait]
/// Remote source of one raw entity collection.
pub trait CollectionPort: Send + Sync {
    /// Collection served by this port.
    fn kind(&self) -> EntityKind;

    /// Fetch the raw records, unwrapped from any response envelope.
    ///
    /// # Errors
    ///
    /// Returns a [`FetchError`] when no credential is available or the request fails.
    async fn fetch(&self) -> Result<Value, FetchError>;
}

#[async_trait]
/// Read-only access to the bearer token of the signed-in user.
pub trait CredentialStore: Send + Sync {
    /// The current token, if any.
    async fn token(&self) -> Option<String>;
}

#[async_trait]
/// Remote source of the signed-in user's profile.
pub trait ProfilePort: Send + Sync {
    /// Fetch the profile of the user owning the current credential.
    ///
    /// # Errors
    ///
    /// Returns a [`FetchError`] when no credential is available or the request fails.
    async fn current_user(&self) -> Result<UserProfile, FetchError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Outcome of a foreground location permission request.
pub enum Permission {
    /// Location may be read.
    Granted,
    /// The user refused.
    Denied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// Accuracy hint passed to the platform location service.
pub enum Accuracy {
    /// Coarse, cell-level position.
    Low,
    /// Block-level position.
    #[default]
    Balanced,
    /// Best available position.
    High,
}

#[derive(Debug, Clone, Copy, PartialEq)]
/// Single reading from the platform location service.
pub struct PositionFix {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Accuracy radius in meters.
    pub accuracy: Option<f64>,
    /// When the reading was taken.
    pub timestamp: DateTime<Utc>,
}

impl From<PositionFix> for UserLocation {
    fn from(fix: PositionFix) -> Self {
        UserLocation {
            lat: fix.latitude,
            lng: fix.longitude,
            accuracy: fix.accuracy,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
/// Errors reported by the platform location service.
pub enum LocationError {
    /// No position could be determined.
    #[error("Position unavailable: {0}")]
    Unavailable(String),
    /// Permission was revoked while watching.
    #[error("Location permission revoked")]
    PermissionRevoked,
}

#[async_trait]
/// Permission-gated platform location service.
pub trait PositionSource: Send + Sync {
    /// Ask for foreground location permission.
    async fn request_foreground_permission(&self) -> Permission;

    /// Read the current position once.
    ///
    /// # Errors
    ///
    /// Returns a [`LocationError`] when no position can be determined.
    async fn current_position(&self, accuracy: Accuracy) -> Result<PositionFix, LocationError>;

    /// Start watching the position. Dropping the receiver removes the watch.
    ///
    /// # Errors
    ///
    /// Returns a [`LocationError`] when the watch cannot be started.
    async fn watch_position(
        &self,
        options: &LocationOptions,
    ) -> Result<mpsc::Receiver<PositionFix>, LocationError>;
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
/// Errors raised while posting to the rendering surface.
pub enum SurfaceError {
    /// The surface has gone away.
    #[error("Rendering surface closed")]
    Closed,
}

/// Channel carrying serialized messages into the rendering surface.
pub trait SurfaceTransport: Send + Sync {
    /// Post one serialized message.
    ///
    /// # Errors
    ///
    /// Returns [`SurfaceError::Closed`] when the surface no longer accepts messages.
    fn post_message(&self, message: String) -> Result<(), SurfaceError>;
}
