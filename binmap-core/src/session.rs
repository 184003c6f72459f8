//! Application session: the signed-in user's credential and profile.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::ports::{CredentialStore, FetchError, ProfilePort};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
/// Profile of the signed-in user as returned by `users/me`.
pub struct UserProfile {
    /// Backend identifier.
    pub id: String,
    /// Login name.
    pub username: Option<String>,
    /// Given name.
    pub first_name: Option<String>,
    /// Family name.
    pub last_name: Option<String>,
    /// Contact address.
    pub mail: Option<String>,
    /// Free-form description.
    pub bio: Option<String>,
    /// Avatar URL.
    pub avatar: Option<String>,
}

impl UserProfile {
    /// Best human-readable name for the user.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.username
            .as_deref()
            .or(self.first_name.as_deref())
            .unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone)]
struct SignedIn {
    token: String,
    user: Option<UserProfile>,
}

/// Session shared by the data layer and the screens.
///
/// Populated on login and cleared on logout; holds no state before the first
/// login.
#[derive(Debug, Default)]
pub struct AppSession {
    state: RwLock<Option<SignedIn>>,
}

impl AppSession {
    /// Create an empty, signed-out session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the credential (and profile, when already known) of a fresh login.
    pub async fn login(&self, token: impl Into<String>, user: Option<UserProfile>) {
        let token = token.into();
        *self.state.write().await = Some(SignedIn { token, user });
        tracing::info!("session opened");
    }

    /// Forget the credential and the profile.
    pub async fn logout(&self) {
        if self.state.write().await.take().is_some() {
            tracing::info!("session closed");
        }
    }

    /// Whether a credential is present.
    pub async fn is_authenticated(&self) -> bool {
        self.state.read().await.is_some()
    }

    /// The cached profile, if loaded.
    pub async fn current_user(&self) -> Option<UserProfile> {
        self.state
            .read()
            .await
            .as_ref()
            .and_then(|signed_in| signed_in.user.clone())
    }

    /// Return the cached profile, fetching it once through `port` when missing.
    ///
    /// Returns `Ok(None)` when signed out.
    ///
    /// # Errors
    ///
    /// Returns the [`FetchError`] of the profile request.
    pub async fn ensure_user(
        &self,
        port: &dyn ProfilePort,
    ) -> Result<Option<UserProfile>, FetchError> {
        let token = {
            let state = self.state.read().await;
            match state.as_ref() {
                None => return Ok(None),
                Some(SignedIn {
                    user: Some(user), ..
                }) => return Ok(Some(user.clone())),
                Some(signed_in) => signed_in.token.clone(),
            }
        };

        let user = port.current_user().await?;

        // Only attach the profile if the same login is still active.
        let mut state = self.state.write().await;
        match state.as_mut() {
            Some(signed_in) if signed_in.token == token => {
                signed_in.user = Some(user.clone());
                tracing::debug!(user = %user.id, "profile cached in session");
                Ok(Some(user))
            }
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl CredentialStore for AppSession {
    async fn token(&self) -> Option<String> {
        self.state
            .read()
            .await
            .as_ref()
            .map(|signed_in| signed_in.token.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct CountingProfiles {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ProfilePort for CountingProfiles {
        async fn current_user(&self) -> Result<UserProfile, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(UserProfile {
                id: "u1".to_owned(),
                username: Some("ada".to_owned()),
                ..UserProfile::default()
            })
        }
    }

    #[tokio::test]
    async fn login_and_logout_drive_the_credential() {
        let session = AppSession::new();
        assert_eq!(session.token().await, None);

        session.login("secret", None).await;
        assert!(session.is_authenticated().await);
        assert_eq!(session.token().await.as_deref(), Some("secret"));

        session.logout().await;
        assert!(!session.is_authenticated().await);
        assert_eq!(session.token().await, None);
        assert_eq!(session.current_user().await, None);
    }

    #[tokio::test]
    async fn profile_is_fetched_once_per_login() {
        let session = AppSession::new();
        let profiles = CountingProfiles {
            calls: AtomicUsize::new(0),
        };

        assert_eq!(session.ensure_user(&profiles).await, Ok(None));
        assert_eq!(profiles.calls.load(Ordering::SeqCst), 0);

        session.login("secret", None).await;
        let first = session.ensure_user(&profiles).await.expect("profile");
        let second = session.ensure_user(&profiles).await.expect("profile");

        assert_eq!(first.as_ref().map(UserProfile::display_name), Some("ada"));
        assert_eq!(first, second);
        assert_eq!(profiles.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn profile_deserializes_from_partial_payload() {
        let user: UserProfile =
            serde_json::from_str(r#"{"id":"u9","firstName":"Grace","mail":"g@example.org"}"#)
                .expect("valid profile");
        assert_eq!(user.display_name(), "Grace");
        assert_eq!(user.mail.as_deref(), Some("g@example.org"));
    }
}
