// Startup auto-login
//
// Best-effort: every failure is logged and folded into the outcome, so the
// caller never has to handle an error from the startup sequence.

use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::auth::SessionManager;
use crate::identity::IdentityProvider;

/// How the startup sequence ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutoLoginOutcome {
    /// Stored credential, session was already authenticated
    AlreadyAuthenticated,
    /// Stored credential confirmed by a profile fetch
    TokenReused,
    /// Stored credential rejected; session logged out
    TokenRejected(String),
    /// No credential, logged in with the host identity
    LoggedIn,
    /// No credential, login with the host identity failed
    LoginFailed(String),
    /// No credential and no host identity
    NoIdentity,
}

impl AutoLoginOutcome {
    pub fn is_authenticated(&self) -> bool {
        matches!(
            self,
            AutoLoginOutcome::AlreadyAuthenticated
                | AutoLoginOutcome::TokenReused
                | AutoLoginOutcome::LoggedIn
        )
    }
}

/// Runs the startup sequence against a session
pub struct AutoLogin {
    session: Arc<SessionManager>,
    identity: Arc<dyn IdentityProvider>,
}

impl AutoLogin {
    pub fn new(session: Arc<SessionManager>, identity: Arc<dyn IdentityProvider>) -> Self {
        Self { session, identity }
    }

    /// Reuse a stored credential, else log in with the host identity
    pub async fn run(&self) -> AutoLoginOutcome {
        if self.session.has_token() {
            if self.session.is_authenticated().await {
                return AutoLoginOutcome::AlreadyAuthenticated;
            }

            return match self.session.fetch_current_user().await {
                Ok(_) => AutoLoginOutcome::TokenReused,
                Err(e) => {
                    tracing::warn!("Stored credential rejected: {}", e);
                    AutoLoginOutcome::TokenRejected(e.to_string())
                }
            };
        }

        let Some(identity) = self.identity.read_identity() else {
            tracing::info!("No stored credential and no host identity, staying signed out");
            self.session.mark_initialized().await;
            return AutoLoginOutcome::NoIdentity;
        };

        match self.session.login(&identity).await {
            Ok(user) => {
                tracing::info!("Auto-login succeeded for {}", user.full_name);
                AutoLoginOutcome::LoggedIn
            }
            Err(e) => {
                tracing::warn!("Auto-login failed: {}", e);
                self.session.mark_initialized().await;
                AutoLoginOutcome::LoginFailed(e.to_string())
            }
        }
    }

    /// Run the sequence as a background task
    pub fn spawn(self) -> JoinHandle<AutoLoginOutcome> {
        tokio::spawn(async move { self.run().await })
    }
}
