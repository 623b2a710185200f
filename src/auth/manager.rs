use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};

use super::api::AuthApi;
use super::claims;
use super::credentials::CredentialStore;
use super::types::{ProfileUpdate, Role, RoleSwitchResponse, RoleSwitchValidation, UserProfile};
use crate::error::{ApiError, Result};
use crate::identity::IdentityPayload;

/// Observable session fields
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub user: Option<UserProfile>,
    pub is_authenticated: bool,
    pub is_initialized: bool,
    pub is_loading: bool,
}

/// Coarse authentication state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No credential stored
    Unauthenticated,
    /// Credential stored but not yet confirmed by a profile fetch
    TokenPresentUnverified,
    /// Profile fetched with the stored credential
    Authenticated,
}

/// Session manager
/// Single writer for the session state; readers take snapshots or subscribe
pub struct SessionManager {
    /// Backend auth endpoints
    api: AuthApi,

    /// Same store the HTTP client reads the bearer token from
    credentials: Arc<dyn CredentialStore>,

    /// Current session fields
    state: RwLock<SessionSnapshot>,

    /// Serializes login/fetch transitions so two fetches never interleave
    transition: Mutex<()>,

    /// Change notification for UI consumers
    changes: watch::Sender<SessionSnapshot>,
}

impl SessionManager {
    pub fn new(api: AuthApi) -> Self {
        let credentials = api.client().credentials().clone();
        let (changes, _) = watch::channel(SessionSnapshot::default());

        Self {
            api,
            credentials,
            state: RwLock::new(SessionSnapshot::default()),
            transition: Mutex::new(()),
            changes,
        }
    }

    /// Whether a credential is stored (it may still be stale)
    pub fn has_token(&self) -> bool {
        self.credentials.get().is_some()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.state.read().await.clone()
    }

    pub async fn user(&self) -> Option<UserProfile> {
        self.state.read().await.user.clone()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.state.read().await.is_authenticated
    }

    pub async fn is_initialized(&self) -> bool {
        self.state.read().await.is_initialized
    }

    pub async fn is_loading(&self) -> bool {
        self.state.read().await.is_loading
    }

    pub async fn phase(&self) -> SessionPhase {
        if self.state.read().await.is_authenticated {
            SessionPhase::Authenticated
        } else if self.has_token() {
            SessionPhase::TokenPresentUnverified
        } else {
            SessionPhase::Unauthenticated
        }
    }

    /// Effective role: token claim, then profile role, then student
    pub async fn user_role(&self) -> Role {
        let token = self.credentials.get();
        let state = self.state.read().await;
        claims::resolve_role(token.as_deref(), state.user.as_ref())
    }

    pub async fn is_admin(&self) -> bool {
        self.user_role().await == Role::Admin
    }

    pub async fn is_teacher(&self) -> bool {
        self.user_role().await == Role::Teacher
    }

    pub async fn is_student(&self) -> bool {
        self.user_role().await == Role::Student
    }

    /// Receive a new snapshot after every transition
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.changes.subscribe()
    }

    async fn update<R, F: FnOnce(&mut SessionSnapshot) -> R>(&self, f: F) -> R {
        let mut state = self.state.write().await;
        let result = f(&mut state);
        debug_assert!(!state.is_authenticated || state.user.is_some());
        self.changes.send_replace(state.clone());
        result
    }

    /// Exchange the identity for a credential, then load the profile
    pub async fn login(&self, identity: &IdentityPayload) -> Result<UserProfile> {
        let _gate = self.transition.lock().await;
        self.update(|s| s.is_loading = true).await;

        let result = self.login_locked(identity).await;

        self.update(|s| s.is_loading = false).await;
        result
    }

    async fn login_locked(&self, identity: &IdentityPayload) -> Result<UserProfile> {
        tracing::info!("Logging in via Mini App identity {}", identity.id);

        let request = identity.to_login_request();
        let response = match self.api.login_via_miniapp(&request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!("Login error: {}", e);
                return Err(e);
            }
        };

        // Credential must be stored before the profile fetch reads it
        self.credentials.set(&response.access_token);

        self.fetch_current_user_locked().await
    }

    /// Load the profile for the stored credential; any failure logs out
    pub async fn fetch_current_user(&self) -> Result<UserProfile> {
        let _gate = self.transition.lock().await;
        self.fetch_current_user_locked().await
    }

    async fn fetch_current_user_locked(&self) -> Result<UserProfile> {
        let sent_with = self.credentials.get();
        match self.api.get_current_user().await {
            Ok(user) => {
                let profile = user.clone();
                // Applied only if the credential is unchanged; checked under the
                // state lock, so a logout() during the request always wins
                let applied = self
                    .update(|s| {
                        if self.credentials.get() != sent_with {
                            return false;
                        }
                        s.user = Some(user);
                        s.is_authenticated = true;
                        s.is_initialized = true;
                        true
                    })
                    .await;

                if !applied {
                    tracing::info!("Credential changed while loading the profile, discarding it");
                    return Err(ApiError::AuthorizationDenied(
                        "Session ended before the profile arrived".to_string(),
                    ));
                }

                tracing::info!("Session authenticated as {} ({})", profile.full_name, profile.id);
                Ok(profile)
            }
            Err(e) => {
                tracing::warn!("Error fetching user data: {}", e);
                self.logout().await;
                Err(e)
            }
        }
    }

    /// Drop the credential and the profile. Idempotent
    pub async fn logout(&self) {
        self.credentials.clear();
        self.update(|s| {
            s.user = None;
            s.is_authenticated = false;
            s.is_initialized = true;
        })
        .await;
        tracing::debug!("Session logged out");
    }

    /// Verify a stored credential, or mark the session initialized without one
    pub async fn check_auth(&self) {
        let _gate = self.transition.lock().await;
        self.check_auth_locked().await;
    }

    async fn check_auth_locked(&self) {
        if self.has_token() {
            if !self.state.read().await.is_authenticated {
                // fetch already logs out on failure
                let _ = self.fetch_current_user_locked().await;
            }
        } else {
            self.mark_initialized().await;
        }
    }

    /// Run the startup check once; later calls are no-ops
    pub async fn initialize(&self) {
        let _gate = self.transition.lock().await;
        if self.state.read().await.is_initialized {
            return;
        }
        self.check_auth_locked().await;
    }

    pub async fn mark_initialized(&self) {
        self.update(|s| s.is_initialized = true).await;
    }

    /// Update contact fields; the returned profile replaces the cached one
    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<UserProfile> {
        let _gate = self.transition.lock().await;
        match self.api.update_profile(update).await {
            Ok(user) => {
                let profile = user.clone();
                self.update(move |s| {
                    if s.is_authenticated {
                        s.user = Some(user);
                    }
                })
                .await;
                Ok(profile)
            }
            Err(e) => {
                self.handle_denied(&e).await;
                Err(e)
            }
        }
    }

    pub async fn validate_role_switch(&self, token: &str) -> Result<RoleSwitchValidation> {
        let result = self.api.validate_role_switch(token).await;
        if let Err(ref e) = result {
            self.handle_denied(e).await;
        }
        result
    }

    /// Redeem a role switch link; a returned credential replaces the stored one
    pub async fn switch_role(&self, token: &str) -> Result<RoleSwitchResponse> {
        let _gate = self.transition.lock().await;

        let response = match self.api.switch_role(token).await {
            Ok(response) => response,
            Err(e) => {
                self.handle_denied(&e).await;
                return Err(e);
            }
        };

        if !response.success {
            tracing::warn!("Role switch refused: {}", response.message);
            return Ok(response);
        }

        if let Some(access_token) = response.access_token.as_deref().filter(|t| !t.is_empty()) {
            tracing::info!("Role switch issued a new credential, reloading profile");
            self.credentials.set(access_token);
            self.fetch_current_user_locked().await?;
        }

        Ok(response)
    }

    async fn handle_denied(&self, e: &ApiError) {
        if e.is_authorization_denied() {
            self.logout().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryCredentialStore;
    use crate::http_client::ApiClient;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine as _;
    use serde_json::{json, Value};
    use std::io::Write;

    fn user_json(role: &str) -> Value {
        json!({
            "user": {
                "id": "3b241101-e2bb-4255-8caf-4136c566a962",
                "telegram_id": 123456789,
                "username": "testuser",
                "full_name": "Test User",
                "is_active": true,
                "is_verified": true,
                "created_at": "2025-01-12T10:30:00",
                "role": role,
                "timezone": "Europe/Moscow"
            }
        })
    }

    fn jwt_with_role(role: &str) -> String {
        format!(
            "e30.{}.sig",
            URL_SAFE_NO_PAD.encode(json!({ "sub": "1", "role": role }).to_string())
        )
    }

    fn identity() -> IdentityPayload {
        crate::identity::mock_identity()
    }

    fn session_for(
        server: &mockito::ServerGuard,
        store: Arc<MemoryCredentialStore>,
    ) -> SessionManager {
        let client = ApiClient::new(format!("{}/api", server.url()), store, 5, 5).unwrap();
        SessionManager::new(AuthApi::new(Arc::new(client)))
    }

    #[tokio::test]
    async fn test_login_then_fetch_authenticates() {
        let mut server = mockito::Server::new_async().await;
        let login = server
            .mock("POST", "/api/auth/miniapp")
            .match_body(mockito::Matcher::Json(json!({
                "id": 123456789, "username": "testuser", "full_name": "Test User"
            })))
            .with_status(200)
            .with_body(r#"{"access_token":"fresh"}"#)
            .create_async()
            .await;
        let me = server
            .mock("GET", "/api/auth/user")
            .match_header("authorization", "Bearer fresh")
            .with_status(200)
            .with_body(user_json("student").to_string())
            .create_async()
            .await;

        let store = Arc::new(MemoryCredentialStore::new());
        let session = session_for(&server, store.clone());

        let user = session.login(&identity()).await.unwrap();
        assert_eq!(user.full_name, "Test User");

        let snapshot = session.snapshot().await;
        assert!(snapshot.is_authenticated);
        assert!(snapshot.is_initialized);
        assert!(!snapshot.is_loading);
        assert!(snapshot.user.is_some());
        assert_eq!(store.get().as_deref(), Some("fresh"));
        assert_eq!(session.phase().await, SessionPhase::Authenticated);

        login.assert_async().await;
        me.assert_async().await;
    }

    #[tokio::test]
    async fn test_login_failure_leaves_session_untouched() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/auth/miniapp")
            .with_status(500)
            .create_async()
            .await;
        let me = server
            .mock("GET", "/api/auth/user")
            .expect(0)
            .create_async()
            .await;

        let session = session_for(&server, Arc::new(MemoryCredentialStore::new()));
        let err = session.login(&identity()).await.unwrap_err();

        assert_eq!(err.status(), Some(500));
        let snapshot = session.snapshot().await;
        assert!(!snapshot.is_authenticated);
        assert!(!snapshot.is_initialized);
        assert!(!snapshot.is_loading);
        assert!(snapshot.user.is_none());
        assert!(!session.has_token());
        me.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_failure_logs_out_from_any_state() {
        let mut server = mockito::Server::new_async().await;
        let ok = server
            .mock("GET", "/api/auth/user")
            .with_status(200)
            .with_body(user_json("teacher").to_string())
            .expect(1)
            .create_async()
            .await;

        let store = Arc::new(MemoryCredentialStore::with_token("tok"));
        let session = session_for(&server, store.clone());
        session.fetch_current_user().await.unwrap();
        assert!(session.is_authenticated().await);
        ok.assert_async().await;
        ok.remove_async().await;

        server
            .mock("GET", "/api/auth/user")
            .with_status(503)
            .create_async()
            .await;

        assert!(session.fetch_current_user().await.is_err());
        let snapshot = session.snapshot().await;
        assert!(!snapshot.is_authenticated);
        assert!(snapshot.user.is_none());
        assert!(snapshot.is_initialized);
        assert!(store.get().is_none());
    }

    #[tokio::test]
    async fn test_unauthorized_fetch_clears_token() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/auth/user")
            .with_status(401)
            .create_async()
            .await;

        let session = session_for(&server, Arc::new(MemoryCredentialStore::with_token("stale")));
        assert!(session.has_token());
        assert_eq!(session.phase().await, SessionPhase::TokenPresentUnverified);

        session.check_auth().await;

        assert!(!session.has_token());
        assert!(!session.is_authenticated().await);
        assert!(session.is_initialized().await);
        assert_eq!(session.phase().await, SessionPhase::Unauthenticated);
    }

    #[tokio::test]
    async fn test_logout_is_idempotent() {
        let server = mockito::Server::new_async().await;
        let session = session_for(&server, Arc::new(MemoryCredentialStore::with_token("tok")));

        session.logout().await;
        let once = session.snapshot().await;
        session.logout().await;
        let twice = session.snapshot().await;

        assert_eq!(once, twice);
        assert!(!session.has_token());
        assert!(twice.is_initialized);
    }

    #[tokio::test]
    async fn test_check_auth_without_token_only_initializes() {
        let mut server = mockito::Server::new_async().await;
        let me = server
            .mock("GET", "/api/auth/user")
            .expect(0)
            .create_async()
            .await;

        let session = session_for(&server, Arc::new(MemoryCredentialStore::new()));
        session.check_auth().await;

        assert!(session.is_initialized().await);
        assert!(!session.is_authenticated().await);
        me.assert_async().await;
    }

    #[tokio::test]
    async fn test_initialize_twice_fetches_once() {
        let mut server = mockito::Server::new_async().await;
        let me = server
            .mock("GET", "/api/auth/user")
            .with_status(200)
            .with_body(user_json("student").to_string())
            .expect(1)
            .create_async()
            .await;

        let session = session_for(&server, Arc::new(MemoryCredentialStore::with_token("tok")));
        session.initialize().await;
        let first = session.snapshot().await;
        session.initialize().await;

        assert_eq!(first, session.snapshot().await);
        assert!(first.is_authenticated);
        me.assert_async().await;
    }

    #[tokio::test]
    async fn test_concurrent_initialize_fetches_once() {
        let mut server = mockito::Server::new_async().await;
        let me = server
            .mock("GET", "/api/auth/user")
            .with_status(200)
            .with_body(user_json("student").to_string())
            .expect(1)
            .create_async()
            .await;

        let session = session_for(&server, Arc::new(MemoryCredentialStore::with_token("tok")));
        futures::future::join_all((0..4).map(|_| session.initialize())).await;

        assert!(session.is_authenticated().await);
        me.assert_async().await;
    }

    #[tokio::test]
    async fn test_role_claim_wins_over_profile_role() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/auth/user")
            .with_status(200)
            .with_body(user_json("student").to_string())
            .create_async()
            .await;

        let session = session_for(
            &server,
            Arc::new(MemoryCredentialStore::with_token(jwt_with_role("teacher"))),
        );
        session.fetch_current_user().await.unwrap();

        assert_eq!(session.user_role().await, Role::Teacher);
        assert!(session.is_teacher().await);
        assert!(!session.is_student().await);
    }

    #[tokio::test]
    async fn test_role_falls_back_to_profile_then_default() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/auth/user")
            .with_status(200)
            .with_body(user_json("teacher").to_string())
            .create_async()
            .await;

        let session = session_for(&server, Arc::new(MemoryCredentialStore::with_token("opaque")));
        assert_eq!(session.user_role().await, Role::Student);

        session.fetch_current_user().await.unwrap();
        assert_eq!(session.user_role().await, Role::Teacher);
        assert!(!session.is_admin().await);
    }

    #[tokio::test]
    async fn test_subscribers_see_transitions() {
        let server = mockito::Server::new_async().await;
        let session = session_for(&server, Arc::new(MemoryCredentialStore::new()));
        let mut rx = session.subscribe();

        session.check_auth().await;
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().is_initialized);
    }

    #[tokio::test]
    async fn test_update_profile_replaces_user() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/auth/user")
            .with_status(200)
            .with_body(user_json("student").to_string())
            .create_async()
            .await;
        let mut updated = user_json("student")["user"].clone();
        updated["phone_number"] = json!("+79990000000");
        let put = server
            .mock("PUT", "/api/auth/update-profile")
            .match_body(mockito::Matcher::Json(json!({ "phone_number": "+79990000000" })))
            .with_status(200)
            .with_body(updated.to_string())
            .create_async()
            .await;

        let session = session_for(&server, Arc::new(MemoryCredentialStore::with_token("tok")));
        session.fetch_current_user().await.unwrap();

        let update = ProfileUpdate {
            phone_number: Some("+79990000000".to_string()),
            email: None,
        };
        session.update_profile(&update).await.unwrap();

        let user = session.user().await.unwrap();
        assert_eq!(user.phone_number.as_deref(), Some("+79990000000"));
        put.assert_async().await;
    }

    #[tokio::test]
    async fn test_update_profile_unauthorized_logs_out() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/auth/user")
            .with_status(200)
            .with_body(user_json("student").to_string())
            .create_async()
            .await;
        server
            .mock("PUT", "/api/auth/update-profile")
            .with_status(401)
            .create_async()
            .await;

        let session = session_for(&server, Arc::new(MemoryCredentialStore::with_token("tok")));
        session.fetch_current_user().await.unwrap();

        let err = session
            .update_profile(&ProfileUpdate {
                phone_number: None,
                email: Some("a@b.c".to_string()),
            })
            .await
            .unwrap_err();

        assert!(err.is_authorization_denied());
        assert!(!session.is_authenticated().await);
        assert!(session.user().await.is_none());
    }

    #[tokio::test]
    async fn test_validate_role_switch_unauthorized_logs_out() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/auth/user")
            .with_status(200)
            .with_body(user_json("student").to_string())
            .create_async()
            .await;
        server
            .mock("GET", "/api/role/role-switch/validate/link-9")
            .with_status(401)
            .with_body(r#"{"detail":"Not authenticated"}"#)
            .create_async()
            .await;

        let store = Arc::new(MemoryCredentialStore::with_token("tok"));
        let session = session_for(&server, store.clone());
        session.fetch_current_user().await.unwrap();
        assert!(session.is_authenticated().await);

        let err = session.validate_role_switch("link-9").await.unwrap_err();

        assert!(err.is_authorization_denied());
        assert!(!session.is_authenticated().await);
        assert!(session.user().await.is_none());
        assert!(!session.has_token());
        assert!(store.get().is_none());
        assert_eq!(session.phase().await, SessionPhase::Unauthenticated);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_logout_during_fetch_is_not_undone() {
        let mut server = mockito::Server::new_async().await;
        let body = user_json("student").to_string();
        server
            .mock("GET", "/api/auth/user")
            .with_status(200)
            .with_chunked_body(move |w| {
                std::thread::sleep(std::time::Duration::from_millis(500));
                w.write_all(body.as_bytes())
            })
            .create_async()
            .await;

        let session = Arc::new(session_for(
            &server,
            Arc::new(MemoryCredentialStore::with_token("tok")),
        ));
        let pending = tokio::spawn({
            let session = session.clone();
            async move { session.fetch_current_user().await }
        });

        tokio::time::sleep(std::time::Duration::from_millis(150)).await;
        session.logout().await;

        let result = pending.await.unwrap();
        assert!(result.unwrap_err().is_authorization_denied());
        assert!(!session.has_token());
        assert!(!session.is_authenticated().await);
        assert!(session.user().await.is_none());
        assert_eq!(session.phase().await, SessionPhase::Unauthenticated);
    }

    #[tokio::test]
    async fn test_switch_role_adopts_new_credential() {
        let mut server = mockito::Server::new_async().await;
        let new_token = jwt_with_role("teacher");
        server
            .mock("POST", "/api/role/role-switch")
            .match_body(mockito::Matcher::Json(json!({ "token": "link-1" })))
            .with_status(200)
            .with_body(
                json!({
                    "success": true,
                    "message": "Role switched",
                    "access_token": new_token
                })
                .to_string(),
            )
            .create_async()
            .await;
        let me = server
            .mock("GET", "/api/auth/user")
            .match_header("authorization", format!("Bearer {}", new_token).as_str())
            .with_status(200)
            .with_body(user_json("teacher").to_string())
            .create_async()
            .await;

        let store = Arc::new(MemoryCredentialStore::with_token(jwt_with_role("student")));
        let session = session_for(&server, store.clone());

        let response = session.switch_role("link-1").await.unwrap();
        assert!(response.success);
        assert_eq!(store.get(), Some(new_token));
        assert_eq!(session.user_role().await, Role::Teacher);
        me.assert_async().await;
    }

    #[tokio::test]
    async fn test_switch_role_refused_keeps_credential() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/role/role-switch")
            .with_status(200)
            .with_body(r#"{"success":false,"message":"Link expired"}"#)
            .create_async()
            .await;

        let store = Arc::new(MemoryCredentialStore::with_token("tok"));
        let session = session_for(&server, store.clone());

        let response = session.switch_role("old-link").await.unwrap();
        assert!(!response.success);
        assert_eq!(response.message, "Link expired");
        assert_eq!(store.get().as_deref(), Some("tok"));
    }
}
