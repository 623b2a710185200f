// Authentication module
// Credential storage, token claims and the session state machine

mod api;
mod claims;
mod credentials;
mod manager;
mod types;

pub use api::AuthApi;
pub use claims::{decode_claims, resolve_role, TokenClaims};
pub use credentials::{CredentialStore, MemoryCredentialStore, SqliteCredentialStore};
pub use manager::{SessionManager, SessionPhase, SessionSnapshot};
pub use types::{
    AuthResponse, MiniAppLoginRequest, ProfileUpdate, Role, RoleSwitchLink, RoleSwitchResponse,
    RoleSwitchUser, RoleSwitchValidation, UserProfile, DEFAULT_FULL_NAME, DEFAULT_USERNAME,
    TOKEN_KEY,
};
