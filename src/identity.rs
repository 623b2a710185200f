// Identity provider adapter
// Reads the user identity injected by the Telegram host container

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth::{MiniAppLoginRequest, DEFAULT_FULL_NAME, DEFAULT_USERNAME};

/// Platform-supplied user identity (`initDataUnsafe.user`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityPayload {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub language_code: Option<String>,
}

impl IdentityPayload {
    /// Username for the login exchange, `-` when missing or blank
    pub fn login_username(&self) -> String {
        match self.username.as_deref() {
            Some(name) if !name.trim().is_empty() => name.to_string(),
            _ => DEFAULT_USERNAME.to_string(),
        }
    }

    /// Full name if given, else first and last name, else the placeholder
    pub fn display_name(&self) -> String {
        if let Some(full) = self.full_name.as_deref().filter(|s| !s.is_empty()) {
            return full.to_string();
        }

        let joined = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        if joined.is_empty() {
            DEFAULT_FULL_NAME.to_string()
        } else {
            joined
        }
    }

    /// Body for `POST /auth/miniapp`
    pub fn to_login_request(&self) -> MiniAppLoginRequest {
        MiniAppLoginRequest {
            id: self.id,
            username: self.login_username(),
            full_name: self.display_name(),
        }
    }
}

/// Source of the platform identity
pub trait IdentityProvider: Send + Sync {
    /// Returns None when the host supplies no identity; never fails
    fn read_identity(&self) -> Option<IdentityPayload>;
}

/// Adapter over the host-injected Telegram WebApp object
#[derive(Debug, Clone, Default)]
pub struct HostIdentityProvider {
    host: Option<Value>,
}

impl HostIdentityProvider {
    /// Wrap the host object as injected (`Telegram`, `WebApp` or the WebApp itself)
    pub fn new(host: Option<Value>) -> Self {
        Self { host }
    }

    /// Host object absent entirely, as when running outside Telegram
    pub fn absent() -> Self {
        Self { host: None }
    }

    /// Parse the host object from its JSON text
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        let value: Value = serde_json::from_str(raw)?;
        Ok(Self::new(Some(value)))
    }

    /// Host object of the development Telegram mock
    pub fn mock() -> Self {
        let user = mock_identity();
        Self::new(Some(serde_json::json!({
            "WebApp": {
                "initData": "mock_init_data",
                "initDataUnsafe": {
                    "user": user,
                    "query_id": "mock_query_id",
                    "hash": "mock_hash"
                },
                "version": "6.0",
                "platform": "web"
            }
        })))
    }

    fn web_app(&self) -> Option<&Value> {
        let host = self.host.as_ref()?;
        host.pointer("/Telegram/WebApp")
            .or_else(|| host.get("WebApp"))
            .or_else(|| host.get("initDataUnsafe").map(|_| host))
    }
}

impl IdentityProvider for HostIdentityProvider {
    fn read_identity(&self) -> Option<IdentityPayload> {
        let user = self.web_app()?.get("initDataUnsafe")?.get("user")?;
        match serde_json::from_value(user.clone()) {
            Ok(identity) => Some(identity),
            Err(e) => {
                tracing::debug!("Ignoring malformed host identity: {}", e);
                None
            }
        }
    }
}

/// Identity used by the development Telegram mock
pub fn mock_identity() -> IdentityPayload {
    IdentityPayload {
        id: 123456789,
        username: Some("testuser".to_string()),
        first_name: Some("Test".to_string()),
        last_name: Some("User".to_string()),
        full_name: None,
        language_code: Some("ru".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_read_identity_from_webapp_root() {
        let provider = HostIdentityProvider::new(Some(json!({
            "WebApp": {
                "initDataUnsafe": {
                    "user": { "id": 777, "username": "anna", "first_name": "Anna" },
                    "hash": "h"
                }
            }
        })));

        let identity = provider.read_identity().unwrap();
        assert_eq!(identity.id, 777);
        assert_eq!(identity.username.as_deref(), Some("anna"));
    }

    #[test]
    fn test_read_identity_accepts_other_roots() {
        let nested = HostIdentityProvider::new(Some(json!({
            "Telegram": { "WebApp": { "initDataUnsafe": { "user": { "id": 1 } } } }
        })));
        assert_eq!(nested.read_identity().unwrap().id, 1);

        let bare = HostIdentityProvider::new(Some(json!({
            "initDataUnsafe": { "user": { "id": 2 } }
        })));
        assert_eq!(bare.read_identity().unwrap().id, 2);
    }

    #[test]
    fn test_read_identity_absent_everywhere() {
        assert!(HostIdentityProvider::absent().read_identity().is_none());
        assert!(HostIdentityProvider::new(Some(json!({}))).read_identity().is_none());
        assert!(HostIdentityProvider::new(Some(json!({ "WebApp": {} })))
            .read_identity()
            .is_none());
        assert!(HostIdentityProvider::new(Some(json!({
            "WebApp": { "initDataUnsafe": { "hash": "h" } }
        })))
        .read_identity()
        .is_none());
        assert!(HostIdentityProvider::new(Some(json!(null))).read_identity().is_none());
    }

    #[test]
    fn test_read_identity_malformed_user() {
        let provider = HostIdentityProvider::new(Some(json!({
            "WebApp": { "initDataUnsafe": { "user": { "id": "not-a-number" } } }
        })));
        assert!(provider.read_identity().is_none());
    }

    #[test]
    fn test_read_identity_is_repeatable() {
        let provider = HostIdentityProvider::mock();
        assert_eq!(provider.read_identity(), provider.read_identity());
        assert_eq!(provider.read_identity(), Some(mock_identity()));
    }

    #[test]
    fn test_login_request_normalization() {
        let identity = IdentityPayload {
            id: 5,
            username: Some("   ".to_string()),
            first_name: Some("Ivan".to_string()),
            last_name: None,
            full_name: None,
            language_code: None,
        };
        let request = identity.to_login_request();
        assert_eq!(request.username, "-");
        assert_eq!(request.full_name, "Ivan");

        let anonymous = IdentityPayload {
            id: 6,
            username: None,
            first_name: None,
            last_name: Some(String::new()),
            full_name: None,
            language_code: None,
        };
        assert_eq!(anonymous.display_name(), "Пользователь");

        assert_eq!(mock_identity().display_name(), "Test User");
        assert_eq!(mock_identity().login_username(), "testuser");
    }

    #[test]
    fn test_full_name_takes_precedence() {
        let identity = IdentityPayload {
            id: 7,
            username: Some("p".to_string()),
            first_name: Some("A".to_string()),
            last_name: Some("B".to_string()),
            full_name: Some("Professor P".to_string()),
            language_code: None,
        };
        assert_eq!(identity.display_name(), "Professor P");
    }
}
