// Authentication types

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Key under which the credential is persisted
pub const TOKEN_KEY: &str = "jwt_token";

/// Display name sent to the backend when the identity carries none
pub const DEFAULT_FULL_NAME: &str = "Пользователь";

/// Username sent to the backend when the identity carries none
pub const DEFAULT_USERNAME: &str = "-";

/// Authorization role of a user
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Role {
    #[default]
    Student,
    Teacher,
    Admin,
    /// Any role the backend knows about that this client does not
    Other(String),
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::Student => "student",
            Role::Teacher => "teacher",
            Role::Admin => "admin",
            Role::Other(s) => s,
        }
    }
}

impl From<&str> for Role {
    fn from(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "student" => Role::Student,
            "teacher" => Role::Teacher,
            "admin" => Role::Admin,
            _ => Role::Other(s.trim().to_string()),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Role {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Role::from(s.as_str()))
    }
}

/// User profile as returned by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    #[serde(deserialize_with = "number_or_string")]
    pub telegram_id: i64,
    #[serde(default)]
    pub username: Option<String>,
    pub full_name: String,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default, deserialize_with = "empty_role_as_none")]
    pub role: Option<Role>,
    #[serde(default)]
    pub timezone: String,
}

/// Accept `telegram_id` as either a JSON number or a numeric string
fn number_or_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrStr {
        Num(i64),
        Str(String),
    }

    match NumOrStr::deserialize(deserializer)? {
        NumOrStr::Num(n) => Ok(n),
        NumOrStr::Str(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

fn empty_role_as_none<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Role>, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw
        .filter(|s| !s.trim().is_empty())
        .map(|s| Role::from(s.as_str())))
}

/// `GET /auth/user` response
#[derive(Debug, Deserialize)]
pub struct CurrentUserResponse {
    pub user: UserProfile,
}

/// `PUT /auth/update-profile` response; the backend has shipped both shapes
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ProfileResponse {
    Wrapped { user: UserProfile },
    Bare(UserProfile),
}

impl ProfileResponse {
    pub fn into_profile(self) -> UserProfile {
        match self {
            ProfileResponse::Wrapped { user } => user,
            ProfileResponse::Bare(user) => user,
        }
    }
}

/// `POST /auth/miniapp` request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MiniAppLoginRequest {
    pub id: i64,
    pub username: String,
    pub full_name: String,
}

/// `POST /auth/miniapp` response
#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    pub access_token: String,
}

/// `PUT /auth/update-profile` request
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.phone_number.is_none() && self.email.is_none()
    }
}

/// Role switch link details
#[derive(Debug, Clone, Deserialize)]
pub struct RoleSwitchLink {
    pub id: String,
    pub target_role: Role,
    #[serde(default)]
    pub target_user_name: Option<String>,
    pub expires_at: String,
}

/// `GET /role/role-switch/validate/{token}` response
#[derive(Debug, Clone, Deserialize)]
pub struct RoleSwitchValidation {
    pub valid: bool,
    #[serde(default)]
    pub link: Option<RoleSwitchLink>,
    #[serde(default)]
    pub message: Option<String>,
}

/// `POST /role/role-switch` request
#[derive(Debug, Serialize)]
pub struct RoleSwitchRequest<'a> {
    pub token: &'a str,
}

/// User summary embedded in a role switch response
#[derive(Debug, Clone, Deserialize)]
pub struct RoleSwitchUser {
    pub id: String,
    #[serde(deserialize_with = "number_or_string")]
    pub telegram_id: i64,
    pub full_name: String,
    pub role: Role,
}

/// `POST /role/role-switch` response
#[derive(Debug, Clone, Deserialize)]
pub struct RoleSwitchResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub user: Option<RoleSwitchUser>,
}
