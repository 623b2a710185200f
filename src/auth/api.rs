// Backend auth endpoints

use std::sync::Arc;
use url::Url;

use super::types::{
    AuthResponse, CurrentUserResponse, MiniAppLoginRequest, ProfileResponse, ProfileUpdate,
    RoleSwitchRequest, RoleSwitchResponse, RoleSwitchValidation, UserProfile,
};
use crate::error::{ApiError, Result};
use crate::http_client::ApiClient;

/// Typed wrappers around the `/auth` and `/role` endpoints
#[derive(Clone)]
pub struct AuthApi {
    client: Arc<ApiClient>,
}

impl AuthApi {
    pub fn new(client: Arc<ApiClient>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Arc<ApiClient> {
        &self.client
    }

    /// Exchange a Mini App identity for an access token
    pub async fn login_via_miniapp(&self, request: &MiniAppLoginRequest) -> Result<AuthResponse> {
        let response: AuthResponse = self.client.post_json("/auth/miniapp", request).await?;
        if response.access_token.is_empty() {
            return Err(ApiError::Decode(
                "Login response does not contain access_token".to_string(),
            ));
        }
        Ok(response)
    }

    /// Profile of the user the current credential belongs to
    pub async fn get_current_user(&self) -> Result<UserProfile> {
        let response: CurrentUserResponse = self.client.get_json("/auth/user").await?;
        Ok(response.user)
    }

    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<UserProfile> {
        let response: ProfileResponse = self.client.put_json("/auth/update-profile", update).await?;
        Ok(response.into_profile())
    }

    pub async fn validate_role_switch(&self, token: &str) -> Result<RoleSwitchValidation> {
        let path = with_segment("/role/role-switch/validate", token)?;
        self.client.get_json(&path).await
    }

    pub async fn switch_role(&self, token: &str) -> Result<RoleSwitchResponse> {
        self.client
            .post_json("/role/role-switch", &RoleSwitchRequest { token })
            .await
    }
}

/// `path` with `segment` appended as one percent-encoded path segment
fn with_segment(path: &str, segment: &str) -> Result<String> {
    if matches!(segment, "" | "." | "..") {
        return Err(ApiError::InvalidInput(format!(
            "{:?} is not a valid path segment",
            segment
        )));
    }

    let mut url = Url::parse("relative:/").map_err(|e| ApiError::Internal(e.into()))?;
    url.path_segments_mut()
        .map_err(|_| ApiError::Internal(anyhow::anyhow!("URL cannot hold path segments")))?
        .extend(path.split('/').filter(|s| !s.is_empty()))
        .push(segment);
    Ok(url.path().to_string())
}
