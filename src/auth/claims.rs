// Token claims decoding and role resolution
//
// The credential is not verified here; the backend does that. We only peek at
// the payload segment for a role claim, and any malformed input yields None.

use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use serde_json::{Map, Value};

use super::types::{Role, UserProfile};

/// Decoded payload of a three-segment token
#[derive(Debug, Clone, PartialEq)]
pub struct TokenClaims {
    payload: Map<String, Value>,
}

impl TokenClaims {
    /// Role claim, if present as a non-empty string
    pub fn role(&self) -> Option<Role> {
        self.payload
            .get("role")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(Role::from)
    }

    /// Subject claim
    pub fn subject(&self) -> Option<&str> {
        self.payload.get("sub").and_then(Value::as_str)
    }

    /// Expiry claim, seconds since the epoch
    pub fn expires_at(&self) -> Option<i64> {
        self.payload.get("exp").and_then(Value::as_i64)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.payload.get(name)
    }
}

/// Decode the payload segment of `header.payload.signature`
pub fn decode_claims(token: &str) -> Option<TokenClaims> {
    let mut segments = token.trim().split('.');
    let (_header, payload, _signature) = (segments.next()?, segments.next()?, segments.next()?);
    if segments.next().is_some() || payload.is_empty() {
        return None;
    }

    let bytes = decode_segment(payload)?;
    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(payload)) => Some(TokenClaims { payload }),
        Ok(_) => None,
        Err(e) => {
            tracing::debug!("Token payload is not JSON: {}", e);
            None
        }
    }
}

fn decode_segment(segment: &str) -> Option<Vec<u8>> {
    let unpadded = segment.trim_end_matches('=');
    URL_SAFE_NO_PAD
        .decode(unpadded)
        .or_else(|_| STANDARD_NO_PAD.decode(unpadded))
        .ok()
}

/// Resolve the effective role: token claim, then profile role, then student
pub fn resolve_role(token: Option<&str>, user: Option<&UserProfile>) -> Role {
    token
        .and_then(decode_claims)
        .and_then(|claims| claims.role())
        .or_else(|| user.and_then(|u| u.role.clone()))
        .unwrap_or_default()
}
