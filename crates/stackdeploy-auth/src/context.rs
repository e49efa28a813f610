use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub const DEFAULT_ROLE: &str = "authenticated";

/// Claims carried by identity-provider access tokens.
///
/// Only `sub` and `exp` are required. The audience is provider specific and
/// is accepted in either string or array form without being checked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: u64,
    #[serde(default)]
    pub iat: Option<u64>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub aud: Option<serde_json::Value>,
}

/// The verified caller of a request.
///
/// Handlers receive it through [`crate::RequireAuth`] and pass it explicitly
/// into every service call; there is no other notion of a current user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AuthContext {
    pub user_id: String,
    pub email: String,
    pub role: String,
}

impl AuthContext {
    pub fn new(user_id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: email.into(),
            role: DEFAULT_ROLE.to_string(),
        }
    }

    pub fn from_claims(claims: Claims) -> Self {
        Self {
            user_id: claims.sub,
            email: claims.email.unwrap_or_default(),
            role: claims.role.unwrap_or_else(|| DEFAULT_ROLE.to_string()),
        }
    }
}

/// Why the auth middleware could not establish a caller. Stored in request
/// extensions so [`crate::RequireAuth`] can report it.
#[derive(Debug, Clone)]
pub struct AuthFailure(pub String);
