//! Token helpers for tests in this and downstream crates

use jsonwebtoken::{encode, EncodingKey, Header};
use serde::Serialize;

/// Sign arbitrary claims with HS256
pub fn sign_claims<T: Serialize>(secret: &str, claims: &T) -> String {
    encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap_or_default()
}

/// Sign a token for `user_id` that is valid for ten minutes
pub fn sign_token(secret: &str, user_id: &str, email: &str) -> String {
    sign_claims(
        secret,
        &serde_json::json!({
            "sub": user_id,
            "email": email,
            "role": "authenticated",
            "aud": "authenticated",
            "iat": chrono::Utc::now().timestamp(),
            "exp": chrono::Utc::now().timestamp() + 600,
        }),
    )
}
