//! Auth gateway: credential hashing and bearer-token resolution.
//!
//! Tokens are opaque random strings persisted in the `sessions` table; the
//! only thing a request can learn from one is the identity it maps to.

use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
};
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};

use super::api::{ApiError, SharedState};
use crate::models::User;

/// The authenticated caller, attached to every task request.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: User,
    pub token: String,
}

impl FromRequestParts<SharedState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .ok_or_else(|| ApiError::Unauthorized("Missing bearer credential".into()))?
            .to_string();
        let user = authenticate(state, &token).await?;
        Ok(AuthUser { user, token })
    }
}

/// Resolve a bearer token to its user, or reject with 401.
pub async fn authenticate(state: &SharedState, token: &str) -> Result<User, ApiError> {
    let lookup = token.to_string();
    state
        .db
        .call(move |db| db.user_for_token(&lookup))
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::Unauthorized("Invalid or expired credential".into()))
}

/// Extract the credential from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    let token = token.trim();
    if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() {
        Some(token)
    } else {
        None
    }
}

/// Argon2id credential hash in PHC string form (`$argon2id$v=19$...`).
/// The salt and cost parameters travel inside the string.
pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?;
    Ok(hash.to_string())
}

/// Check `password` against a stored PHC string. Anything unparsable is a
/// mismatch.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_hash_and_verify_roundtrip() {
        let stored = hash_password("hunter2").unwrap();
        assert!(stored.starts_with("$argon2id$"));
        assert!(verify_password("hunter2", &stored));
        assert!(!verify_password("hunter3", &stored));
    }

    #[test]
    fn test_hash_is_salted() {
        assert_ne!(hash_password("same").unwrap(), hash_password("same").unwrap());
    }

    #[test]
    fn test_verify_rejects_malformed_hash() {
        assert!(!verify_password("x", "no-separator"));
        assert!(!verify_password("x", "salt$short"));
        assert!(!verify_password("x", "$argon2id$v=19$garbage"));
    }

    #[test]
    fn test_plain_digest_is_not_accepted() {
        // A bare hex digest is not a PHC string.
        let digest = "f52fbd32b2b3b86ff88ef6c490628285f482af15ddcb29541f94bcf526a3f6c7";
        assert!(!verify_password("hunter2", digest));
    }

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc123"));
        assert_eq!(bearer_token(&headers), Some("abc123"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("bearer   xyz "));
        assert_eq!(bearer_token(&headers), Some("xyz"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcjpwdw=="));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);
    }
}
