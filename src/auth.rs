use crate::error::ApiError;
use crate::models::User;
use crate::routes::AppState;
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// The caller identity resolved from a bearer token. Handlers receive this
/// as an extractor argument; a missing or unknown token rejects the request
/// before any handler logic runs.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: String,
    pub name: String,
    pub email: String,
    pub signature: String,
}

impl From<User> for AuthUser {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
            signature: user.signature,
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(ApiError::Auth("Missing authorization token"))?;
        let token = header
            .strip_prefix("Bearer ")
            .ok_or(ApiError::Auth("Missing authorization token"))?;

        let user = state
            .db
            .user_by_token(token)
            .await?
            .ok_or(ApiError::Auth("Invalid or expired token"))?;
        Ok(user.into())
    }
}

/// Opaque bearer token. Stored verbatim on the user row and rotated on
/// every login.
pub fn issue_token() -> String {
    format!(
        "{}{}",
        Uuid::new_v4().simple(),
        Uuid::new_v4().simple()
    )
}

/// `salt$hexdigest` where digest = sha256(salt || password).
pub fn hash_password(password: &str) -> String {
    let salt = Uuid::new_v4().simple().to_string();
    format!("{salt}${}", digest(&salt, password))
}

pub fn verify_password(password: &str, stored: &str) -> bool {
    match stored.split_once('$') {
        Some((salt, expected)) => digest(salt, password) == expected,
        None => false,
    }
}

fn digest(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}
