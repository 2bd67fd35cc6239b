use anyhow::{anyhow, Result};
use argon2::password_hash::{
    rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use argon2::Argon2;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::api::AppState;
use crate::errors::{ApiError, ErrorContext};
use crate::models::User;

pub const MISSING_TOKEN_MESSAGE: &str = "Please log in first";
pub const INVALID_TOKEN_MESSAGE: &str = "Session expired, please log in again";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    pub user_id: i64,
    pub exp: i64,
    pub iat: i64,
}

/// The authenticated user, attached to the request by [`require_auth`].
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

/// Issues and validates HS256 bearer tokens.
#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiration_hours: i64,
}

impl TokenService {
    pub fn new(secret: &str, expiration_hours: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            expiration_hours,
        }
    }

    pub fn issue(&self, user_id: i64) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            user_id,
            iat: now.timestamp(),
            exp: (now + Duration::hours(self.expiration_hours)).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| anyhow!("failed to sign token: {}", e))
    }

    /// Returns the user id of a valid, unexpired token.
    pub fn verify(&self, token: &str) -> Result<i64> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        let decoded = decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|e| anyhow!("token rejected: {}", e))?;
        Ok(decoded.claims.user_id)
    }
}

pub fn hash_password(password: &str) -> Result<String> {
    if password.is_empty() {
        return Err(anyhow!("password is empty"));
    }
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| anyhow!(err.to_string()))?;
    Ok(hash.to_string())
}

pub fn verify_password(hash: &str, password: &str) -> bool {
    let parsed = match PasswordHash::new(hash) {
        Ok(value) => value,
        Err(err) => {
            warn!("password hash parse failed: {err}");
            return false;
        }
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Extracts the token from `Authorization: Bearer <token>`. A `Bearer<token>`
/// value without the separating space is accepted as well.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?.trim();
    let token = value.strip_prefix("Bearer")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Paths that must carry a valid token.
pub fn is_protected_path(path: &str) -> bool {
    path.starts_with("/api/") && !path.starts_with("/api/auth")
}

/// Auth gate for `/api/*` outside `/api/auth`.
pub async fn require_auth(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    if !is_protected_path(&path) {
        return next.run(request).await;
    }

    let context = || ErrorContext::new("authenticate", "session").with_id(&path);

    let Some(token) = bearer_token(request.headers()) else {
        return ApiError::Unauthorized(MISSING_TOKEN_MESSAGE.to_string())
            .to_response_with_context(context())
            .into_response();
    };

    let user_id = match state.tokens.verify(&token) {
        Ok(user_id) => user_id,
        Err(e) => {
            debug!(path = %path, error = %e, "Rejected bearer token");
            return ApiError::Unauthorized(INVALID_TOKEN_MESSAGE.to_string())
                .to_response_with_context(context())
                .into_response();
        }
    };

    match state.db.get_user_by_id(user_id).await {
        Ok(Some(user)) => {
            request.extensions_mut().insert(CurrentUser(user));
            next.run(request).await
        }
        Ok(None) => ApiError::Unauthorized(INVALID_TOKEN_MESSAGE.to_string())
            .to_response_with_context(context().with_user(user_id))
            .into_response(),
        Err(e) => ApiError::DatabaseError(e)
            .to_response_with_context(context().with_user(user_id))
            .into_response(),
    }
}
