use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use scriptflow_core::{AuthConfig, User, UserId};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{error::ApiError, metrics::HTTP_AUTH_FAILURES_TOTAL, middleware::extract_client_ip, AppState};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: UserId,
    pub email: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// HS256 token issuing and verification.
pub struct JwtManager {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl JwtManager {
    pub fn new(config: &AuthConfig) -> Self {
        let secret = config.jwt_secret.expose_secret().as_bytes();
        // Capped at ten years.
        let ttl_secs = config.token_ttl_secs.min(315_360_000) as i64;
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
            ttl: Duration::seconds(ttl_secs),
        }
    }

    pub fn issue(&self, user: &User) -> Result<IssuedToken, ApiError> {
        let now = Utc::now();
        let expires_at = now + self.ttl;
        let claims = Claims {
            sub: user.id,
            email: user.email.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| ApiError::Internal(format!("Failed to sign token: {}", e)))?;
        Ok(IssuedToken { token, expires_at })
    }

    pub fn verify(&self, token: &str) -> Result<Claims, ApiError> {
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                debug!("Rejected token: {}", e);
                ApiError::Unauthorized("Invalid or expired token".into())
            })
    }
}

/// Argon2id hash in PHC string form. CPU bound; call from a blocking task.
pub fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ApiError::Internal(format!("Failed to hash password: {}", e)))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            warn!("Stored password hash is unreadable: {}", e);
            false
        }
    }
}

/// The authenticated caller, placed in request extensions by [`require_auth`].
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: UserId,
    pub email: String,
}

impl<S: Send + Sync> FromRequestParts<S> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or_else(|| ApiError::Unauthorized("Authentication required".into()))
    }
}

fn bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Rejects requests without a valid bearer token for an existing user.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let client_ip = extract_client_ip(&req);
    let claims = match bearer_token(&req) {
        Some(token) => state.jwt.verify(token),
        None => Err(ApiError::Unauthorized("Authentication required".into())),
    };
    let claims = match claims {
        Ok(claims) => claims,
        Err(e) => {
            HTTP_AUTH_FAILURES_TOTAL.inc();
            warn!(ip = %client_ip, path = %req.uri().path(), "Authentication failed: {}", e);
            return Err(e);
        }
    };

    if state.repository.find_user(claims.sub).await?.is_none() {
        HTTP_AUTH_FAILURES_TOTAL.inc();
        warn!(ip = %client_ip, user_id = %claims.sub, "Token refers to an unknown user");
        return Err(ApiError::Unauthorized("Invalid or expired token".into()));
    }

    req.extensions_mut().insert(AuthUser {
        id: claims.sub,
        email: claims.email,
    });
    Ok(next.run(req).await)
}
