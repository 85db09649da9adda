//! Session tokens
//!
//! HS256 JSON web tokens signed with the configured secret, and the two
//! middlewares that read them: [`protect`] rejects requests without a valid
//! token, [`is_logged_in`] only annotates the request when one is present.

use std::time::Duration;

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::config::AuthConfig;
use crate::error::{AppError, RawFailure};
use crate::pipeline::Cookies;
use crate::server::AppState;

type HmacSha256 = Hmac<Sha256>;

/// Message for requests that reach a protected route without a token.
pub const NOT_LOGGED_IN_MESSAGE: &str = "You are not logged in! Please log in to get access.";

const HS256_HEADER: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

/// Token payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub id: String,
    /// Issued at, seconds since the epoch.
    pub iat: i64,
    /// Expires at, seconds since the epoch.
    pub exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenHeader {
    alg: String,
}

/// The authenticated user, attached to request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: String,
}

/// Checks a session token.
pub trait TokenVerifier: Send + Sync {
    /// Decode and check `token`. Failures are `TokenMalformed` or `TokenExpired`.
    fn verify(&self, token: &str) -> Result<Claims, RawFailure>;
}

/// HMAC-SHA256 signed tokens.
#[derive(Clone)]
pub struct Hs256Verifier {
    secret: Vec<u8>,
    expires_in: Duration,
}

impl std::fmt::Debug for Hs256Verifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hs256Verifier")
            .field("expires_in", &self.expires_in)
            .finish_non_exhaustive()
    }
}

impl Hs256Verifier {
    pub fn new(secret: impl AsRef<[u8]>, expires_in: Duration) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
            expires_in,
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(
            &config.jwt_secret,
            Duration::from_secs(config.jwt_expires_in_secs),
        )
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(&self.secret).expect("HMAC can take any key size")
    }

    /// Issue a token for `user_id`, valid from now.
    pub fn sign(&self, user_id: &str) -> String {
        self.sign_at(user_id, Utc::now().timestamp())
    }

    /// Issue a token for `user_id` as if issued at `now`.
    pub fn sign_at(&self, user_id: &str, now: i64) -> String {
        let claims = Claims {
            id: user_id.to_string(),
            iat: now,
            exp: now.saturating_add(i64::try_from(self.expires_in.as_secs()).unwrap_or(i64::MAX)),
        };
        // Claims hold only strings and integers.
        let payload = serde_json::to_vec(&claims).unwrap_or_default();

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(HS256_HEADER),
            URL_SAFE_NO_PAD.encode(payload)
        );
        let mut mac = self.mac();
        mac.update(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        format!("{}.{}", signing_input, signature)
    }

    /// Check `token` against the clock value `now`.
    pub fn verify_at(&self, token: &str, now: i64) -> Result<Claims, RawFailure> {
        let mut parts = token.split('.');
        let (Some(header), Some(payload), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(RawFailure::token_malformed("jwt malformed"));
        };

        let header: TokenHeader = decode_segment(header)?;
        if header.alg != "HS256" {
            return Err(RawFailure::token_malformed("invalid algorithm"));
        }

        let signing_input = &token[..token.len() - signature.len() - 1];
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| RawFailure::token_malformed("invalid signature"))?;
        let mut mac = self.mac();
        mac.update(signing_input.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| RawFailure::token_malformed("invalid signature"))?;

        let claims: Claims = decode_segment(payload)?;
        if claims.exp <= now {
            return Err(RawFailure::token_expired(DateTime::from_timestamp(
                claims.exp, 0,
            )));
        }
        Ok(claims)
    }
}

fn decode_segment<T: for<'de> Deserialize<'de>>(segment: &str) -> Result<T, RawFailure> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| RawFailure::token_malformed("jwt malformed"))?;
    serde_json::from_slice(&bytes).map_err(|_| RawFailure::token_malformed("jwt malformed"))
}

impl TokenVerifier for Hs256Verifier {
    fn verify(&self, token: &str) -> Result<Claims, RawFailure> {
        self.verify_at(token, Utc::now().timestamp())
    }
}

/// Token from `Authorization: Bearer`, else from the session cookie.
fn extract_token(headers: &HeaderMap, cookies: Option<&Cookies>, cookie_name: &str) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }
    cookies
        .and_then(|c| c.get(cookie_name))
        .filter(|t| !t.is_empty() && *t != "loggedout")
        .map(str::to_string)
}

/// Reject requests without a valid token before they reach the handler.
pub async fn protect(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let token = extract_token(
        request.headers(),
        request.extensions().get::<Cookies>(),
        &state.config.auth.cookie_name,
    );
    let Some(token) = token else {
        return RawFailure::from(AppError::new(NOT_LOGGED_IN_MESSAGE, StatusCode::UNAUTHORIZED))
            .into_response();
    };

    match state.verifier.verify(&token) {
        Ok(claims) => {
            request.extensions_mut().insert(CurrentUser { id: claims.id });
            next.run(request).await
        }
        Err(failure) => failure.into_response(),
    }
}

/// Attach the user when the session cookie holds a valid token. Never fails.
pub async fn is_logged_in(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let user = request
        .extensions()
        .get::<Cookies>()
        .and_then(|c| c.get(&state.config.auth.cookie_name))
        .and_then(|token| state.verifier.verify(token).ok())
        .map(|claims| CurrentUser { id: claims.id });
    if let Some(user) = user {
        request.extensions_mut().insert(user);
    }
    next.run(request).await
}
