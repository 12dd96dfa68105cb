// src/host/auth.rs
// Caller identity: bearer-token decoding and the caller context

use axum::http::HeaderMap;
use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};

use crate::error::{DriftError, Result};
use crate::tools::Role;

pub const SESSION_HEADER: &str = "x-session-id";
pub const INSTANCE_HEADER: &str = "x-instance-id";

/// Who is calling: role plus optional session binding and expiry
#[derive(Debug, Clone, Serialize)]
pub struct CallerContext {
    pub role: Role,
    pub session_id: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub instance_id: Option<String>,
}

impl Default for CallerContext {
    fn default() -> Self {
        Self {
            role: Role::default(),
            session_id: None,
            expires_at: None,
            instance_id: None,
        }
    }
}

impl CallerContext {
    /// `Unauthorized` once the credential has expired
    pub fn check_expiry(&self) -> Result<()> {
        if let Some(expires_at) = self.expires_at {
            if expires_at < Utc::now() {
                return Err(DriftError::unauthorized(
                    "credential expired; re-authenticate and retry",
                ));
            }
        }
        Ok(())
    }
}

/// Minimal claims the host consumes from a bearer token
#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(default)]
    role: Option<String>,
    #[serde(default, alias = "sessionID", alias = "session_id")]
    session_id: Option<String>,
    #[serde(default)]
    exp: Option<i64>,
}

/// Decode a bearer token. An expired or undecodable token is
/// `Unauthorized`; an unknown role string falls back to the default role.
pub fn decode_token(token: &str, secret: &str) -> Result<CallerContext> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.required_spec_claims.clear();
    validation.validate_exp = true;

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|err| {
        DriftError::unauthorized(format!(
            "invalid credential: {err}; re-authenticate and retry"
        ))
    })?;

    let claims = data.claims;
    Ok(CallerContext {
        role: claims
            .role
            .as_deref()
            .and_then(Role::parse)
            .unwrap_or_default(),
        session_id: claims.session_id,
        expires_at: claims
            .exp
            .and_then(|exp| Utc.timestamp_opt(exp, 0).single()),
        instance_id: None,
    })
}

/// Build the caller context from request headers. Absent credentials yield
/// the default role; a present-but-bad credential is an error.
pub fn caller_from_headers(headers: &HeaderMap, secret: &str) -> Result<CallerContext> {
    let mut caller = match bearer_token(headers) {
        Some(token) => decode_token(&token, secret)?,
        None => CallerContext::default(),
    };

    // An explicit session header overrides the token's binding
    if let Some(session) = header_value(headers, SESSION_HEADER) {
        caller.session_id = Some(session);
    }
    caller.instance_id = header_value(headers, INSTANCE_HEADER);
    Ok(caller)
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get("authorization")?.to_str().ok()?;
    value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .map(|token| token.trim().to_string())
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
}
