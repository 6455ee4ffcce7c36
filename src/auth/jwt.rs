//! Identity extraction from identity-provider access tokens.
//!
//! Tokens are parsed, not verified. They only ever come straight from the
//! provider's token endpoint or from the encrypted credential store.
//! Expired tokens decode fine; callers decide what expiry means.

use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::errors::AppError;

/// Identity carried by an access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JwtUserTokenInfo {
    pub user_guid: String,
    pub user_name: String,
    pub scope: Vec<String>,
    pub token_expiry: DateTime<Utc>,
}

impl JwtUserTokenInfo {
    pub fn has_scope(&self, scope: &str) -> bool {
        has_scope(&self.scope, scope)
    }
}

/// Exact membership; "stratos.admin.extra" does not grant "stratos.admin".
pub fn has_scope(scopes: &[String], wanted: &str) -> bool {
    !wanted.is_empty() && scopes.iter().any(|s| s == wanted)
}

pub fn decode(token: &str) -> Result<JwtUserTokenInfo, AppError> {
    let claims = decode_claims(token)?;

    let user_guid = string_claim(&claims, &["user_id", "sub"])
        .ok_or_else(|| AppError::MalformedToken("token carries no user id".into()))?;
    let user_name = string_claim(&claims, &["user_name", "preferred_username", "email"])
        .unwrap_or_default();

    let exp = claims
        .get("exp")
        .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
        .ok_or_else(|| AppError::MalformedToken("token carries no expiry".into()))?;
    let token_expiry = Utc
        .timestamp_opt(exp, 0)
        .single()
        .ok_or_else(|| AppError::MalformedToken(format!("expiry out of range: {}", exp)))?;

    Ok(JwtUserTokenInfo {
        user_guid,
        user_name,
        scope: scopes(&claims),
        token_expiry,
    })
}

// ── Claims ───────────────────────────────────────────────────

fn decode_claims(token: &str) -> Result<Value, AppError> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(AppError::MalformedToken(
            "invalid JWT format: expected 3 parts".into(),
        ));
    }

    let engine = base64::engine::general_purpose::URL_SAFE_NO_PAD;
    let payload = engine
        .decode(parts[1].trim_end_matches('='))
        .map_err(|e| AppError::MalformedToken(format!("JWT payload decode error: {}", e)))?;

    let claims: Value = serde_json::from_slice(&payload)
        .map_err(|e| AppError::MalformedToken(format!("JWT payload is not JSON: {}", e)))?;
    if !claims.is_object() {
        return Err(AppError::MalformedToken("JWT payload is not an object".into()));
    }
    Ok(claims)
}

fn string_claim(claims: &Value, names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|n| claims.get(*n).and_then(|v| v.as_str()))
        .find(|s| !s.is_empty())
        .map(String::from)
}

/// UAA issues `scope` as an array; OIDC providers as a space separated string.
fn scopes(claims: &Value) -> Vec<String> {
    match claims.get("scope") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(String::from)
            .collect(),
        Some(Value::String(s)) => s.split_whitespace().map(String::from).collect(),
        _ => Vec::new(),
    }
}
