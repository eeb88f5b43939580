//! Client-side inspection of bearer tokens.
//!
//! Only the payload segment is decoded. Signatures are the server's
//! business; these claims drive UI decisions (expiry countdown, role-gated
//! screens) and nothing else.

use base64::{
    engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD},
    Engine as _,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Spring-style role prefix
const ROLE_PREFIX: &str = "ROLE_";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("Token is empty")]
    Empty,

    #[error("Token has {0} segments, expected 3")]
    SegmentCount(usize),

    #[error("Token payload is not base64url: {0}")]
    Base64(String),

    #[error("Token payload is not a JSON claims object: {0}")]
    Json(String),

    #[error("Token expired at {0}")]
    Expired(DateTime<Utc>),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "RawClaims")]
pub struct TokenClaims {
    pub sub: Option<String>,
    /// Expiry, seconds since the epoch.
    pub exp: Option<i64>,
    /// Issue time, seconds since the epoch.
    pub iat: Option<i64>,
    /// Union of the `roles` and `authorities` claims, first occurrence kept.
    pub roles: Vec<String>,
}

/// Wire shape: issuers put roles under `roles`, `authorities` or both.
#[derive(Deserialize)]
struct RawClaims {
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    exp: Option<i64>,
    #[serde(default)]
    iat: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_roles")]
    roles: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_roles")]
    authorities: Vec<String>,
}

impl From<RawClaims> for TokenClaims {
    fn from(raw: RawClaims) -> Self {
        let mut roles = raw.roles;
        for role in raw.authorities {
            if !roles.contains(&role) {
                roles.push(role);
            }
        }
        Self {
            sub: raw.sub,
            exp: raw.exp,
            iat: raw.iat,
            roles,
        }
    }
}

impl TokenClaims {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp.and_then(|exp| DateTime::from_timestamp(exp, 0))
    }

    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        self.iat.and_then(|iat| DateTime::from_timestamp(iat, 0))
    }

    /// Matches `ADMIN` against both `ADMIN` and `ROLE_ADMIN`.
    pub fn has_role(&self, role: &str) -> bool {
        let wanted = role.strip_prefix(ROLE_PREFIX).unwrap_or(role);
        self.roles.iter().any(|r| {
            r.strip_prefix(ROLE_PREFIX)
                .unwrap_or(r)
                .eq_ignore_ascii_case(wanted)
        })
    }

    pub fn is_admin(&self) -> bool {
        self.has_role("ADMIN")
    }
}

/// Roles arrive as `["ROLE_A"]`, `[{"authority": "ROLE_A"}]` or `"ROLE_A,ROLE_B"`.
fn deserialize_roles<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let roles = match value {
        Value::Null => Vec::new(),
        Value::String(s) => s
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .collect(),
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s),
                Value::Object(mut obj) => match obj.remove("authority") {
                    Some(Value::String(s)) => Some(s),
                    _ => None,
                },
                _ => None,
            })
            .collect(),
        other => {
            return Err(serde::de::Error::custom(format!(
                "unexpected roles claim: {}",
                other
            )))
        }
    };
    Ok(roles)
}

/// Outcome of inspecting a token.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenValidation {
    pub valid: bool,
    pub claims: Option<TokenClaims>,
    pub expires_at: Option<DateTime<Utc>>,
    pub error: Option<TokenError>,
}

impl TokenValidation {
    fn malformed(error: TokenError) -> Self {
        Self {
            valid: false,
            claims: None,
            expires_at: None,
            error: Some(error),
        }
    }
}

/// Decode the payload segment without checking the signature.
pub fn decode_claims(token: &str) -> Result<TokenClaims, TokenError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(TokenError::Empty);
    }

    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(TokenError::SegmentCount(segments.len()));
    }

    let payload = segments[1].trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .or_else(|_| STANDARD_NO_PAD.decode(payload))
        .map_err(|e| TokenError::Base64(e.to_string()))?;

    serde_json::from_slice(&bytes).map_err(|e| TokenError::Json(e.to_string()))
}

/// Inspect `token` as of `now`. Has no side effects.
///
/// A token without an `exp` claim is reported valid; the server remains
/// the authority on whether it is accepted.
pub fn validate_at(token: &str, now: DateTime<Utc>) -> TokenValidation {
    let claims = match decode_claims(token) {
        Ok(claims) => claims,
        Err(e) => return TokenValidation::malformed(e),
    };

    let expires_at = claims.expires_at();
    let error = match expires_at {
        Some(at) if at <= now => Some(TokenError::Expired(at)),
        _ => None,
    };

    TokenValidation {
        valid: error.is_none(),
        claims: Some(claims),
        expires_at,
        error,
    }
}

/// Build an unsigned token carrying `claims`. Used by tests and fixtures.
pub fn encode_unsigned(claims: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{}.{}.signature", header, payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn test_valid_token() {
        let now = Utc::now();
        let exp = (now + Duration::hours(1)).timestamp();
        let token = encode_unsigned(&json!({
            "sub": "maria@example.com",
            "exp": exp,
            "iat": now.timestamp(),
            "roles": ["ROLE_ADMIN", "ROLE_USER"]
        }));

        let result = validate_at(&token, now);
        assert!(result.valid);
        assert!(result.error.is_none());
        let claims = result.claims.unwrap();
        assert_eq!(claims.sub.as_deref(), Some("maria@example.com"));
        assert!(claims.is_admin());
        assert!(claims.has_role("user"));
        assert_eq!(result.expires_at.unwrap().timestamp(), exp);
        assert_eq!(claims.issued_at().unwrap().timestamp(), now.timestamp());
    }

    #[test]
    fn test_expired_token() {
        let now = Utc::now();
        let exp = now - Duration::minutes(1);
        let token = encode_unsigned(&json!({"sub": "x", "exp": exp.timestamp()}));

        let result = validate_at(&token, now);
        assert!(!result.valid);
        assert!(result.claims.is_some());
        assert!(matches!(result.error, Some(TokenError::Expired(_))));
    }

    #[test]
    fn test_missing_exp_is_valid() {
        let token = encode_unsigned(&json!({"sub": "x"}));
        let result = validate_at(&token, Utc::now());
        assert!(result.valid);
        assert!(result.expires_at.is_none());
    }

    #[test]
    fn test_malformed_tokens_have_distinct_reasons() {
        assert_eq!(validate_at("", Utc::now()).error, Some(TokenError::Empty));
        assert_eq!(validate_at("a.b", Utc::now()).error, Some(TokenError::SegmentCount(2)));
        assert!(matches!(validate_at("a.!!!.c", Utc::now()).error, Some(TokenError::Base64(_))));

        let not_json = format!("h.{}.s", URL_SAFE_NO_PAD.encode("not json"));
        let result = validate_at(&not_json, Utc::now());
        assert!(!result.valid);
        assert!(result.claims.is_none());
        assert!(matches!(result.error, Some(TokenError::Json(_))));
    }

    #[test]
    fn test_padded_payload_accepted() {
        let payload = base64::engine::general_purpose::URL_SAFE.encode(r#"{"sub":"abc"}"#);
        assert!(payload.ends_with('='));
        let token = format!("h.{}.s", payload);
        assert_eq!(decode_claims(&token).unwrap().sub.as_deref(), Some("abc"));
    }

    #[test]
    fn test_role_shapes() {
        let from_authorities = encode_unsigned(&json!({
            "authorities": [{"authority": "ROLE_MANAGER"}, {"authority": "ROLE_USER"}]
        }));
        let claims = decode_claims(&from_authorities).unwrap();
        assert_eq!(claims.roles, vec!["ROLE_MANAGER", "ROLE_USER"]);
        assert!(claims.has_role("ROLE_MANAGER"));
        assert!(!claims.is_admin());

        let from_string = encode_unsigned(&json!({"roles": "ROLE_ADMIN,ROLE_USER"}));
        assert!(decode_claims(&from_string).unwrap().is_admin());

        let both = encode_unsigned(&json!({
            "roles": ["ROLE_USER"],
            "authorities": [{"authority": "ROLE_ADMIN"}, {"authority": "ROLE_USER"}]
        }));
        let result = validate_at(&both, Utc::now());
        assert!(result.valid);
        let claims = result.claims.unwrap();
        assert_eq!(claims.roles, vec!["ROLE_USER", "ROLE_ADMIN"]);
        assert!(claims.is_admin());

        let bad = encode_unsigned(&json!({"roles": 5}));
        assert!(matches!(decode_claims(&bad), Err(TokenError::Json(_))));
    }
}
