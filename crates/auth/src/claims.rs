use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

use multiroom_core::{ServiceError, SubjectId};

/// Kind of credential, carried in the `type` claim.
///
/// A token is only accepted where its type is expected; an admin token is not
/// an app token even when it is otherwise valid.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenType {
    #[serde(rename = "access-token-app")]
    AccessApp,
    #[serde(rename = "access-token-admin")]
    AccessAdmin,
    #[serde(rename = "refresh-token")]
    Refresh,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::AccessApp => "access-token-app",
            TokenType::AccessAdmin => "access-token-admin",
            TokenType::Refresh => "refresh-token",
        }
    }

    /// Path segment of the authority verification endpoint for this type.
    pub fn audience(&self) -> &'static str {
        match self {
            TokenType::AccessApp => "app",
            TokenType::AccessAdmin => "admin",
            TokenType::Refresh => "refresh",
        }
    }
}

impl core::fmt::Display for TokenType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for TokenType {
    type Err = TokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "access-token-app" => Ok(TokenType::AccessApp),
            "access-token-admin" => Ok(TokenType::AccessAdmin),
            "refresh-token" => Ok(TokenType::Refresh),
            other => Err(TokenError::UnknownType(other.to_string())),
        }
    }
}

/// Validated claims of a bearer credential.
///
/// Populated once at verification time; every field is checked before a
/// value of this type exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "id")]
    pub subject: SubjectId,

    #[serde(rename = "type")]
    pub token_type: TokenType,

    /// Expiration as unix seconds.
    #[serde(rename = "expiration")]
    pub expires_at: i64,

    /// Free-form claims the issuer added.
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl Claims {
    pub fn new(subject: SubjectId, token_type: TokenType, expires_at: i64) -> Self {
        Self {
            subject,
            token_type,
            expires_at,
            extra: Map::new(),
        }
    }

    pub fn with_claim(mut self, name: impl Into<String>, value: JsonValue) -> Self {
        self.extra.insert(name.into(), value);
        self
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("credential missing")]
    Missing,

    #[error("unsupported signing algorithm {0}")]
    UnsupportedAlgorithm(String),

    #[error("credential could not be parsed or its signature is invalid")]
    Invalid,

    #[error("wrong token type (expected {expected}, found {found})")]
    WrongType { expected: TokenType, found: String },

    #[error("unknown token type '{0}'")]
    UnknownType(String),

    #[error("expiration claim missing or not numeric")]
    MalformedExpiration,

    #[error("token has expired")]
    Expired,

    #[error("subject id missing or not numeric")]
    InvalidSubject,
}

impl From<TokenError> for ServiceError {
    fn from(_: TokenError) -> Self {
        ServiceError::Unauthorized
    }
}

/// Claims as they come off the wire, before any check.
#[derive(Debug, Deserialize)]
pub(crate) struct RawClaims {
    #[serde(rename = "type", default)]
    pub token_type: Option<JsonValue>,
    #[serde(default)]
    pub expiration: Option<JsonValue>,
    #[serde(default)]
    pub id: Option<JsonValue>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl RawClaims {
    /// Check the raw claims in order: type, expiration, subject.
    pub(crate) fn validate(self, expected: TokenType, now_unix: i64) -> Result<Claims, TokenError> {
        let found = match self.token_type {
            Some(JsonValue::String(s)) => s,
            Some(other) => other.to_string(),
            None => String::new(),
        };
        if found != expected.as_str() {
            return Err(TokenError::WrongType { expected, found });
        }

        let expires_at = self
            .expiration
            .as_ref()
            .and_then(unix_seconds)
            .ok_or(TokenError::MalformedExpiration)?;
        if now_unix >= expires_at {
            return Err(TokenError::Expired);
        }

        let subject = self
            .id
            .as_ref()
            .and_then(subject_id)
            .ok_or(TokenError::InvalidSubject)?;

        Ok(Claims {
            subject,
            token_type: expected,
            expires_at,
            extra: self.extra,
        })
    }
}

fn unix_seconds(value: &JsonValue) -> Option<i64> {
    if let Some(n) = value.as_i64() {
        return Some(n);
    }
    // Rounded up: `now >= ceil(exp)` holds exactly when `now >= exp` for whole seconds.
    let f = value.as_f64()?;
    f.is_finite().then(|| f.ceil() as i64)
}

/// Accepts integer and integral floating-point renderings of the subject id.
fn subject_id(value: &JsonValue) -> Option<SubjectId> {
    if let Some(n) = value.as_i64() {
        return Some(SubjectId::new(n));
    }
    let f = value.as_f64()?;
    if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        Some(SubjectId::new(f as i64))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: JsonValue) -> RawClaims {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn accepts_float_subject_and_keeps_extra_claims() {
        let claims = raw(json!({
            "type": "access-token-app",
            "expiration": 2_000,
            "id": 42.0,
            "sucursal": 3
        }))
        .validate(TokenType::AccessApp, 1_000)
        .unwrap();

        assert_eq!(claims.subject, SubjectId::new(42));
        assert_eq!(claims.expires_at, 2_000);
        assert_eq!(claims.extra.get("sucursal"), Some(&json!(3)));
    }

    #[test]
    fn type_is_checked_before_expiration() {
        let err = raw(json!({"type": "access-token-admin", "expiration": 1, "id": 1}))
            .validate(TokenType::AccessApp, 1_000)
            .unwrap_err();
        assert!(matches!(err, TokenError::WrongType { .. }));
    }

    #[test]
    fn expiration_boundary_is_exclusive() {
        let claims = json!({"type": "access-token-app", "expiration": 1_000, "id": 1});
        assert_eq!(
            raw(claims.clone()).validate(TokenType::AccessApp, 1_000).unwrap_err(),
            TokenError::Expired
        );
        assert!(raw(claims).validate(TokenType::AccessApp, 999).is_ok());
    }

    #[test]
    fn fractional_expiration_is_not_cut_short() {
        let claims = json!({"type": "access-token-app", "expiration": 1_000.5, "id": 1});

        assert!(raw(claims.clone()).validate(TokenType::AccessApp, 1_000).is_ok());
        assert_eq!(
            raw(claims).validate(TokenType::AccessApp, 1_001).unwrap_err(),
            TokenError::Expired
        );
    }

    #[test]
    fn non_numeric_expiration_is_malformed() {
        for expiration in [json!("tomorrow"), json!(null), json!({"at": 5})] {
            let err = raw(json!({"type": "access-token-app", "expiration": expiration, "id": 1}))
                .validate(TokenType::AccessApp, 0)
                .unwrap_err();
            assert_eq!(err, TokenError::MalformedExpiration);
        }

        let err = raw(json!({"type": "access-token-app", "id": 1}))
            .validate(TokenType::AccessApp, 0)
            .unwrap_err();
        assert_eq!(err, TokenError::MalformedExpiration);
    }

    #[test]
    fn unsupported_subject_representations_fail_closed() {
        for id in [json!("42"), json!(4.5), json!(true), json!(null)] {
            let err = raw(json!({"type": "access-token-app", "expiration": 10, "id": id}))
                .validate(TokenType::AccessApp, 0)
                .unwrap_err();
            assert_eq!(err, TokenError::InvalidSubject);
        }
    }

    #[test]
    fn token_type_round_trips_through_its_wire_name() {
        for t in [TokenType::AccessApp, TokenType::AccessAdmin, TokenType::Refresh] {
            assert_eq!(t.as_str().parse::<TokenType>().unwrap(), t);
        }
        assert!("access-token-App".parse::<TokenType>().is_err());
    }
}
