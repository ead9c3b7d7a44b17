//! Bearer credential signing and verification (HS256 only).

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};

use multiroom_core::SubjectId;

use crate::claims::{Claims, RawClaims, TokenError, TokenType};

/// Verifies a bearer credential and returns typed claims.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str, expected: TokenType, now: DateTime<Utc>) -> Result<Claims, TokenError>;
}

/// HMAC-SHA256 verifier over a shared secret.
#[derive(Clone)]
pub struct Hs256TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl Hs256TokenVerifier {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry lives in the `expiration` claim and is checked by `RawClaims`.
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        Self {
            key: DecodingKey::from_secret(secret.as_ref()),
            validation,
        }
    }
}

impl core::fmt::Debug for Hs256TokenVerifier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Hs256TokenVerifier").finish_non_exhaustive()
    }
}

impl TokenVerifier for Hs256TokenVerifier {
    fn verify(&self, token: &str, expected: TokenType, now: DateTime<Utc>) -> Result<Claims, TokenError> {
        if token.is_empty() {
            return Err(TokenError::Missing);
        }

        // The algorithm is pinned before any claim is looked at.
        let header = jsonwebtoken::decode_header(token).map_err(|_| TokenError::Invalid)?;
        if header.alg != Algorithm::HS256 {
            return Err(TokenError::UnsupportedAlgorithm(format!("{:?}", header.alg)));
        }

        let data = jsonwebtoken::decode::<RawClaims>(token, &self.key, &self.validation)
            .map_err(|_| TokenError::Invalid)?;

        data.claims.validate(expected, now.timestamp())
    }
}

/// Issues HS256 credentials; used by the authentication service and dev tooling.
#[derive(Clone)]
pub struct TokenSigner {
    key: EncodingKey,
}

impl TokenSigner {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            key: EncodingKey::from_secret(secret.as_ref()),
        }
    }

    pub fn sign(&self, claims: &Claims) -> Result<String, TokenError> {
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &self.key)
            .map_err(|_| TokenError::Invalid)
    }

    /// Sign a token for `subject` that expires `ttl` from `now`.
    pub fn issue(
        &self,
        subject: SubjectId,
        token_type: TokenType,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<String, TokenError> {
        self.sign(&Claims::new(subject, token_type, (now + ttl).timestamp()))
    }
}

impl core::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TokenSigner").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SECRET: &str = "test-secret";

    fn verifier() -> Hs256TokenVerifier {
        Hs256TokenVerifier::new(SECRET)
    }

    fn encode_with(alg: Algorithm, claims: serde_json::Value, secret: &str) -> String {
        jsonwebtoken::encode(&Header::new(alg), &claims, &EncodingKey::from_secret(secret.as_bytes()))
            .unwrap()
    }

    #[test]
    fn issued_token_verifies() {
        let now = Utc::now();
        let token = TokenSigner::new(SECRET)
            .issue(SubjectId::new(42), TokenType::AccessApp, now, Duration::minutes(10))
            .unwrap();

        let claims = verifier().verify(&token, TokenType::AccessApp, now).unwrap();
        assert_eq!(claims.subject, SubjectId::new(42));
        assert_eq!(claims.token_type, TokenType::AccessApp);
    }

    #[test]
    fn empty_token_is_missing() {
        assert_eq!(
            verifier().verify("", TokenType::AccessApp, Utc::now()).unwrap_err(),
            TokenError::Missing
        );
    }

    #[test]
    fn past_expiration_is_rejected_despite_valid_signature_and_type() {
        let now = Utc::now();
        let token = TokenSigner::new(SECRET)
            .issue(SubjectId::new(1), TokenType::AccessApp, now, Duration::seconds(-5))
            .unwrap();

        assert_eq!(
            verifier().verify(&token, TokenType::AccessApp, now).unwrap_err(),
            TokenError::Expired
        );
    }

    #[test]
    fn other_hmac_algorithms_are_rejected_regardless_of_claims() {
        let claims = json!({
            "type": "access-token-app",
            "expiration": Utc::now().timestamp() + 600,
            "id": 7
        });

        for alg in [Algorithm::HS384, Algorithm::HS512] {
            let token = encode_with(alg, claims.clone(), SECRET);
            let err = verifier().verify(&token, TokenType::AccessApp, Utc::now()).unwrap_err();
            assert!(matches!(err, TokenError::UnsupportedAlgorithm(_)), "{alg:?}: {err:?}");
        }
    }

    #[test]
    fn unsigned_token_is_rejected() {
        // {"alg":"none","typ":"JWT"}
        let header = "eyJhbGciOiJub25lIiwidHlwIjoiSldUIn0";
        let payload = "eyJ0eXBlIjoiYWNjZXNzLXRva2VuLWFwcCIsImV4cGlyYXRpb24iOjk5OTk5OTk5OTksImlkIjoxfQ";
        let token = format!("{header}.{payload}.");

        assert!(verifier().verify(&token, TokenType::AccessApp, Utc::now()).is_err());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = encode_with(
            Algorithm::HS256,
            json!({"type": "access-token-app", "expiration": Utc::now().timestamp() + 600, "id": 7}),
            "another-secret",
        );
        assert_eq!(
            verifier().verify(&token, TokenType::AccessApp, Utc::now()).unwrap_err(),
            TokenError::Invalid
        );
    }

    #[test]
    fn admin_token_where_app_token_is_required_is_rejected() {
        let now = Utc::now();
        let token = TokenSigner::new(SECRET)
            .issue(SubjectId::new(9), TokenType::AccessAdmin, now, Duration::minutes(10))
            .unwrap();

        let err = verifier().verify(&token, TokenType::AccessApp, now).unwrap_err();
        assert_eq!(
            err,
            TokenError::WrongType {
                expected: TokenType::AccessApp,
                found: "access-token-admin".to_string(),
            }
        );
    }

    #[test]
    fn garbage_is_invalid() {
        assert_eq!(
            verifier().verify("not-a-token", TokenType::AccessApp, Utc::now()).unwrap_err(),
            TokenError::Invalid
        );
    }
}
