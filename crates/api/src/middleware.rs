use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use serde::Deserialize;
use tracing::debug;

use multiroom_auth::{Identity, TokenType, TokenVerifier};

use crate::app::errors::json_error;
use crate::context::PrincipalContext;

/// Where the credential travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// `Authorization: Bearer <token>`.
    BearerHeader,
    /// `?token=<token>`; browsers cannot set headers on a WebSocket upgrade.
    QueryParam,
}

/// Authentication requirements of one route group.
#[derive(Clone)]
pub struct AuthState {
    pub verifier: Arc<dyn TokenVerifier>,
    pub expected: TokenType,
    pub source: CredentialSource,
}

impl AuthState {
    pub fn new(verifier: Arc<dyn TokenVerifier>, expected: TokenType, source: CredentialSource) -> Self {
        Self {
            verifier,
            expected,
            source,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: String,
}

pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let token = match state.source {
        CredentialSource::BearerHeader => extract_bearer(req.headers())?.to_string(),
        CredentialSource::QueryParam => extract_query_token(req.uri())?,
    };

    let claims = state
        .verifier
        .verify(&token, state.expected, Utc::now())
        .map_err(|e| {
            debug!(error = %e, expected = %state.expected, path = %req.uri().path(), "credential rejected");
            unauthorized()
        })?;

    req.extensions_mut()
        .insert(PrincipalContext::new(Identity::from_claims(&claims, token)));

    Ok(next.run(req).await)
}

fn unauthorized() -> Response {
    json_error(StatusCode::UNAUTHORIZED, "unauthorized", "authentication required")
}

fn extract_bearer(headers: &HeaderMap) -> Result<&str, Response> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or_else(unauthorized)?;

    let header = header.to_str().map_err(|_| unauthorized())?;

    let header = header.strip_prefix("Bearer ").ok_or_else(unauthorized)?;

    let token = header.trim();
    if token.is_empty() {
        return Err(unauthorized());
    }

    Ok(token)
}

fn extract_query_token(uri: &axum::http::Uri) -> Result<String, Response> {
    let Query(query) = Query::<TokenQuery>::try_from_uri(uri).map_err(|_| unauthorized())?;
    if query.token.is_empty() {
        return Err(unauthorized());
    }
    Ok(query.token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, Uri};

    #[test]
    fn bearer_header_is_required_and_trimmed() {
        let mut headers = HeaderMap::new();
        assert!(extract_bearer(&headers).is_err());

        headers.insert("authorization", HeaderValue::from_static("Basic abc"));
        assert!(extract_bearer(&headers).is_err());

        headers.insert("authorization", HeaderValue::from_static("Bearer   "));
        assert!(extract_bearer(&headers).is_err());

        headers.insert("authorization", HeaderValue::from_static("Bearer abc.def.ghi "));
        assert_eq!(extract_bearer(&headers).unwrap(), "abc.def.ghi");
    }

    #[test]
    fn query_token_is_required() {
        let uri: Uri = "/ws?token=abc.def.ghi".parse().unwrap();
        assert_eq!(extract_query_token(&uri).unwrap(), "abc.def.ghi");

        for missing in ["/ws", "/ws?token=", "/ws?other=1"] {
            let uri: Uri = missing.parse().unwrap();
            assert!(extract_query_token(&uri).is_err(), "{missing}");
        }
    }
}
