use multiroom_auth::{Identity, TokenType};
use multiroom_core::{SubjectId, UserKey};

/// Principal context for a request (verified identity + raw bearer).
///
/// Inserted by the authentication middleware before any handler or
/// WebSocket upgrade runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalContext {
    identity: Identity,
}

impl PrincipalContext {
    pub fn new(identity: Identity) -> Self {
        Self { identity }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn subject(&self) -> SubjectId {
        self.identity.subject
    }

    pub fn token_type(&self) -> TokenType {
        self.identity.token_type
    }

    pub fn user_key(&self) -> UserKey {
        self.identity.user_key()
    }
}
