use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use multiroom_core::{SubjectId, UserKey};

use crate::{Claims, Permission, TokenType};

/// Verified identity attached to a request.
///
/// Keeps the raw bearer so it can be forwarded to an authority service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub subject: SubjectId,
    pub token_type: TokenType,
    pub bearer: String,
}

impl Identity {
    pub fn from_claims(claims: &Claims, bearer: impl Into<String>) -> Self {
        Self {
            subject: claims.subject,
            token_type: claims.token_type,
            bearer: bearer.into(),
        }
    }

    pub fn user_key(&self) -> UserKey {
        UserKey::from(self.subject)
    }
}

/// One permission granted to a principal, as the authority serializes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionGrant {
    #[serde(rename = "nombre")]
    pub name: Permission,

    #[serde(flatten)]
    pub attributes: Map<String, JsonValue>,
}

impl PermissionGrant {
    pub fn new(name: Permission) -> Self {
        Self {
            name,
            attributes: Map::new(),
        }
    }
}

/// Full principal record including its permission list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrincipalRecord {
    pub id: SubjectId,

    #[serde(rename = "permisos", default)]
    pub permissions: Vec<PermissionGrant>,

    /// Remaining profile fields (name, email, branch, ...), passed through untouched.
    #[serde(flatten)]
    pub attributes: Map<String, JsonValue>,
}

impl PrincipalRecord {
    pub fn new(id: SubjectId, permissions: impl IntoIterator<Item = Permission>) -> Self {
        Self {
            id,
            permissions: permissions.into_iter().map(PermissionGrant::new).collect(),
            attributes: Map::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: JsonValue) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    pub fn permission_names(&self) -> impl Iterator<Item = &Permission> {
        self.permissions.iter().map(|g| &g.name)
    }
}

/// Response envelope of the authority verification endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorityEnvelope<T> {
    pub code: u16,
    pub message: String,
    pub data: Option<T>,
}

impl<T> AuthorityEnvelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            code: 200,
            message: "ok".to_string(),
            data: Some(data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_authority_envelope() {
        let body = json!({
            "code": 200,
            "message": "usuario verificado",
            "data": {
                "id": 42,
                "nombre": "Ana",
                "permisos": [
                    {"nombre": "enviar_notificaciones", "descripcion": "push"},
                    {"nombre": "gestionar_salas"}
                ]
            }
        });

        let envelope: AuthorityEnvelope<PrincipalRecord> = serde_json::from_value(body).unwrap();
        let principal = envelope.data.unwrap();

        assert_eq!(principal.id, SubjectId::new(42));
        let names: Vec<_> = principal.permission_names().map(|p| p.as_str()).collect();
        assert_eq!(names, ["enviar_notificaciones", "gestionar_salas"]);
        assert_eq!(principal.attributes.get("nombre"), Some(&json!("Ana")));
        assert_eq!(principal.permissions[0].attributes.get("descripcion"), Some(&json!("push")));
    }

    #[test]
    fn missing_permission_list_means_no_permissions() {
        let principal: PrincipalRecord = serde_json::from_value(json!({"id": 3})).unwrap();
        assert!(principal.permissions.is_empty());
    }
}
