use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use multiroom_core::{ServiceError, ServiceResult, SubjectId};

use crate::{Identity, Permission, PrincipalRecord};

/// Authorize a principal against one required permission.
///
/// - No IO
/// - No panics
/// - Exact, case-sensitive match; any match grants
pub fn authorize(principal: &PrincipalRecord, required: &Permission) -> ServiceResult<()> {
    if principal.permission_names().any(|p| p.as_str() == required.as_str()) {
        Ok(())
    } else {
        Err(ServiceError::forbidden(required.as_str()))
    }
}

/// Capability: "check permission for principal".
///
/// Implementations decide where the principal record comes from: a local
/// store, a remote authority or a cache in front of either.
#[async_trait]
pub trait AuthorizationClient: Send + Sync {
    /// Resolve the full principal record for a verified identity.
    async fn principal(&self, identity: &Identity) -> ServiceResult<PrincipalRecord>;

    /// Resolve the principal and require `permission`.
    async fn check_permission(
        &self,
        identity: &Identity,
        permission: &Permission,
    ) -> ServiceResult<PrincipalRecord> {
        let principal = self.principal(identity).await?;
        authorize(&principal, permission)?;
        Ok(principal)
    }
}

#[async_trait]
impl<A> AuthorizationClient for Arc<A>
where
    A: AuthorizationClient + ?Sized,
{
    async fn principal(&self, identity: &Identity) -> ServiceResult<PrincipalRecord> {
        (**self).principal(identity).await
    }
}

/// Store of principals owned by this service.
#[async_trait]
pub trait PrincipalDirectory: Send + Sync {
    async fn find(&self, id: SubjectId) -> ServiceResult<Option<PrincipalRecord>>;
}

#[async_trait]
impl<D> PrincipalDirectory for Arc<D>
where
    D: PrincipalDirectory + ?Sized,
{
    async fn find(&self, id: SubjectId) -> ServiceResult<Option<PrincipalRecord>> {
        (**self).find(id).await
    }
}

/// Authorization backed by the service's own principal data.
#[derive(Debug, Clone)]
pub struct LocalAuthorization<D> {
    directory: D,
}

impl<D> LocalAuthorization<D> {
    pub fn new(directory: D) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl<D> AuthorizationClient for LocalAuthorization<D>
where
    D: PrincipalDirectory,
{
    async fn principal(&self, identity: &Identity) -> ServiceResult<PrincipalRecord> {
        match self.directory.find(identity.subject).await? {
            Some(principal) => Ok(principal),
            None => {
                debug!(subject = %identity.subject, "principal not found in local directory");
                Err(ServiceError::NotFound)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TokenType;
    use proptest::prelude::*;
    use std::collections::HashMap;

    struct MapDirectory(HashMap<SubjectId, PrincipalRecord>);

    #[async_trait]
    impl PrincipalDirectory for MapDirectory {
        async fn find(&self, id: SubjectId) -> ServiceResult<Option<PrincipalRecord>> {
            Ok(self.0.get(&id).cloned())
        }
    }

    fn identity(id: i64) -> Identity {
        Identity {
            subject: SubjectId::new(id),
            token_type: TokenType::AccessAdmin,
            bearer: "token".to_string(),
        }
    }

    fn principal_with(perms: &[&'static str]) -> PrincipalRecord {
        PrincipalRecord::new(SubjectId::new(1), perms.iter().copied().map(Permission::from_static))
    }

    #[test]
    fn exact_match_grants() {
        let p = principal_with(&["ver_salas", "gestionar_salas"]);
        assert!(authorize(&p, &Permission::from_static("gestionar_salas")).is_ok());
    }

    #[test]
    fn near_matches_deny() {
        let p = principal_with(&["gestionar_salas"]);
        for candidate in ["Gestionar_salas", "GESTIONAR_SALAS", "gestionar_salas ", " gestionar_salas", "gestionar"] {
            assert_eq!(
                authorize(&p, &Permission::new(candidate.to_string())),
                Err(ServiceError::forbidden(candidate)),
                "{candidate:?} must not match"
            );
        }
    }

    #[test]
    fn empty_permission_set_denies() {
        let p = principal_with(&[]);
        assert!(authorize(&p, &Permission::from_static("ver_salas")).is_err());
    }

    proptest! {
        #[test]
        fn altered_case_or_padding_never_matches(name in "[a-z_]{1,24}", pad in prop::sample::select(vec![" ", "\t", "\n"])) {
            let p = PrincipalRecord::new(SubjectId::new(1), [Permission::new(name.clone())]);

            prop_assert!(authorize(&p, &Permission::new(name.clone())).is_ok());
            let padded = format!("{name}{pad}");
            prop_assert!(authorize(&p, &Permission::new(padded)).is_err());

            let upper = name.to_uppercase();
            if upper != name {
                prop_assert!(authorize(&p, &Permission::new(upper)).is_err());
            }
        }
    }

    #[tokio::test]
    async fn local_authorization_checks_directory() {
        let mut map = HashMap::new();
        map.insert(
            SubjectId::new(5),
            PrincipalRecord::new(SubjectId::new(5), [Permission::from_static("gestionar_salas")]),
        );
        let authz = LocalAuthorization::new(MapDirectory(map));

        let granted = authz
            .check_permission(&identity(5), &Permission::from_static("gestionar_salas"))
            .await
            .unwrap();
        assert_eq!(granted.id, SubjectId::new(5));

        let denied = authz
            .check_permission(&identity(5), &Permission::from_static("enviar_notificaciones"))
            .await;
        assert_eq!(denied, Err(ServiceError::forbidden("enviar_notificaciones")));

        let missing = authz.principal(&identity(6)).await;
        assert_eq!(missing, Err(ServiceError::NotFound));
    }
}
