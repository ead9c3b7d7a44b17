use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use multiroom_auth::{PrincipalDirectory, PrincipalRecord};
use multiroom_core::{ServiceError, ServiceResult, SubjectId};

/// Principal store for services that own their principals.
#[derive(Debug, Default)]
pub struct InMemoryPrincipalDirectory {
    principals: RwLock<HashMap<SubjectId, PrincipalRecord>>,
}

impl InMemoryPrincipalDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_principals(principals: impl IntoIterator<Item = PrincipalRecord>) -> Self {
        Self {
            principals: RwLock::new(principals.into_iter().map(|p| (p.id, p)).collect()),
        }
    }

    /// Insert or replace a principal.
    pub fn upsert(&self, principal: PrincipalRecord) -> ServiceResult<()> {
        self.principals
            .write()
            .map_err(|_| ServiceError::internal("principal directory lock poisoned"))?
            .insert(principal.id, principal);
        Ok(())
    }
}

#[async_trait]
impl PrincipalDirectory for InMemoryPrincipalDirectory {
    async fn find(&self, id: SubjectId) -> ServiceResult<Option<PrincipalRecord>> {
        let principals = self
            .principals
            .read()
            .map_err(|_| ServiceError::internal("principal directory lock poisoned"))?;
        Ok(principals.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use multiroom_auth::permissions::MANAGE_ROOMS;

    #[tokio::test]
    async fn upsert_replaces_existing_principal() {
        let directory = InMemoryPrincipalDirectory::with_principals([PrincipalRecord::new(
            SubjectId::new(1),
            [],
        )]);
        directory
            .upsert(PrincipalRecord::new(SubjectId::new(1), [MANAGE_ROOMS]))
            .unwrap();

        let found = directory.find(SubjectId::new(1)).await.unwrap().unwrap();
        assert_eq!(found.permissions.len(), 1);
        assert!(directory.find(SubjectId::new(2)).await.unwrap().is_none());
    }
}
