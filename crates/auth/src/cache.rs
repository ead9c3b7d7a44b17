//! Short-TTL cache in front of an [`AuthorizationClient`].

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::trace;

use multiroom_core::{ServiceResult, SubjectId};

use crate::{AuthorizationClient, Identity, PrincipalRecord, TokenType};

/// Caches successful principal lookups for `ttl`.
///
/// Failures are never cached. A zero TTL disables caching entirely, so every
/// check consults the inner client.
#[derive(Debug)]
pub struct CachedAuthorization<A> {
    inner: A,
    ttl: Duration,
    entries: Mutex<HashMap<(TokenType, SubjectId), CacheEntry>>,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    stored_at: Instant,
    principal: PrincipalRecord,
}

impl<A> CachedAuthorization<A> {
    pub fn new(inner: A, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lookup(&self, key: &(TokenType, SubjectId)) -> Option<PrincipalRecord> {
        let mut entries = self.entries.lock().ok()?;
        match entries.get(key) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => Some(entry.principal.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Insert `principal`, dropping every entry that has outlived the TTL.
    fn store(&self, key: (TokenType, SubjectId), principal: PrincipalRecord) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.retain(|_, entry| entry.stored_at.elapsed() < self.ttl);
            entries.insert(
                key,
                CacheEntry {
                    stored_at: Instant::now(),
                    principal,
                },
            );
        }
    }
}

#[async_trait]
impl<A> AuthorizationClient for CachedAuthorization<A>
where
    A: AuthorizationClient,
{
    async fn principal(&self, identity: &Identity) -> ServiceResult<PrincipalRecord> {
        if self.ttl.is_zero() {
            return self.inner.principal(identity).await;
        }

        let key = (identity.token_type, identity.subject);
        if let Some(hit) = self.lookup(&key) {
            trace!(subject = %identity.subject, "authorization cache hit");
            return Ok(hit);
        }

        let principal = self.inner.principal(identity).await?;
        self.store(key, principal.clone());
        Ok(principal)
    }
}
