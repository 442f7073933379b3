//! Public Access Gate.
//!
//! A successful password check grants one visitor access to one process
//! for a fixed time. The gate only remembers grants; checking passwords is
//! the execution service's job.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use stepwise_storage::ProcessStorage;
use time::{Duration, OffsetDateTime};

use crate::clock::Clock;
use crate::error::EngineError;
use crate::service::ExecutionService;
use crate::view::ProcessStructure;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct GrantKey {
    visitor: String,
    slug: String,
}

impl GrantKey {
    fn new(visitor: &str, slug: &str) -> Self {
        Self {
            visitor: visitor.to_string(),
            slug: slug.to_string(),
        }
    }
}

pub struct AccessGate {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    grants: Mutex<HashMap<GrantKey, OffsetDateTime>>,
}

impl AccessGate {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            grants: Mutex::new(HashMap::new()),
        }
    }

    /// A gate sharing the service's clock and grant TTL.
    pub fn for_service<S: ProcessStorage>(service: &ExecutionService<S>) -> Self {
        Self::new(service.config().grant_ttl, Arc::clone(service.clock()))
    }

    fn grants(&self) -> MutexGuard<'_, HashMap<GrantKey, OffsetDateTime>> {
        self.grants.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Unlock `slug` for `visitor`. Returns the expiry.
    ///
    /// Expired grants are dropped on the way in, so the table never holds
    /// more than the grants issued within one TTL.
    pub fn grant(&self, visitor: &str, slug: &str) -> OffsetDateTime {
        let now = self.clock.now();
        let expires = now + self.ttl;
        let mut grants = self.grants();
        grants.retain(|_, until| *until > now);
        grants.insert(GrantKey::new(visitor, slug), expires);
        expires
    }

    /// Grants currently held, expired or not.
    pub fn len(&self) -> usize {
        self.grants().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_granted(&self, visitor: &str, slug: &str) -> bool {
        let key = GrantKey::new(visitor, slug);
        let now = self.clock.now();
        let mut grants = self.grants();
        match grants.get(&key) {
            Some(expires) if *expires > now => true,
            Some(_) => {
                grants.remove(&key);
                false
            }
            None => false,
        }
    }

    pub fn revoke(&self, visitor: &str, slug: &str) -> bool {
        self.grants().remove(&GrantKey::new(visitor, slug)).is_some()
    }

    /// Drop expired grants. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut grants = self.grants();
        let before = grants.len();
        grants.retain(|_, expires| *expires > now);
        before - grants.len()
    }

    /// Check the password and, on success, grant access.
    pub async fn unlock<S: ProcessStorage>(
        &self,
        service: &ExecutionService<S>,
        visitor: &str,
        slug: &str,
        candidate: &str,
    ) -> Result<bool, EngineError> {
        let ok = service.verify_password(slug, candidate).await?;
        if ok {
            let expires = self.grant(visitor, slug);
            tracing::debug!(slug, %expires, "access granted");
        }
        Ok(ok)
    }

    /// Structure of `slug` as `visitor` may see it.
    pub async fn structure<S: ProcessStorage>(
        &self,
        service: &ExecutionService<S>,
        visitor: &str,
        slug: &str,
    ) -> Result<ProcessStructure, EngineError> {
        service
            .get_structure(slug, self.is_granted(visitor, slug))
            .await
    }
}
