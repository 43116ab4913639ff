//! Named TTL leases for contention reduction.
//!
//! A lease is a SETNX key with a TTL and a random token; release deletes the
//! key only when the token still matches, so an expired lease taken over by
//! another holder is never clobbered. Leases are advisory: handlers must be
//! idempotent regardless of whether they believe they hold one, and the TTL
//! bounds the exposure window if a holder crashes.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::error::Result;
use crate::substrate::Substrate;

/// A held lease, identified by its key and fencing token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockLease {
    /// The full substrate key of the lease.
    pub key: String,
    /// Random token proving ownership at release time.
    pub token: String,
}

/// Lease-granting service over the substrate.
#[derive(Debug, Clone)]
pub struct LockService<S> {
    substrate: Arc<S>,
    prefix: String,
    ttl: Duration,
}

impl<S: Substrate> LockService<S> {
    /// Creates a service writing leases under `{prefix}:{name}`.
    pub fn new(substrate: Arc<S>, prefix: impl Into<String>, ttl: Duration) -> Self {
        Self {
            substrate,
            prefix: prefix.into(),
            ttl,
        }
    }

    fn key(&self, name: &str) -> String {
        format!("{}:{}", self.prefix, name)
    }

    /// Attempts to acquire the named lease with the service's default TTL.
    ///
    /// Returns `None` when the lease is already held.
    ///
    /// # Errors
    ///
    /// Propagates substrate failures.
    pub async fn acquire(&self, name: &str) -> Result<Option<LockLease>> {
        self.acquire_with_ttl(name, self.ttl).await
    }

    /// Attempts to acquire the named lease with an explicit TTL.
    ///
    /// # Errors
    ///
    /// Propagates substrate failures.
    pub async fn acquire_with_ttl(&self, name: &str, ttl: Duration) -> Result<Option<LockLease>> {
        let key = self.key(name);
        let token = Uuid::new_v4().to_string();
        let acquired = self.substrate.set_nx_ttl(&key, &token, ttl).await?;
        if !acquired {
            return Ok(None);
        }
        Ok(Some(LockLease { key, token }))
    }

    /// Releases a lease when the token still matches.
    ///
    /// Returns `false` when the lease expired or was taken by another holder.
    ///
    /// # Errors
    ///
    /// Propagates substrate failures.
    pub async fn release(&self, lease: &LockLease) -> Result<bool> {
        let released = self
            .substrate
            .delete_if_equals(&lease.key, &lease.token)
            .await?;
        if !released {
            tracing::info!(key = %lease.key, "lock release skipped, token mismatch");
        }
        Ok(released)
    }
}
