//! Pluggable key/value + stream substrate.
//!
//! The [`Substrate`] trait is the single seam between the runtime and its
//! shared store: a Redis-class server in production, [`memory::InMemorySubstrate`]
//! in tests and single-process deployments. Every other component depends
//! only on this trait.
//!
//! ## Design Principles
//!
//! - **Append-only streams with consumer groups**: each entry is delivered to
//!   a group once, tracked as pending until acked, and reclaimable after an
//!   idle threshold
//! - **At-least-once**: redelivery is expected; deduplication is the caller's
//!   concern (see [`crate::idempotence`])
//! - **Thin facade**: operations mirror the store's primitives (SETNX with
//!   TTL, hash/set/list ops, stream append/read-group/claim/ack)

pub mod memory;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Raw fields of a stream entry, as stored on the wire.
pub type RawFields = BTreeMap<String, String>;

/// A single entry read from a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    /// Substrate-assigned entry ID, unique and ordered within the stream.
    pub id: String,
    /// The entry's field map.
    pub fields: RawFields,
}

/// A pending (delivered but unacked) entry of a consumer group.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    /// The entry ID.
    pub id: String,
    /// The consumer currently holding the entry.
    pub consumer: String,
    /// Time since the last delivery of this entry.
    pub idle: Duration,
    /// Number of deliveries so far (1 on first read).
    pub delivery_count: u32,
}

/// Shared key/value and stream store.
///
/// All methods are `Send + Sync` to support concurrent access from multiple
/// consumer loops.
#[async_trait]
pub trait Substrate: Send + Sync {
    // --- Key/value ---

    /// Sets a key to a value, replacing any previous value.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Sets a key with a time-to-live, replacing any previous value.
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Sets a key only if it does not already exist, with a time-to-live.
    ///
    /// Returns `true` when the key was set by this call.
    async fn set_nx_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Gets the value of a key, or `None` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Returns true when the key exists and has not expired.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Deletes a key. Returns `true` when a key was removed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Deletes a key only when its current value equals `value`.
    ///
    /// Returns `true` when the key was removed by this call.
    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool>;

    /// Sets a time-to-live on an existing key. Returns `false` when absent.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    // --- Hashes ---

    /// Increments an integer hash field by `delta`, creating it at zero.
    async fn hash_incr(&self, key: &str, field: &str, delta: i64) -> Result<i64>;

    /// Sets a hash field.
    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<()>;

    /// Returns all fields of a hash (empty when absent).
    async fn hash_get_all(&self, key: &str) -> Result<BTreeMap<String, String>>;

    // --- Sets ---

    /// Adds a member to a set. Returns `true` when newly added.
    async fn set_add(&self, key: &str, member: &str) -> Result<bool>;

    /// Removes a member from a set. Returns `true` when it was present.
    async fn set_remove(&self, key: &str, member: &str) -> Result<bool>;

    /// Returns the members of a set in sorted order (empty when absent).
    async fn set_members(&self, key: &str) -> Result<Vec<String>>;

    // --- Lists ---

    /// Appends a value to the tail of a list, creating it when absent.
    async fn list_push(&self, key: &str, value: &str) -> Result<usize>;

    /// Returns the full contents of a list (empty when absent).
    async fn list_range(&self, key: &str) -> Result<Vec<String>>;

    // --- Streams ---

    /// Appends an entry to a stream, creating the stream when absent.
    ///
    /// Returns the assigned entry ID.
    async fn stream_append(&self, stream: &str, fields: &RawFields) -> Result<String>;

    /// Creates a consumer group on a stream (idempotent, creates the stream).
    ///
    /// New groups deliver from the beginning of the stream.
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<()>;

    /// Reads new entries for a consumer group, blocking up to `block`.
    ///
    /// Delivered entries become pending for `consumer` until acked. Returns
    /// an empty vector when nothing arrived within the block window. A zero
    /// `block` polls without waiting.
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>>;

    /// Claims pending entries idle for at least `min_idle`, transferring
    /// ownership to `consumer` and incrementing their delivery count.
    ///
    /// An entry whose idle time equals the threshold is eligible.
    async fn claim_pending(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<StreamEntry>>;

    /// Acknowledges an entry for a group, removing it from the pending list.
    async fn ack(&self, stream: &str, group: &str, entry_id: &str) -> Result<()>;

    /// Returns the pending entries of a group in delivery order.
    async fn pending_entries(&self, stream: &str, group: &str) -> Result<Vec<PendingEntry>>;

    /// Returns the ID of the last entry delivered to the group, if any.
    async fn group_last_delivered(&self, stream: &str, group: &str) -> Result<Option<String>>;

    /// Returns the number of entries in a stream.
    async fn stream_len(&self, stream: &str) -> Result<usize>;

    /// Returns every entry of a stream in append order.
    async fn stream_range(&self, stream: &str) -> Result<Vec<StreamEntry>>;
}
