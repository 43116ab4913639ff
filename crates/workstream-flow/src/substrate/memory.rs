//! In-memory substrate implementation.
//!
//! A single-process implementation of [`Substrate`] used by tests and the
//! all-in-one node binary.
//!
//! ## Limitations
//!
//! - **Single-process only**: state is not shared across process boundaries
//! - **No persistence**: all state is lost when the process exits

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Notify;

use super::{PendingEntry, RawFields, StreamEntry, Substrate};
use crate::error::{Error, Result};

/// One keyspace value, typed the way the production store types them.
#[derive(Debug, Clone)]
enum ValueKind {
    Text(String),
    Hash(BTreeMap<String, String>),
    Set(BTreeSet<String>),
    List(Vec<String>),
}

impl ValueKind {
    const fn kind_name(&self) -> &'static str {
        match self {
            Self::Text(_) => "string",
            Self::Hash(_) => "hash",
            Self::Set(_) => "set",
            Self::List(_) => "list",
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: ValueKind,
    expires_at: Option<Instant>,
}

#[derive(Debug, Clone)]
struct PendingState {
    index: usize,
    consumer: String,
    delivered_at: Instant,
    delivery_count: u32,
}

#[derive(Debug, Default)]
struct GroupState {
    /// Position of the next undelivered entry.
    cursor: usize,
    pending: BTreeMap<String, PendingState>,
}

#[derive(Debug, Default)]
struct StreamState {
    entries: Vec<StreamEntry>,
    groups: BTreeMap<String, GroupState>,
    next_id: u64,
}

#[derive(Debug, Default)]
struct Inner {
    keys: HashMap<String, Entry>,
    streams: HashMap<String, StreamState>,
}

/// In-memory [`Substrate`] for tests and single-process nodes.
///
/// Thread-safe via a single `Mutex`; readers blocked on an empty stream are
/// woken by a [`Notify`] when entries are appended.
#[derive(Debug, Default)]
pub struct InMemorySubstrate {
    inner: Mutex<Inner>,
    appended: Notify,
}

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::substrate("lock poisoned")
}

fn wrong_type(key: &str, found: &ValueKind) -> Error {
    Error::substrate(format!(
        "key '{key}' holds a {} value, not the requested kind",
        found.kind_name()
    ))
}

impl InMemorySubstrate {
    /// Creates a new, empty substrate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(poison_err)
    }
}

impl Inner {
    /// Drops the key when its TTL has elapsed, then returns it if live.
    fn live_entry(&mut self, key: &str) -> Option<&mut Entry> {
        let expired = self
            .keys
            .get(key)
            .and_then(|entry| entry.expires_at)
            .is_some_and(|deadline| Instant::now() >= deadline);
        if expired {
            self.keys.remove(key);
        }
        self.keys.get_mut(key)
    }

    fn hash_mut(&mut self, key: &str) -> Result<&mut BTreeMap<String, String>> {
        let entry = self.keys.entry(key.to_string()).or_insert_with(|| Entry {
            value: ValueKind::Hash(BTreeMap::new()),
            expires_at: None,
        });
        match &mut entry.value {
            ValueKind::Hash(map) => Ok(map),
            other => Err(wrong_type(key, other)),
        }
    }

    fn set_mut(&mut self, key: &str) -> Result<&mut BTreeSet<String>> {
        let entry = self.keys.entry(key.to_string()).or_insert_with(|| Entry {
            value: ValueKind::Set(BTreeSet::new()),
            expires_at: None,
        });
        match &mut entry.value {
            ValueKind::Set(set) => Ok(set),
            other => Err(wrong_type(key, other)),
        }
    }

    fn list_mut(&mut self, key: &str) -> Result<&mut Vec<String>> {
        let entry = self.keys.entry(key.to_string()).or_insert_with(|| Entry {
            value: ValueKind::List(Vec::new()),
            expires_at: None,
        });
        match &mut entry.value {
            ValueKind::List(list) => Ok(list),
            other => Err(wrong_type(key, other)),
        }
    }

    fn group_mut(&mut self, stream: &str, group: &str) -> Result<(&mut Vec<StreamEntry>, &mut GroupState)> {
        let state = self
            .streams
            .get_mut(stream)
            .ok_or_else(|| Error::substrate(format!("unknown stream '{stream}'")))?;
        let group_state = state
            .groups
            .get_mut(group)
            .ok_or_else(|| Error::substrate(format!("unknown consumer group '{group}' on '{stream}'")))?;
        Ok((&mut state.entries, group_state))
    }

    fn deliver_new(
        &mut self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<StreamEntry>> {
        let (entries, group_state) = self.group_mut(stream, group)?;
        let now = Instant::now();
        let mut batch = Vec::new();
        while group_state.cursor < entries.len() && batch.len() < count {
            let entry = entries[group_state.cursor].clone();
            group_state.pending.insert(
                entry.id.clone(),
                PendingState {
                    index: group_state.cursor,
                    consumer: consumer.to_string(),
                    delivered_at: now,
                    delivery_count: 1,
                },
            );
            group_state.cursor += 1;
            batch.push(entry);
        }
        Ok(batch)
    }
}

#[async_trait]
impl Substrate for InMemorySubstrate {
    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut inner = self.lock()?;
        inner.keys.insert(
            key.to_string(),
            Entry {
                value: ValueKind::Text(value.to_string()),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut inner = self.lock()?;
        inner.keys.insert(
            key.to_string(),
            Entry {
                value: ValueKind::Text(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn set_nx_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut inner = self.lock()?;
        if inner.live_entry(key).is_some() {
            return Ok(false);
        }
        inner.keys.insert(
            key.to_string(),
            Entry {
                value: ValueKind::Text(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut inner = self.lock()?;
        match inner.live_entry(key) {
            None => Ok(None),
            Some(entry) => match &entry.value {
                ValueKind::Text(text) => Ok(Some(text.clone())),
                other => Err(wrong_type(key, other)),
            },
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut inner = self.lock()?;
        Ok(inner.live_entry(key).is_some())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut inner = self.lock()?;
        if inner.live_entry(key).is_none() {
            return Ok(false);
        }
        Ok(inner.keys.remove(key).is_some())
    }

    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool> {
        let mut inner = self.lock()?;
        let matches = inner
            .live_entry(key)
            .is_some_and(|entry| matches!(&entry.value, ValueKind::Text(text) if text == value));
        if matches {
            inner.keys.remove(key);
        }
        Ok(matches)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut inner = self.lock()?;
        match inner.live_entry(key) {
            None => Ok(false),
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
        }
    }

    async fn hash_incr(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        let mut inner = self.lock()?;
        inner.live_entry(key);
        let map = inner.hash_mut(key)?;
        let current = match map.get(field) {
            None => 0,
            Some(raw) => raw
                .parse::<i64>()
                .map_err(|_| Error::substrate(format!("hash field '{field}' is not an integer")))?,
        };
        let next = current + delta;
        map.insert(field.to_string(), next.to_string());
        Ok(next)
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let mut inner = self.lock()?;
        inner.live_entry(key);
        let map = inner.hash_mut(key)?;
        map.insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> Result<BTreeMap<String, String>> {
        let mut inner = self.lock()?;
        match inner.live_entry(key) {
            None => Ok(BTreeMap::new()),
            Some(entry) => match &entry.value {
                ValueKind::Hash(map) => Ok(map.clone()),
                other => Err(wrong_type(key, other)),
            },
        }
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<bool> {
        let mut inner = self.lock()?;
        inner.live_entry(key);
        let set = inner.set_mut(key)?;
        Ok(set.insert(member.to_string()))
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<bool> {
        let mut inner = self.lock()?;
        inner.live_entry(key);
        let set = inner.set_mut(key)?;
        Ok(set.remove(member))
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        let mut inner = self.lock()?;
        match inner.live_entry(key) {
            None => Ok(Vec::new()),
            Some(entry) => match &entry.value {
                ValueKind::Set(set) => Ok(set.iter().cloned().collect()),
                other => Err(wrong_type(key, other)),
            },
        }
    }

    async fn list_push(&self, key: &str, value: &str) -> Result<usize> {
        let mut inner = self.lock()?;
        inner.live_entry(key);
        let list = inner.list_mut(key)?;
        list.push(value.to_string());
        Ok(list.len())
    }

    async fn list_range(&self, key: &str) -> Result<Vec<String>> {
        let mut inner = self.lock()?;
        match inner.live_entry(key) {
            None => Ok(Vec::new()),
            Some(entry) => match &entry.value {
                ValueKind::List(list) => Ok(list.clone()),
                other => Err(wrong_type(key, other)),
            },
        }
    }

    async fn stream_append(&self, stream: &str, fields: &RawFields) -> Result<String> {
        let id = {
            let mut inner = self.lock()?;
            let state = inner.streams.entry(stream.to_string()).or_default();
            state.next_id += 1;
            let id = format!("{}-0", state.next_id);
            state.entries.push(StreamEntry {
                id: id.clone(),
                fields: fields.clone(),
            });
            id
        };
        self.appended.notify_waiters();
        Ok(id)
    }

    async fn ensure_group(&self, stream: &str, group: &str) -> Result<()> {
        let mut inner = self.lock()?;
        let state = inner.streams.entry(stream.to_string()).or_default();
        state.groups.entry(group.to_string()).or_default();
        Ok(())
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>> {
        let deadline = Instant::now() + block;
        loop {
            // Register interest before checking so an append between the
            // check and the wait cannot be missed.
            let notified = self.appended.notified();
            {
                let mut inner = self.lock()?;
                let batch = inner.deliver_new(stream, group, consumer, count)?;
                if !batch.is_empty() {
                    return Ok(batch);
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            let _ = tokio::time::timeout(deadline - now, notified).await;
        }
    }

    async fn claim_pending(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<StreamEntry>> {
        let mut inner = self.lock()?;
        let (entries, group_state) = inner.group_mut(stream, group)?;
        let now = Instant::now();

        let mut eligible: Vec<(usize, String)> = group_state
            .pending
            .iter()
            .filter(|(_, state)| now.duration_since(state.delivered_at) >= min_idle)
            .map(|(id, state)| (state.index, id.clone()))
            .collect();
        eligible.sort_by_key(|(index, _)| *index);
        eligible.truncate(count);

        let mut claimed = Vec::with_capacity(eligible.len());
        for (_, id) in eligible {
            if let Some(state) = group_state.pending.get_mut(&id) {
                state.consumer = consumer.to_string();
                state.delivered_at = now;
                state.delivery_count += 1;
                claimed.push(entries[state.index].clone());
            }
        }
        Ok(claimed)
    }

    async fn ack(&self, stream: &str, group: &str, entry_id: &str) -> Result<()> {
        let mut inner = self.lock()?;
        let (_, group_state) = inner.group_mut(stream, group)?;
        group_state.pending.remove(entry_id);
        Ok(())
    }

    async fn pending_entries(&self, stream: &str, group: &str) -> Result<Vec<PendingEntry>> {
        let mut inner = self.lock()?;
        let (_, group_state) = inner.group_mut(stream, group)?;
        let now = Instant::now();
        let mut pending: Vec<(usize, PendingEntry)> = group_state
            .pending
            .iter()
            .map(|(id, state)| {
                (
                    state.index,
                    PendingEntry {
                        id: id.clone(),
                        consumer: state.consumer.clone(),
                        idle: now.duration_since(state.delivered_at),
                        delivery_count: state.delivery_count,
                    },
                )
            })
            .collect();
        pending.sort_by_key(|(index, _)| *index);
        Ok(pending.into_iter().map(|(_, entry)| entry).collect())
    }

    async fn group_last_delivered(&self, stream: &str, group: &str) -> Result<Option<String>> {
        let mut inner = self.lock()?;
        let (entries, group_state) = inner.group_mut(stream, group)?;
        if group_state.cursor == 0 {
            return Ok(None);
        }
        Ok(entries.get(group_state.cursor - 1).map(|e| e.id.clone()))
    }

    async fn stream_len(&self, stream: &str) -> Result<usize> {
        let inner = self.lock()?;
        Ok(inner.streams.get(stream).map_or(0, |s| s.entries.len()))
    }

    async fn stream_range(&self, stream: &str) -> Result<Vec<StreamEntry>> {
        let inner = self.lock()?;
        Ok(inner
            .streams
            .get(stream)
            .map_or_else(Vec::new, |s| s.entries.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(value: &str) -> RawFields {
        let mut fields = RawFields::new();
        fields.insert("event".to_string(), value.to_string());
        fields
    }

    #[tokio::test]
    async fn set_nx_ttl_is_once_only() {
        let substrate = InMemorySubstrate::new();
        assert!(substrate
            .set_nx_ttl("k", "a", Duration::from_secs(60))
            .await
            .unwrap());
        assert!(!substrate
            .set_nx_ttl("k", "b", Duration::from_secs(60))
            .await
            .unwrap());
        assert_eq!(substrate.get("k").await.unwrap().as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn expired_keys_vanish() {
        let substrate = InMemorySubstrate::new();
        substrate
            .set_nx_ttl("k", "v", Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!substrate.exists("k").await.unwrap());
        // the slot is free again
        assert!(substrate
            .set_nx_ttl("k", "w", Duration::from_secs(60))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn delete_if_equals_checks_value() {
        let substrate = InMemorySubstrate::new();
        substrate.set("lock", "token-a").await.unwrap();
        assert!(!substrate.delete_if_equals("lock", "token-b").await.unwrap());
        assert!(substrate.delete_if_equals("lock", "token-a").await.unwrap());
        assert!(!substrate.exists("lock").await.unwrap());
    }

    #[tokio::test]
    async fn hash_incr_tracks_attempts() {
        let substrate = InMemorySubstrate::new();
        assert_eq!(substrate.hash_incr("h", "attempts", 1).await.unwrap(), 1);
        assert_eq!(substrate.hash_incr("h", "attempts", 1).await.unwrap(), 2);
        substrate.hash_set("h", "first_seen_at", "123").await.unwrap();
        let all = substrate.hash_get_all("h").await.unwrap();
        assert_eq!(all.get("attempts").map(String::as_str), Some("2"));
        assert_eq!(all.get("first_seen_at").map(String::as_str), Some("123"));
    }

    #[tokio::test]
    async fn sets_are_sorted_and_deduplicated() {
        let substrate = InMemorySubstrate::new();
        assert!(substrate.set_add("s", "b").await.unwrap());
        assert!(substrate.set_add("s", "a").await.unwrap());
        assert!(!substrate.set_add("s", "a").await.unwrap());
        assert_eq!(substrate.set_members("s").await.unwrap(), vec!["a", "b"]);
        assert!(substrate.set_remove("s", "a").await.unwrap());
        assert_eq!(substrate.set_members("s").await.unwrap(), vec!["b"]);
    }

    #[tokio::test]
    async fn wrong_type_access_is_an_error() {
        let substrate = InMemorySubstrate::new();
        substrate.set("k", "text").await.unwrap();
        assert!(substrate.set_add("k", "member").await.is_err());
        assert!(substrate.hash_incr("k", "f", 1).await.is_err());
    }

    #[tokio::test]
    async fn group_delivery_and_ack() {
        let substrate = InMemorySubstrate::new();
        substrate.ensure_group("s", "g").await.unwrap();
        let id = substrate.stream_append("s", &fields("one")).await.unwrap();

        let batch = substrate
            .read_group("s", "g", "c1", 10, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, id);
        assert_eq!(substrate.stream_len("s").await.unwrap(), 1);

        let pending = substrate.pending_entries("s", "g").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].consumer, "c1");
        assert_eq!(pending[0].delivery_count, 1);
        assert_eq!(
            substrate.group_last_delivered("s", "g").await.unwrap(),
            Some(id.clone())
        );

        substrate.ack("s", "g", &id).await.unwrap();
        assert!(substrate.pending_entries("s", "g").await.unwrap().is_empty());

        // nothing more to deliver
        let batch = substrate
            .read_group("s", "g", "c1", 10, Duration::ZERO)
            .await
            .unwrap();
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn two_groups_each_see_every_entry() {
        let substrate = InMemorySubstrate::new();
        substrate.ensure_group("s", "g1").await.unwrap();
        substrate.ensure_group("s", "g2").await.unwrap();
        substrate.stream_append("s", &fields("one")).await.unwrap();

        let a = substrate
            .read_group("s", "g1", "c", 10, Duration::ZERO)
            .await
            .unwrap();
        let b = substrate
            .read_group("s", "g2", "c", 10, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
    }

    #[tokio::test]
    async fn claim_respects_idle_threshold_inclusive() {
        let substrate = InMemorySubstrate::new();
        substrate.ensure_group("s", "g").await.unwrap();
        substrate.stream_append("s", &fields("one")).await.unwrap();
        substrate
            .read_group("s", "g", "c1", 10, Duration::ZERO)
            .await
            .unwrap();

        // idle below the threshold: not claimable
        let none = substrate
            .claim_pending("s", "g", "c2", Duration::from_secs(60), 10)
            .await
            .unwrap();
        assert!(none.is_empty());

        // zero threshold: idle == threshold is eligible
        let claimed = substrate
            .claim_pending("s", "g", "c2", Duration::ZERO, 10)
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);

        let pending = substrate.pending_entries("s", "g").await.unwrap();
        assert_eq!(pending[0].consumer, "c2");
        assert_eq!(pending[0].delivery_count, 2);
    }

    #[tokio::test]
    async fn blocked_read_wakes_on_append() {
        let substrate = std::sync::Arc::new(InMemorySubstrate::new());
        substrate.ensure_group("s", "g").await.unwrap();

        let reader = {
            let substrate = substrate.clone();
            tokio::spawn(async move {
                substrate
                    .read_group("s", "g", "c", 10, Duration::from_secs(5))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        substrate.stream_append("s", &fields("one")).await.unwrap();

        let batch = reader.await.unwrap().unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test]
    async fn read_group_requires_group() {
        let substrate = InMemorySubstrate::new();
        substrate.stream_append("s", &fields("one")).await.unwrap();
        let result = substrate.read_group("s", "nope", "c", 1, Duration::ZERO).await;
        assert!(result.is_err());
    }
}
