//! Shared fixtures for the integration suites.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use workstream_flow::config::Settings;
use workstream_flow::consumer::{ConsumerConfig, StreamConsumer};
use workstream_flow::dlq::DlqRecord;
use workstream_flow::envelope::Envelope;
use workstream_flow::schema::SchemaRegistry;
use workstream_flow::substrate::memory::InMemorySubstrate;
use workstream_flow::substrate::Substrate;

/// Loads the crate's shipped schema registry.
pub fn registry() -> Arc<SchemaRegistry> {
    let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("schemas");
    Arc::new(SchemaRegistry::load(dir).expect("shipped schemas load"))
}

/// Default settings for tests.
pub fn settings() -> Settings {
    Settings::default()
}

/// A consumer configuration tuned for deterministic single-poll driving:
/// non-blocking reads, a short reclaim threshold, and three attempts.
pub fn consumer_config(settings: &Settings, group: &str) -> ConsumerConfig {
    let mut config = settings.consumer_config(group, "test-consumer");
    config.block = Duration::ZERO;
    config.idle_reclaim = Duration::from_millis(25);
    config.max_attempts = 3;
    config
}

/// Publishes an envelope onto the main stream.
pub async fn publish(substrate: &InMemorySubstrate, settings: &Settings, envelope: &Envelope) {
    let fields = envelope.encode().expect("envelope encodes");
    substrate
        .stream_append(&settings.stream_name, &fields)
        .await
        .expect("append succeeds");
}

/// Polls the given consumers round-robin until a full round processes
/// nothing, creating their groups first.
pub async fn pump(substrate: &InMemorySubstrate, consumers: &[&StreamConsumer<InMemorySubstrate>]) {
    for consumer in consumers {
        substrate
            .ensure_group(&consumer.config().stream, &consumer.config().group)
            .await
            .expect("group creation succeeds");
    }
    for _ in 0..100 {
        let mut processed = 0;
        for consumer in consumers {
            processed += consumer.poll_once().await.expect("poll succeeds");
        }
        if processed == 0 {
            return;
        }
    }
    panic!("consumers did not quiesce within 100 rounds");
}

/// Decodes every envelope on a stream, in append order.
pub async fn decode_events(substrate: &InMemorySubstrate, stream: &str) -> Vec<Envelope> {
    substrate
        .stream_range(stream)
        .await
        .expect("stream range succeeds")
        .iter()
        .filter_map(|entry| Envelope::decode(&entry.fields).ok())
        .collect()
}

/// Returns the event types on a stream, in append order.
pub async fn event_types(substrate: &InMemorySubstrate, stream: &str) -> Vec<String> {
    decode_events(substrate, stream)
        .await
        .into_iter()
        .map(|envelope| envelope.event_type)
        .collect()
}

/// Counts occurrences of one event type on a stream.
pub async fn count_events(substrate: &InMemorySubstrate, stream: &str, event_type: &str) -> usize {
    event_types(substrate, stream)
        .await
        .iter()
        .filter(|t| t.as_str() == event_type)
        .count()
}

/// Reads every DLQ record.
pub async fn dlq_records(substrate: &InMemorySubstrate, settings: &Settings) -> Vec<DlqRecord> {
    substrate
        .stream_range(&settings.dlq_stream)
        .await
        .expect("dlq range succeeds")
        .iter()
        .map(|entry| DlqRecord::decode(&entry.fields).expect("dlq record decodes"))
        .collect()
}
