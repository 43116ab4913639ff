//! Environment-driven runtime configuration.
//!
//! Every knob is defaulted; nothing is required at boot. Values are read
//! from `WORKSTREAM_*` environment variables, with unparseable values
//! falling back to their defaults.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use workstream_core::observability::LogFormat;

use crate::consumer::ConsumerConfig;

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or(default),
        Err(_) => default,
    }
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Runtime settings shared by every service loop.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Substrate server host (used by networked substrate backends).
    pub substrate_host: String,
    /// Substrate server port.
    pub substrate_port: u16,
    /// Substrate logical database index.
    pub substrate_db: u32,
    /// Substrate password, when the server requires one.
    pub substrate_password: Option<String>,
    /// Main event stream name.
    pub stream_name: String,
    /// Dead-letter stream name.
    pub dlq_stream: String,
    /// Prefix for store keys (backlog, questions, projects).
    pub key_prefix: String,
    /// Prefix for decision-trace lists.
    pub trace_prefix: String,
    /// Prefix for substrate-side metric counters.
    pub metrics_prefix: String,
    /// Prefix for idempotence markers.
    pub idempotence_prefix: String,
    /// Prefix for per-entry attempt counters.
    pub attempts_prefix: String,
    /// Default consumer group name.
    pub consumer_group: String,
    /// Default consumer name within the group.
    pub consumer_name: String,
    /// Max time a read blocks waiting for new entries, in milliseconds.
    pub block_ms: u64,
    /// Idle time after which a pending entry may be reclaimed, in milliseconds.
    pub idle_reclaim_ms: u64,
    /// Max pending entries reclaimed per poll.
    pub pending_reclaim_count: usize,
    /// Max new entries read per poll.
    pub read_count: usize,
    /// Deliveries after which a still-failing entry is quarantined.
    pub max_attempts: u32,
    /// Idempotence marker lifetime, in seconds.
    pub dedupe_ttl_seconds: u64,
    /// Dispatch lock lease lifetime, in seconds.
    pub lock_ttl_seconds: u64,
    /// Per-handler wall-clock budget, in milliseconds.
    pub handler_timeout_ms: u64,
    /// Directory holding the contract schemas.
    pub schema_dir: PathBuf,
    /// Prometheus listener address, when metrics export is wanted.
    pub metrics_addr: Option<SocketAddr>,
    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            substrate_host: "localhost".to_string(),
            substrate_port: 6379,
            substrate_db: 0,
            substrate_password: None,
            stream_name: "audit:events".to_string(),
            dlq_stream: "audit:dlq".to_string(),
            key_prefix: "audit".to_string(),
            trace_prefix: "audit:trace".to_string(),
            metrics_prefix: "audit:metrics".to_string(),
            idempotence_prefix: "audit:processed".to_string(),
            attempts_prefix: "audit:attempts".to_string(),
            consumer_group: "audit_consumers".to_string(),
            consumer_name: "consumer-1".to_string(),
            block_ms: 2000,
            idle_reclaim_ms: 5000,
            pending_reclaim_count: 50,
            read_count: 10,
            max_attempts: 5,
            dedupe_ttl_seconds: 24 * 3600,
            lock_ttl_seconds: 120,
            handler_timeout_ms: 30_000,
            schema_dir: PathBuf::from("schemas"),
            metrics_addr: None,
            log_format: LogFormat::Pretty,
        }
    }
}

impl Settings {
    /// Reads settings from the environment, defaulting every field.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let log_format = match optional_env("WORKSTREAM_LOG_FORMAT") {
            Some(value) if value.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };
        Self {
            substrate_host: env_string("WORKSTREAM_SUBSTRATE_HOST", &defaults.substrate_host),
            substrate_port: env_parse("WORKSTREAM_SUBSTRATE_PORT", defaults.substrate_port),
            substrate_db: env_parse("WORKSTREAM_SUBSTRATE_DB", defaults.substrate_db),
            substrate_password: optional_env("WORKSTREAM_SUBSTRATE_PASSWORD"),
            stream_name: env_string("WORKSTREAM_STREAM", &defaults.stream_name),
            dlq_stream: env_string("WORKSTREAM_DLQ_STREAM", &defaults.dlq_stream),
            key_prefix: env_string("WORKSTREAM_KEY_PREFIX", &defaults.key_prefix),
            trace_prefix: env_string("WORKSTREAM_TRACE_PREFIX", &defaults.trace_prefix),
            metrics_prefix: env_string("WORKSTREAM_METRICS_PREFIX", &defaults.metrics_prefix),
            idempotence_prefix: env_string(
                "WORKSTREAM_IDEMPOTENCE_PREFIX",
                &defaults.idempotence_prefix,
            ),
            attempts_prefix: env_string("WORKSTREAM_ATTEMPTS_PREFIX", &defaults.attempts_prefix),
            consumer_group: env_string("WORKSTREAM_CONSUMER_GROUP", &defaults.consumer_group),
            consumer_name: env_string("WORKSTREAM_CONSUMER_NAME", &defaults.consumer_name),
            block_ms: env_parse("WORKSTREAM_BLOCK_MS", defaults.block_ms),
            idle_reclaim_ms: env_parse("WORKSTREAM_IDLE_RECLAIM_MS", defaults.idle_reclaim_ms),
            pending_reclaim_count: env_parse(
                "WORKSTREAM_PENDING_RECLAIM_COUNT",
                defaults.pending_reclaim_count,
            ),
            read_count: env_parse("WORKSTREAM_READ_COUNT", defaults.read_count),
            max_attempts: env_parse("WORKSTREAM_MAX_ATTEMPTS", defaults.max_attempts),
            dedupe_ttl_seconds: env_parse(
                "WORKSTREAM_DEDUPE_TTL_SECONDS",
                defaults.dedupe_ttl_seconds,
            ),
            lock_ttl_seconds: env_parse("WORKSTREAM_LOCK_TTL_S", defaults.lock_ttl_seconds),
            handler_timeout_ms: env_parse(
                "WORKSTREAM_HANDLER_TIMEOUT_MS",
                defaults.handler_timeout_ms,
            ),
            schema_dir: PathBuf::from(env_string(
                "WORKSTREAM_SCHEMA_DIR",
                &defaults.schema_dir.to_string_lossy(),
            )),
            metrics_addr: optional_env("WORKSTREAM_METRICS_ADDR").and_then(|v| v.parse().ok()),
            log_format,
        }
    }

    /// Builds the consumer-loop configuration for a group/consumer pair.
    #[must_use]
    pub fn consumer_config(&self, group: &str, consumer_name: &str) -> ConsumerConfig {
        ConsumerConfig {
            stream: self.stream_name.clone(),
            dlq_stream: self.dlq_stream.clone(),
            group: group.to_string(),
            consumer_name: consumer_name.to_string(),
            read_count: self.read_count,
            block: Duration::from_millis(self.block_ms),
            idle_reclaim: Duration::from_millis(self.idle_reclaim_ms),
            reclaim_count: self.pending_reclaim_count,
            max_attempts: self.max_attempts,
            handler_timeout: Duration::from_millis(self.handler_timeout_ms),
            attempts_prefix: self.attempts_prefix.clone(),
            idempotence_prefix: self.idempotence_prefix.clone(),
            dedupe_ttl: Duration::from_secs(self.dedupe_ttl_seconds),
        }
    }

    /// Returns the dispatch lock lease lifetime.
    #[must_use]
    pub const fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_require_no_environment() {
        let settings = Settings::default();
        assert_eq!(settings.stream_name, "audit:events");
        assert_eq!(settings.dlq_stream, "audit:dlq");
        assert_eq!(settings.max_attempts, 5);
        assert_eq!(settings.dedupe_ttl_seconds, 86_400);
        assert_eq!(settings.lock_ttl_seconds, 120);
        assert!(settings.metrics_addr.is_none());
    }

    #[test]
    fn consumer_config_carries_group_and_timings() {
        let settings = Settings::default();
        let config = settings.consumer_config("orchestrator", "orchestrator-1");
        assert_eq!(config.group, "orchestrator");
        assert_eq!(config.consumer_name, "orchestrator-1");
        assert_eq!(config.block, Duration::from_millis(2000));
        assert_eq!(config.idle_reclaim, Duration::from_millis(5000));
        assert_eq!(config.max_attempts, 5);
    }
}
