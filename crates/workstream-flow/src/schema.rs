//! JSON Schema registry and contract validation.
//!
//! Loads one envelope schema, zero or more shared object schemas, and one
//! payload schema per event type from a base directory:
//!
//! ```text
//! schemas/
//!   envelope/event_envelope.v1.schema.json
//!   objects/*.json
//!   events/*.json        # each carries an "x_event_type" tag
//! ```
//!
//! Validation uses JSON Schema draft 2020-12 semantics with format checking.
//! On failure, the first error encountered in document order is returned
//! together with the schema's `$id`.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use serde_json::Value;

use crate::error::{Error, Result};

struct CompiledSchema {
    validator: jsonschema::Validator,
    schema_id: Option<String>,
}

impl CompiledSchema {
    fn compile(schema: &Value, origin: &str) -> Result<Self> {
        let validator = jsonschema::options()
            .should_validate_formats(true)
            .build(schema)
            .map_err(|e| Error::schema_load(format!("{origin}: schema failed to compile: {e}")))?;
        let schema_id = schema
            .get("$id")
            .and_then(Value::as_str)
            .map(ToString::to_string);
        Ok(Self {
            validator,
            schema_id,
        })
    }

    fn check(&self, instance: &Value) -> Result<()> {
        if let Some(error) = self.validator.iter_errors(instance).next() {
            return Err(Error::Schema {
                message: error.to_string(),
                schema_id: self.schema_id.clone(),
            });
        }
        Ok(())
    }
}

/// Immutable registry of contract schemas, indexed by event type.
pub struct SchemaRegistry {
    envelope: CompiledSchema,
    payloads: HashMap<String, CompiledSchema>,
    objects: BTreeMap<String, Value>,
}

fn load_json(path: &Path) -> Result<Value> {
    let raw = fs::read_to_string(path)
        .map_err(|e| Error::schema_load(format!("{}: {e}", path.display())))?;
    serde_json::from_str(&raw).map_err(|e| Error::schema_load(format!("{}: {e}", path.display())))
}

fn json_files(dir: &Path) -> Result<Vec<std::path::PathBuf>> {
    let mut files = Vec::new();
    let entries =
        fs::read_dir(dir).map_err(|e| Error::schema_load(format!("{}: {e}", dir.display())))?;
    for entry in entries {
        let entry = entry.map_err(|e| Error::schema_load(format!("{}: {e}", dir.display())))?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

impl SchemaRegistry {
    /// Loads and compiles all schemas under `base_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SchemaLoad`] when the envelope schema is absent, a
    /// file is unparseable, a payload schema lacks its `x_event_type` tag, or
    /// two payload schemas claim the same event type.
    pub fn load(base_dir: impl AsRef<Path>) -> Result<Self> {
        let base_dir = base_dir.as_ref();

        let envelope_path = base_dir
            .join("envelope")
            .join("event_envelope.v1.schema.json");
        let envelope_value = load_json(&envelope_path)?;
        let envelope = CompiledSchema::compile(&envelope_value, "envelope")?;

        let mut objects = BTreeMap::new();
        let objects_dir = base_dir.join("objects");
        if objects_dir.is_dir() {
            for path in json_files(&objects_dir)? {
                let name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or_default()
                    .to_string();
                objects.insert(name, load_json(&path)?);
            }
        }

        let mut payloads = HashMap::new();
        let events_dir = base_dir.join("events");
        for path in json_files(&events_dir)? {
            let value = load_json(&path)?;
            let Some(event_type) = value.get("x_event_type").and_then(Value::as_str) else {
                return Err(Error::schema_load(format!(
                    "{}: missing x_event_type",
                    path.display()
                )));
            };
            if payloads.contains_key(event_type) {
                return Err(Error::schema_load(format!(
                    "duplicate schema for event_type={event_type}"
                )));
            }
            let compiled = CompiledSchema::compile(&value, event_type)?;
            payloads.insert(event_type.to_string(), compiled);
        }

        Ok(Self {
            envelope,
            payloads,
            objects,
        })
    }

    /// Validates an envelope instance against the envelope schema.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Schema`] carrying the first validation error.
    pub fn validate_envelope(&self, envelope: &Value) -> Result<()> {
        self.envelope.check(envelope)
    }

    /// Validates a payload against the schema registered for `event_type`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownEventType`] when no schema is registered and
    /// [`Error::Schema`] when validation fails.
    pub fn validate_payload(&self, event_type: &str, payload: &Value) -> Result<()> {
        let Some(schema) = self.payloads.get(event_type) else {
            return Err(Error::UnknownEventType {
                event_type: event_type.to_string(),
            });
        };
        schema.check(payload)
    }

    /// Returns true when a payload schema is registered for `event_type`.
    #[must_use]
    pub fn has_event_type(&self, event_type: &str) -> bool {
        self.payloads.contains_key(event_type)
    }

    /// Returns the registered event types in sorted order.
    #[must_use]
    pub fn event_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.payloads.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    /// Returns the names of the loaded shared object schemas.
    #[must_use]
    pub fn object_names(&self) -> Vec<&str> {
        self.objects.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;

    fn shipped_schemas() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("schemas")
    }

    fn write(dir: &Path, rel: &str, value: &Value) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, serde_json::to_string_pretty(value).unwrap()).unwrap();
    }

    fn minimal_envelope_schema() -> Value {
        json!({
            "$schema": "https://json-schema.org/draft/2020-12/schema",
            "$id": "test://envelope",
            "type": "object",
            "required": ["event_id"],
            "properties": {"event_id": {"type": "string"}}
        })
    }

    #[test]
    fn loads_the_shipped_registry() {
        let registry = SchemaRegistry::load(shipped_schemas()).unwrap();
        assert!(registry.has_event_type("WORK.ITEM_DISPATCHED"));
        assert!(registry.has_event_type("USER.ANSWER_SUBMITTED"));
        assert_eq!(registry.event_types().len(), 10);
        assert!(!registry.object_names().is_empty());
    }

    #[test]
    fn missing_envelope_schema_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("events")).unwrap();
        let result = SchemaRegistry::load(dir.path());
        assert!(matches!(result, Err(Error::SchemaLoad { .. })));
    }

    #[test]
    fn duplicate_event_type_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "envelope/event_envelope.v1.schema.json",
            &minimal_envelope_schema(),
        );
        let payload = json!({
            "$schema": "https://json-schema.org/draft/2020-12/schema",
            "x_event_type": "A.B",
            "type": "object"
        });
        write(dir.path(), "events/a.json", &payload);
        write(dir.path(), "events/b.json", &payload);
        let result = SchemaRegistry::load(dir.path());
        assert!(result
            .err()
            .is_some_and(|e| e.to_string().contains("duplicate schema")));
    }

    #[test]
    fn untagged_payload_schema_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "envelope/event_envelope.v1.schema.json",
            &minimal_envelope_schema(),
        );
        write(
            dir.path(),
            "events/untagged.json",
            &json!({"type": "object"}),
        );
        let result = SchemaRegistry::load(dir.path());
        assert!(result
            .err()
            .is_some_and(|e| e.to_string().contains("x_event_type")));
    }

    #[test]
    fn unparseable_schema_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "envelope/event_envelope.v1.schema.json",
            &minimal_envelope_schema(),
        );
        fs::create_dir_all(dir.path().join("events")).unwrap();
        fs::write(dir.path().join("events/broken.json"), "{not json").unwrap();
        let result = SchemaRegistry::load(dir.path());
        assert!(matches!(result, Err(Error::SchemaLoad { .. })));
    }

    #[test]
    fn validate_payload_reports_schema_id() {
        let registry = SchemaRegistry::load(shipped_schemas()).unwrap();
        let result = registry.validate_payload("WORK.ITEM_DISPATCHED", &json!({}));
        match result {
            Err(Error::Schema { schema_id, .. }) => {
                assert!(schema_id.is_some_and(|id| id.contains("work_item_dispatched")));
            }
            other => panic!("expected schema error, got {other:?}"),
        }
    }

    #[test]
    fn unknown_event_type_is_reported() {
        let registry = SchemaRegistry::load(shipped_schemas()).unwrap();
        let result = registry.validate_payload("AUDIT.NOPE", &json!({}));
        assert!(matches!(result, Err(Error::UnknownEventType { .. })));
    }

    #[test]
    fn valid_instances_pass() {
        let registry = SchemaRegistry::load(shipped_schemas()).unwrap();
        let payload = json!({
            "project_id": "P1",
            "backlog_item_id": "B1",
            "item_type": "AGENT_TASK",
            "agent_target": "time_analyst",
            "work_context": {"rows": []}
        });
        registry
            .validate_payload("WORK.ITEM_DISPATCHED", &payload)
            .unwrap();
    }
}
