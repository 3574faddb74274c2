//! ---
//! mhe_section: "01-core-functionality"
//! mhe_subsection: "module"
//! mhe_type: "source"
//! mhe_scope: "code"
//! mhe_description: "Forward migration of persisted entity configuration."
//! mhe_version: "v0.0.0-prealpha"
//! mhe_owner: "tbd"
//! ---
use std::collections::BTreeMap;

use serde_json::{json, Map, Value};
use tracing::debug;

use crate::config::PersistedConfig;
use crate::error::MigrationError;

/// Schema version produced by this build.
pub const CURRENT_SCHEMA: u32 = 3;

/// Transformation from schema `n` to `n + 1`, applied to the document in place.
pub type MigrationStep = fn(&mut Map<String, Value>) -> Result<(), String>;

/// Ordered set of schema transformations.
#[derive(Debug, Clone)]
pub struct ConfigMigrator {
    current: u32,
    steps: BTreeMap<u32, MigrationStep>,
}

impl Default for ConfigMigrator {
    fn default() -> Self {
        let mut steps: BTreeMap<u32, MigrationStep> = BTreeMap::new();
        steps.insert(1, nest_compute_and_volume_stores);
        steps.insert(2, group_network_storage_registry);
        Self {
            current: CURRENT_SCHEMA,
            steps,
        }
    }
}

impl ConfigMigrator {
    /// Migrator with custom steps keyed by the schema they upgrade from.
    pub fn with_steps(current: u32, steps: BTreeMap<u32, MigrationStep>) -> Self {
        Self { current, steps }
    }

    pub fn current_schema(&self) -> u32 {
        self.current
    }

    /// Same steps, stopping at `schema` instead of the current schema.
    pub fn up_to(&self, schema: u32) -> Self {
        let current = schema.min(self.current);
        Self {
            current,
            steps: self
                .steps
                .iter()
                .filter(|(from, _)| **from < current)
                .map(|(from, step)| (*from, *step))
                .collect(),
        }
    }

    /// Bring `persisted` up to the current schema. A current document is returned unchanged.
    pub fn migrate(&self, persisted: PersistedConfig) -> Result<PersistedConfig, MigrationError> {
        let found = persisted.schema_version;
        if found > self.current {
            return Err(MigrationError::UnsupportedSchema {
                found,
                current: self.current,
            });
        }
        if found == self.current {
            return Ok(persisted);
        }
        if found == 0 {
            return Err(MigrationError::Gap {
                from: 0,
                current: self.current,
            });
        }

        let PersistedConfig {
            update_in_progress,
            document,
            ..
        } = persisted;
        let mut document = match document {
            Value::Object(map) => map,
            other => {
                return Err(MigrationError::Transform {
                    from: found,
                    reason: format!("expected an object document, found {}", kind_of(&other)),
                })
            }
        };

        for from in found..self.current {
            let step = self.steps.get(&from).ok_or(MigrationError::Gap {
                from,
                current: self.current,
            })?;
            step(&mut document).map_err(|reason| MigrationError::Transform { from, reason })?;
            debug!(from, to = from + 1, "applied configuration migration");
        }

        Ok(PersistedConfig {
            schema_version: self.current,
            update_in_progress,
            document: Value::Object(document),
        })
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Schema 1 kept compute limits at the top level and volume stores as a
/// label to location map.
fn nest_compute_and_volume_stores(doc: &mut Map<String, Value>) -> Result<(), String> {
    let resource_path = doc
        .remove("resource_pool")
        .ok_or_else(|| "missing resource_pool".to_owned())?;
    let mut compute = Map::new();
    compute.insert("resource_path".into(), resource_path);
    if let Some(cpu) = doc.remove("cpu_mhz") {
        compute.insert("cpu_limit_mhz".into(), cpu);
    }
    if let Some(memory) = doc.remove("memory_mb") {
        compute.insert("memory_limit_mb".into(), memory);
    }
    doc.insert("compute".into(), Value::Object(compute));

    let stores = match doc.remove("volume_stores") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Object(map)) => map
            .into_iter()
            .map(|(label, location)| match location {
                Value::String(location) => Ok(json!({ "label": label, "location": location })),
                other => Err(format!(
                    "volume store {label} has a {} location",
                    kind_of(&other)
                )),
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(other) => return Err(format!("volume_stores is a {}", kind_of(&other))),
    };
    doc.insert("volume_stores".into(), Value::Array(stores));
    Ok(())
}

/// Schema 2 kept network, storage and registry settings flat.
fn group_network_storage_registry(doc: &mut Map<String, Value>) -> Result<(), String> {
    let mut network = Map::new();
    for key in ["bridge", "public", "client", "management"] {
        if let Some(value) = doc.remove(&format!("{key}_network")) {
            network.insert(key.into(), value);
        }
    }
    // Client and management traffic shared the public network before schema 3.
    if let Some(public) = network.get("public").cloned() {
        network.entry("client").or_insert_with(|| public.clone());
        network.entry("management").or_insert(public);
    }
    network.insert(
        "container_networks".into(),
        doc.remove("container_networks").unwrap_or_else(|| json!([])),
    );
    doc.insert("network".into(), Value::Object(network));

    let mut storage = Map::new();
    storage.insert(
        "image_stores".into(),
        doc.remove("image_stores").unwrap_or_else(|| json!([])),
    );
    storage.insert(
        "volume_stores".into(),
        doc.remove("volume_stores").unwrap_or_else(|| json!([])),
    );
    if let Some(size) = doc.remove("base_image_size_mb") {
        storage.insert("base_image_size_mb".into(), size);
    }
    doc.insert("storage".into(), Value::Object(storage));

    let mut registry = Map::new();
    registry.insert(
        "insecure".into(),
        doc.remove("insecure_registries").unwrap_or_else(|| json!([])),
    );
    registry.insert(
        "whitelist".into(),
        doc.remove("registry_whitelist").unwrap_or_else(|| json!([])),
    );
    doc.insert("registry".into(), Value::Object(registry));
    Ok(())
}
