//! Normalizer
//!
//! Maps a raw provider record into a flat [`InventoryRow`] following the column
//! declarations of its [`ResourceDef`]. Missing fields become empty values; only a
//! record without a natural key is dropped.

use super::registry::{ColumnDef, ColumnKind, ResourceDef, Transform};
use crate::scan::ScanTarget;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// A typed column value
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Bool(bool),
}

impl FieldValue {
    /// Empty value of a column kind
    pub fn empty(kind: ColumnKind) -> Self {
        match kind {
            ColumnKind::Text => FieldValue::Text(String::new()),
            ColumnKind::Integer => FieldValue::Integer(0),
            ColumnKind::Boolean => FieldValue::Bool(false),
        }
    }

}

/// One normalized resource, unique by `(project, natural_key)` within its resource type
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InventoryRow {
    pub project: String,
    pub natural_key: String,
    pub target: String,
    pub fields: BTreeMap<String, FieldValue>,
}

impl InventoryRow {
    /// Get a column value by name
    pub fn field(&self, column: &str) -> Option<&FieldValue> {
        self.fields.get(column)
    }
}

/// Normalize one raw record read from `project`. Returns `None` when the record has no natural key.
pub fn normalize(
    def: &ResourceDef,
    project: &str,
    target: &ScanTarget,
    record: &Value,
) -> Option<InventoryRow> {
    let Some(natural_key) = lookup(record, &def.natural_key.json_path).and_then(scalar_text)
    else {
        tracing::debug!(
            resource = %def.key,
            target = %target,
            "dropping record without {}",
            def.natural_key.json_path
        );
        return None;
    };

    let fields = def
        .columns
        .iter()
        .map(|col| (col.column.clone(), column_value(col, lookup(record, &col.json_path))))
        .collect();

    Some(InventoryRow {
        project: project.to_string(),
        natural_key,
        target: target.to_string(),
        fields,
    })
}

/// Follow a dot-notation path through a JSON value; numeric parts index arrays
pub fn lookup<'a>(item: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = item;

    for part in path.split('.') {
        current = match (part.parse::<usize>(), current) {
            (Ok(idx), Value::Array(arr)) => arr.get(idx)?,
            _ => current.get(part)?,
        };
    }

    match current {
        Value::Null => None,
        other => Some(other),
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn column_value(col: &ColumnDef, value: Option<&Value>) -> FieldValue {
    let Some(value) = value else {
        return FieldValue::empty(col.kind);
    };

    match col.transform {
        Transform::None => convert(col.kind, value),
        Transform::ShortName => match value.as_str() {
            Some(url) => FieldValue::Text(extract_short_name(url)),
            None => convert(col.kind, value),
        },
        Transform::Join => FieldValue::Text(join_strings(value)),
        Transform::Count => FieldValue::Integer(match value {
            Value::Array(arr) => arr.len() as i64,
            Value::Object(map) => map.len() as i64,
            _ => 0,
        }),
        Transform::Labels => FieldValue::Text(format_labels(value)),
        Transform::Json => FieldValue::Text(value.to_string()),
    }
}

fn convert(kind: ColumnKind, value: &Value) -> FieldValue {
    match kind {
        ColumnKind::Text => FieldValue::Text(match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            other => other.to_string(),
        }),
        ColumnKind::Integer => FieldValue::Integer(match value {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .unwrap_or(0),
            // int64 fields arrive as JSON strings in GCP APIs
            Value::String(s) => s.trim().parse().unwrap_or(0),
            _ => 0,
        }),
        ColumnKind::Boolean => FieldValue::Bool(match value {
            Value::Bool(b) => *b,
            Value::String(s) => s.eq_ignore_ascii_case("true"),
            _ => false,
        }),
    }
}

/// Extract short name from GCP resource URL
/// e.g., "https://www.googleapis.com/compute/v1/projects/my-project/zones/us-central1-a" -> "us-central1-a"
pub(crate) fn extract_short_name(url: &str) -> String {
    url.rsplit('/').next().unwrap_or(url).to_string()
}

fn join_strings(value: &Value) -> String {
    match value {
        Value::Array(arr) => arr
            .iter()
            .filter_map(|v| v.as_str())
            .collect::<Vec<_>>()
            .join(","),
        Value::String(s) => s.clone(),
        _ => String::new(),
    }
}

fn format_labels(value: &Value) -> String {
    let Value::Object(map) = value else {
        return String::new();
    };

    // serde_json maps are sorted by key
    map.iter()
        .map(|(k, v)| match v {
            Value::String(s) => format!("{}={}", k, s),
            other => format!("{}={}", k, other),
        })
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::registry::get_resource;
    use serde_json::json;

    const PROJECT: &str = "inventory-test";

    fn zone() -> ScanTarget {
        ScanTarget::new("us-central1-a")
    }

    #[test]
    fn test_normalize_compute_instance() {
        let def = get_resource("compute-instances").unwrap();
        let record = json!({
            "id": "8123456789012345678",
            "name": "web-1",
            "status": "RUNNING",
            "machineType": "https://www.googleapis.com/compute/v1/projects/p/zones/us-central1-a/machineTypes/e2-medium",
            "zone": "https://www.googleapis.com/compute/v1/projects/p/zones/us-central1-a",
            "networkInterfaces": [{
                "network": "projects/p/global/networks/default",
                "networkIP": "10.128.0.2",
                "accessConfigs": [{ "natIP": "34.1.2.3" }]
            }],
            "tags": { "items": ["http-server", "https-server"] },
            "disks": [{}, {}],
            "deletionProtection": true,
            "labels": { "team": "web", "env": "prod" }
        });

        let row = normalize(def, PROJECT, &zone(), &record).expect("row");
        assert_eq!(row.natural_key, "8123456789012345678");
        assert_eq!(row.project, PROJECT);
        assert_eq!(row.target, "us-central1-a");
        assert_eq!(row.field("name"), Some(&FieldValue::Text("web-1".into())));
        assert_eq!(row.field("machine_type"), Some(&FieldValue::Text("e2-medium".into())));
        assert_eq!(row.field("zone"), Some(&FieldValue::Text("us-central1-a".into())));
        assert_eq!(row.field("network"), Some(&FieldValue::Text("default".into())));
        assert_eq!(row.field("private_ip"), Some(&FieldValue::Text("10.128.0.2".into())));
        assert_eq!(row.field("public_ip"), Some(&FieldValue::Text("34.1.2.3".into())));
        assert_eq!(
            row.field("network_tags"),
            Some(&FieldValue::Text("http-server,https-server".into()))
        );
        assert_eq!(row.field("disk_count"), Some(&FieldValue::Integer(2)));
        assert_eq!(row.field("deletion_protection"), Some(&FieldValue::Bool(true)));
        assert_eq!(row.field("labels"), Some(&FieldValue::Text("env=prod,team=web".into())));
    }

    #[test]
    fn test_absent_fields_become_empty_values() {
        let def = get_resource("compute-instances").unwrap();
        let row = normalize(def, PROJECT, &zone(), &json!({ "id": 42 })).expect("row");

        assert_eq!(row.natural_key, "42");
        assert_eq!(row.fields.len(), def.columns.len());
        assert_eq!(row.field("public_ip"), Some(&FieldValue::Text(String::new())));
        assert_eq!(row.field("disk_count"), Some(&FieldValue::Integer(0)));
        assert_eq!(row.field("can_ip_forward"), Some(&FieldValue::Bool(false)));
    }

    #[test]
    fn test_record_without_key_is_dropped() {
        let def = get_resource("storage-buckets").unwrap();
        assert!(normalize(def, PROJECT, &ScanTarget::global(), &json!({ "location": "US" })).is_none());
        assert!(normalize(def, PROJECT, &ScanTarget::global(), &json!({ "name": "" })).is_none());
        assert!(normalize(def, PROJECT, &ScanTarget::global(), &json!({ "name": null })).is_none());
    }

    #[test]
    fn test_integer_fields_parse_from_strings() {
        let def = get_resource("sql-instances").unwrap();
        let record = json!({
            "name": "orders-db",
            "settings": { "dataDiskSizeGb": "100", "backupConfiguration": { "enabled": true } }
        });

        let row = normalize(def, PROJECT, &ScanTarget::global(), &record).unwrap();
        assert_eq!(row.field("data_disk_size_gb"), Some(&FieldValue::Integer(100)));
        assert_eq!(row.field("backup_enabled"), Some(&FieldValue::Bool(true)));
    }

    #[test]
    fn test_lookup_paths() {
        let value = json!({ "a": { "b": [ { "c": "x" } ] }, "n": null });
        assert_eq!(lookup(&value, "a.b.0.c"), Some(&json!("x")));
        assert_eq!(lookup(&value, "a.b.1.c"), None);
        assert_eq!(lookup(&value, "a.missing"), None);
        assert_eq!(lookup(&value, "n"), None);
    }

    #[test]
    fn test_extract_short_name() {
        assert_eq!(extract_short_name("projects/p/zones/us-east1-b"), "us-east1-b");
        assert_eq!(extract_short_name("plain"), "plain");
    }
}
