//! Detection-side records: runs, images and stored fragments.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::value::Value;

/// One polygon vertex, image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// The four vertices of a detected code, in reading order as reported by
/// the reader. Not necessarily convex-ordered.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Polygon(pub [Point; 4]);

/// One decoded reading handed to ingestion: raw text plus its polygon.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub text: String,
    pub bounds: Polygon,
}

/// One image submitted to a batch ingestion call.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageInput {
    pub path: String,
    /// Unique within a run; re-submitting a known name is an error.
    pub name: String,
    pub detections: Vec<Detection>,
}

/// A persisted image row.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRecord {
    pub id: i64,
    pub run_id: i64,
    pub path: String,
    pub name: String,
    /// Resolved target table, when dispatch matched a template.
    pub target: Option<String>,
    pub target_id: Option<i64>,
    /// Operator-settable exclusion flag.
    pub ignored: bool,
    pub created_at: DateTime<Utc>,
}

/// A persisted fragment row. Fragments are only ever added or explicitly
/// removed, never overwritten in place; `data` is null for fragments added
/// by hand but not yet read.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub id: i64,
    pub image_id: i64,
    pub data: Option<String>,
    pub bounds: Polygon,
}

/// Canonicalized run-scoping constraints.
///
/// Outer table order is preserved exactly as supplied - match semantics
/// depend on it - while each table's field/value pairs are sorted by field
/// name so equal constraints always canonicalize identically.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConstraints(pub Vec<(String, Vec<(String, Value)>)>);

impl RunConstraints {
    /// The canonical textual identity of this constraint set.
    pub fn canonical_json(&self) -> String {
        let doc: Vec<serde_json::Value> = self
            .0
            .iter()
            .map(|(table, fields)| {
                serde_json::json!([
                    table,
                    fields
                        .iter()
                        .map(|(name, value)| serde_json::json!([name, value]))
                        .collect::<Vec<_>>()
                ])
            })
            .collect();
        serde_json::to_string(&doc).expect("constraint data serializes")
    }

    /// Rebuild constraints from their canonical serialization. Inverse of
    /// [`canonical_json`](Self::canonical_json) for any stored value.
    pub fn from_canonical_json(text: &str) -> Option<Self> {
        let doc: Vec<(String, Vec<(String, serde_json::Value)>)> =
            serde_json::from_str(text).ok()?;
        let mut tables = Vec::with_capacity(doc.len());
        for (table, fields) in doc {
            let mut pairs = Vec::with_capacity(fields.len());
            for (name, raw) in fields {
                let value = match raw {
                    serde_json::Value::Null => Value::Null,
                    serde_json::Value::Number(n) => Value::Int(n.as_i64()?),
                    serde_json::Value::String(s) => Value::Text(s),
                    _ => return None,
                };
                pairs.push((name, value));
            }
            tables.push((table, pairs));
        }
        Some(Self(tables))
    }

    /// The stored default field values for one constrained table.
    pub fn defaults_for(&self, table: &str) -> HashMap<String, Value> {
        self.0
            .iter()
            .filter(|(t, _)| t == table)
            .flat_map(|(_, fields)| fields.iter().cloned())
            .collect()
    }

    /// Constrained table names, in the order the run declared them. Target
    /// matching walks this order.
    pub fn table_order(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(t, _)| t.as_str())
    }
}

/// A persisted, deduplicated detection run.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionRun {
    pub id: i64,
    pub constraints: RunConstraints,
    pub created_at: DateTime<Utc>,
}
