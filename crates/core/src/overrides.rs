//! Override engine: rewrites positional widget values on workflow nodes.
//!
//! Requests carry an [`OverrideMap`] keyed by `"<type>:<id>"` (one node)
//! or `"<type>"` (every node of that type). Each [`OverrideSpec`] maps a
//! logical field name to a new value. Because ComfyUI widget values are
//! positional and carry no names, logical names are resolved to slots via
//! a [`FieldPositionTable`]. Names missing from the table fall back to the
//! first numeric widget value of the node.
//!
//! The table is keyed by field name only, so a name means the same slot
//! on every node type. That is a known limitation of the positional
//! widget format, not something the engine tries to correct.

use std::collections::BTreeMap;
use std::fmt;

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;

use crate::error::CoreError;
use crate::graph::Graph;

/// New values for one node, keyed by case-insensitive field name.
pub type OverrideSpec = IndexMap<String, Value>;

/// All overrides of a request, keyed by `"<type>:<id>"` or `"<type>"`.
pub type OverrideMap = IndexMap<String, OverrideSpec>;

/// Slot a logical field name maps to within a node's widget values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawPosition")]
pub enum FieldPosition {
    /// Fixed zero-based index.
    Index(usize),
    /// The last widget value, whatever the sequence length.
    Last,
}

impl FieldPosition {
    /// Resolve to a concrete index for a sequence of `len` values.
    pub fn resolve(self, len: usize) -> Option<usize> {
        match self {
            Self::Index(index) if index < len => Some(index),
            Self::Last if len > 0 => Some(len - 1),
            _ => None,
        }
    }
}

impl fmt::Display for FieldPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(index) => write!(f, "{index}"),
            Self::Last => f.write_str("last"),
        }
    }
}

/// Accepted JSON forms: `3` or `"last"`.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawPosition {
    Index(usize),
    Keyword(String),
}

impl TryFrom<RawPosition> for FieldPosition {
    type Error = String;

    fn try_from(raw: RawPosition) -> Result<Self, Self::Error> {
        match raw {
            RawPosition::Index(index) => Ok(Self::Index(index)),
            RawPosition::Keyword(word) if word.eq_ignore_ascii_case("last") => Ok(Self::Last),
            RawPosition::Keyword(word) => Err(format!(
                "invalid field position '{word}', expected an index or \"last\""
            )),
        }
    }
}

/// Built-in mapping from logical field names to widget slots.
pub const DEFAULT_FIELD_POSITIONS: &[(&str, FieldPosition)] = &[
    ("prompt", FieldPosition::Index(0)),
    ("text", FieldPosition::Index(0)),
    ("denoise", FieldPosition::Last),
    ("steps", FieldPosition::Index(2)),
    ("tile_batch", FieldPosition::Index(4)),
    ("tile_batch_size", FieldPosition::Index(4)),
    // Media inputs store the file name, not the payload.
    ("audio", FieldPosition::Index(0)),
    ("image", FieldPosition::Index(0)),
];

/// Explicit configuration mapping field names to widget positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPositionTable {
    entries: BTreeMap<String, FieldPosition>,
}

impl Default for FieldPositionTable {
    fn default() -> Self {
        let mut table = Self::empty();
        for (name, position) in DEFAULT_FIELD_POSITIONS {
            table.insert(name, *position);
        }
        table
    }
}

impl FieldPositionTable {
    /// A table with no entries; every field uses the numeric fallback.
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Add or replace an entry. Names are stored lower-cased.
    pub fn insert(&mut self, name: &str, position: FieldPosition) {
        self.entries.insert(name.to_lowercase(), position);
    }

    /// Look up a field name (case-insensitive).
    pub fn get(&self, name: &str) -> Option<FieldPosition> {
        self.entries.get(&name.to_lowercase()).copied()
    }

    /// All entries, sorted by name.
    pub fn entries(&self) -> impl Iterator<Item = (&str, FieldPosition)> {
        self.entries.iter().map(|(name, pos)| (name.as_str(), *pos))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Merge entries from a JSON object such as `{"cfg": 3, "strength": "last"}`.
    /// Merged entries replace existing ones.
    pub fn merge_json(&mut self, raw: &str) -> Result<usize, serde_json::Error> {
        let extra: BTreeMap<String, FieldPosition> = serde_json::from_str(raw)?;
        let count = extra.len();
        for (name, position) in extra {
            self.insert(&name, position);
        }
        Ok(count)
    }
}

/// One planned widget write.
#[derive(Debug)]
struct FieldWrite {
    node_index: usize,
    position: usize,
    value: Value,
}

/// Apply `overrides` to `graph` in place and return the number of widget
/// values written.
///
/// For each node the instance key `type:id` is tried before the type key;
/// at most one spec applies per node. Keys that match no node are ignored.
/// Every write is planned before the graph is touched, so an error leaves
/// the graph unchanged, and a run with nothing to write leaves it
/// byte-identical.
pub fn apply_overrides(
    graph: &mut Graph,
    overrides: &OverrideMap,
    table: &FieldPositionTable,
) -> Result<usize, CoreError> {
    let plan = plan_writes(graph, overrides, table)?;
    let written = plan.len();

    for write in plan {
        graph.set_field(write.node_index, write.position, write.value);
    }

    Ok(written)
}

fn plan_writes(
    graph: &Graph,
    overrides: &OverrideMap,
    table: &FieldPositionTable,
) -> Result<Vec<FieldWrite>, CoreError> {
    let mut plan = Vec::new();
    if overrides.is_empty() {
        return Ok(plan);
    }

    for node in graph.nodes() {
        let Some(node_type) = node.node_type() else {
            continue;
        };
        let node_id = node.id();

        let spec = node_id
            .as_deref()
            .and_then(|id| overrides.get(&format!("{node_type}:{id}")))
            .or_else(|| overrides.get(node_type));
        let Some(spec) = spec else {
            continue;
        };
        let Some(fields) = node.fields() else {
            continue;
        };

        // Later fields in a spec see the values written by earlier ones.
        let mut working = fields.to_vec();

        for (field, value) in spec {
            let field = field.to_lowercase();
            let position = match table.get(&field) {
                Some(position) => position.resolve(working.len()).ok_or_else(|| {
                    CoreError::FieldIndexOutOfRange {
                        node_type: node_type.to_owned(),
                        node_id: node_id.clone().unwrap_or_default(),
                        field: field.clone(),
                        position,
                        len: working.len(),
                    }
                })?,
                None => match working.iter().position(Value::is_number) {
                    Some(index) => index,
                    None => continue,
                },
            };

            working[position] = value.clone();
            plan.push(FieldWrite {
                node_index: node.index(),
                position,
                value: value.clone(),
            });
        }
    }

    Ok(plan)
}
