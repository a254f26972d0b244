//! ComfyUI workflow graph model.
//!
//! A workflow in ComfyUI's UI format is a JSON object with a `nodes`
//! array plus arbitrary metadata (`links`, `groups`, `extra`, ...). The
//! worker only understands `nodes[].type`, `nodes[].id` and
//! `nodes[].widgets_values`; everything else is carried through
//! untouched.
//!
//! [`Graph`] keeps the original text until the first mutation so an
//! unmodified graph serializes back to exactly the bytes it was parsed
//! from.

use std::collections::HashSet;

use serde_json::{Map, Value};

use crate::error::CoreError;

/// Key of the node collection in the workflow document.
pub const NODES_KEY: &str = "nodes";

/// Key of the positional widget value list on each node.
pub const FIELDS_KEY: &str = "widgets_values";

/// A parsed workflow graph.
#[derive(Debug, Clone)]
pub struct Graph {
    document: Value,
    /// Original text, dropped on the first mutation.
    source: Option<String>,
}

/// Read-only view of one node in a [`Graph`].
#[derive(Debug, Clone, Copy)]
pub struct Node<'a> {
    index: usize,
    object: &'a Map<String, Value>,
}

impl Graph {
    /// Parse a workflow document.
    ///
    /// Fails with [`CoreError::MalformedGraph`] when the text is not JSON,
    /// is not an object, has no `nodes` array, contains a node that is not
    /// an object, or repeats a node id.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let document: Value = serde_json::from_str(raw)
            .map_err(|e| CoreError::MalformedGraph(format!("invalid JSON: {e}")))?;

        let nodes = document
            .as_object()
            .ok_or_else(|| CoreError::MalformedGraph("workflow must be a JSON object".into()))?
            .get(NODES_KEY)
            .and_then(Value::as_array)
            .ok_or_else(|| {
                CoreError::MalformedGraph(format!("workflow has no '{NODES_KEY}' array"))
            })?;

        let mut seen = HashSet::with_capacity(nodes.len());
        for (index, node) in nodes.iter().enumerate() {
            let object = node.as_object().ok_or_else(|| {
                CoreError::MalformedGraph(format!("node at index {index} is not an object"))
            })?;
            if let Some(id) = object.get("id").and_then(id_to_string) {
                if !seen.insert(id.clone()) {
                    return Err(CoreError::MalformedGraph(format!("duplicate node id {id}")));
                }
            }
        }

        Ok(Self {
            document,
            source: Some(raw.to_owned()),
        })
    }

    /// Serialize the graph.
    ///
    /// Returns the original text verbatim if the graph was never mutated.
    pub fn serialize(&self) -> String {
        match &self.source {
            Some(raw) => raw.clone(),
            None => self.document.to_string(),
        }
    }

    /// Whether any node field was rewritten since parsing.
    pub fn is_modified(&self) -> bool {
        self.source.is_none()
    }

    /// The full workflow document, as submitted to the backend.
    pub fn as_value(&self) -> &Value {
        &self.document
    }

    /// Iterate over the nodes in document order.
    pub fn nodes(&self) -> impl Iterator<Item = Node<'_>> {
        self.node_array()
            .iter()
            .enumerate()
            .filter_map(|(index, value)| value.as_object().map(|object| Node { index, object }))
    }

    pub fn node_count(&self) -> usize {
        self.node_array().len()
    }

    /// Overwrite one widget value. Returns `false` (and leaves the graph
    /// untouched) if the node, its widget list or the slot does not exist.
    pub(crate) fn set_field(&mut self, node_index: usize, position: usize, value: Value) -> bool {
        let slot = self
            .document
            .get_mut(NODES_KEY)
            .and_then(|nodes| nodes.get_mut(node_index))
            .and_then(|node| node.get_mut(FIELDS_KEY))
            .and_then(Value::as_array_mut)
            .and_then(|fields| fields.get_mut(position));

        match slot {
            Some(slot) => {
                *slot = value;
                self.source = None;
                true
            }
            None => false,
        }
    }

    fn node_array(&self) -> &[Value] {
        self.document
            .get(NODES_KEY)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

impl<'a> Node<'a> {
    /// Position of the node in the `nodes` array.
    pub fn index(&self) -> usize {
        self.index
    }

    /// The node's `type` tag (e.g. `KSampler`).
    pub fn node_type(&self) -> Option<&'a str> {
        self.object.get("type").and_then(Value::as_str)
    }

    /// The node id rendered as text, so `3` and `"3"` both match `KSampler:3`.
    pub fn id(&self) -> Option<String> {
        self.object.get("id").and_then(id_to_string)
    }

    /// The positional widget values, if present and sequence-shaped.
    pub fn fields(&self) -> Option<&'a [Value]> {
        self.object
            .get(FIELDS_KEY)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
    }
}

fn id_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}
