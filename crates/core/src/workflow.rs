//! Parameterized workflow template.
//!
//! A workflow is the API-format document the execution engine accepts: an
//! ordered map from node id to `{inputs, class_type, _meta}`. Node inputs are
//! heterogeneous and stay untyped (`serde_json::Value`); only the three slots
//! the service binds per request are addressed by name, through
//! [`TemplateSlots`].

use std::fmt;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Document model
// ---------------------------------------------------------------------------

/// Display metadata attached to a node by the editor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeMeta {
    pub title: String,
}

/// A single node of the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    /// Node parameters; shape depends on `class_type`.
    pub inputs: serde_json::Map<String, Value>,
    pub class_type: String,
    #[serde(rename = "_meta", default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<NodeMeta>,
}

impl WorkflowNode {
    /// Editor title, falling back to the node class.
    pub fn display_title(&self) -> &str {
        self.meta
            .as_ref()
            .map(|m| m.title.as_str())
            .unwrap_or(&self.class_type)
    }
}

/// The workflow document. Loaded once at startup and cloned per request;
/// `Clone` is a deep copy, so binding a clone never touches the original.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobTemplate {
    nodes: IndexMap<String, WorkflowNode>,
}

impl JobTemplate {
    /// Read and parse the template document at `path`.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            CoreError::Storage(format!("Failed to read workflow {}: {e}", path.display()))
        })?;
        Self::from_json(&text)
    }

    /// Parse a template from its JSON text.
    pub fn from_json(text: &str) -> Result<Self, CoreError> {
        let template: Self = serde_json::from_str(text)
            .map_err(|e| CoreError::Validation(format!("Malformed workflow document: {e}")))?;
        if template.nodes.is_empty() {
            return Err(CoreError::Validation("Workflow document has no nodes".into()));
        }
        Ok(template)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, node_id: &str) -> Option<&WorkflowNode> {
        self.nodes.get(node_id)
    }

    /// Nodes in document order.
    pub fn nodes(&self) -> impl Iterator<Item = (&str, &WorkflowNode)> {
        self.nodes.iter().map(|(id, node)| (id.as_str(), node))
    }

    /// Overwrite `inputs[input_key]` of node `node_id`.
    ///
    /// Fails with [`CoreError::SlotNotFound`] when the node is absent, which
    /// is how an incompatible template surfaces at request time.
    pub fn bind_slot(
        &mut self,
        node_id: &str,
        input_key: &str,
        value: impl Into<Value>,
    ) -> Result<(), CoreError> {
        let node = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| CoreError::SlotNotFound {
                node_id: node_id.to_string(),
            })?;
        node.inputs.insert(input_key.to_string(), value.into());
        Ok(())
    }

    pub fn bind(&mut self, slot: &SlotRef, value: impl Into<Value>) -> Result<(), CoreError> {
        self.bind_slot(&slot.node_id, &slot.input_key, value)
    }

    /// Current value of a slot, if both node and input exist.
    pub fn slot_value(&self, slot: &SlotRef) -> Option<&Value> {
        self.nodes
            .get(&slot.node_id)
            .and_then(|node| node.inputs.get(&slot.input_key))
    }
}

// ---------------------------------------------------------------------------
// Slots
// ---------------------------------------------------------------------------

/// Address of one input field: `<node_id>.<input_key>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotRef {
    pub node_id: String,
    pub input_key: String,
}

impl SlotRef {
    pub fn new(node_id: impl Into<String>, input_key: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            input_key: input_key.into(),
        }
    }

    /// Parse `"<node_id>.<input_key>"`. The first `.` separates the parts.
    pub fn parse(text: &str) -> Result<Self, CoreError> {
        match text.trim().split_once('.') {
            Some((node, key)) if !node.is_empty() && !key.is_empty() => Ok(Self::new(node, key)),
            _ => Err(CoreError::Validation(format!(
                "Invalid slot '{text}', expected <node_id>.<input_key>"
            ))),
        }
    }
}

impl fmt::Display for SlotRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.node_id, self.input_key)
    }
}

/// The three slots the orchestrator binds per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateSlots {
    pub human_image: SlotRef,
    pub garment_image: SlotRef,
    /// Filename prefix the engine uses when saving the result.
    pub output_prefix: SlotRef,
}

impl Default for TemplateSlots {
    fn default() -> Self {
        Self {
            human_image: SlotRef::new("1", "image"),
            garment_image: SlotRef::new("2", "image"),
            output_prefix: SlotRef::new("save", "filename_prefix"),
        }
    }
}

impl TemplateSlots {
    /// Check every slot's node exists in `template`.
    pub fn validate_against(&self, template: &JobTemplate) -> Result<(), CoreError> {
        for slot in [&self.human_image, &self.garment_image, &self.output_prefix] {
            if template.node(&slot.node_id).is_none() {
                return Err(CoreError::SlotNotFound {
                    node_id: slot.node_id.clone(),
                });
            }
        }
        Ok(())
    }
}
