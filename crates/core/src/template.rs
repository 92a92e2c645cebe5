//! Generation templates and their parameter maps.
//!
//! A template pairs a worker prompt document (`base_definition`, keyed by
//! node id) with a parameter map that declares which node input each
//! user-facing parameter writes to.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::{Credits, DbId};

/// What kind of value a parameter slot accepts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotType {
    /// A plain JSON value (seed, prompt text, cfg, ...).
    #[default]
    Value,
    /// A staged input image reference (e.g. a `LoadImage` node's `image` input).
    Image,
}

/// Target of a single parameter inside the base definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSlot {
    pub node_id: String,
    pub input_name: String,
    #[serde(default)]
    pub slot_type: SlotType,
}

impl ParameterSlot {
    pub fn value(node_id: impl Into<String>, input_name: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            input_name: input_name.into(),
            slot_type: SlotType::Value,
        }
    }

    pub fn image(node_id: impl Into<String>, input_name: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            input_name: input_name.into(),
            slot_type: SlotType::Image,
        }
    }
}

/// Parameter name -> slot.
pub type ParameterMap = HashMap<String, ParameterSlot>;

/// A reusable job blueprint as returned by the template store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationTemplate {
    pub id: DbId,
    /// Worker prompt document keyed by node id. Never mutated after load.
    pub base_definition: serde_json::Value,
    pub parameter_map: ParameterMap,
    /// Credits debited per submitted job.
    pub cost: Credits,
}
