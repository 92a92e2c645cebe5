//! Job spec construction: overlaying request parameters onto a template.
//!
//! The worker expects an API-format prompt, a JSON object keyed by node
//! id where each node carries an `inputs` object. A parameter routed to
//! slot `{node_id, input_name}` ends up at
//! `prompt[node_id]["inputs"][input_name]`.

use crate::template::{GenerationTemplate, ParameterMap, ParameterSlot, SlotType};
use crate::types::JobParameters;

/// Errors raised while validating or building a job spec.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobSpecError {
    /// A supplied parameter name is not declared in the parameter map.
    #[error("Unknown parameter '{0}'")]
    UnknownParameter(String),

    /// A parameter slot points at a node the base definition does not contain.
    #[error("Parameter '{name}' targets node '{node_id}' which is not an object in the template")]
    MissingNode { name: String, node_id: String },

    /// An input image was aimed at a slot that does not accept images.
    #[error("Parameter '{0}' is not an image slot")]
    NotAnImageSlot(String),

    /// The base definition is not a JSON object.
    #[error("Template base definition must be a JSON object")]
    InvalidDefinition,
}

/// Reject the request if any name is absent from the parameter map.
///
/// When several names are unknown the lexicographically smallest one is
/// reported so the error is stable across runs.
pub fn ensure_known_parameters<'a, I>(map: &ParameterMap, names: I) -> Result<(), JobSpecError>
where
    I: IntoIterator<Item = &'a str>,
{
    let unknown = names
        .into_iter()
        .filter(|name| !map.contains_key(*name))
        .min();

    match unknown {
        Some(name) => Err(JobSpecError::UnknownParameter(name.to_string())),
        None => Ok(()),
    }
}

/// Look up the slot for `name` and require it to accept images.
pub fn image_slot<'m>(map: &'m ParameterMap, name: &str) -> Result<&'m ParameterSlot, JobSpecError> {
    let slot = map
        .get(name)
        .ok_or_else(|| JobSpecError::UnknownParameter(name.to_string()))?;
    if slot.slot_type != SlotType::Image {
        return Err(JobSpecError::NotAnImageSlot(name.to_string()));
    }
    Ok(slot)
}

/// A prompt document built for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    prompt: serde_json::Value,
}

impl JobSpec {
    /// Start from a deep copy of the template's base definition.
    pub fn from_template(template: &GenerationTemplate) -> Result<Self, JobSpecError> {
        if !template.base_definition.is_object() {
            return Err(JobSpecError::InvalidDefinition);
        }
        Ok(Self {
            prompt: template.base_definition.clone(),
        })
    }

    /// Write `value` into the slot declared for `name`.
    pub fn apply(
        &mut self,
        map: &ParameterMap,
        name: &str,
        value: serde_json::Value,
    ) -> Result<(), JobSpecError> {
        let slot = map
            .get(name)
            .ok_or_else(|| JobSpecError::UnknownParameter(name.to_string()))?;

        let missing = || JobSpecError::MissingNode {
            name: name.to_string(),
            node_id: slot.node_id.clone(),
        };

        let node = self
            .prompt
            .get_mut(&slot.node_id)
            .and_then(serde_json::Value::as_object_mut)
            .ok_or_else(missing)?;

        let inputs = node
            .entry("inputs")
            .or_insert_with(|| serde_json::Value::Object(Default::default()));
        let inputs = inputs.as_object_mut().ok_or_else(missing)?;
        inputs.insert(slot.input_name.clone(), value);
        Ok(())
    }

    pub fn prompt(&self) -> &serde_json::Value {
        &self.prompt
    }
}

/// Validate `parameters` against the template and overlay them.
///
/// The template itself is left untouched.
pub fn build_job_spec(
    template: &GenerationTemplate,
    parameters: &JobParameters,
) -> Result<JobSpec, JobSpecError> {
    ensure_known_parameters(
        &template.parameter_map,
        parameters.keys().map(String::as_str),
    )?;

    let mut spec = JobSpec::from_template(template)?;
    for (name, value) in parameters {
        spec.apply(&template.parameter_map, name, value.clone())?;
    }
    Ok(spec)
}
