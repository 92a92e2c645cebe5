//! Job submission: template lookup, validation, input staging, dispatch.
//!
//! Every request is validated in full before the worker is contacted. The
//! job is registered for correlation only after the worker has accepted it,
//! so a failed submission never leaves a pending context behind. A job
//! whose cost cannot be debited is withdrawn from the worker queue.

use std::sync::Arc;

use chrono::Utc;
use genforge_comfyui::api::{ComfyUIApi, ComfyUIApiError};
use genforge_core::error::CoreError;
use genforge_core::job_spec::{build_job_spec, ensure_known_parameters, image_slot, JobSpecError};
use genforge_core::mime::content_type_for;
use genforge_core::types::{Credits, DbId, JobParameters};

use crate::collaborators::{Ledger, TemplateStore};
use crate::registry::{CorrelationRegistry, JobContext};

/// An input image to stage on the worker and route into an image slot.
#[derive(Debug, Clone)]
pub struct InputImage {
    /// Parameter (image slot) the staged reference is written to.
    pub parameter: String,
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl InputImage {
    /// Build an input image, inferring the content type from `filename`.
    pub fn new(parameter: impl Into<String>, filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        let filename = filename.into();
        Self {
            parameter: parameter.into(),
            content_type: content_type_for(&filename).to_string(),
            filename,
            bytes,
        }
    }
}

/// A user's request to run a template.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub template_id: DbId,
    pub user_id: DbId,
    pub parameters: JobParameters,
    pub images: Vec<InputImage>,
}

/// Why a submission was rejected.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("Unknown parameter '{0}'")]
    UnknownParameter(String),

    #[error("Template {0} not found")]
    TemplateNotFound(DbId),

    #[error("Insufficient funds: {required} credits required, {available} available")]
    InsufficientFunds { required: Credits, available: Credits },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Failed to stage input image '{filename}': {source}")]
    ImageUploadFailed {
        filename: String,
        #[source]
        source: ComfyUIApiError,
    },

    #[error("Worker rejected the submission: {0}")]
    WorkerSubmissionFailed(#[source] ComfyUIApiError),

    #[error(transparent)]
    Collaborator(CoreError),
}

impl From<JobSpecError> for SubmitError {
    fn from(err: JobSpecError) -> Self {
        match err {
            JobSpecError::UnknownParameter(name) => Self::UnknownParameter(name),
            other => Self::Validation(other.to_string()),
        }
    }
}

/// Turns [`SubmitRequest`]s into queued worker jobs.
pub struct JobSubmitter {
    api: ComfyUIApi,
    templates: Arc<dyn TemplateStore>,
    ledger: Arc<dyn Ledger>,
    registry: Arc<CorrelationRegistry>,
}

impl JobSubmitter {
    pub fn new(
        api: ComfyUIApi,
        templates: Arc<dyn TemplateStore>,
        ledger: Arc<dyn Ledger>,
        registry: Arc<CorrelationRegistry>,
    ) -> Self {
        Self {
            api,
            templates,
            ledger,
            registry,
        }
    }

    /// Validate, stage, submit and register a job. Returns the worker's job id.
    pub async fn submit(&self, request: SubmitRequest) -> Result<String, SubmitError> {
        let SubmitRequest {
            template_id,
            user_id,
            parameters,
            images,
        } = request;

        let template = self
            .templates
            .get_template(template_id)
            .await
            .map_err(|e| match e {
                CoreError::NotFound { .. } => SubmitError::TemplateNotFound(template_id),
                other => SubmitError::Collaborator(other),
            })?;
        let map = &template.parameter_map;

        ensure_known_parameters(
            map,
            parameters
                .keys()
                .map(String::as_str)
                .chain(images.iter().map(|image| image.parameter.as_str())),
        )?;
        for image in &images {
            image_slot(map, &image.parameter)?;
        }

        let mut spec = build_job_spec(&template, &parameters)?;
        // Reserve image slots so a missing node fails before anything is staged.
        for image in &images {
            spec.apply(map, &image.parameter, serde_json::Value::Null)?;
        }

        let available = self
            .ledger
            .get_balance(user_id)
            .await
            .map_err(SubmitError::Collaborator)?;
        if available < template.cost {
            return Err(SubmitError::InsufficientFunds {
                required: template.cost,
                available,
            });
        }

        let mut applied = parameters;
        for image in images {
            let InputImage {
                parameter,
                filename,
                content_type,
                bytes,
            } = image;
            let staged = self
                .api
                .upload_image(&filename, bytes, &content_type)
                .await
                .map_err(|source| SubmitError::ImageUploadFailed {
                    filename: filename.clone(),
                    source,
                })?;
            let reference = serde_json::Value::String(staged.staged_reference());
            tracing::debug!(parameter = %parameter, reference = %reference, "Staged input image");
            spec.apply(map, &parameter, reference.clone())?;
            applied.insert(parameter, reference);
        }

        let client_id = uuid::Uuid::new_v4().to_string();
        let response = self
            .api
            .submit_workflow(spec.prompt(), &client_id)
            .await
            .map_err(SubmitError::WorkerSubmissionFailed)?;
        let job_id = response.prompt_id;

        self.registry.register(JobContext {
            job_id: job_id.clone(),
            user_id,
            template_id,
            parameters: applied,
            submitted_at: Utc::now(),
        });

        if template.cost > 0 {
            let reason = format!("generation:{job_id}");
            if let Err(e) = self.ledger.debit(user_id, template.cost, &reason).await {
                tracing::warn!(
                    error = %e,
                    job_id = %job_id,
                    user_id,
                    cost = template.cost,
                    "Debit failed after submission, withdrawing job",
                );
                self.withdraw(&job_id).await;
                return Err(match e {
                    CoreError::InsufficientFunds {
                        required,
                        available,
                    } => SubmitError::InsufficientFunds {
                        required,
                        available,
                    },
                    other => SubmitError::Collaborator(other),
                });
            }
        }

        tracing::info!(
            job_id = %job_id,
            user_id,
            template_id,
            queue_position = response.number,
            "Generation job submitted",
        );

        Ok(job_id)
    }

    /// Drop an accepted job that will not be paid for.
    async fn withdraw(&self, job_id: &str) {
        if self.registry.claim_and_remove(job_id).is_none() {
            tracing::warn!(job_id = %job_id, "Unpaid job already finished on the worker");
            return;
        }
        if let Err(e) = self.api.cancel_execution(job_id).await {
            tracing::error!(error = %e, job_id = %job_id, "Failed to remove unpaid job from worker queue");
        }
    }
}
