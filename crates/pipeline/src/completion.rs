//! Output extraction for a completed job.
//!
//! For each final artifact the worker reported: download it, store it
//! durably under the user's output prefix, then record its metadata.
//! Artifacts are independent; one failing does not stop the rest. A single
//! `generation-result` event is published once at least one succeeded.

use std::sync::Arc;

use genforge_comfyui::api::{ComfyUIApi, ComfyUIApiError};
use genforge_comfyui::messages::Artifact;
use genforge_core::error::CoreError;
use genforge_core::mime::content_type_for;
use genforge_core::naming::output_storage_key;
use genforge_core::output::{CreateOutputRecord, OutputRecord};
use genforge_events::{EventBus, GenerationEvent};

use crate::collaborators::{DurableStorage, OutputStore};
use crate::registry::JobContext;

/// Failure of a single artifact.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("Failed to download '{filename}': {source}")]
    Download {
        filename: String,
        #[source]
        source: ComfyUIApiError,
    },

    #[error("Failed to upload '{key}': {source}")]
    Upload {
        key: String,
        #[source]
        source: CoreError,
    },

    #[error("Failed to persist output record for '{filename}': {source}")]
    Persist {
        filename: String,
        #[source]
        source: CoreError,
    },
}

pub struct CompletionPipeline {
    api: ComfyUIApi,
    storage: Arc<dyn DurableStorage>,
    outputs: Arc<dyn OutputStore>,
    bus: Arc<EventBus>,
}

impl CompletionPipeline {
    pub fn new(
        api: ComfyUIApi,
        storage: Arc<dyn DurableStorage>,
        outputs: Arc<dyn OutputStore>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            api,
            storage,
            outputs,
            bus,
        }
    }

    /// Process a claimed job's artifacts and return the persisted records.
    ///
    /// Non-final artifacts are skipped. Publishes one
    /// [`GenerationEvent::Completed`] if any record was persisted, nothing
    /// otherwise.
    pub async fn process(&self, context: JobContext, artifacts: Vec<Artifact>) -> Vec<OutputRecord> {
        let finals: Vec<Artifact> = artifacts.into_iter().filter(|a| a.kind.is_final()).collect();
        if finals.is_empty() {
            tracing::debug!(job_id = %context.job_id, "Completion has no final artifacts");
            return Vec::new();
        }

        let attempted = finals.len();
        let mut records = Vec::with_capacity(attempted);
        for artifact in &finals {
            match self.process_artifact(&context, artifact).await {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        job_id = %context.job_id,
                        filename = %artifact.filename,
                        "Failed to process artifact",
                    );
                }
            }
        }

        if records.is_empty() {
            tracing::error!(
                job_id = %context.job_id,
                user_id = context.user_id,
                attempted,
                "Every artifact of the job failed, no result published",
            );
            return records;
        }

        tracing::info!(
            job_id = %context.job_id,
            user_id = context.user_id,
            template_id = context.template_id,
            persisted = records.len(),
            attempted,
            "Generation completed",
        );

        self.bus.publish_result(GenerationEvent::Completed {
            job_id: context.job_id.clone(),
            user_id: context.user_id,
            template_id: context.template_id,
            outputs: records.clone(),
        });
        records
    }

    async fn process_artifact(
        &self,
        context: &JobContext,
        artifact: &Artifact,
    ) -> Result<OutputRecord, ArtifactError> {
        let bytes = self
            .api
            .download_artifact(artifact)
            .await
            .map_err(|source| ArtifactError::Download {
                filename: artifact.filename.clone(),
                source,
            })?;

        let content_type = content_type_for(&artifact.filename);
        let key = output_storage_key(context.user_id, &context.job_id, &artifact.filename);
        let size = bytes.len();

        let url = self
            .storage
            .upload(&key, bytes, content_type)
            .await
            .map_err(|source| ArtifactError::Upload {
                key: key.clone(),
                source,
            })?;
        tracing::debug!(job_id = %context.job_id, key = %key, size, "Stored artifact");

        self.outputs
            .create(CreateOutputRecord {
                owner_id: context.user_id,
                template_id: context.template_id,
                job_id: context.job_id.clone(),
                filename: artifact.filename.clone(),
                content_type: content_type.to_string(),
                storage_key: key,
                storage_url: url,
                parameters: context.parameters.clone(),
                duration_ms: context.elapsed_ms(),
            })
            .await
            .map_err(|source| ArtifactError::Persist {
                filename: artifact.filename.clone(),
                source,
            })
    }
}
