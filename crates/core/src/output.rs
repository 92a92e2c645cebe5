//! Output record model and DTO.

use serde::{Deserialize, Serialize};

use crate::types::{DbId, JobParameters, Timestamp};

/// A persisted output, as returned by the output store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRecord {
    pub id: DbId,
    pub owner_id: DbId,
    pub template_id: DbId,
    pub job_id: String,
    pub filename: String,
    pub content_type: String,
    pub storage_key: String,
    pub storage_url: String,
    pub parameters: JobParameters,
    /// Milliseconds between submission and persistence of this output.
    pub duration_ms: i64,
    pub created_at: Timestamp,
}

/// DTO for creating a new output record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateOutputRecord {
    pub owner_id: DbId,
    pub template_id: DbId,
    pub job_id: String,
    pub filename: String,
    pub content_type: String,
    pub storage_key: String,
    pub storage_url: String,
    pub parameters: JobParameters,
    pub duration_ms: i64,
}
