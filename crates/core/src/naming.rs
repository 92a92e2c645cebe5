//! Durable-storage key conventions.

use crate::types::DbId;

/// Storage key for one generated artifact.
///
/// Convention: `outputs/{user_id}/{job_id}/{filename}`.
///
/// # Examples
///
/// ```
/// use genforge_core::naming::output_storage_key;
///
/// assert_eq!(output_storage_key(7, "p1", "out.png"), "outputs/7/p1/out.png");
/// ```
pub fn output_storage_key(user_id: DbId, job_id: &str, filename: &str) -> String {
    format!("outputs/{user_id}/{job_id}/{filename}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_namespaced_by_user_then_job() {
        assert_eq!(
            output_storage_key(42, "abc-123", "ComfyUI_00001_.png"),
            "outputs/42/abc-123/ComfyUI_00001_.png"
        );
    }
}
