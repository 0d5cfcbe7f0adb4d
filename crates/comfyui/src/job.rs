use chrono::Utc;
use texture_core::types::Timestamp;

/// A job queued in the engine.
///
/// Lives for one orchestration stage; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    /// Server-assigned `prompt_id`.
    pub job_id: String,
    pub submitted_at: Timestamp,
}

impl JobHandle {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            submitted_at: Utc::now(),
        }
    }
}
