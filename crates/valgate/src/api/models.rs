use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::jobs::model::ValidationJob;

/// SMD submission payload. Validated here so malformed submissions never
/// reach the job pipeline; the stored payload stays the raw JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmdPayload {
    pub file_name: String,
    pub balai: String,
    pub year: i32,
    pub semester: i32,
    pub routes: [String; 1],
    pub show_all_msg: bool,
}

#[derive(Debug, Deserialize)]
pub struct JobRequest<T> {
    pub data_type: String,
    pub input_json: T,
}

/// INVI-J payloads are opaque to the gateway.
pub type InvijRequest = JobRequest<Value>;
pub type SmdRequest = JobRequest<SmdPayload>;

#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub job_id: Uuid,
    pub submitted_at: i64,
}

impl From<&ValidationJob> for JobResponse {
    fn from(job: &ValidationJob) -> Self {
        Self {
            job_id: job.job_id,
            submitted_at: job.submitted_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub job_id: Uuid,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct SmdSearchQuery {
    pub file_name: String,
    pub route: String,
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: String,
}
