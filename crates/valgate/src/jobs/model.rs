use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A submitted validation job. Created once, never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ValidationJob {
    pub job_id: Uuid,
    pub data_type: String,
    /// Unix seconds at submission time.
    pub submitted_at: i64,
    /// Opaque submission payload; the gateway never inspects it beyond the
    /// SMD search predicate.
    pub payload: Value,
}

impl ValidationJob {
    /// Build a fresh job: UUIDv7 id (sortable by creation) and uppercased
    /// data type tag.
    pub fn new(data_type: &str, payload: Value) -> Self {
        Self {
            job_id: Uuid::now_v7(),
            data_type: data_type.to_uppercase(),
            submitted_at: Utc::now().timestamp(),
            payload,
        }
    }

    /// The message shape workers consume from the validation queue.
    ///
    /// `details` is the payload JSON encoded base64; workers decode it back
    /// before parsing. `validate=false` asks the worker to re-emit the
    /// previously validated artefact without re-running rules.
    pub fn as_work_item(&self, validate: bool) -> Result<WorkItem, serde_json::Error> {
        let details = BASE64.encode(serde_json::to_vec(&self.payload)?);

        Ok(WorkItem {
            job_id: self.job_id,
            data_type: self.data_type.clone(),
            details,
            validate,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub job_id: Uuid,
    pub data_type: String,
    pub details: String,
    pub validate: bool,
}

/// Search-result row for the SMD job lookup by file name + route.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SmdJobRef {
    pub job_id: Uuid,
    pub submitted_at: i64,
}

/// One stored result message, as returned by the read surface.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ResultMessage {
    pub msg: String,
    pub msg_status: String,
    pub content_id: Option<String>,
    pub ignore_in: Option<String>,
}
