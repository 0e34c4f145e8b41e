use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::jobs::model::ValidationJob;
use crate::jobs::result::JobResult;
use crate::GatewayError;

/// Unix milliseconds, the resolution the event store orders by.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Every job lifecycle event, keyed by its stored `event_name`.
///
/// The serialized form is the broker envelope `{"type": ..., "payload": ...}`.
/// Adjacent tagging gives us the codec in one derive instead of a per-variant
/// serializer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum JobEvent {
    Created(JobCreated),
    Submitted(JobSubmitted),
    Executed(JobExecuted),
    Succeeded(JobSucceeded),
    Failed(JobFailed),
    Retried(JobRetried),
    DisputedMsgAccepted(DisputedMessagesAccepted),
    ReviewedMsgAccepted(ReviewedMessagesAccepted),
    AllMsgAccepted(AllMessagesAccepted),
}

/// Emitted when the job row is committed. Carries the full job so consumers
/// do not have to read it back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobCreated {
    pub job_id: Uuid,
    pub occurred_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    pub job: ValidationJob,
}

/// Emitted once the work item is on the validation queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSubmitted {
    pub job_id: Uuid,
    pub occurred_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

/// Emitted by workers when they pick the job up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobExecuted {
    pub job_id: Uuid,
    pub occurred_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

/// Emitted by workers on success. `arrow_batches` is a base64 Arrow IPC
/// stream that exists in transit only; it is deserialized off the wire but
/// never written back out, so the event store keeps the result aggregate and
/// drops the bulk data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSucceeded {
    pub job_id: Uuid,
    pub occurred_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    pub result: JobResult,
    #[serde(default, skip_serializing)]
    pub arrow_batches: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFailed {
    pub job_id: Uuid,
    pub occurred_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRetried {
    pub job_id: Uuid,
    pub occurred_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisputedMessagesAccepted {
    pub job_id: Uuid,
    pub occurred_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewedMessagesAccepted {
    pub job_id: Uuid,
    pub occurred_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllMessagesAccepted {
    pub job_id: Uuid,
    pub occurred_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

impl JobEvent {
    /// The `event_name` this variant is stored and multiplexed under.
    pub fn event_name(&self) -> &'static str {
        match self {
            JobEvent::Created(_) => "created",
            JobEvent::Submitted(_) => "submitted",
            JobEvent::Executed(_) => "executed",
            JobEvent::Succeeded(_) => "succeeded",
            JobEvent::Failed(_) => "failed",
            JobEvent::Retried(_) => "retried",
            JobEvent::DisputedMsgAccepted(_) => "disputed_msg_accepted",
            JobEvent::ReviewedMsgAccepted(_) => "reviewed_msg_accepted",
            JobEvent::AllMsgAccepted(_) => "all_msg_accepted",
        }
    }

    pub fn job_id(&self) -> Uuid {
        match self {
            JobEvent::Created(e) => e.job_id,
            JobEvent::Submitted(e) => e.job_id,
            JobEvent::Executed(e) => e.job_id,
            JobEvent::Succeeded(e) => e.job_id,
            JobEvent::Failed(e) => e.job_id,
            JobEvent::Retried(e) => e.job_id,
            JobEvent::DisputedMsgAccepted(e) => e.job_id,
            JobEvent::ReviewedMsgAccepted(e) => e.job_id,
            JobEvent::AllMsgAccepted(e) => e.job_id,
        }
    }

    pub fn occurred_at(&self) -> i64 {
        match self {
            JobEvent::Created(e) => e.occurred_at,
            JobEvent::Submitted(e) => e.occurred_at,
            JobEvent::Executed(e) => e.occurred_at,
            JobEvent::Succeeded(e) => e.occurred_at,
            JobEvent::Failed(e) => e.occurred_at,
            JobEvent::Retried(e) => e.occurred_at,
            JobEvent::DisputedMsgAccepted(e) => e.occurred_at,
            JobEvent::ReviewedMsgAccepted(e) => e.occurred_at,
            JobEvent::AllMsgAccepted(e) => e.occurred_at,
        }
    }

    pub fn trace_id(&self) -> Option<&str> {
        let trace_id = match self {
            JobEvent::Created(e) => &e.trace_id,
            JobEvent::Submitted(e) => &e.trace_id,
            JobEvent::Executed(e) => &e.trace_id,
            JobEvent::Succeeded(e) => &e.trace_id,
            JobEvent::Failed(e) => &e.trace_id,
            JobEvent::Retried(e) => &e.trace_id,
            JobEvent::DisputedMsgAccepted(e) => &e.trace_id,
            JobEvent::ReviewedMsgAccepted(e) => &e.trace_id,
            JobEvent::AllMsgAccepted(e) => &e.trace_id,
        };
        trace_id.as_deref()
    }

    /// Serialize into the broker envelope.
    pub fn encode(&self) -> Result<Vec<u8>, GatewayError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a broker envelope.
    pub fn decode(bytes: &[u8]) -> Result<Self, GatewayError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Rebuild an event from the pieces an outbox row stores: the
    /// `event_name` column and the payload JSON. Unknown names fail as
    /// `Decode`.
    pub fn from_parts(event_name: &str, payload: Value) -> Result<Self, GatewayError> {
        let envelope = serde_json::json!({ "type": event_name, "payload": payload });
        Ok(serde_json::from_value(envelope)?)
    }

    /// The variant payload alone, the JSON stored in the event store and the
    /// outbox `payload` column.
    pub fn payload_json(&self) -> Result<Value, GatewayError> {
        let value = match self {
            JobEvent::Created(e) => serde_json::to_value(e),
            JobEvent::Submitted(e) => serde_json::to_value(e),
            JobEvent::Executed(e) => serde_json::to_value(e),
            JobEvent::Succeeded(e) => serde_json::to_value(e),
            JobEvent::Failed(e) => serde_json::to_value(e),
            JobEvent::Retried(e) => serde_json::to_value(e),
            JobEvent::DisputedMsgAccepted(e) => serde_json::to_value(e),
            JobEvent::ReviewedMsgAccepted(e) => serde_json::to_value(e),
            JobEvent::AllMsgAccepted(e) => serde_json::to_value(e),
        };
        Ok(value?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::result::{JobResult, MessageTag, ResultStatus};
    use serde_json::json;

    fn job() -> ValidationJob {
        ValidationJob {
            job_id: Uuid::now_v7(),
            data_type: "ROUGHNESS".to_string(),
            submitted_at: 1_700_000_000,
            payload: json!({"file_name": "F", "routes": ["R"]}),
        }
    }

    fn all_variants() -> Vec<JobEvent> {
        let job_id = Uuid::now_v7();
        let at = now_ms();

        vec![
            JobEvent::Created(JobCreated {
                job_id,
                occurred_at: at,
                trace_id: None,
                job: job(),
            }),
            JobEvent::Submitted(JobSubmitted {
                job_id,
                occurred_at: at,
                trace_id: Some("00-11111111111111111111111111111111-2222222222222222-01".into()),
            }),
            JobEvent::Executed(JobExecuted {
                job_id,
                occurred_at: at,
                trace_id: None,
            }),
            JobEvent::Succeeded(JobSucceeded {
                job_id,
                occurred_at: at,
                trace_id: None,
                result: JobResult::new(
                    job_id,
                    0,
                    ResultStatus::Error,
                    4,
                    vec!["error".into(), "review".into()],
                    vec![MessageTag::Force, MessageTag::Review],
                    vec![],
                ),
                arrow_batches: None,
            }),
            JobEvent::Failed(JobFailed {
                job_id,
                occurred_at: at,
                trace_id: None,
            }),
            JobEvent::Retried(JobRetried {
                job_id,
                occurred_at: at,
                trace_id: None,
            }),
            JobEvent::DisputedMsgAccepted(DisputedMessagesAccepted {
                job_id,
                occurred_at: at,
                trace_id: None,
            }),
            JobEvent::ReviewedMsgAccepted(ReviewedMessagesAccepted {
                job_id,
                occurred_at: at,
                trace_id: None,
            }),
            JobEvent::AllMsgAccepted(AllMessagesAccepted {
                job_id,
                occurred_at: at,
                trace_id: None,
            }),
        ]
    }

    #[test]
    fn envelope_round_trips_every_variant() {
        for event in all_variants() {
            let encoded = event.encode().unwrap();
            let decoded = JobEvent::decode(&encoded).unwrap();
            assert_eq!(decoded, event, "round trip failed for {}", event.event_name());
        }
    }

    #[test]
    fn envelope_uses_type_and_payload_framing() {
        let event = JobEvent::Submitted(JobSubmitted {
            job_id: Uuid::now_v7(),
            occurred_at: 42,
            trace_id: None,
        });

        let value: Value = serde_json::from_slice(&event.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "submitted");
        assert_eq!(value["payload"]["occurred_at"], 42);
    }

    #[test]
    fn event_names_cover_the_full_tag_set() {
        let names: Vec<&str> = all_variants().iter().map(|e| e.event_name()).collect();
        assert_eq!(
            names,
            vec![
                "created",
                "submitted",
                "executed",
                "succeeded",
                "failed",
                "retried",
                "disputed_msg_accepted",
                "reviewed_msg_accepted",
                "all_msg_accepted",
            ]
        );
    }

    #[test]
    fn from_parts_rebuilds_outbox_rows() {
        for event in all_variants() {
            let rebuilt =
                JobEvent::from_parts(event.event_name(), event.payload_json().unwrap()).unwrap();
            assert_eq!(rebuilt, event);
        }
    }

    #[test]
    fn from_parts_rejects_unknown_event_name() {
        let err = JobEvent::from_parts("exploded", json!({"job_id": Uuid::now_v7()}));
        assert!(matches!(err, Err(GatewayError::Decode(_))));
    }

    #[test]
    fn succeeded_never_serializes_the_batch() {
        let mut event = match &all_variants()[3] {
            JobEvent::Succeeded(e) => e.clone(),
            _ => unreachable!(),
        };
        event.arrow_batches = Some("AAAA".into());

        let value = serde_json::to_value(JobEvent::Succeeded(event)).unwrap();
        assert!(value["payload"].get("arrow_batches").is_none());
    }

    #[test]
    fn succeeded_still_reads_the_batch_off_the_wire() {
        let job_id = Uuid::now_v7();
        let wire = json!({
            "type": "succeeded",
            "payload": {
                "job_id": job_id,
                "occurred_at": 7,
                "result": {
                    "job_id": job_id,
                    "status": "error",
                    "msg_count": 2,
                    "all_msg_status": ["error"],
                    "ignorables": ["force"],
                },
                "arrow_batches": "QUJD",
            }
        });

        let event = JobEvent::decode(&serde_json::to_vec(&wire).unwrap()).unwrap();
        match event {
            JobEvent::Succeeded(e) => {
                assert_eq!(e.arrow_batches.as_deref(), Some("QUJD"));
                assert_eq!(e.result.message_count, 2);
            }
            other => panic!("expected succeeded, got {}", other.event_name()),
        }
    }
}
