use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::jobs::events::{
    now_ms, AllMessagesAccepted, DisputedMessagesAccepted, JobEvent, ReviewedMessagesAccepted,
};

/// Tags a message can carry to mark it as acceptable by an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageTag {
    /// Disputed finding, overridable by operator acceptance.
    Force,
    /// Finding a human review may accept.
    Review,
}

impl MessageTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageTag::Force => "force",
            MessageTag::Review => "review",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "force" => Some(MessageTag::Force),
            "review" => Some(MessageTag::Review),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Rejected,
    Error,
    Review,
    Verified,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Rejected => "rejected",
            ResultStatus::Error => "error",
            ResultStatus::Review => "review",
            ResultStatus::Verified => "verified",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "rejected" => Some(ResultStatus::Rejected),
            "error" => Some(ResultStatus::Error),
            "review" => Some(ResultStatus::Review),
            "verified" => Some(ResultStatus::Verified),
            _ => None,
        }
    }
}

impl std::fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Acceptance protocol violations. These are terminal answers to the caller,
/// never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResultError {
    #[error("result is already verified")]
    AlreadyVerified,
    #[error("result was rejected, nothing can be accepted")]
    Rejected,
    #[error("{0} messages were already accepted")]
    Duplicate(MessageTag),
    #[error("{0} messages are not ignorable for this result")]
    NotIgnorable(MessageTag),
}

/// Per-attempt validation result and the dispute/review acceptance state
/// machine over it.
///
/// The aggregate is loaded under a row lock, mutated in memory, and written
/// back inside the same transaction together with the events it buffered;
/// `take_events` drains the buffer at persist time.
///
/// Invariant: `ignorables` and `ignored_tags` stay disjoint, and their union
/// never grows after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: Uuid,
    #[serde(default)]
    pub attempt_id: i32,
    pub status: ResultStatus,
    #[serde(rename = "msg_count", default)]
    pub message_count: i32,
    #[serde(default)]
    pub all_msg_status: Vec<String>,
    #[serde(default)]
    pub ignorables: Vec<MessageTag>,
    #[serde(default)]
    pub ignored_tags: Vec<MessageTag>,
    #[serde(skip)]
    pending_events: Vec<JobEvent>,
}

impl JobResult {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        job_id: Uuid,
        attempt_id: i32,
        status: ResultStatus,
        message_count: i32,
        all_msg_status: Vec<String>,
        ignorables: Vec<MessageTag>,
        ignored_tags: Vec<MessageTag>,
    ) -> Self {
        Self {
            job_id,
            attempt_id,
            status,
            message_count,
            all_msg_status,
            ignorables,
            ignored_tags,
            pending_events: Vec::new(),
        }
    }

    /// Accept the disputed (`force`) messages of this attempt.
    pub fn ignore_disputed(&mut self, trace_id: Option<String>) -> Result<(), ResultError> {
        self.ignore_msg_tag(MessageTag::Force, trace_id)
    }

    /// Accept the reviewable (`review`) messages of this attempt.
    pub fn ignore_reviewed(&mut self, trace_id: Option<String>) -> Result<(), ResultError> {
        self.ignore_msg_tag(MessageTag::Review, trace_id)
    }

    /// Move `tag` from `ignorables` to `ignored_tags` and derive the status
    /// transition plus the events describing it.
    fn ignore_msg_tag(
        &mut self,
        tag: MessageTag,
        trace_id: Option<String>,
    ) -> Result<(), ResultError> {
        match self.status {
            ResultStatus::Verified => return Err(ResultError::AlreadyVerified),
            ResultStatus::Rejected => return Err(ResultError::Rejected),
            _ => {}
        }

        if self.ignored_tags.contains(&tag) {
            return Err(ResultError::Duplicate(tag));
        }

        let Some(pos) = self.ignorables.iter().position(|t| *t == tag) else {
            return Err(ResultError::NotIgnorable(tag));
        };

        self.ignorables.remove(pos);
        self.ignored_tags.push(tag);

        // Accepting a tag also retires its messages from the status roll-up.
        let pruned = match tag {
            MessageTag::Force => "error",
            MessageTag::Review => "review",
        };
        self.all_msg_status.retain(|s| s != pruned);

        let occurred_at = now_ms();

        match tag {
            MessageTag::Force => {
                self.pending_events
                    .push(JobEvent::DisputedMsgAccepted(DisputedMessagesAccepted {
                        job_id: self.job_id,
                        occurred_at,
                        trace_id: trace_id.clone(),
                    }));
            }
            MessageTag::Review => {
                self.pending_events
                    .push(JobEvent::ReviewedMsgAccepted(ReviewedMessagesAccepted {
                        job_id: self.job_id,
                        occurred_at,
                        trace_id: trace_id.clone(),
                    }));
            }
        }

        if self.ignorables.is_empty() {
            self.status = ResultStatus::Verified;
            // Offset keeps the terminal event strictly after the tag event
            // when the store orders by occurred_at.
            self.pending_events
                .push(JobEvent::AllMsgAccepted(AllMessagesAccepted {
                    job_id: self.job_id,
                    occurred_at: occurred_at + 10,
                    trace_id,
                }));
        } else if self.ignorables == [MessageTag::Review] {
            self.status = ResultStatus::Review;
        }

        Ok(())
    }

    pub fn pending_events(&self) -> &[JobEvent] {
        &self.pending_events
    }

    /// Drain the events buffered since load. Called once by the repository
    /// when writing the aggregate back.
    pub fn take_events(&mut self) -> Vec<JobEvent> {
        std::mem::take(&mut self.pending_events)
    }
}
