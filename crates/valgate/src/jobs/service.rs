use opentelemetry::Context;
use serde_json::Value;
use uuid::Uuid;

use crate::jobs::dispatcher::EventDispatcher;
use crate::jobs::events::{now_ms, JobEvent, JobRetried};
use crate::jobs::model::{ResultMessage, SmdJobRef, ValidationJob};
use crate::jobs::repo::JobRepo;
use crate::jobs::result::{JobResult, MessageTag};
use crate::telemetry;
use crate::GatewayError;

/// Thin orchestration over the repository and the dispatcher; everything the
/// HTTP boundary calls goes through here.
///
/// Transaction ownership sits in this layer: accept flows open the
/// transaction, run the aggregate, and commit. The repository only stages
/// writes into the transaction it is handed.
#[derive(Clone)]
pub struct JobService {
    repo: JobRepo,
    dispatcher: EventDispatcher,
}

impl JobService {
    pub fn new(repo: JobRepo, dispatcher: EventDispatcher) -> Self {
        Self { repo, dispatcher }
    }

    /// Allocate a job and persist it together with its `created` outbox row.
    /// The relay takes it from there.
    pub async fn create_validation_job(
        &self,
        cx: &Context,
        data_type: &str,
        payload: Value,
    ) -> Result<ValidationJob, GatewayError> {
        let job = ValidationJob::new(data_type, payload);
        self.repo.insert_job(cx, &job).await?;

        tracing::info!(job_id = %job.job_id, data_type = %job.data_type, "job created");
        Ok(job)
    }

    pub async fn get_job_status(&self, job_id: Uuid) -> Result<String, GatewayError> {
        self.repo.get_job_status(job_id).await
    }

    /// Lock-read the result of the latest attempt. The lock is released when
    /// the transaction rolls back at the end of the call; it only serves to
    /// serialize against concurrent accept flows.
    pub async fn get_latest_job_result(&self, job_id: Uuid) -> Result<JobResult, GatewayError> {
        let attempt_id = self.repo.get_job_attempt_number(job_id).await?;

        let mut tx = self.repo.begin().await?;
        let result = self.repo.get_job_result(job_id, attempt_id, &mut tx).await?;
        tx.rollback().await?;

        Ok(result)
    }

    pub async fn get_latest_job_result_messages(
        &self,
        job_id: Uuid,
    ) -> Result<Vec<ResultMessage>, GatewayError> {
        let attempt_id = self.repo.get_job_attempt_number(job_id).await?;
        self.repo.get_job_result_messages(job_id, attempt_id).await
    }

    pub async fn accept_disputed(&self, cx: &Context, job_id: Uuid) -> Result<(), GatewayError> {
        self.accept(cx, job_id, MessageTag::Force).await
    }

    pub async fn accept_reviewed(&self, cx: &Context, job_id: Uuid) -> Result<(), GatewayError> {
        self.accept(cx, job_id, MessageTag::Review).await
    }

    async fn accept(
        &self,
        cx: &Context,
        job_id: Uuid,
        tag: MessageTag,
    ) -> Result<(), GatewayError> {
        let attempt_id = self.repo.get_job_attempt_number(job_id).await?;

        let mut tx = self.repo.begin().await?;
        let mut result = self.repo.get_job_result(job_id, attempt_id, &mut tx).await?;

        let trace_id = telemetry::traceparent(cx);
        match tag {
            MessageTag::Force => result.ignore_disputed(trace_id)?,
            MessageTag::Review => result.ignore_reviewed(trace_id)?,
        }

        self.repo.update_job_result(&mut result, &mut tx).await?;
        tx.commit().await?;

        tracing::info!(%job_id, tag = %tag, status = %result.status, "messages accepted");
        Ok(())
    }

    /// Re-run a finished job. Only jobs whose latest event is `failed` or
    /// `succeeded` may be retried; the event round-trips through the broker
    /// and the handler does the actual re-submission.
    pub async fn retry_job(&self, cx: &Context, job_id: Uuid) -> Result<(), GatewayError> {
        let status = self.repo.get_job_status(job_id).await?;

        if status != "failed" && status != "succeeded" {
            return Err(GatewayError::RetryNotAllowed(status));
        }

        self.dispatcher
            .publish_event(
                cx,
                &JobEvent::Retried(JobRetried {
                    job_id,
                    occurred_at: now_ms(),
                    trace_id: telemetry::traceparent(cx),
                }),
            )
            .await?;

        Ok(())
    }

    pub async fn get_smd_job_id(
        &self,
        file_name: &str,
        route_id: &str,
    ) -> Result<Vec<SmdJobRef>, GatewayError> {
        self.repo.find_smd_job_id(file_name, route_id).await
    }
}
