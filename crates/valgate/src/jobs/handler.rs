use futures::StreamExt;
use lapin::options::BasicConsumeOptions;
use lapin::types::FieldTable;
use lapin::Channel;
use opentelemetry::{global, Context};

use crate::broker::JOB_EVENT_QUEUE;
use crate::jobs::batch;
use crate::jobs::dispatcher::{AmqpHeaderExtractor, EventDispatcher};
use crate::jobs::events::{
    now_ms, AllMessagesAccepted, JobCreated, JobEvent, JobRetried, JobSubmitted, JobSucceeded,
};
use crate::jobs::queue::JobQueueProducer;
use crate::jobs::repo::JobRepo;
use crate::telemetry;
use crate::GatewayError;

/// Consumes the job event queue and drives the lifecycle forward: appends to
/// the event store, hands work to the validation queue, and emits follow-up
/// events.
///
/// Deliveries are auto-acked; a failing handler logs the error and the loop
/// moves on to the next message.
pub struct JobEventHandler {
    repo: JobRepo,
    dispatcher: EventDispatcher,
    work_queue: JobQueueProducer,
    channel: Channel,
}

impl JobEventHandler {
    pub fn new(
        repo: JobRepo,
        dispatcher: EventDispatcher,
        work_queue: JobQueueProducer,
        channel: Channel,
    ) -> Self {
        Self {
            repo,
            dispatcher,
            work_queue,
            channel,
        }
    }

    pub async fn run(&self) -> Result<(), GatewayError> {
        let mut consumer = self
            .channel
            .basic_consume(
                JOB_EVENT_QUEUE,
                "valgate-event-handler",
                BasicConsumeOptions {
                    no_ack: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        tracing::info!(queue = JOB_EVENT_QUEUE, "listening for job events");

        while let Some(delivery) = consumer.next().await {
            let delivery = delivery?;

            let parent = match delivery.properties.headers() {
                Some(headers) => global::get_text_map_propagator(|propagator| {
                    propagator.extract(&AmqpHeaderExtractor::new(headers))
                }),
                None => Context::new(),
            };

            let event = match JobEvent::decode(&delivery.data) {
                Ok(event) => event,
                Err(err) => {
                    tracing::warn!(%err, "undecodable event envelope, skipping message");
                    continue;
                }
            };

            let job_id = event.job_id();
            let event_name = event.event_name();

            if let Err(err) = self.handle(parent, event).await {
                tracing::error!(%job_id, event = event_name, %err, "event handling failed");
            }
        }

        Ok(())
    }

    async fn handle(&self, parent: Context, event: JobEvent) -> Result<(), GatewayError> {
        let name = format!("{}-event-handling", event.event_name());

        telemetry::with_span("event-handling", name, &parent, |cx| async move {
            match event {
                JobEvent::Created(e) => self.on_created(&cx, e).await,
                JobEvent::Succeeded(e) => self.on_succeeded(&cx, e).await,
                JobEvent::AllMsgAccepted(e) => self.on_all_msg_accepted(&cx, e).await,
                JobEvent::Retried(e) => self.on_retried(&cx, e).await,
                // submitted / executed / failed / disputed / reviewed just
                // land in the event store.
                other => self.repo.append_event(&other).await,
            }
        })
        .await
    }

    /// `created`: record it, push the work item out (`validate=true`), then
    /// announce `submitted`.
    async fn on_created(&self, cx: &Context, event: JobCreated) -> Result<(), GatewayError> {
        self.repo
            .append_event(&JobEvent::Created(event.clone()))
            .await?;

        self.work_queue.publish_job(cx, &event.job, true).await?;

        self.dispatcher
            .publish_event(
                cx,
                &JobEvent::Submitted(JobSubmitted {
                    job_id: event.job_id,
                    occurred_at: now_ms(),
                    trace_id: telemetry::traceparent(cx),
                }),
            )
            .await?;

        Ok(())
    }

    /// `all_msg_accepted`: the job goes back to the worker with
    /// `validate=false` so it re-emits the accepted artefact.
    async fn on_all_msg_accepted(
        &self,
        cx: &Context,
        event: AllMessagesAccepted,
    ) -> Result<(), GatewayError> {
        let job = self
            .repo
            .get_job(event.job_id)
            .await?
            .ok_or(GatewayError::NotFound("job"))?;

        self.work_queue.publish_job(cx, &job, false).await?;

        self.dispatcher
            .publish_event(
                cx,
                &JobEvent::Submitted(JobSubmitted {
                    job_id: event.job_id,
                    occurred_at: now_ms(),
                    trace_id: telemetry::traceparent(cx),
                }),
            )
            .await?;

        self.repo
            .append_event(&JobEvent::AllMsgAccepted(event))
            .await?;

        Ok(())
    }

    async fn on_retried(&self, cx: &Context, event: JobRetried) -> Result<(), GatewayError> {
        let job = self
            .repo
            .get_job(event.job_id)
            .await?
            .ok_or(GatewayError::NotFound("job"))?;

        self.work_queue.publish_job(cx, &job, true).await?;

        self.repo
            .append_event(&JobEvent::Retried(event.clone()))
            .await?;

        self.dispatcher
            .publish_event(
                cx,
                &JobEvent::Submitted(JobSubmitted {
                    job_id: event.job_id,
                    occurred_at: now_ms(),
                    trace_id: telemetry::traceparent(cx),
                }),
            )
            .await?;

        Ok(())
    }

    /// `succeeded`: decode the columnar batch, persist the result and its
    /// per-row messages under the current attempt, then record the event.
    async fn on_succeeded(&self, _cx: &Context, mut event: JobSucceeded) -> Result<(), GatewayError> {
        let batches = event
            .arrow_batches
            .take()
            .ok_or_else(|| GatewayError::Decode("succeeded event has no arrow_batches".into()))?;

        let attempt_id = self.repo.get_job_attempt_number(event.job_id).await?;

        event.result.attempt_id = attempt_id;
        self.repo.insert_job_result(&event.result).await?;

        let rows = batch::decode_result_rows(event.job_id, attempt_id, &batches)?;
        let row_count = rows.len();
        self.repo.insert_job_result_messages(&rows).await?;

        self.repo
            .append_event(&JobEvent::Succeeded(event.clone()))
            .await?;

        tracing::info!(
            job_id = %event.job_id,
            attempt_id,
            rows = row_count,
            "result recorded"
        );

        Ok(())
    }
}
