use lapin::options::BasicPublishOptions;
use lapin::{BasicProperties, Channel};
use opentelemetry::Context;

use crate::broker::VALIDATION_QUEUE;
use crate::jobs::model::ValidationJob;
use crate::telemetry;
use crate::GatewayError;

/// Publishes work items to the queue the external validation workers drain.
#[derive(Clone)]
pub struct JobQueueProducer {
    channel: Channel,
}

impl JobQueueProducer {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }

    pub async fn publish_job(
        &self,
        cx: &Context,
        job: &ValidationJob,
        validate: bool,
    ) -> Result<(), GatewayError> {
        telemetry::with_span("job-publishing", "job-publishing", cx, |_cx| async move {
            let body = serde_json::to_vec(&job.as_work_item(validate)?)?;

            self.channel
                .basic_publish(
                    "",
                    VALIDATION_QUEUE,
                    BasicPublishOptions::default(),
                    &body,
                    BasicProperties::default()
                        .with_delivery_mode(2)
                        .with_content_type("application/json".into()),
                )
                .await?
                .await?;

            tracing::debug!(job_id = %job.job_id, validate, "work item published");

            Ok(())
        })
        .await
    }
}
