use lapin::options::BasicPublishOptions;
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel};
use opentelemetry::propagation::{Extractor, Injector};
use opentelemetry::{global, Context};

use crate::broker::JOB_EVENT_QUEUE;
use crate::jobs::events::JobEvent;
use crate::telemetry;
use crate::GatewayError;

/// Writes W3C trace-context entries into AMQP message headers.
pub struct AmqpHeaderInjector<'a> {
    headers: &'a mut FieldTable,
}

impl<'a> AmqpHeaderInjector<'a> {
    pub fn new(headers: &'a mut FieldTable) -> Self {
        Self { headers }
    }
}

impl Injector for AmqpHeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.headers
            .insert(key.into(), AMQPValue::LongString(value.into()));
    }
}

/// Reads trace-context entries back out of AMQP headers. Values are
/// stringified on read; non-string header values come back as empty strings.
pub struct AmqpHeaderExtractor<'a> {
    headers: &'a FieldTable,
}

impl<'a> AmqpHeaderExtractor<'a> {
    pub fn new(headers: &'a FieldTable) -> Self {
        Self { headers }
    }
}

impl Extractor for AmqpHeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.headers
            .inner()
            .iter()
            .find(|(name, _)| name.as_str() == key)
            .map(|(_, value)| match value {
                AMQPValue::LongString(s) => std::str::from_utf8(s.as_bytes()).unwrap_or(""),
                _ => "",
            })
    }

    fn keys(&self) -> Vec<&str> {
        self.headers
            .inner()
            .keys()
            .map(|name| name.as_str())
            .collect()
    }
}

/// Publishes job events to the durable event queue with the current trace
/// context propagated in the message headers.
#[derive(Clone)]
pub struct EventDispatcher {
    channel: Channel,
}

impl EventDispatcher {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }

    pub async fn publish_event(
        &self,
        cx: &Context,
        event: &JobEvent,
    ) -> Result<(), GatewayError> {
        telemetry::with_span("event-publishing", "event-publishing", cx, |cx| async move {
            let mut headers = FieldTable::default();
            global::get_text_map_propagator(|propagator| {
                propagator.inject_context(&cx, &mut AmqpHeaderInjector::new(&mut headers))
            });

            let body = event.encode()?;

            self.channel
                .basic_publish(
                    "",
                    JOB_EVENT_QUEUE,
                    BasicPublishOptions::default(),
                    &body,
                    BasicProperties::default()
                        .with_delivery_mode(2)
                        .with_content_type("application/json".into())
                        .with_headers(headers),
                )
                .await?
                .await?;

            tracing::debug!(
                job_id = %event.job_id(),
                event = event.event_name(),
                "event published"
            );

            Ok(())
        })
        .await
    }
}
