use lapin::options::QueueDeclareOptions;
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties};

use crate::GatewayError;

/// Queue carrying job lifecycle events, consumed by the event listener.
pub const JOB_EVENT_QUEUE: &str = "job_event_queue";

/// Queue carrying work items, consumed by the external validation workers.
pub const VALIDATION_QUEUE: &str = "validation_queue";

/// One AMQP connection plus the single channel the process works over.
///
/// Producers and consumers borrow (clone) the channel; the session owns the
/// connection and tears everything down at once.
pub struct BrokerSession {
    connection: Connection,
    channel: Channel,
}

impl BrokerSession {
    pub async fn connect(url: &str) -> Result<Self, GatewayError> {
        let connection = Connection::connect(url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;

        let durable = QueueDeclareOptions {
            durable: true,
            ..Default::default()
        };

        channel
            .queue_declare(JOB_EVENT_QUEUE, durable, FieldTable::default())
            .await?;
        channel
            .queue_declare(VALIDATION_QUEUE, durable, FieldTable::default())
            .await?;

        tracing::info!(url, "connected to message broker");

        Ok(Self {
            connection,
            channel,
        })
    }

    pub fn channel(&self) -> Channel {
        self.channel.clone()
    }

    pub async fn close(&self) -> Result<(), GatewayError> {
        self.connection.close(200, "shutting down").await?;
        Ok(())
    }
}
