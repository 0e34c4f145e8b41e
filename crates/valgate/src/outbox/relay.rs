use std::collections::HashMap;
use std::time::Duration;

use opentelemetry::trace::TraceContextExt;
use opentelemetry::KeyValue;
use sqlx::PgPool;
use tokio::time::Instant;

use crate::jobs::dispatcher::EventDispatcher;
use crate::jobs::events::JobEvent;
use crate::outbox::pgoutput::{
    self, LogicalMessage, Relation, ReplicationFrame, TupleValue,
};
use crate::outbox::replication::{Lsn, ReplicationClient, ReplicationSettings};
use crate::telemetry;
use crate::GatewayError;

const SLOT_NAME: &str = "outbox_slot";
const PUBLICATION_NAME: &str = "outbox_publication";
const OUTBOX_TABLE: &str = "validation_job_outbox";

const STANDBY_INTERVAL: Duration = Duration::from_secs(10);

/// Single-writer consumer of the outbox replication slot.
///
/// Committed outbox inserts stream in over logical replication; each one is
/// republished to the broker and then deleted. The delete runs after the
/// publish, so a crash in between replays the row on restart: consumers get
/// at-least-once delivery, the table never keeps a relayed row.
///
/// Broker and database failures are fatal here. The process exits and the
/// supervisor restarts it from the slot's confirmed flush LSN.
pub struct OutboxRelay {
    client: ReplicationClient,
    pool: PgPool,
    dispatcher: EventDispatcher,
}

impl OutboxRelay {
    pub async fn connect(
        database_url: &str,
        pool: PgPool,
        dispatcher: EventDispatcher,
    ) -> Result<Self, GatewayError> {
        let settings = ReplicationSettings::from_database_url(database_url)?;
        let client = ReplicationClient::connect(settings).await?;

        Ok(Self {
            client,
            pool,
            dispatcher,
        })
    }

    pub async fn run(mut self) -> Result<(), GatewayError> {
        self.ensure_slot().await?;

        let ident = self.client.identify_system().await?;
        tracing::info!(
            system_id = %ident.system_id,
            timeline = ident.timeline,
            server_lsn = %ident.xlog_pos,
            "system identified"
        );

        // The server resumes from the slot's confirmed flush LSN when we
        // ask for 0/0.
        self.client
            .start_replication(
                SLOT_NAME,
                Lsn(0),
                &[
                    ("proto_version", "2"),
                    ("publication_names", PUBLICATION_NAME),
                    ("messages", "true"),
                    ("streaming", "true"),
                ],
            )
            .await?;
        tracing::info!(slot = SLOT_NAME, "replication started");

        let mut xlog_pos = Lsn(0);
        let mut relations: HashMap<u32, Relation> = HashMap::new();
        let mut in_stream = false;
        let mut next_deadline = Instant::now() + STANDBY_INTERVAL;

        loop {
            if Instant::now() >= next_deadline {
                self.send_standby_update(xlog_pos).await?;
                next_deadline = Instant::now() + STANDBY_INTERVAL;
            }

            let Some(frame) = self.client.receive(next_deadline).await? else {
                // Deadline hit; the next loop turn sends the status update.
                continue;
            };

            match pgoutput::parse_replication_frame(&frame)? {
                ReplicationFrame::PrimaryKeepalive {
                    reply_requested, ..
                } => {
                    if reply_requested {
                        next_deadline = Instant::now();
                    }
                }
                ReplicationFrame::XLogData { data, .. } => {
                    match pgoutput::parse_logical_message(&data, in_stream)? {
                        LogicalMessage::Relation(relation) => {
                            relations.insert(relation.id, relation);
                        }
                        LogicalMessage::Begin { final_lsn, .. } => {
                            xlog_pos = Lsn(final_lsn);
                        }
                        LogicalMessage::Insert {
                            relation_id,
                            tuple,
                        } => {
                            let relation = relations.get(&relation_id).ok_or_else(|| {
                                GatewayError::Replication(format!(
                                    "insert for unknown relation {relation_id}"
                                ))
                            })?;

                            if relation.name == OUTBOX_TABLE {
                                self.relay_row(relation, &tuple).await?;
                            }
                            self.send_standby_update(xlog_pos).await?;
                        }
                        LogicalMessage::StreamStart { .. } => in_stream = true,
                        LogicalMessage::StreamStop => in_stream = false,
                        LogicalMessage::Commit { .. } | LogicalMessage::Other(_) => {}
                    }
                }
            }
        }
    }

    /// Create the permanent slot unless it already exists. Existence is
    /// probed over the regular pool; the slot itself must be created on the
    /// replication connection.
    async fn ensure_slot(&mut self) -> Result<(), GatewayError> {
        let existing: Option<String> =
            sqlx::query_scalar("SELECT slot_name FROM pg_replication_slots WHERE slot_name = $1")
                .bind(SLOT_NAME)
                .fetch_optional(&self.pool)
                .await?;

        if existing.is_some() {
            tracing::info!(slot = SLOT_NAME, "replication slot already exists");
            return Ok(());
        }

        self.client.create_replication_slot(SLOT_NAME).await?;
        tracing::info!(slot = SLOT_NAME, "replication slot created");
        Ok(())
    }

    async fn send_standby_update(&mut self, xlog_pos: Lsn) -> Result<(), GatewayError> {
        let reported = xlog_pos.advance(1);
        self.client
            .standby_status_update(reported, reported, reported, false)
            .await?;
        tracing::debug!(position = %reported, "standby status update sent");
        Ok(())
    }

    /// Publish one committed outbox row and delete it.
    async fn relay_row(
        &mut self,
        relation: &Relation,
        tuple: &[TupleValue],
    ) -> Result<(), GatewayError> {
        let mut event_name: Option<String> = None;
        let mut payload: Option<Vec<u8>> = None;
        let mut row_id: Option<i64> = None;

        for (column, value) in relation.columns.iter().zip(tuple) {
            let TupleValue::Text(bytes) = value else {
                continue;
            };

            match column.name.as_str() {
                "event_name" => {
                    event_name = Some(String::from_utf8_lossy(bytes).into_owned());
                }
                "payload" => payload = Some(bytes.clone()),
                "id" => {
                    row_id = String::from_utf8_lossy(bytes).parse().ok();
                }
                _ => {}
            }
        }

        let (Some(event_name), Some(payload), Some(row_id)) = (event_name, payload, row_id) else {
            return Err(GatewayError::Replication(
                "outbox row is missing id, event_name or payload".into(),
            ));
        };

        let decoded = serde_json::from_slice(&payload)
            .map_err(GatewayError::from)
            .and_then(|value| JobEvent::from_parts(&event_name, value));

        match decoded {
            Ok(event) => {
                let parent = telemetry::context_from_traceparent(event.trace_id());
                let dispatcher = &self.dispatcher;
                let event_ref = &event;

                telemetry::with_span(
                    "outbox-msg-handling",
                    format!("{event_name}-outbox-handling"),
                    &parent,
                    |cx| async move {
                        cx.span()
                            .set_attribute(KeyValue::new("job_id", event_ref.job_id().to_string()));
                        dispatcher.publish_event(&cx, event_ref).await
                    },
                )
                .await?;

                tracing::info!(job_id = %event.job_id(), event = %event_name, "outbox event published");
            }
            Err(err) => {
                // Undecodable rows are dropped, not retried forever: the row
                // still gets deleted below.
                tracing::warn!(row_id, event = %event_name, %err, "skipping undecodable outbox row");
            }
        }

        sqlx::query("DELETE FROM validation_job_outbox WHERE id = $1")
            .bind(row_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
