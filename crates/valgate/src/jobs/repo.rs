use opentelemetry::Context;
use sqlx::postgres::PgPoolCopyExt;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::jobs::batch::CellValue;
use crate::jobs::events::{now_ms, JobCreated, JobEvent};
use crate::jobs::model::{ResultMessage, SmdJobRef, ValidationJob};
use crate::jobs::result::{JobResult, MessageTag, ResultStatus};
use crate::telemetry;
use crate::GatewayError;

#[derive(Clone)]
pub struct JobRepo {
    pool: PgPool,
}

impl JobRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>, GatewayError> {
        Ok(self.pool.begin().await?)
    }

    // ----------------------------
    // Jobs
    // ----------------------------

    /// Insert the job row and its `created` outbox row in one transaction.
    /// Either both are visible after commit or neither is.
    pub async fn insert_job(&self, cx: &Context, job: &ValidationJob) -> Result<(), GatewayError> {
        let event = JobEvent::Created(JobCreated {
            job_id: job.job_id,
            occurred_at: now_ms(),
            trace_id: telemetry::traceparent(cx),
            job: job.clone(),
        });
        let payload = event.payload_json()?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO validation_jobs (job_id, data_type, submitted_at, payload)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(job.job_id)
        .bind(&job.data_type)
        .bind(job.submitted_at)
        .bind(&job.payload)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO validation_job_outbox (job_id, event_name, payload)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(job.job_id)
        .bind(event.event_name())
        .bind(&payload)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_job(&self, job_id: Uuid) -> Result<Option<ValidationJob>, GatewayError> {
        let job = sqlx::query_as::<_, ValidationJob>(
            r#"
            SELECT job_id, data_type, submitted_at, payload
            FROM validation_jobs
            WHERE job_id = $1
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    /// Latest `event_name` for the job, or `created` when the job row exists
    /// but no event has landed yet.
    pub async fn get_job_status(&self, job_id: Uuid) -> Result<String, GatewayError> {
        let exists: Option<Uuid> =
            sqlx::query_scalar("SELECT job_id FROM validation_jobs WHERE job_id = $1")
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await?;

        if exists.is_none() {
            return Err(GatewayError::NotFound("job"));
        }

        let latest: Option<String> = sqlx::query_scalar(
            r#"
            SELECT event_name
            FROM validation_jobs_event_store
            WHERE job_id = $1
            ORDER BY occurred_at DESC
            LIMIT 1
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(latest.unwrap_or_else(|| "created".to_string()))
    }

    /// Ordered newest-first by submission time.
    pub async fn find_smd_job_id(
        &self,
        file_name: &str,
        route_id: &str,
    ) -> Result<Vec<SmdJobRef>, GatewayError> {
        let rows = sqlx::query_as::<_, SmdJobRef>(
            r#"
            SELECT job_id, submitted_at
            FROM validation_jobs
            WHERE payload ->> 'file_name' = $1
              AND payload -> 'routes' ->> 0 = $2
            ORDER BY submitted_at DESC
            "#,
        )
        .bind(file_name)
        .bind(route_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    // ----------------------------
    // Event store
    // ----------------------------

    pub async fn append_event(&self, event: &JobEvent) -> Result<(), GatewayError> {
        let payload = event.payload_json()?;

        sqlx::query(
            r#"
            INSERT INTO validation_jobs_event_store (job_id, event_name, occurred_at, event)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(event.job_id())
        .bind(event.event_name())
        .bind(event.occurred_at())
        .bind(&payload)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// The attempt number is defined as the count of `submitted` events seen
    /// so far for the job.
    pub async fn get_job_attempt_number(&self, job_id: Uuid) -> Result<i32, GatewayError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT count(*)
            FROM validation_jobs_event_store
            WHERE job_id = $1 AND event_name = 'submitted'
            "#,
        )
        .bind(job_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count as i32)
    }

    // ----------------------------
    // Results
    // ----------------------------

    /// Lock-read the result row for an attempt. `FOR UPDATE` serializes
    /// concurrent accept calls against the same job; the lock lives for the
    /// caller's transaction.
    pub async fn get_job_result(
        &self,
        job_id: Uuid,
        attempt_id: i32,
        tx: &mut Transaction<'static, Postgres>,
    ) -> Result<JobResult, GatewayError> {
        let row = sqlx::query_as::<_, JobResultRow>(
            r#"
            SELECT job_id, attempt_id, status, message_count,
                   all_msg_status, ignorables, ignored_tags
            FROM validation_job_results
            WHERE job_id = $1 AND attempt_id = $2
            FOR UPDATE
            "#,
        )
        .bind(job_id)
        .bind(attempt_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(GatewayError::NotFound("job result"))?;

        row.try_into()
    }

    /// Write the aggregate back and stage one outbox row per event it
    /// produced since load. The caller owns the transaction and the commit.
    pub async fn update_job_result(
        &self,
        result: &mut JobResult,
        tx: &mut Transaction<'static, Postgres>,
    ) -> Result<(), GatewayError> {
        sqlx::query(
            r#"
            UPDATE validation_job_results
            SET status = $1, ignorables = $2, ignored_tags = $3
            WHERE job_id = $4 AND attempt_id = $5
            "#,
        )
        .bind(result.status.as_str())
        .bind(tags_to_strings(&result.ignorables))
        .bind(tags_to_strings(&result.ignored_tags))
        .bind(result.job_id)
        .bind(result.attempt_id)
        .execute(&mut **tx)
        .await?;

        for event in result.take_events() {
            let payload = event.payload_json()?;

            sqlx::query(
                r#"
                INSERT INTO validation_job_outbox (job_id, event_name, payload)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(event.job_id())
            .bind(event.event_name())
            .bind(&payload)
            .execute(&mut **tx)
            .await?;
        }

        Ok(())
    }

    pub async fn insert_job_result(&self, result: &JobResult) -> Result<(), GatewayError> {
        sqlx::query(
            r#"
            INSERT INTO validation_job_results
                (job_id, attempt_id, status, message_count,
                 all_msg_status, ignorables, ignored_tags)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(result.job_id)
        .bind(result.attempt_id)
        .bind(result.status.as_str())
        .bind(result.message_count)
        .bind(&result.all_msg_status)
        .bind(tags_to_strings(&result.ignorables))
        .bind(tags_to_strings(&result.ignored_tags))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Bulk-insert projected result messages through the COPY protocol.
    /// Rows are `[job_id, attempt_id, msg, msg_status, msg_status_idx,
    /// ignore_in, content_id]`.
    pub async fn insert_job_result_messages(
        &self,
        rows: &[Vec<CellValue>],
    ) -> Result<(), GatewayError> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut buf = String::new();
        for row in rows {
            copy_text_row(row, &mut buf);
        }

        let mut copy = self
            .pool
            .copy_in_raw(
                r#"
                COPY validation_job_results_msg
                    (job_id, attempt_id, msg, msg_status, msg_status_idx,
                     ignore_in, content_id)
                FROM STDIN
                "#,
            )
            .await?;

        copy.send(buf.as_bytes()).await?;
        copy.finish().await?;

        Ok(())
    }

    pub async fn get_job_result_messages(
        &self,
        job_id: Uuid,
        attempt_id: i32,
    ) -> Result<Vec<ResultMessage>, GatewayError> {
        let rows = sqlx::query_as::<_, ResultMessage>(
            r#"
            SELECT msg, msg_status, content_id, ignore_in
            FROM validation_job_results_msg
            WHERE job_id = $1 AND attempt_id = $2
            "#,
        )
        .bind(job_id)
        .bind(attempt_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

#[derive(sqlx::FromRow)]
struct JobResultRow {
    job_id: Uuid,
    attempt_id: i32,
    status: String,
    message_count: i32,
    all_msg_status: Vec<String>,
    ignorables: Vec<String>,
    ignored_tags: Vec<String>,
}

impl TryFrom<JobResultRow> for JobResult {
    type Error = GatewayError;

    fn try_from(row: JobResultRow) -> Result<Self, Self::Error> {
        let status = ResultStatus::parse(&row.status)
            .ok_or_else(|| GatewayError::Decode(format!("unknown result status {}", row.status)))?;

        Ok(JobResult::new(
            row.job_id,
            row.attempt_id,
            status,
            row.message_count,
            row.all_msg_status,
            strings_to_tags(&row.ignorables)?,
            strings_to_tags(&row.ignored_tags)?,
        ))
    }
}

fn tags_to_strings(tags: &[MessageTag]) -> Vec<String> {
    tags.iter().map(|t| t.as_str().to_string()).collect()
}

fn strings_to_tags(values: &[String]) -> Result<Vec<MessageTag>, GatewayError> {
    values
        .iter()
        .map(|v| {
            MessageTag::parse(v)
                .ok_or_else(|| GatewayError::Decode(format!("unknown message tag {v}")))
        })
        .collect()
}

// COPY text format: tab-separated columns, newline-terminated rows, `\N`
// for NULL.

fn copy_text_row(cells: &[CellValue], buf: &mut String) {
    for (idx, cell) in cells.iter().enumerate() {
        if idx > 0 {
            buf.push('\t');
        }
        match cell {
            CellValue::Null => buf.push_str("\\N"),
            CellValue::Int16(v) => buf.push_str(&v.to_string()),
            CellValue::Int32(v) => buf.push_str(&v.to_string()),
            CellValue::Text(v) => push_copy_escaped(v, buf),
        }
    }
    buf.push('\n');
}

fn push_copy_escaped(value: &str, buf: &mut String) {
    for ch in value.chars() {
        match ch {
            '\\' => buf.push_str("\\\\"),
            '\t' => buf.push_str("\\t"),
            '\n' => buf.push_str("\\n"),
            '\r' => buf.push_str("\\r"),
            other => buf.push(other),
        }
    }
}
