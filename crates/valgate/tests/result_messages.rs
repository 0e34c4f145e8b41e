mod common;

use std::sync::Arc;

use arrow::array::{ArrayRef, Int16Array, LargeStringArray, RecordBatch};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::ipc::writer::StreamWriter;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use common::{sample_job, setup_db};
use opentelemetry::Context;
use serial_test::serial;

use valgate::jobs::batch;
use valgate::jobs::JobRepo;

/// Encode a worker-shaped batch: five columns matching the result-message
/// table layout after job_id and attempt_id.
fn worker_batch() -> String {
    let schema = Arc::new(Schema::new(vec![
        Field::new("msg", DataType::LargeUtf8, false),
        Field::new("msg_status", DataType::LargeUtf8, false),
        Field::new("msg_status_idx", DataType::Int16, false),
        Field::new("ignore_in", DataType::LargeUtf8, true),
        Field::new("content_id", DataType::LargeUtf8, true),
    ]));

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(LargeStringArray::from(vec![
                "iri out of range",
                "segment too short",
                "missing coordinate",
                "speed below threshold",
            ])) as ArrayRef,
            Arc::new(LargeStringArray::from(vec![
                "error", "review", "error", "review",
            ])) as ArrayRef,
            Arc::new(Int16Array::from(vec![2i16, 1, 2, 1])) as ArrayRef,
            Arc::new(LargeStringArray::from(vec![
                Some("force"),
                Some("review"),
                None,
                Some("review"),
            ])) as ArrayRef,
            Arc::new(LargeStringArray::from(vec![
                Some("c-1"),
                Some("c-2"),
                Some("c-3"),
                None,
            ])) as ArrayRef,
        ],
    )
    .unwrap();

    let mut sink = Vec::new();
    {
        let mut writer = StreamWriter::try_new(&mut sink, batch.schema().as_ref()).unwrap();
        writer.write(&batch).unwrap();
        writer.finish().unwrap();
    }
    BASE64.encode(sink)
}

#[tokio::test]
#[serial]
async fn decoded_batch_rows_copy_in_and_read_back() {
    let Some(pool) = setup_db().await else { return };
    let repo = JobRepo::new(pool);

    let job = sample_job("F", "R");
    repo.insert_job(&Context::new(), &job).await.unwrap();

    let rows = batch::decode_result_rows(job.job_id, 1, &worker_batch()).unwrap();
    assert_eq!(rows.len(), 4);

    repo.insert_job_result_messages(&rows).await.unwrap();

    let messages = repo.get_job_result_messages(job.job_id, 1).await.unwrap();
    assert_eq!(messages.len(), 4);

    let first = messages
        .iter()
        .find(|m| m.msg == "iri out of range")
        .expect("first message");
    assert_eq!(first.msg_status, "error");
    assert_eq!(first.ignore_in.as_deref(), Some("force"));
    assert_eq!(first.content_id.as_deref(), Some("c-1"));

    let third = messages
        .iter()
        .find(|m| m.msg == "missing coordinate")
        .expect("third message");
    assert_eq!(third.ignore_in, None);

    // Messages belong to the attempt they were written under.
    assert!(repo
        .get_job_result_messages(job.job_id, 2)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
#[serial]
async fn awkward_text_survives_the_copy_path() {
    let Some(pool) = setup_db().await else { return };
    let repo = JobRepo::new(pool);

    let job = sample_job("F", "R");
    repo.insert_job(&Context::new(), &job).await.unwrap();

    let schema = Arc::new(Schema::new(vec![
        Field::new("msg", DataType::LargeUtf8, false),
        Field::new("msg_status", DataType::LargeUtf8, false),
        Field::new("msg_status_idx", DataType::Int16, true),
        Field::new("ignore_in", DataType::LargeUtf8, true),
        Field::new("content_id", DataType::LargeUtf8, true),
    ]));
    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(LargeStringArray::from(vec![
                "tab\there, newline\nthere, backslash \\ too",
            ])) as ArrayRef,
            Arc::new(LargeStringArray::from(vec!["error"])) as ArrayRef,
            Arc::new(Int16Array::from(vec![None::<i16>])) as ArrayRef,
            Arc::new(LargeStringArray::from(vec![None::<&str>])) as ArrayRef,
            Arc::new(LargeStringArray::from(vec![None::<&str>])) as ArrayRef,
        ],
    )
    .unwrap();

    let mut sink = Vec::new();
    {
        let mut writer = StreamWriter::try_new(&mut sink, batch.schema().as_ref()).unwrap();
        writer.write(&batch).unwrap();
        writer.finish().unwrap();
    }

    let rows = batch::decode_result_rows(job.job_id, 1, &BASE64.encode(sink)).unwrap();
    repo.insert_job_result_messages(&rows).await.unwrap();

    let messages = repo.get_job_result_messages(job.job_id, 1).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].msg, "tab\there, newline\nthere, backslash \\ too");
}
