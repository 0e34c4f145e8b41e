mod common;

use common::{outbox_rows, sample_job, setup_db};
use opentelemetry::Context;
use serial_test::serial;

use valgate::jobs::result::{JobResult, MessageTag, ResultError, ResultStatus};
use valgate::jobs::JobRepo;
use valgate::GatewayError;

/// Seed a job plus a result row for attempt 1.
async fn seed_result(
    repo: &JobRepo,
    status: ResultStatus,
    all_msg_status: Vec<String>,
    ignorables: Vec<MessageTag>,
) -> JobResult {
    let job = sample_job("F", "R");
    repo.insert_job(&Context::new(), &job).await.unwrap();

    let result = JobResult::new(
        job.job_id,
        1,
        status,
        4,
        all_msg_status,
        ignorables,
        vec![],
    );
    repo.insert_job_result(&result).await.unwrap();
    result
}

#[tokio::test]
#[serial]
async fn accept_disputed_then_reviewed_lands_all_three_outbox_rows() {
    let Some(pool) = setup_db().await else { return };
    let repo = JobRepo::new(pool.clone());

    let seeded = seed_result(
        &repo,
        ResultStatus::Error,
        vec!["error".into(), "review".into()],
        vec![MessageTag::Force, MessageTag::Review],
    )
    .await;
    let job_id = seeded.job_id;

    // Accept the disputed messages.
    let mut tx = repo.begin().await.unwrap();
    let mut result = repo.get_job_result(job_id, 1, &mut tx).await.unwrap();
    result.ignore_disputed(None).unwrap();
    repo.update_job_result(&mut result, &mut tx).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = repo.begin().await.unwrap();
    let reloaded = repo.get_job_result(job_id, 1, &mut tx).await.unwrap();
    tx.rollback().await.unwrap();
    assert_eq!(reloaded.status, ResultStatus::Review);
    assert_eq!(reloaded.ignorables, vec![MessageTag::Review]);
    assert_eq!(reloaded.ignored_tags, vec![MessageTag::Force]);

    let rows = outbox_rows(&pool, job_id).await;
    assert_eq!(rows.last().unwrap().0, "disputed_msg_accepted");

    // Accept the reviewed messages; the result verifies.
    let mut tx = repo.begin().await.unwrap();
    let mut result = repo.get_job_result(job_id, 1, &mut tx).await.unwrap();
    result.ignore_reviewed(None).unwrap();
    repo.update_job_result(&mut result, &mut tx).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = repo.begin().await.unwrap();
    let reloaded = repo.get_job_result(job_id, 1, &mut tx).await.unwrap();
    tx.rollback().await.unwrap();
    assert_eq!(reloaded.status, ResultStatus::Verified);
    assert!(reloaded.ignorables.is_empty());

    let rows = outbox_rows(&pool, job_id).await;
    let names: Vec<&str> = rows.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "created",
            "disputed_msg_accepted",
            "reviewed_msg_accepted",
            "all_msg_accepted",
        ]
    );

    // The terminal event is ordered strictly after its trigger.
    let reviewed_at = rows[2].1["occurred_at"].as_i64().unwrap();
    let all_at = rows[3].1["occurred_at"].as_i64().unwrap();
    assert_eq!(all_at - reviewed_at, 10);
}

#[tokio::test]
#[serial]
async fn rejected_accept_writes_nothing() {
    let Some(pool) = setup_db().await else { return };
    let repo = JobRepo::new(pool.clone());

    let seeded = seed_result(
        &repo,
        ResultStatus::Review,
        vec!["review".into()],
        vec![MessageTag::Review],
    )
    .await;
    let job_id = seeded.job_id;

    let mut tx = repo.begin().await.unwrap();
    let mut result = repo.get_job_result(job_id, 1, &mut tx).await.unwrap();
    let err = result.ignore_disputed(None).unwrap_err();
    assert_eq!(err, ResultError::NotIgnorable(MessageTag::Force));
    tx.rollback().await.unwrap();

    // Only the created row from the seed; the refused accept staged nothing.
    let rows = outbox_rows(&pool, job_id).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].0, "created");

    let mut tx = repo.begin().await.unwrap();
    let reloaded = repo.get_job_result(job_id, 1, &mut tx).await.unwrap();
    tx.rollback().await.unwrap();
    assert_eq!(reloaded.status, ResultStatus::Review);
    assert_eq!(reloaded.ignorables, vec![MessageTag::Review]);
    assert!(reloaded.ignored_tags.is_empty());
}

#[tokio::test]
#[serial]
async fn missing_result_row_is_not_found() {
    let Some(pool) = setup_db().await else { return };
    let repo = JobRepo::new(pool);

    let job = sample_job("F", "R");
    repo.insert_job(&Context::new(), &job).await.unwrap();

    let mut tx = repo.begin().await.unwrap();
    let err = repo.get_job_result(job.job_id, 1, &mut tx).await.unwrap_err();
    assert!(matches!(err, GatewayError::NotFound(_)));
}
