use sqlx::{postgres::PgPoolOptions, PgPool};
use uuid::Uuid;

use valgate::jobs::model::ValidationJob;

/// Connect to the test database, run migrations, and wipe the gateway
/// tables. Returns `None` (skipping the test) when TEST_DATABASE_URL is not
/// configured.
pub async fn setup_db() -> Option<PgPool> {
    let _ = dotenvy::dotenv();

    let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set, skipping database test");
        return None;
    };

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .expect("failed to connect to TEST_DATABASE_URL");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("migrations failed");

    sqlx::query(
        r#"
        TRUNCATE TABLE
            validation_job_results_msg,
            validation_job_results,
            validation_job_outbox,
            validation_jobs_event_store,
            validation_jobs
        RESTART IDENTITY CASCADE
        "#,
    )
    .execute(&pool)
    .await
    .expect("truncate failed");

    Some(pool)
}

#[allow(dead_code)]
pub fn sample_job(file_name: &str, route: &str) -> ValidationJob {
    ValidationJob::new(
        "roughness",
        serde_json::json!({
            "file_name": file_name,
            "routes": [route],
            "balai": "B",
            "year": 2024,
            "semester": 1,
            "show_all_msg": false,
        }),
    )
}

#[allow(dead_code)]
pub async fn outbox_rows(pool: &PgPool, job_id: Uuid) -> Vec<(String, serde_json::Value)> {
    sqlx::query_as(
        r#"
        SELECT event_name, payload
        FROM validation_job_outbox
        WHERE job_id = $1
        ORDER BY id
        "#,
    )
    .bind(job_id)
    .fetch_all(pool)
    .await
    .expect("failed to read outbox")
}
