use valgate::broker::BrokerSession;
use valgate::config::Config;
use valgate::jobs::{EventDispatcher, JobRepo, JobService};
use valgate::{api, db, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Config::from_env()?;
    telemetry::init_logging();
    let tracer_provider =
        telemetry::init_tracer_provider("validation-gateway", cfg.otlp_endpoint.as_deref())?;

    let pool = db::make_pool(&cfg.database_url).await?;
    if cfg.migrate_on_startup {
        db::run_migrations(&pool).await?;
    }

    let session = BrokerSession::connect(&cfg.amqp_url).await?;
    let dispatcher = EventDispatcher::new(session.channel());
    let repo = JobRepo::new(pool);
    let service = JobService::new(repo, dispatcher);

    let app = api::router(api::AppState { service });
    let listener = tokio::net::TcpListener::bind(&cfg.http_addr).await?;
    tracing::info!(addr = %cfg.http_addr, "validation gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    session.close().await?;
    telemetry::shutdown_tracer_provider(tracer_provider);

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("shutdown signal received");
    }
}
