use valgate::broker::BrokerSession;
use valgate::config::Config;
use valgate::jobs::{EventDispatcher, JobEventHandler, JobQueueProducer, JobRepo};
use valgate::{db, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Config::from_env()?;
    telemetry::init_logging();
    let tracer_provider =
        telemetry::init_tracer_provider("event-listener", cfg.otlp_endpoint.as_deref())?;

    let pool = db::make_pool(&cfg.database_url).await?;
    let session = BrokerSession::connect(&cfg.amqp_url).await?;

    let repo = JobRepo::new(pool);
    let dispatcher = EventDispatcher::new(session.channel());
    let work_queue = JobQueueProducer::new(session.channel());
    let handler = JobEventHandler::new(repo, dispatcher, work_queue, session.channel());

    tokio::select! {
        result = handler.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    session.close().await?;
    telemetry::shutdown_tracer_provider(tracer_provider);

    Ok(())
}
