use valgate::broker::BrokerSession;
use valgate::config::Config;
use valgate::jobs::EventDispatcher;
use valgate::outbox::OutboxRelay;
use valgate::{db, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Config::from_env()?;
    telemetry::init_logging();
    let tracer_provider =
        telemetry::init_tracer_provider("outbox-relay", cfg.otlp_endpoint.as_deref())?;

    let pool = db::make_pool(&cfg.database_url).await?;
    let session = BrokerSession::connect(&cfg.amqp_url).await?;
    let dispatcher = EventDispatcher::new(session.channel());

    let relay = OutboxRelay::connect(&cfg.database_url, pool, dispatcher).await?;

    // Any relay error is fatal: exit and let the supervisor restart us from
    // the slot's confirmed flush LSN.
    tokio::select! {
        result = relay.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    session.close().await?;
    telemetry::shutdown_tracer_provider(tracer_provider);

    Ok(())
}
