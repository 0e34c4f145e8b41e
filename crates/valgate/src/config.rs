/// Runtime configuration for all three gateway processes.
///
/// Values come from the environment (a `.env` file is honored when present).
#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub amqp_url: String,
    pub otlp_endpoint: Option<String>,
    pub http_addr: String,
    pub migrate_on_startup: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL is missing"))?;

        let amqp_url = env_or_fallback("VALGATE_AMQP_URL", "AMQP_URL")
            .unwrap_or_else(|| "amqp://localhost:5672".to_string());

        let otlp_endpoint = env_or_fallback("VALGATE_OTLP_ENDPOINT", "OTLP_ENDPOINT");

        let http_addr = env_or_fallback("VALGATE_HTTP_ADDR", "HTTP_ADDR")
            .unwrap_or_else(|| "0.0.0.0:8080".to_string());

        let migrate_on_startup = env_bool("VALGATE_MIGRATE_ON_STARTUP").unwrap_or(false);

        Ok(Self {
            database_url,
            amqp_url,
            otlp_endpoint,
            http_addr,
            migrate_on_startup,
        })
    }
}

fn env_or_fallback(primary: &str, fallback: &str) -> Option<String> {
    std::env::var(primary)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| {
            std::env::var(fallback)
                .ok()
                .filter(|s| !s.trim().is_empty())
        })
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}
