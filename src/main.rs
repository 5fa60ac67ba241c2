use corememories_bot::{BotConfig, BotError};
use tracing::error;

#[tokio::main]
async fn main() -> Result<(), BotError> {
    dotenv::dotenv().ok();

    // Respects RUST_LOG, defaults to info.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = BotConfig::from_env().inspect_err(|e| error!(error = %e, "bad configuration"))?;
    corememories_bot::run(config)
        .await
        .inspect_err(|e| error!(error = %e, "bot stopped"))
}
