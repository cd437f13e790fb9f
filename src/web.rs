#![cfg(not(tarpaulin_include))]

use sheetbot::{Config, app};

/// Main entry point for the web application
///
/// Reads the configuration from the environment, connects to the configured
/// Google Sheet and serves the web front-end.
///
/// # Logging
/// * Controlled by `RUST_LOG`, defaults to `info`
///
/// # Returns
/// * `Result<(), Box<dyn std::error::Error>>` - Success or error object
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env()?;
    log::info!(
        "Starting sheet bot for sheet {} (cache {}s, re-auth {}s)",
        config.sheet_id,
        config.cache_ttl.as_secs(),
        config.reauth_after.as_secs()
    );
    app::run(config).await
}
