//!
//! estate_gate server binary
//! -------------------------
//! Starts the session/authorization front-end server. Configuration comes from
//! `ESTATE_*` environment variables, overridden by `--http-port`, `--api-base`
//! and `--no-seed`.

use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use estate_gate::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    fmt().with_env_filter(filter).init();

    let args: Vec<String> = std::env::args().collect();
    let config = AppConfig::from_env().apply_args(&args);
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    info!(
        target: "estate_gate",
        "estate_gate starting: RUST_LOG='{}', http_port={}, api_base={}",
        rust_log,
        config.http_port,
        config.api_base.as_deref().unwrap_or("<in-process>")
    );

    estate_gate::server::run_with_config(config).await
}
