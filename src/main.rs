use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use dual_pass_chat::app_state::AppState;
use dual_pass_chat::build_rocket;
use dual_pass_chat::config::{BackendConfig, ClipboardConfig};

#[rocket::main]
async fn main() -> anyhow::Result<()> {
    // .env 不存在时忽略
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .compact()
        .init();

    let backend = BackendConfig::from_env().context("invalid inference backend configuration")?;
    let clipboard = ClipboardConfig::from_env();
    if clipboard.command.is_none() {
        warn!("no clipboard command found; copy requests will fail");
    }

    let state = AppState::from_config(&backend, &clipboard)
        .context("failed to set up inference client")?;
    info!(
        model = %backend.model,
        endpoint = %backend.endpoint_url(),
        "dual-pass chat starting"
    );

    // 先格式化 rocket::Error 再丢弃，避免未处理错误在 drop 时 abort
    if let Err(e) = build_rocket(state).launch().await {
        anyhow::bail!("server terminated with an error: {e}");
    }
    Ok(())
}
