use anyhow::Context;
use db::DBService;
use server::{routes, state::AppState};
use services::services::{config::AppConfig, sendgrid::email_sender};
use tracing::info;
use utils::logging::init_tracing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env().context("invalid configuration")?;
    let db = DBService::new(&config.database_url)
        .await
        .context("failed to open database")?;
    let email = email_sender(&config.sendgrid).context("invalid SendGrid configuration")?;
    if !email.is_enabled() {
        info!("SendGrid is not configured; outgoing email will be skipped");
    }

    let bind_addr = config.bind_addr;
    let state = AppState::new(db, config, email);
    let _reminders = state.reminders.clone().spawn();

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    info!(%bind_addr, "QSights API listening");

    axum::serve(listener, routes::router(state)).await?;
    Ok(())
}
