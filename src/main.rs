mod auth;
mod config;
mod db;
mod error;
mod gateway;
mod llm;
mod models;
mod reply;
mod routes;

use crate::config::Config;
use crate::gateway::{DisabledGateway, MailGateway, SmtpGateway};
use crate::llm::LlmClient;
use crate::routes::AppState;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "postbox=info".into()),
        )
        .init();

    let config = Config::load();

    let db = db::Database::new(&config.database.url).await?;
    db.run_migrations().await?;

    let gateway: Arc<dyn MailGateway> = match &config.smtp {
        Some(smtp) => {
            info!(host = %smtp.host, from = %smtp.from_email, "outbound mail via SMTP relay");
            Arc::new(SmtpGateway::new(smtp)?)
        }
        None => {
            warn!("SMTP is not configured; replies will be stored but not delivered");
            Arc::new(DisabledGateway)
        }
    };

    let llm = match &config.llm {
        Some(llm) => {
            info!(model = %llm.model, "LLM assistant enabled");
            Some(LlmClient::new(llm))
        }
        None => {
            warn!("LLM API is not configured; assistant routes will fail upstream");
            None
        }
    };

    let state = AppState { db, gateway, llm };
    let app = routes::router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("postbox listening on {addr}");
    axum::serve(listener, app).await?;

    Ok(())
}
