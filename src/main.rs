//! pulsewatch - URL uptime monitoring with email alerts.

mod config;
mod db;
mod email;
mod engine;
mod probe;
mod scheduler;
mod web;

#[cfg(test)]
mod test_helpers;

use config::ServerConfig;
use db::Store;
use email::{Emailer, LogEmailer, MailgunEmailer};
use engine::{Coordinator, EngineSettings};
use probe::HttpProber;
use scheduler::Scheduler;
use web::Server;

use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("pulsewatch=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting pulsewatch on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully ({} records)", store.count()?);

    let prober = Arc::new(HttpProber::new(cfg.probe_timeout)?);
    let emailer: Arc<dyn Emailer> = match cfg.mailgun.clone() {
        Some(mailgun) => {
            tracing::info!("Sending alerts through Mailgun domain {}", mailgun.domain);
            Arc::new(MailgunEmailer::new(mailgun, cfg.email_timeout)?)
        }
        None => {
            tracing::warn!("Mailgun not configured, alerts will only be logged");
            Arc::new(LogEmailer)
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let coordinator = Arc::new(Coordinator::new(
        store,
        prober,
        emailer,
        EngineSettings::from(&cfg),
        shutdown_rx.clone(),
    ));

    // Start scheduler
    let scheduler = Scheduler::new(coordinator.clone(), cfg.check_interval, shutdown_rx.clone())
        .start();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
            return;
        }
        tracing::info!("Shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    // Start web server
    let server = Server::new(cfg, coordinator);
    server.start(shutdown_rx).await?;

    scheduler.await?;
    tracing::info!("pulsewatch stopped");

    Ok(())
}
