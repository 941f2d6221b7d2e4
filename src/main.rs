use std::sync::Arc;

use structopt::StructOpt;

use sentrynode::cli::Cli;
use sentrynode::config::Config;
use sentrynode::event::{LoggingEventHandler, LoggingNotifier};
use sentrynode::session::Session;
use sentrynode::transport::TlsMaterial;
use sentrynode::watchdog::{self, ShutdownHandle};
use sentrynode::defaults;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match Cli::from_args() {
        Cli::Run { config } => run(config).await,
    }
}

async fn run(config_path: Option<std::path::PathBuf>) -> Result<(), anyhow::Error> {
    let config_path = match config_path {
        Some(path) => path,
        None => defaults::config_path()?,
    };
    let config = Config::load(&config_path).await?;

    let tls = TlsMaterial::load(
        &config.ca_certificate,
        match (&config.client_certificate, &config.client_key) {
            (Some(cert), Some(key)) => Some((cert.as_path(), key.as_path())),
            _ => None,
        },
    )?;

    // The real event handler and notifier are out of scope for this crate; these demonstration
    // implementations only log what they receive.
    let event_handler = Arc::new(LoggingEventHandler);
    let notifier: Arc<dyn sentrynode::event::Notifier> = Arc::new(LoggingNotifier);

    let session = Session::new(config.session_config(), tls, event_handler);
    session.initialize().await?;

    let shutdown = ShutdownHandle::new();

    let receiver_session = session.clone();
    let receiver = tokio::spawn(async move {
        loop {
            if let Err(err) = receiver_session.run_receive_loop().await {
                tracing::warn!(error = %err, "receive loop ended");
            }
            if receiver_session.is_connected().await {
                continue;
            }
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        }
    });

    let watchdog_session = session.clone();
    let watchdog_shutdown = shutdown.clone();
    let ping_interval = config.ping_interval;
    let watchdog = tokio::spawn(async move {
        watchdog::run(watchdog_session, Some(notifier), ping_interval, watchdog_shutdown).await;
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    shutdown.stop();
    receiver.abort();
    let _ = watchdog.await;
    session.close().await;

    Ok(())
}
