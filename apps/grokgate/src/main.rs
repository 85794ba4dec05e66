use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use grokgate_core::{DispatchOptions, Dispatcher};
use grokgate_pool::{
    CredentialPool, CredentialStore, PoolConfig, QuotaProbe, WriteBuffer, spawn_refresh_task,
    spawn_reload_task,
};
use grokgate_router::gateway_router;
use grokgate_storage::{SeaOrmCredentialStore, connect_shared};
use grokgate_upstream::{UpstreamConfig, WreqConversationClient, WreqQuotaProbe};

mod cli;

use crate::cli::Cli;

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        eprintln!("grokgate failed: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn Error + Send + Sync>> {
    let settings = Cli::parse().into_patch().into_settings()?;
    info!(
        host = %settings.host,
        port = settings.port,
        dsn = %settings.dsn,
        proxy = %settings.proxy.as_deref().unwrap_or(""),
        "config loaded"
    );

    let db = connect_shared(&settings.dsn).await?;
    let store = SeaOrmCredentialStore::new(db);
    store.sync().await?;
    info!("db connected");
    let store: Arc<dyn CredentialStore> = Arc::new(store);

    let write_buffer = WriteBuffer::spawn(
        store.clone(),
        Duration::from_millis(settings.save_delay_ms),
    );
    let pool = Arc::new(CredentialPool::new(
        PoolConfig {
            fail_threshold: settings.fail_threshold,
            cooldown: Duration::from_secs(settings.cooldown_secs),
        },
        Some(write_buffer.sender()),
    ));
    let credentials = store.load_all().await?;
    info!(credentials = credentials.len(), "credential pool loaded");
    pool.replace_all(credentials).await;

    let upstream_config = UpstreamConfig::from_settings(&settings);
    let client = Arc::new(WreqConversationClient::new(upstream_config.clone())?);
    let probe: Arc<dyn QuotaProbe> = Arc::new(WreqQuotaProbe::new(upstream_config)?);

    spawn_refresh_task(
        pool.clone(),
        probe.clone(),
        Duration::from_secs(settings.refresh_interval_secs),
        settings.refresh_concurrency,
    );
    spawn_reload_task(
        pool.clone(),
        store.clone(),
        Duration::from_secs(settings.reload_interval_secs),
    );

    let dispatcher = Arc::new(Dispatcher::new(
        pool,
        client,
        Some(probe),
        DispatchOptions::from_settings(&settings),
    ));
    let app = gateway_router(dispatcher);

    let bind = format!("{}:{}", settings.host, settings.port);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(addr = %bind, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Pending credential mutations must hit the store before exit.
    write_buffer.shutdown().await;
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("grokgate=info,sqlx=warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
