use anyhow::Result;
use std::sync::Arc;
use tracing::info;
use vm_api::{create_app, Config, WebhookCallbacks};
use vm_orchestrator::db::{backup_database, create_pool, run_migrations};
use vm_orchestrator::{Handlers, Options, SqliteStatusStore};
use vm_provider::{CliVagrant, VBoxManage};

#[tokio::main]
async fn main() -> Result<()> {
    // Keep the guard alive so buffered file logs are flushed on exit
    let _log_guard = vm_logging::init_subscriber();

    info!("Starting vm-api service...");

    // Load configuration
    let config = Config::from_env();
    info!(
        "Configuration loaded: bind_addr={}, home={}, db_path={}",
        config.bind_addr,
        config.home.display(),
        config.db_path.display()
    );

    // Database setup
    let db_path = &config.db_path;

    // Backup before migrations
    if db_path.exists() {
        let backup_path = backup_database(db_path)?;
        info!("Database backed up to: {}", backup_path.display());
    }

    // Create pool and run migrations
    let pool = create_pool(db_path).await?;
    info!("Running database migrations...");
    run_migrations(&pool).await?;
    info!("Migrations complete");

    let handlers = Handlers::new(Options {
        home: config.home.clone(),
        username: config.username.clone(),
        default_box: config.default_box.clone(),
        vagrant: Arc::new(CliVagrant::new()?),
        ports: Arc::new(VBoxManage::new()?),
        store: Arc::new(SqliteStatusStore::new(pool)),
        callbacks: Arc::new(WebhookCallbacks::new()?),
    });

    // Create app
    let app = create_app(handlers);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Listening on http://{}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
