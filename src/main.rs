use dualstore::{Config, StorageAdapter, create_adapter};
use mimalloc::MiMalloc;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let cfg = Config::load()?;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cfg.basic.loglevel.clone()));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_target(false),
        )
        .init();

    info!(
        backend = %cfg.database.kind,
        sqlite_path = %cfg.database.sqlite.path.display(),
        mysql_target = %cfg.database.mysql.target(),
        admin = %cfg.admin.username,
        loglevel = %cfg.basic.loglevel
    );

    let mut adapter = create_adapter(&cfg.database, Some(&cfg.admin)).await?;
    info!(backend = %adapter.kind(), "storage ready");

    adapter.close().await?;
    Ok(())
}
