use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use tracing::info;
use tracing_subscriber::EnvFilter;

use firewarden::{
    auth::jwt::TokenService,
    config::AppConfig,
    db,
    routes,
    state::AppState,
    storage::{LocalStorage, ObjectStorage},
};

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env()?;
    info!(
        database_url = %config.redacted_database_url(),
        host = %config.server_host,
        port = config.server_port,
        "starting firewarden"
    );

    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
    run_migrations(&pool).await?;

    let storage: Arc<dyn ObjectStorage> = Arc::new(LocalStorage::new(&config.upload_dir)?);
    let tokens = TokenService::from_config(&config);
    let bind_addr = format!("{}:{}", config.server_host, config.server_port);
    let state = AppState::new(pool, config, storage, tokens);
    let router = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    info!(addr = %bind_addr, "listening");

    axum::serve(listener, router).await.context("server error")?;
    Ok(())
}

async fn run_migrations(pool: &db::PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|err| anyhow!("failed to run migrations: {err}"))?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}
