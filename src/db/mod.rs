pub mod catalog;
pub mod pg;

pub use catalog::{CatalogStore, MemoryCatalog, MergeConflict, MergePlan};
pub use pg::PgCatalog;

use anyhow::{Context, Result};
use deadpool_postgres::{Config as PgConfig, Pool, Runtime};
use log::info;
use std::env;
use tokio_postgres::NoTls;

pub type PgPool = Pool;

/// Build the connection pool from `POSTGRES_*` environment variables.
pub async fn connect() -> Result<PgPool> {
    let mut cfg = PgConfig::new();
    cfg.host = Some(env::var("POSTGRES_HOST").unwrap_or_else(|_| "localhost".to_string()));
    cfg.port = env::var("POSTGRES_PORT").ok().and_then(|p| p.parse().ok());
    cfg.user = env::var("POSTGRES_USER").ok();
    cfg.password = env::var("POSTGRES_PASSWORD").ok();
    cfg.dbname = Some(env::var("POSTGRES_DB").unwrap_or_else(|_| "catalog".to_string()));

    let pool = cfg
        .create_pool(Some(Runtime::Tokio1), NoTls)
        .context("Failed to create Postgres pool")?;

    // Fail fast on bad credentials rather than mid-sweep.
    let client = pool.get().await.context("Failed to check out connection")?;
    client
        .simple_query("SELECT 1")
        .await
        .context("Connection test query failed")?;
    drop(client);

    info!("Connected to catalog database");
    Ok(pool)
}

/// (size, available) for sweep telemetry.
pub fn get_pool_status(pool: &PgPool) -> (usize, usize) {
    let status = pool.status();
    (status.size, status.available.max(0) as usize)
}
