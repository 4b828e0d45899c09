//! Shared service kernel: the database pool every operation runs against.

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::config::Config;

/// Owns the connection pool. Every API operation borrows a connection from
/// here and runs inside a single transaction.
#[derive(Clone)]
pub struct Kernel {
    pub db: PgPool,
}

impl Kernel {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Connect a pool according to the loaded configuration.
    pub async fn connect(config: &Config) -> Result<Self> {
        let db = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.database_url)
            .await
            .context("Failed to connect to database")?;

        Ok(Self { db })
    }

    /// Apply embedded schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.db)
            .await
            .context("Failed to run migrations")?;

        Ok(())
    }
}
