//! Database connection management

pub mod schema;

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

/// PostgreSQL connection pool shared by the preparation passes
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Open a pool of at most `pool_size` connections
    ///
    /// A pass holds one connection for its whole transaction.
    pub async fn connect(database_url: &str, pool_size: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(pool_size)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;

        tracing::info!(pool_size, "Catalog pool ready");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check the pool can reach the catalog and report the server version
    pub async fn health_check(&self) -> Result<String, sqlx::Error> {
        let version: String = sqlx::query_scalar("SHOW server_version")
            .fetch_one(&self.pool)
            .await?;
        Ok(version)
    }
}
