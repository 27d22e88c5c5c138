pub mod migrate;
pub mod operations;

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub primary_url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl DbConfig {
    pub fn from_env() -> Result<Self, DbConfigError> {
        let primary_url = std::env::var("DATABASE_URL").map_err(|_| DbConfigError::Missing {
            key: "DATABASE_URL",
        })?;

        let max_connections = std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);

        Ok(Self {
            primary_url,
            max_connections,
            acquire_timeout: Duration::from_secs(5),
        })
    }
}

#[derive(Debug, Error)]
pub enum DbConfigError {
    #[error("missing required environment variable {key}")]
    Missing { key: &'static str },
}

#[derive(Debug, Error)]
pub enum DbInitError {
    #[error(transparent)]
    Config(#[from] DbConfigError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Migration(#[from] migrate::MigrationError),
}

/// Connection handle shared by the persistence layer. Migrations run once at
/// startup before the proxy is handed out.
#[derive(Clone)]
pub struct DatabaseProxy {
    config: DbConfig,
    pool: PgPool,
}

impl DatabaseProxy {
    pub async fn from_env() -> Result<Arc<Self>, DbInitError> {
        let config = DbConfig::from_env()?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.primary_url)
            .await?;

        migrate::run_migrations(&pool).await?;

        Ok(Arc::new(Self { config, pool }))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn connection_string(&self) -> &str {
        &self.config.primary_url
    }
}
