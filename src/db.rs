use crate::config::AppConfig;
use crate::migrator::Migrator;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr};
use sea_orm_migration::MigratorTrait;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

pub type DbPool = DatabaseConnection;

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    pub acquire_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            acquire_timeout: Duration::from_secs(8),
        }
    }
}

impl From<&AppConfig> for DbConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            url: cfg.database_url.clone(),
            max_connections: cfg.db_max_connections,
            min_connections: cfg.db_min_connections,
            connect_timeout: Duration::from_secs(cfg.db_connect_timeout_secs),
            idle_timeout: Duration::from_secs(cfg.db_idle_timeout_secs),
            acquire_timeout: Duration::from_secs(cfg.db_acquire_timeout_secs),
        }
    }
}

impl DbConfig {
    /// Every connection to `sqlite::memory:` opens its own empty database, so
    /// such a pool must never grow past one connection.
    fn is_in_memory(&self) -> bool {
        self.url.starts_with("sqlite:") && self.url.contains(":memory:")
    }
}

/// Opens the pool sessions and change records are stored in.
pub async fn connect(config: &DbConfig) -> Result<DbPool, DbErr> {
    let (max, min) = if config.is_in_memory() && config.max_connections > 1 {
        warn!(
            requested = config.max_connections,
            "In-memory SQLite is limited to one connection"
        );
        (1, 1)
    } else {
        (config.max_connections, config.min_connections.min(config.max_connections))
    };

    let mut opt = ConnectOptions::new(config.url.clone());
    opt.max_connections(max)
        .min_connections(min)
        .connect_timeout(config.connect_timeout)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .sqlx_logging(false);

    let pool = Database::connect(opt).await.map_err(|e| {
        error!(error = %e, "Could not open the opname database");
        e
    })?;
    info!(backend = ?pool.get_database_backend(), max_connections = max, "Opname database ready");
    Ok(pool)
}

pub async fn connect_from_app_config(cfg: &AppConfig) -> Result<DbPool, DbErr> {
    connect(&DbConfig::from(cfg)).await
}

/// Brings the opname tables up to date.
pub async fn run_migrations(pool: &DbPool) -> Result<(), DbErr> {
    let started = Instant::now();
    match Migrator::up(pool, None).await {
        Ok(()) => {
            info!(elapsed = ?started.elapsed(), "Migrations applied");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Migrations failed");
            Err(e)
        }
    }
}
