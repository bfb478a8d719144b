//! Snapshot persistence to a SQL database (PostgreSQL or SQLite).
//!
//! Uses the sqlx `Any` driver so the backend is chosen by the DSN scheme.
//! Every database round trip is bounded by [`DB_TIMEOUT`] and fails closed.

use crate::{Persister, StorageError};
use async_trait::async_trait;
use sqlx::any::{install_default_drivers, AnyPoolOptions};
use sqlx::{AnyPool, Row};
use std::future::Future;
use std::time::Duration;
use tally_core::{MetricKind, MetricRecord, MetricValue, Snapshot};
use tracing::{debug, info, instrument, warn};

/// Upper bound for connect, ping, save and load
pub const DB_TIMEOUT: Duration = Duration::from_secs(5);

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS metrics (
        id TEXT NOT NULL,
        kind TEXT NOT NULL,
        delta BIGINT,
        value DOUBLE PRECISION,
        UNIQUE (id, kind)
    )
"#;

/// Keeps one row per metric name and kind
#[derive(Clone)]
pub struct DbStore {
    pool: AnyPool,
    backend: String,
}

impl DbStore {
    /// Connect, verify connectivity and create the table if missing
    #[instrument(skip(dsn))]
    pub async fn connect(dsn: &str) -> Result<Self, StorageError> {
        install_default_drivers();
        let backend = dsn.split(':').next().unwrap_or("database").to_string();

        let pool = bounded("connect", async {
            let pool = AnyPoolOptions::new()
                .max_connections(5)
                .acquire_timeout(DB_TIMEOUT)
                .connect(dsn)
                .await?;
            sqlx::query(CREATE_TABLE).execute(&pool).await?;
            Ok::<_, StorageError>(pool)
        })
        .await?;

        info!(backend = %backend, "Connected to metrics database");
        Ok(Self { pool, backend })
    }

    /// Insert one row, falling back to an update when the (id, kind) pair
    /// already exists
    async fn upsert(
        &self,
        id: &str,
        kind: MetricKind,
        delta: Option<i64>,
        value: Option<f64>,
    ) -> Result<(), StorageError> {
        let inserted =
            sqlx::query("INSERT INTO metrics (id, kind, delta, value) VALUES ($1, $2, $3, $4)")
                .bind(id)
                .bind(kind.as_str())
                .bind(delta)
                .bind(value)
                .execute(&self.pool)
                .await;

        let insert_err = match inserted {
            Ok(_) => return Ok(()),
            Err(e) => e,
        };

        let updated =
            sqlx::query("UPDATE metrics SET delta = $1, value = $2 WHERE id = $3 AND kind = $4")
                .bind(delta)
                .bind(value)
                .bind(id)
                .bind(kind.as_str())
                .execute(&self.pool)
                .await?;

        if updated.rows_affected() == 0 {
            return Err(insert_err.into());
        }
        Ok(())
    }

    async fn load_kind(&self, kind: MetricKind) -> Result<Vec<MetricRecord>, StorageError> {
        let rows = sqlx::query("SELECT id, delta, value FROM metrics WHERE kind = $1")
            .bind(kind.as_str())
            .fetch_all(&self.pool)
            .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id")?;
            let record = match kind {
                MetricKind::Counter => match row.try_get::<Option<i64>, _>("delta")? {
                    Some(delta) => MetricRecord::counter(id, delta),
                    None => MetricRecord::query(id, kind),
                },
                MetricKind::Gauge => match row.try_get::<Option<f64>, _>("value")? {
                    Some(value) => MetricRecord::gauge(id, value),
                    None => MetricRecord::query(id, kind),
                },
            };
            records.push(record);
        }
        Ok(records)
    }
}

#[async_trait]
impl Persister for DbStore {
    #[instrument(skip(self, snapshot), fields(records = snapshot.len()))]
    async fn save(&self, snapshot: &Snapshot) -> Result<(), StorageError> {
        bounded("save", async {
            for record in snapshot {
                let (delta, value) = match record.value() {
                    Ok(MetricValue::Counter(delta)) => (Some(delta), None),
                    Ok(MetricValue::Gauge(value)) => (None, Some(value)),
                    Err(e) => {
                        warn!(id = %record.id, error = %e, "Skipping invalid record during save");
                        continue;
                    }
                };
                let kind = record
                    .metric_kind()
                    .map_err(|e| StorageError::Serialization(e.to_string()))?;
                self.upsert(&record.id, kind, delta, value).await?;
            }
            Ok::<_, StorageError>(())
        })
        .await?;

        debug!(records = snapshot.len(), "Saved snapshot to database");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn load(&self) -> Result<Snapshot, StorageError> {
        let snapshot = bounded("load", async {
            let mut snapshot = self.load_kind(MetricKind::Counter).await?;
            snapshot.extend(self.load_kind(MetricKind::Gauge).await?);
            Ok::<_, StorageError>(snapshot)
        })
        .await?;

        debug!(records = snapshot.len(), "Loaded snapshot from database");
        Ok(snapshot)
    }

    async fn ping(&self) -> bool {
        let probe = bounded("ping", async {
            sqlx::query("SELECT 1").execute(&self.pool).await?;
            Ok::<_, StorageError>(())
        })
        .await;

        match probe {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Database ping failed");
                false
            }
        }
    }

    fn describe(&self) -> String {
        format!("{} database", self.backend)
    }
}

async fn bounded<T, F>(operation: &'static str, fut: F) -> Result<T, StorageError>
where
    F: Future<Output = Result<T, StorageError>>,
{
    tokio::time::timeout(DB_TIMEOUT, fut)
        .await
        .map_err(|_| StorageError::Timeout {
            operation,
            timeout: DB_TIMEOUT,
        })?
}
