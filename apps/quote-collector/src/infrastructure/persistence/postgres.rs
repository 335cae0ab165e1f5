//! PostgreSQL quote sink.
//!
//! Expects an existing table shaped like:
//!
//! ```sql
//! CREATE TABLE cotacoes (
//!     source       TEXT        NOT NULL,
//!     instrument   TEXT        NOT NULL,
//!     price        NUMERIC     NOT NULL,
//!     unit         TEXT        NOT NULL,
//!     collected_at TIMESTAMPTZ NOT NULL
//! );
//! ```
//!
//! # Tables from the pandas collector
//!
//! Tables written by the earlier pandas script use `ativo, preco, moeda,
//! horario_coleta` and have no `source` column; inserts into them fail with
//! an undefined-column error. Migrate once before pointing the collector at
//! such a table:
//!
//! ```sql
//! BEGIN;
//! ALTER TABLE cotacoes RENAME COLUMN ativo TO instrument;
//! ALTER TABLE cotacoes RENAME COLUMN preco TO price;
//! ALTER TABLE cotacoes RENAME COLUMN moeda TO unit;
//! ALTER TABLE cotacoes RENAME COLUMN horario_coleta TO collected_at;
//! ALTER TABLE cotacoes ALTER COLUMN price TYPE NUMERIC USING price::numeric;
//! ALTER TABLE cotacoes
//!     ALTER COLUMN collected_at TYPE TIMESTAMPTZ USING collected_at AT TIME ZONE 'UTC';
//! ALTER TABLE cotacoes ADD COLUMN source TEXT NOT NULL DEFAULT 'legacy';
//! ALTER TABLE cotacoes ALTER COLUMN source DROP DEFAULT;
//! COMMIT;
//! ```
//!
//! The `AT TIME ZONE` cast assumes the old naive timestamps were UTC.
//!
//! Rows are inserted one statement at a time outside a transaction, so a
//! failure mid-batch keeps the rows already written.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use tracing::debug;

use crate::application::ports::{QuoteSink, SinkError};
use crate::domain::quote::QuoteBatch;
use crate::infrastructure::config::DatabaseSettings;

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Append-only sink writing to a PostgreSQL table.
#[derive(Debug, Clone)]
pub struct PostgresQuoteSink {
    pool: PgPool,
    insert_sql: String,
}

impl PostgresQuoteSink {
    /// Create a sink with a lazily-connecting pool.
    ///
    /// No connection is attempted here; an unreachable database surfaces as
    /// a [`SinkError::Connection`] on the first append.
    ///
    /// # Errors
    ///
    /// Returns an error if `DATABASE_URL` is set but cannot be parsed.
    pub fn new(settings: &DatabaseSettings) -> Result<Self, sqlx::Error> {
        let options = connect_options(settings)?;
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_lazy_with(options);
        Ok(Self::with_pool(pool, &settings.table))
    }

    /// Create a sink from an existing pool.
    ///
    /// `table` must already be a validated identifier.
    #[must_use]
    pub fn with_pool(pool: PgPool, table: &str) -> Self {
        Self {
            pool,
            insert_sql: insert_statement(table),
        }
    }

    /// Get the underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl QuoteSink for PostgresQuoteSink {
    async fn append(&self, batch: &QuoteBatch) -> Result<usize, SinkError> {
        let mut rows_written = 0;

        for record in batch.records() {
            sqlx::query(&self.insert_sql)
                .bind(record.source())
                .bind(record.instrument())
                .bind(record.price())
                .bind(record.unit())
                .bind(record.collected_at())
                .execute(&self.pool)
                .await
                .map_err(|e| classify(&e, rows_written))?;
            rows_written += 1;
        }

        debug!(rows = rows_written, "Batch appended");
        Ok(rows_written)
    }
}

fn connect_options(settings: &DatabaseSettings) -> Result<PgConnectOptions, sqlx::Error> {
    if let Some(url) = settings.url_override() {
        return url.parse();
    }
    Ok(PgConnectOptions::new()
        .host(&settings.host)
        .port(settings.port)
        .username(&settings.user)
        .password(settings.password())
        .database(&settings.name))
}

fn insert_statement(table: &str) -> String {
    format!(
        "INSERT INTO {table} (source, instrument, price, unit, collected_at) \
         VALUES ($1, $2, $3, $4, $5)"
    )
}

/// Failures before any row landed that never reached the server are
/// connection errors; everything else is a write error.
fn classify(err: &sqlx::Error, rows_written: usize) -> SinkError {
    let connection_level = matches!(
        err,
        sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Configuration(_)
    );
    if connection_level && rows_written == 0 {
        SinkError::Connection(err.to_string())
    } else {
        SinkError::Write {
            rows_written,
            message: err.to_string(),
        }
    }
}
