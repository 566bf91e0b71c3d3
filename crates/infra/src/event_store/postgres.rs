//! Postgres-backed event store implementation.
//!
//! The conditional append is a transaction that reads the stream's latest
//! version, runs the contiguity check and inserts the batch. The unique key on
//! `(stream_name, version)` settles races the read cannot see: the loser's
//! insert fails and is reported as a version collision.
//!
//! ## Error Mapping
//!
//! | SQLx error | `EventStoreError` |
//! |------------|-------------------|
//! | Database, `23505` on the `(stream_name, version)` key | `VersionConflict` (collision) |
//! | Database, `23505` on any other key (e.g. duplicate event id) | `InvalidAppend` |
//! | Database, any other code | `Transient` |
//! | Pool closed/timed out, I/O, TLS, protocol | `Transient` |
//! | Row/column decoding | `Corrupted` |

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{Span, instrument};

use streamroot_core::{AggregateId, ContiguityViolation};

use super::r#trait::{
    EventStore, EventStoreError, StoredEvent, UncommittedEvent, validate_batch, verify_contiguous,
};
use crate::config::{ConfigError, ENV_DATABASE_URL, StoreConfig};

/// Name of the unique key that makes the append conditional.
pub const STREAM_VERSION_CONSTRAINT: &str = "stream_events_stream_version_key";

/// DDL for the events table.
pub const CREATE_EVENTS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS stream_events (
    event_id        UUID PRIMARY KEY,
    stream_name     VARCHAR(255) NOT NULL,
    aggregate_id    VARCHAR(100) NOT NULL,
    version         BIGINT NOT NULL CHECK (version >= 1),
    event_type      VARCHAR(255) NOT NULL,
    schema_version  INTEGER NOT NULL,
    occurred_at     TIMESTAMPTZ NOT NULL,
    payload         JSONB NOT NULL,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    CONSTRAINT stream_events_stream_version_key UNIQUE (stream_name, version)
);
";

const STORE_TYPE: &str = "PostgresEventStore";

/// Failure to open a [`PostgresEventStore`].
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] EventStoreError),
}

/// Postgres-backed append-only event store.
///
/// `Send + Sync`; all access goes through the SQLx pool. The synchronous
/// [`EventStore`] methods must run on a multi-threaded tokio runtime.
#[derive(Debug, Clone)]
pub struct PostgresEventStore {
    pool: Arc<PgPool>,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a pool from configuration.
    pub async fn connect(config: &StoreConfig) -> Result<Self, ConnectError> {
        let url = config
            .database_url
            .as_deref()
            .ok_or(ConfigError::MissingDatabaseUrl(ENV_DATABASE_URL))?;
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create the events table if it does not exist.
    pub async fn ensure_schema(&self) -> Result<(), EventStoreError> {
        sqlx::raw_sql(CREATE_EVENTS_TABLE)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    /// Load a stream in version order. Unknown streams are empty.
    #[instrument(skip(self), fields(event_count), err)]
    pub async fn load_stream(
        &self,
        stream_name: &str,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                event_id,
                stream_name,
                aggregate_id,
                version,
                event_type,
                schema_version,
                occurred_at,
                payload
            FROM stream_events
            WHERE stream_name = $1
            ORDER BY version ASC
            "#,
        )
        .bind(stream_name)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_stream", e))?;

        let events = rows
            .iter()
            .map(decode_row)
            .collect::<Result<Vec<_>, _>>()?;

        Span::current().record("event_count", events.len());
        Ok(events)
    }

    /// Conditionally append a batch; returns the new latest version.
    #[instrument(
        skip(self, events),
        fields(event_count = events.len(), expected_latest = ?expected_latest),
        err
    )]
    pub async fn append_events(
        &self,
        stream_name: &str,
        expected_latest: Option<u64>,
        events: Vec<UncommittedEvent>,
    ) -> Result<u64, EventStoreError> {
        let first_version = validate_batch(expected_latest, &events)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let stored_latest = latest_version(&mut tx, stream_name).await?;
        if let Err(err) = verify_contiguous(STORE_TYPE, stream_name, stored_latest, first_version)
        {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(err);
        }

        let mut latest = first_version;
        for event in events {
            let version = to_db_version(event.version)?;
            let schema_version = to_db_schema_version(event.schema_version)?;
            sqlx::query(
                r#"
                INSERT INTO stream_events (
                    event_id,
                    stream_name,
                    aggregate_id,
                    version,
                    event_type,
                    schema_version,
                    occurred_at,
                    payload
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(event.event_id)
            .bind(stream_name)
            .bind(event.aggregate_id.as_str())
            .bind(version)
            .bind(&event.event_type)
            .bind(schema_version)
            .bind(event.occurred_at)
            .bind(&event.payload)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if is_stream_version_violation(&e) {
                    // Another writer committed this version after our read.
                    EventStoreError::VersionConflict {
                        store: STORE_TYPE,
                        stream: stream_name.to_string(),
                        violation: ContiguityViolation::VersionCollision {
                            next: event.version,
                            latest: event.version,
                        },
                    }
                } else {
                    map_sqlx_error("insert_event", e)
                }
            })?;
            latest = event.version;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(latest)
    }
}

async fn latest_version(
    tx: &mut Transaction<'_, Postgres>,
    stream_name: &str,
) -> Result<Option<u64>, EventStoreError> {
    let row = sqlx::query("SELECT MAX(version) AS latest FROM stream_events WHERE stream_name = $1")
        .bind(stream_name)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("latest_version", e))?;

    let latest: Option<i64> = row
        .try_get("latest")
        .map_err(|e| EventStoreError::Corrupted(format!("failed to read latest version: {e}")))?;

    latest.map(from_db_version).transpose()
}

fn to_db_version(version: u64) -> Result<i64, EventStoreError> {
    i64::try_from(version).map_err(|_| {
        EventStoreError::InvalidAppend(format!("version {version} does not fit in BIGINT"))
    })
}

fn from_db_version(version: i64) -> Result<u64, EventStoreError> {
    u64::try_from(version)
        .map_err(|_| EventStoreError::Corrupted(format!("negative version {version} in store")))
}

fn to_db_schema_version(schema_version: u32) -> Result<i32, EventStoreError> {
    i32::try_from(schema_version).map_err(|_| {
        EventStoreError::InvalidAppend(format!(
            "schema version {schema_version} does not fit in INTEGER"
        ))
    })
}

fn decode_row(row: &PgRow) -> Result<StoredEvent, EventStoreError> {
    let corrupted =
        |e: sqlx::Error| EventStoreError::Corrupted(format!("failed to decode event row: {e}"));

    let aggregate_id: String = row.try_get("aggregate_id").map_err(corrupted)?;
    let version: i64 = row.try_get("version").map_err(corrupted)?;
    let schema_version: i32 = row.try_get("schema_version").map_err(corrupted)?;
    let occurred_at: DateTime<Utc> = row.try_get("occurred_at").map_err(corrupted)?;

    Ok(StoredEvent {
        event_id: row.try_get("event_id").map_err(corrupted)?,
        stream_name: row.try_get("stream_name").map_err(corrupted)?,
        aggregate_id: AggregateId::parse(aggregate_id)
            .map_err(|e| EventStoreError::Corrupted(e.to_string()))?,
        version: from_db_version(version)?,
        event_type: row.try_get("event_type").map_err(corrupted)?,
        schema_version: u32::try_from(schema_version).map_err(|_| {
            EventStoreError::Corrupted(format!("negative schema version {schema_version}"))
        })?,
        occurred_at,
        payload: row.try_get("payload").map_err(corrupted)?,
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> EventStoreError {
    match err {
        sqlx::Error::Database(db_err) if is_unique_violation_code(db_err.code().as_deref()) => {
            EventStoreError::InvalidAppend(format!(
                "duplicate key in {operation}: {}",
                db_err.message()
            ))
        }
        sqlx::Error::Database(db_err) => EventStoreError::Transient(format!(
            "database error in {operation}: {}",
            db_err.message()
        )),
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::ColumnNotFound(_) => {
            EventStoreError::Corrupted(format!("decode error in {operation}: {err}"))
        }
        _ => EventStoreError::Transient(format!("sqlx error in {operation}: {err}")),
    }
}

fn is_unique_violation_code(code: Option<&str>) -> bool {
    code == Some("23505")
}

/// A unique violation on the `(stream_name, version)` key, and nothing else.
fn is_stream_version_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            is_unique_violation_code(db_err.code().as_deref())
                && db_err.constraint() == Some(STREAM_VERSION_CONSTRAINT)
        }
        _ => false,
    }
}

/// Handle of the ambient runtime, if it can host `block_in_place`.
fn runtime() -> Result<Handle, EventStoreError> {
    let handle = Handle::try_current().map_err(|_| {
        EventStoreError::Transient(
            "PostgresEventStore requires a tokio runtime; call it from within one".to_string(),
        )
    })?;
    if !matches!(handle.runtime_flavor(), RuntimeFlavor::MultiThread) {
        return Err(EventStoreError::Transient(
            "PostgresEventStore requires a multi-threaded tokio runtime".to_string(),
        ));
    }
    Ok(handle)
}

// The EventStore trait is synchronous; bridge onto the ambient tokio runtime.
impl EventStore for PostgresEventStore {
    fn store_type(&self) -> &'static str {
        STORE_TYPE
    }

    fn append(
        &self,
        stream_name: &str,
        expected_latest: Option<u64>,
        events: Vec<UncommittedEvent>,
    ) -> Result<u64, EventStoreError> {
        let handle = runtime()?;
        tokio::task::block_in_place(|| {
            handle.block_on(self.append_events(stream_name, expected_latest, events))
        })
    }

    fn read_stream(&self, stream_name: &str) -> Result<Vec<StoredEvent>, EventStoreError> {
        let handle = runtime()?;
        tokio::task::block_in_place(|| handle.block_on(self.load_stream(stream_name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;
    use std::error::Error as StdError;

    use sqlx::error::{DatabaseError, ErrorKind};
    use uuid::Uuid;

    /// Minimal stand-in for a server-side error.
    #[derive(Debug, Error)]
    #[error("{message}")]
    struct ServerError {
        message: String,
        code: &'static str,
        constraint: Option<&'static str>,
    }

    impl DatabaseError for ServerError {
        fn message(&self) -> &str {
            &self.message
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            Some(Cow::Borrowed(self.code))
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn constraint(&self) -> Option<&str> {
            self.constraint
        }

        fn kind(&self) -> ErrorKind {
            if self.code == "23505" {
                ErrorKind::UniqueViolation
            } else {
                ErrorKind::Other
            }
        }
    }

    fn server_error(code: &'static str, constraint: Option<&'static str>) -> sqlx::Error {
        sqlx::Error::Database(Box::new(ServerError {
            message: format!("server said {code}"),
            code,
            constraint,
        }))
    }

    fn lazy_store() -> PostgresEventStore {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://streamroot@localhost/streamroot")
            .unwrap();
        PostgresEventStore::new(pool)
    }

    fn event(version: u64) -> UncommittedEvent {
        UncommittedEvent {
            event_id: Uuid::now_v7(),
            aggregate_id: AggregateId::parse("1").unwrap(),
            version,
            event_type: "order.placed".to_string(),
            schema_version: 1,
            occurred_at: Utc::now(),
            payload: serde_json::json!({}),
        }
    }

    #[test]
    fn only_the_stream_version_key_is_a_collision() {
        assert!(is_stream_version_violation(&server_error(
            "23505",
            Some(STREAM_VERSION_CONSTRAINT)
        )));
        // Duplicate event id hits the primary key instead.
        assert!(!is_stream_version_violation(&server_error(
            "23505",
            Some("stream_events_pkey")
        )));
        assert!(!is_stream_version_violation(&server_error("40001", None)));
        assert!(!is_stream_version_violation(&sqlx::Error::PoolTimedOut));
    }

    #[test]
    fn sqlx_errors_map_to_store_categories() {
        assert!(matches!(
            map_sqlx_error("insert_event", server_error("23505", Some("stream_events_pkey"))),
            EventStoreError::InvalidAppend(_)
        ));
        assert!(map_sqlx_error("insert_event", server_error("40001", None)).is_transient());
        assert!(map_sqlx_error("load_stream", sqlx::Error::PoolTimedOut).is_transient());
        assert!(matches!(
            map_sqlx_error("load_stream", sqlx::Error::ColumnNotFound("version".to_string())),
            EventStoreError::Corrupted(_)
        ));
        assert!(matches!(
            map_sqlx_error("load_stream", sqlx::Error::Decode("bad jsonb".into())),
            EventStoreError::Corrupted(_)
        ));
    }

    #[test]
    fn versions_convert_within_bigint_range() {
        assert_eq!(to_db_version(7).unwrap(), 7);
        assert!(matches!(to_db_version(u64::MAX), Err(EventStoreError::InvalidAppend(_))));
        assert_eq!(from_db_version(7).unwrap(), 7);
        assert!(matches!(from_db_version(-1), Err(EventStoreError::Corrupted(_))));
    }

    #[test]
    fn oversized_schema_version_is_rejected() {
        assert_eq!(to_db_schema_version(3).unwrap(), 3);
        assert!(matches!(
            to_db_schema_version(u32::MAX),
            Err(EventStoreError::InvalidAppend(_))
        ));
    }

    #[test]
    fn sync_calls_outside_a_runtime_are_transient() {
        assert!(matches!(runtime(), Err(EventStoreError::Transient(_))));
    }

    #[tokio::test]
    async fn sync_calls_on_a_current_thread_runtime_are_transient() {
        let store = lazy_store();

        let err = store.read_stream("Order_1").unwrap_err();
        assert!(err.is_transient());

        let err = store.append("Order_1", None, vec![event(1)]).unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn multi_thread_runtime_hosts_the_bridge() {
        assert!(runtime().is_ok());
    }

    #[tokio::test]
    async fn connect_without_database_url_is_a_config_error() {
        let err = PostgresEventStore::connect(&StoreConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ConnectError::Config(ConfigError::MissingDatabaseUrl(ENV_DATABASE_URL))
        ));
    }
}
