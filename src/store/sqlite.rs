use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument};

use super::{publish, ChangeEvent, ChangeStream, EventStore, StoreError, CHANGE_CHANNEL_CAPACITY};
use crate::catalog::{self, EventTypeRecord};
use crate::config::StoreConfig;
use crate::model::{
    EventType, Incident, IncidentId, IncidentPatch, IncidentQuery, Location, Reporter, UnixTimeMs,
};

const BUSY_TIMEOUT_MS: u32 = 5000;

/// `sqlite_path` value that selects a private in-memory database.
pub const IN_MEMORY_PATH: &str = ":memory:";

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS incidents (
        id TEXT PRIMARY KEY,
        event_type TEXT NOT NULL,
        lat REAL NOT NULL,
        lng REAL NOT NULL,
        address TEXT NOT NULL,
        reporter TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        description TEXT,
        is_active INTEGER NOT NULL DEFAULT 1
    );

    CREATE INDEX IF NOT EXISTS idx_incidents_active_type ON incidents(is_active, event_type);
    CREATE INDEX IF NOT EXISTS idx_incidents_created ON incidents(created_at DESC);

    CREATE TABLE IF NOT EXISTS event_types (
        key TEXT PRIMARY KEY,
        label TEXT NOT NULL
    );
"#;

const SELECT_COLUMNS: &str =
    "id, event_type, lat, lng, address, reporter, created_at, description, is_active";

/// SQLite-backed store for hosts that keep incidents on the device.
///
/// Changes are published to subscribers of this handle only; other processes
/// writing the same file are not observed.
pub struct SqliteEventStore {
    conn: Arc<Mutex<Connection>>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl SqliteEventStore {
    /// Opens (or creates) the database at `path` and applies the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref()).map_err(backend)?;
        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))
            .map_err(backend)?;
        debug!(%journal_mode, path = %path.as_ref().display(), "opened incident database");
        Self::init(conn)
    }

    /// Opens the database named by `config.sqlite_path`.
    pub fn from_config(config: &StoreConfig) -> Result<Self, StoreError> {
        if config.sqlite_path == IN_MEMORY_PATH {
            return Self::open_in_memory();
        }
        Self::open(&config.sqlite_path)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory().map_err(backend)?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(&format!("PRAGMA busy_timeout = {BUSY_TIMEOUT_MS};"))
            .map_err(backend)?;
        conn.execute_batch(SCHEMA).map_err(backend)?;

        for record in catalog::built_in_records() {
            conn.execute(
                "INSERT OR IGNORE INTO event_types (key, label) VALUES (?1, ?2)",
                params![record.key, record.label],
            )
            .map_err(backend)?;
        }

        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            changes,
        })
    }

    /// Adds or relabels an event-type catalog row.
    pub async fn put_event_type(&self, record: EventTypeRecord) -> Result<(), StoreError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO event_types (key, label) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET label = excluded.label",
                params![record.key, record.label],
            )
            .map_err(backend)?;
            Ok(())
        })
        .await
    }

    /// Runs `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::Unavailable("connection lock poisoned".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))?
    }
}

fn backend(e: rusqlite::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _) if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn read_incident(row: &Row<'_>) -> rusqlite::Result<Result<Incident, StoreError>> {
    let id: String = row.get(0)?;
    let created_at: i64 = row.get(6)?;
    let Ok(created_at) = u64::try_from(created_at) else {
        return Ok(Err(StoreError::Corrupted {
            id,
            reason: format!("negative created_at {created_at}"),
        }));
    };

    Ok(Ok(Incident {
        id: IncidentId(id),
        event_type: EventType::from_key(&row.get::<_, String>(1)?),
        location: Location {
            lat: row.get(2)?,
            lng: row.get(3)?,
            address: row.get(4)?,
        },
        reporter: Reporter::from(row.get::<_, String>(5)?),
        created_at: UnixTimeMs(created_at),
        description: row.get(7)?,
        is_active: row.get(8)?,
    }))
}

fn load(conn: &Connection, id: &IncidentId) -> Result<Option<Incident>, StoreError> {
    let sql = format!("SELECT {SELECT_COLUMNS} FROM incidents WHERE id = ?1");
    conn.query_row(&sql, params![id.as_str()], read_incident)
        .optional()
        .map_err(backend)?
        .transpose()
}

fn to_sql_time(t: UnixTimeMs) -> Result<i64, StoreError> {
    i64::try_from(t.0).map_err(|_| StoreError::Backend(format!("timestamp {} out of range", t.0)))
}

#[async_trait]
impl EventStore for SqliteEventStore {
    #[instrument(skip_all, fields(incident_id = %incident.id))]
    async fn insert(&self, incident: Incident) -> Result<Incident, StoreError> {
        let row = incident.clone();
        self.with_conn(move |conn| {
            let result = conn.execute(
                r#"
                INSERT INTO incidents (id, event_type, lat, lng, address, reporter, created_at, description, is_active)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
                params![
                    row.id.as_str(),
                    row.event_type.as_str(),
                    row.location.lat,
                    row.location.lng,
                    row.location.address,
                    row.reporter.as_str(),
                    to_sql_time(row.created_at)?,
                    row.description,
                    row.is_active,
                ],
            );
            match result {
                Ok(_) => Ok(()),
                Err(e) if is_constraint_violation(&e) => Err(StoreError::Duplicate(row.id)),
                Err(e) => Err(backend(e)),
            }
        })
        .await?;

        info!("incident inserted");
        publish(&self.changes, ChangeEvent::Inserted(incident.clone()));
        Ok(incident)
    }

    #[instrument(skip(self, patch), fields(incident_id = %id))]
    async fn update(&self, id: &IncidentId, patch: &IncidentPatch) -> Result<Incident, StoreError> {
        let id = id.clone();
        let patch = patch.clone();
        let (incident, changed) = self
            .with_conn(move |conn| {
                let tx = conn.transaction().map_err(backend)?;
                let mut incident = load(&tx, &id)?.ok_or_else(|| StoreError::NotFound(id.clone()))?;
                let changed = incident.apply_patch(&patch);
                if changed {
                    tx.execute(
                        "UPDATE incidents SET is_active = ?1 WHERE id = ?2",
                        params![incident.is_active, id.as_str()],
                    )
                    .map_err(backend)?;
                }
                tx.commit().map_err(backend)?;
                Ok((incident, changed))
            })
            .await?;

        if changed {
            info!("incident updated");
            publish(&self.changes, ChangeEvent::Updated(incident.clone()));
        }
        Ok(incident)
    }

    async fn query(&self, query: &IncidentQuery) -> Result<Vec<Incident>, StoreError> {
        let is_active = query.is_active;
        let event_type = query.event_type.as_ref().map(|t| t.as_str().to_string());
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {SELECT_COLUMNS} FROM incidents
                 WHERE (?1 IS NULL OR is_active = ?1) AND (?2 IS NULL OR event_type = ?2)
                 ORDER BY created_at DESC, id ASC"
            );
            let mut stmt = conn.prepare(&sql).map_err(backend)?;
            let rows = stmt
                .query_map(params![is_active, event_type], read_incident)
                .map_err(backend)?;

            let mut incidents = Vec::new();
            for row in rows {
                incidents.push(row.map_err(backend)??);
            }
            Ok(incidents)
        })
        .await
    }

    fn subscribe(&self) -> ChangeStream {
        ChangeStream::new(self.changes.subscribe())
    }

    async fn event_types(&self) -> Result<Vec<EventTypeRecord>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT key, label FROM event_types ORDER BY rowid")
                .map_err(backend)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(EventTypeRecord {
                        key: row.get(0)?,
                        label: row.get(1)?,
                    })
                })
                .map_err(backend)?;
            let records = rows.collect::<Result<Vec<_>, _>>().map_err(backend)?;
            Ok(records)
        })
        .await
    }
}
