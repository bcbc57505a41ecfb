use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection};
use time::OffsetDateTime;

use super::{Backend, Namespace};

// Short: a busy database surfaces as an error and goes through the store's retry loop.
const BUSY_TIMEOUT_MS: u64 = 50;

/// All namespaces in one SQLite file, one row per namespace snapshot.
pub struct SqliteBackend {
    path: PathBuf,
}

impl SqliteBackend {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating data dir {}", parent.display()))?;
        }
        let backend = Self { path };
        backend.init_db()?;
        Ok(backend)
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)
            .with_context(|| format!("opening {}", self.path.display()))?;
        conn.busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS))?;
        Ok(conn)
    }

    fn init_db(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            r#"
CREATE TABLE IF NOT EXISTS namespaces (
  name TEXT PRIMARY KEY,
  snapshot TEXT NOT NULL
);
"#,
        )?;

        // Migrations
        add_column_if_missing(&conn, "namespaces", "updated_at INTEGER NOT NULL DEFAULT 0")?;
        Ok(())
    }
}

fn add_column_if_missing(conn: &Connection, table: &str, coldef: &str) -> Result<()> {
    let sql = format!("ALTER TABLE {} ADD COLUMN {}", table, coldef);
    match conn.execute(&sql, []) {
        Ok(_) => Ok(()),
        Err(e) => {
            if e.to_string().contains("duplicate column name") {
                Ok(())
            } else {
                Err(e.into())
            }
        }
    }
}

impl Backend for SqliteBackend {
    fn read(&self, ns: Namespace) -> Result<Option<String>> {
        let conn = self.connect()?;
        conn.query_row(
            "SELECT snapshot FROM namespaces WHERE name=?1",
            params![ns.as_str()],
            |r| {
                // Anything that is not text is left for the JSON parser to reject.
                Ok(match r.get_ref(0)? {
                    ValueRef::Text(t) | ValueRef::Blob(t) => String::from_utf8_lossy(t).into_owned(),
                    _ => String::new(),
                })
            },
        )
        .optional()
        .with_context(|| format!("loading namespace {}", ns))
    }

    fn write(&self, ns: Namespace, snapshot: &str) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            r#"
INSERT INTO namespaces(name, snapshot, updated_at)
VALUES(?1, ?2, ?3)
ON CONFLICT(name) DO UPDATE SET snapshot=excluded.snapshot, updated_at=excluded.updated_at
"#,
            params![ns.as_str(), snapshot, OffsetDateTime::now_utc().unix_timestamp()],
        )
        .with_context(|| format!("saving namespace {}", ns))?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("sqlite at {}", self.path.display())
    }
}

trait OptionalRow<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalRow<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
