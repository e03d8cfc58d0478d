//! The per-plugin database object.
//!
//! `rusqlite::Connection` is not `Sync`, and the sandbox wants a serial
//! execution order anyway, so each [`PluginDatabase`] spawns one worker
//! thread that owns the connection. Callers send requests over a channel
//! and block on the reply; concurrent callers interleave at statement
//! granularity.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Sender};
use std::sync::Mutex;
use std::thread::JoinHandle;
use std::time::Duration;

use rusqlite::Connection;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::error::{DbError, DbResult};
use crate::guard::check_statement;
use crate::wire::{cell_to_json, params_to_values};

/// Result of a successful `exec`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutcome {
    /// Rows changed by the statement.
    pub changes: u64,
    /// The connection's last inserted rowid.
    pub last_insert_rowid: i64,
}

impl ExecOutcome {
    /// Render as the wire-format object.
    #[must_use]
    pub fn to_wire(&self) -> String {
        serde_json::json!({
            "changes": self.changes,
            "last_insert_rowid": self.last_insert_rowid,
        })
        .to_string()
    }
}

/// Result of a successful `query`.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOutcome {
    /// Column names in select order.
    pub columns: Vec<String>,
    /// Rows of encoded cells.
    pub rows: Vec<Vec<JsonValue>>,
}

impl QueryOutcome {
    /// Render as the wire-format object.
    #[must_use]
    pub fn to_wire(&self) -> String {
        serde_json::json!({
            "columns": self.columns,
            "rows": self.rows,
        })
        .to_string()
    }
}

enum Request {
    Exec {
        sql: String,
        params: Option<JsonValue>,
        reply: Sender<DbResult<ExecOutcome>>,
    },
    Query {
        sql: String,
        params: Option<JsonValue>,
        reply: Sender<DbResult<QueryOutcome>>,
    },
    Close {
        reply: Sender<()>,
    },
}

/// A plugin's sandboxed SQLite database.
///
/// All operations run on the database's own worker thread in submission
/// order. Dropping the database (or calling [`PluginDatabase::close`])
/// shuts the worker down and closes the file.
pub struct PluginDatabase {
    requests: Mutex<Option<Sender<Request>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    path: PathBuf,
}

impl PluginDatabase {
    /// Open (creating if necessary) the database at `path`.
    ///
    /// The connection is configured with WAL journaling, foreign keys on,
    /// and a 5 second busy timeout before this returns.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::OpenFailed`] if the file or its parent directory
    /// cannot be created, or the pragmas cannot be applied.
    pub fn open(path: impl AsRef<Path>) -> DbResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| DbError::OpenFailed(e.to_string()))?;
        }

        let (request_tx, request_rx) = mpsc::channel::<Request>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), String>>();

        let worker_path = path.clone();
        let worker = std::thread::Builder::new()
            .name("osaurus-plugin-db".into())
            .spawn(move || {
                let conn = match open_connection(&worker_path) {
                    Ok(conn) => {
                        let _ = ready_tx.send(Ok(()));
                        conn
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                };

                while let Ok(request) = request_rx.recv() {
                    match request {
                        Request::Exec { sql, params, reply } => {
                            let _ = reply.send(exec_on(&conn, &sql, params.as_ref()));
                        }
                        Request::Query { sql, params, reply } => {
                            let _ = reply.send(query_on(&conn, &sql, params.as_ref()));
                        }
                        Request::Close { reply } => {
                            let _ = reply.send(());
                            break;
                        }
                    }
                }
            })
            .map_err(|e| DbError::OpenFailed(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(message)) => return Err(DbError::OpenFailed(message)),
            Err(_) => return Err(DbError::OpenFailed("database worker died".into())),
        }

        debug!(path = %path.display(), "Opened plugin database");
        Ok(Self {
            requests: Mutex::new(Some(request_tx)),
            worker: Mutex::new(Some(worker)),
            path,
        })
    }

    /// The database file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sender(&self) -> DbResult<Sender<Request>> {
        self.requests
            .lock()
            .map_err(|_| DbError::NotOpen)?
            .as_ref()
            .cloned()
            .ok_or(DbError::NotOpen)
    }

    /// Prepare, bind, and step a statement to completion.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Forbidden`] for screened statements,
    /// [`DbError::PrepareFailed`] / [`DbError::ExecFailed`] from SQLite, and
    /// [`DbError::NotOpen`] after [`PluginDatabase::close`].
    pub fn exec(&self, sql: &str, params: Option<&JsonValue>) -> DbResult<ExecOutcome> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.sender()?
            .send(Request::Exec {
                sql: sql.to_string(),
                params: params.cloned(),
                reply: reply_tx,
            })
            .map_err(|_| DbError::NotOpen)?;
        reply_rx.recv().map_err(|_| DbError::NotOpen)?
    }

    /// Prepare, bind, and collect all rows of a statement.
    ///
    /// # Errors
    ///
    /// Same as [`PluginDatabase::exec`].
    pub fn query(&self, sql: &str, params: Option<&JsonValue>) -> DbResult<QueryOutcome> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.sender()?
            .send(Request::Query {
                sql: sql.to_string(),
                params: params.cloned(),
                reply: reply_tx,
            })
            .map_err(|_| DbError::NotOpen)?;
        reply_rx.recv().map_err(|_| DbError::NotOpen)?
    }

    /// `exec`, rendered to the wire format (success or `{"error": ...}`).
    #[must_use]
    pub fn exec_wire(&self, sql: &str, params: Option<&JsonValue>) -> String {
        match self.exec(sql, params) {
            Ok(outcome) => outcome.to_wire(),
            Err(e) => e.to_wire(),
        }
    }

    /// `query`, rendered to the wire format (success or `{"error": ...}`).
    #[must_use]
    pub fn query_wire(&self, sql: &str, params: Option<&JsonValue>) -> String {
        match self.query(sql, params) {
            Ok(outcome) => outcome.to_wire(),
            Err(e) => e.to_wire(),
        }
    }

    /// Close the database. Idempotent; queued operations finish first.
    pub fn close(&self) {
        let sender = match self.requests.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(sender) = sender {
            let (reply_tx, reply_rx) = mpsc::channel();
            if sender.send(Request::Close { reply: reply_tx }).is_ok() {
                let _ = reply_rx.recv();
            }
        }
        if let Ok(mut guard) = self.worker.lock() {
            if let Some(handle) = guard.take() {
                if handle.join().is_err() {
                    warn!(path = %self.path.display(), "plugin database worker panicked");
                }
            }
        }
    }
}

impl Drop for PluginDatabase {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for PluginDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginDatabase")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

fn open_connection(path: &Path) -> Result<Connection, rusqlite::Error> {
    let conn = Connection::open(path)?;
    let _mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
    conn.pragma_update(None, "foreign_keys", true)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

fn bind(stmt: &mut rusqlite::Statement<'_>, params: Option<&JsonValue>) -> DbResult<()> {
    let Some(params) = params else {
        return Ok(());
    };
    if params.is_null() {
        return Ok(());
    }
    let values = params_to_values(params)?;
    for (index, value) in values.iter().enumerate() {
        stmt.raw_bind_parameter(index + 1, value)
            .map_err(|e| DbError::ExecFailed(e.to_string()))?;
    }
    Ok(())
}

fn exec_on(conn: &Connection, sql: &str, params: Option<&JsonValue>) -> DbResult<ExecOutcome> {
    check_statement(sql)?;
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| DbError::PrepareFailed(e.to_string()))?;
    bind(&mut stmt, params)?;

    // Step to completion: DONE, or a single ROW for statements that return
    // one (e.g. RETURNING clauses).
    let mut rows = stmt.raw_query();
    let _ = rows.next().map_err(|e| DbError::ExecFailed(e.to_string()))?;
    drop(rows);
    drop(stmt);

    Ok(ExecOutcome {
        changes: conn.changes(),
        last_insert_rowid: conn.last_insert_rowid(),
    })
}

fn query_on(conn: &Connection, sql: &str, params: Option<&JsonValue>) -> DbResult<QueryOutcome> {
    check_statement(sql)?;
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| DbError::PrepareFailed(e.to_string()))?;
    let columns: Vec<String> = stmt.column_names().iter().map(ToString::to_string).collect();
    let column_count = columns.len();
    bind(&mut stmt, params)?;

    let mut out = Vec::new();
    let mut rows = stmt.raw_query();
    while let Some(row) = rows.next().map_err(|e| DbError::ExecFailed(e.to_string()))? {
        let mut cells = Vec::with_capacity(column_count);
        for index in 0..column_count {
            let cell = row
                .get_ref(index)
                .map_err(|e| DbError::ExecFailed(e.to_string()))?;
            cells.push(cell_to_json(cell)?);
        }
        out.push(cells);
    }

    Ok(QueryOutcome { columns, rows: out })
}
