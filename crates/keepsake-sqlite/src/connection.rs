//! SQLite connection and its `Storage` implementation.

// FFI needs casts and raw pointers that match the C API exactly
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::borrow_as_ptr)]
#![allow(clippy::if_not_else)]

use crate::ffi;
use crate::types;
use keepsake_core::{
    ColumnInfo, ConnectionError, ConnectionErrorKind, Error, QueryError, QueryErrorKind, Result,
    Row, SelectQuery, Storage, Value, sql,
};
use std::ffi::{CStr, CString, c_int};
use std::ptr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Configuration for opening a SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Path to the database file, or ":memory:".
    pub path: String,
    pub flags: OpenFlags,
    /// Busy timeout in milliseconds. Zero disables it.
    pub busy_timeout_ms: u32,
}

/// Flags controlling how the database is opened.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenFlags {
    pub read_only: bool,
    pub read_write: bool,
    /// Create the database if it doesn't exist.
    pub create: bool,
    /// Interpret the path as a URI.
    pub uri: bool,
    pub no_mutex: bool,
    pub full_mutex: bool,
}

impl OpenFlags {
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Default::default()
        }
    }

    /// Read-write; the database must already exist.
    pub fn read_write() -> Self {
        Self {
            read_write: true,
            ..Default::default()
        }
    }

    pub fn create_read_write() -> Self {
        Self {
            read_write: true,
            create: true,
            ..Default::default()
        }
    }

    fn to_sqlite_flags(self) -> c_int {
        let mut flags = 0;
        if self.read_only {
            flags |= ffi::SQLITE_OPEN_READONLY;
        }
        if self.read_write {
            flags |= ffi::SQLITE_OPEN_READWRITE;
        }
        if self.create {
            flags |= ffi::SQLITE_OPEN_CREATE;
        }
        if self.uri {
            flags |= ffi::SQLITE_OPEN_URI;
        }
        if self.no_mutex {
            flags |= ffi::SQLITE_OPEN_NOMUTEX;
        }
        if self.full_mutex {
            flags |= ffi::SQLITE_OPEN_FULLMUTEX;
        }
        // Default to read-write if no mode specified
        if flags & (ffi::SQLITE_OPEN_READONLY | ffi::SQLITE_OPEN_READWRITE) == 0 {
            flags |= ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE;
        }
        flags
    }
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: ":memory:".to_string(),
            flags: OpenFlags::create_read_write(),
            busy_timeout_ms: 5000,
        }
    }
}

impl SqliteConfig {
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn memory() -> Self {
        Self::default()
    }

    pub fn flags(mut self, flags: OpenFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn busy_timeout(mut self, ms: u32) -> Self {
        self.busy_timeout_ms = ms;
        self
    }
}

struct SqliteInner {
    db: *mut ffi::sqlite3,
}

// SAFETY: the handle is only touched while holding the mutex around it.
unsafe impl Send for SqliteInner {}

/// A SQLite database used as Keepsake storage.
///
/// All access to the handle is serialized through an internal mutex, so the
/// storage can be shared between sessions and threads.
pub struct SqliteStorage {
    inner: Mutex<SqliteInner>,
    path: String,
}

// SAFETY: every use of the raw handle goes through the Mutex
unsafe impl Send for SqliteStorage {}
unsafe impl Sync for SqliteStorage {}

impl SqliteStorage {
    /// Open a database with the given configuration.
    #[tracing::instrument(level = "debug", skip(config), fields(path = %config.path))]
    pub fn open(config: &SqliteConfig) -> Result<Self> {
        let c_path = CString::new(config.path.as_str()).map_err(|_| {
            connect_error("Invalid path: contains null byte".to_string())
        })?;

        let mut db: *mut ffi::sqlite3 = ptr::null_mut();
        // SAFETY: valid pointers; the return code is checked below
        let rc = unsafe {
            ffi::sqlite3_open_v2(
                c_path.as_ptr(),
                &mut db,
                config.flags.to_sqlite_flags(),
                ptr::null(),
            )
        };

        if rc != ffi::SQLITE_OK {
            let msg = if !db.is_null() {
                // SAFETY: sqlite hands back a handle even on failure; close it after reading
                unsafe {
                    let (_, msg) = ffi::last_error(db);
                    ffi::sqlite3_close_v2(db);
                    msg
                }
            } else {
                ffi::error_string(rc).to_string()
            };
            return Err(connect_error(format!("Failed to open database: {}", msg)));
        }

        if config.busy_timeout_ms > 0 {
            let ms = c_int::try_from(config.busy_timeout_ms).unwrap_or(c_int::MAX);
            // SAFETY: db is valid
            unsafe {
                ffi::sqlite3_busy_timeout(db, ms);
            }
        }

        tracing::debug!(version = ffi::version(), "Opened SQLite database");
        Ok(Self {
            inner: Mutex::new(SqliteInner { db }),
            path: config.path.clone(),
        })
    }

    pub fn open_memory() -> Result<Self> {
        Self::open(&SqliteConfig::memory())
    }

    pub fn open_file(path: impl Into<String>) -> Result<Self> {
        Self::open(&SqliteConfig::file(path))
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, SqliteInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Execute one or more statements without parameters (DDL, pragmas).
    pub fn execute_raw(&self, sql: &str) -> Result<()> {
        let inner = self.lock();
        let c_sql = CString::new(sql).map_err(|_| nul_in_sql(sql))?;
        let mut errmsg: *mut std::ffi::c_char = ptr::null_mut();

        // SAFETY: all pointers are valid
        let rc = unsafe {
            ffi::sqlite3_exec(inner.db, c_sql.as_ptr(), None, ptr::null_mut(), &mut errmsg)
        };

        if rc != ffi::SQLITE_OK {
            let msg = if !errmsg.is_null() {
                // SAFETY: errmsg was allocated by sqlite and must be freed by it
                unsafe {
                    let msg = CStr::from_ptr(errmsg).to_string_lossy().into_owned();
                    ffi::sqlite3_free(errmsg.cast());
                    msg
                }
            } else {
                ffi::error_string(rc).to_string()
            };
            return Err(query_error(rc, sql, msg));
        }
        tracing::trace!(sql, "Executed raw SQL");
        Ok(())
    }

    /// Rows changed by the most recent statement.
    pub fn changes(&self) -> u64 {
        let inner = self.lock();
        // SAFETY: db is valid
        let n = unsafe { ffi::sqlite3_changes(inner.db) };
        u64::try_from(n).unwrap_or(0)
    }

    /// Prepare, bind and run a query, returning every row.
    pub fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let inner = self.lock();
        let stmt = Statement::prepare(inner.db, sql)?;
        stmt.bind_all(params)?;

        // SAFETY: stmt is valid
        let col_count = unsafe { ffi::sqlite3_column_count(stmt.raw) };
        let names = (0..col_count)
            // SAFETY: i is within the column count
            .map(|i| unsafe { types::column_name(stmt.raw, i) }.unwrap_or_else(|| format!("col{}", i)))
            .collect();
        let columns = Arc::new(ColumnInfo::new(names));

        let mut rows = Vec::new();
        loop {
            // SAFETY: stmt is valid
            match unsafe { ffi::sqlite3_step(stmt.raw) } {
                ffi::SQLITE_ROW => {
                    let values = (0..col_count)
                        // SAFETY: the statement is positioned on a row
                        .map(|i| unsafe { types::read_column(stmt.raw, i) })
                        .collect();
                    rows.push(Row::with_columns(Arc::clone(&columns), values));
                }
                ffi::SQLITE_DONE => break,
                _ => return Err(stmt.step_error()),
            }
        }
        tracing::trace!(sql, rows = rows.len(), "Query complete");
        Ok(rows)
    }

    /// Prepare, bind and run a statement, returning rows affected.
    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let inner = self.lock();
        let stmt = Statement::prepare(inner.db, sql)?;
        stmt.bind_all(params)?;

        // SAFETY: stmt is valid
        match unsafe { ffi::sqlite3_step(stmt.raw) } {
            ffi::SQLITE_DONE | ffi::SQLITE_ROW => {
                // SAFETY: db is valid
                let changes = unsafe { ffi::sqlite3_changes(inner.db) };
                tracing::trace!(sql, changes, "Statement complete");
                Ok(u64::try_from(changes).unwrap_or(0))
            }
            _ => Err(stmt.step_error()),
        }
    }
}

impl Drop for SqliteStorage {
    fn drop(&mut self) {
        let inner = self.lock();
        if !inner.db.is_null() {
            // SAFETY: db is valid and no statements outlive their call
            unsafe {
                ffi::sqlite3_close_v2(inner.db);
            }
        }
    }
}

impl std::fmt::Debug for SqliteStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStorage").field("path", &self.path).finish()
    }
}

impl Storage for SqliteStorage {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    fn select(&self, query: &SelectQuery) -> Result<Vec<Row>> {
        let (sql, params) = sql::select(query);
        self.query(&sql, &params)
    }

    fn insert(&self, table: &str, fields: &[String], values: &[Value]) -> Result<()> {
        let (sql, params) = sql::insert(table, fields, values);
        self.execute(&sql, &params).map(|_| ())
    }

    fn update(
        &self,
        table: &str,
        id_field: &str,
        id: &Value,
        fields: &[String],
        values: &[Value],
    ) -> Result<u64> {
        let (sql, params) = sql::update(table, id_field, id, fields, values);
        self.execute(&sql, &params)
    }

    fn delete(&self, table: &str, id_field: &str, id: &Value) -> Result<u64> {
        let (sql, params) = sql::delete(table, id_field, id);
        self.execute(&sql, &params)
    }

    fn prepare_and_execute(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.query(sql, params)
    }
}

/// A prepared statement, finalized on drop.
struct Statement<'a> {
    db: *mut ffi::sqlite3,
    raw: *mut ffi::sqlite3_stmt,
    sql: &'a str,
}

impl<'a> Statement<'a> {
    fn prepare(db: *mut ffi::sqlite3, sql: &'a str) -> Result<Self> {
        let c_sql = CString::new(sql).map_err(|_| nul_in_sql(sql))?;
        let len = c_int::try_from(c_sql.as_bytes().len())
            .map_err(|_| query_error(ffi::SQLITE_MISMATCH, sql, "statement too long".to_string()))?;
        let mut raw: *mut ffi::sqlite3_stmt = ptr::null_mut();

        // SAFETY: all pointers are valid
        let rc = unsafe { ffi::sqlite3_prepare_v2(db, c_sql.as_ptr(), len, &mut raw, ptr::null_mut()) };
        if rc != ffi::SQLITE_OK {
            // SAFETY: db is valid
            let (code, msg) = unsafe { ffi::last_error(db) };
            return Err(query_error(code, sql, msg));
        }
        Ok(Self { db, raw, sql })
    }

    fn bind_all(&self, params: &[Value]) -> Result<()> {
        for (i, param) in params.iter().enumerate() {
            let index = c_int::try_from(i + 1).unwrap_or(c_int::MAX);
            // SAFETY: raw is a valid statement; index is 1-based
            let rc = unsafe { types::bind_value(self.raw, index, param) }?;
            if rc != ffi::SQLITE_OK {
                let msg = if rc == ffi::SQLITE_MISMATCH {
                    format!("cannot bind {} value", param.type_name())
                } else {
                    // SAFETY: db is valid
                    unsafe { ffi::last_error(self.db) }.1
                };
                return Err(query_error(
                    rc,
                    self.sql,
                    format!("Failed to bind parameter {}: {}", i + 1, msg),
                ));
            }
        }
        Ok(())
    }

    fn step_error(&self) -> Error {
        // SAFETY: db is valid
        let (code, msg) = unsafe { ffi::last_error(self.db) };
        query_error(code, self.sql, msg)
    }
}

impl Drop for Statement<'_> {
    fn drop(&mut self) {
        // SAFETY: raw came from a successful prepare and is finalized once
        unsafe {
            ffi::sqlite3_finalize(self.raw);
        }
    }
}

fn connect_error(message: String) -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Connect,
        message,
        source: None,
    })
}

fn nul_in_sql(sql: &str) -> Error {
    Error::Query(QueryError {
        kind: QueryErrorKind::Syntax,
        sql: Some(sql.to_string()),
        message: "SQL contains null byte".to_string(),
        source: None,
    })
}

fn query_error(code: c_int, sql: &str, message: String) -> Error {
    Error::Query(QueryError {
        kind: error_code_to_kind(code),
        sql: Some(sql.to_string()),
        message,
        source: None,
    })
}

fn error_code_to_kind(code: c_int) -> QueryErrorKind {
    // extended codes carry the primary code in the low byte
    match code & 0xff {
        ffi::SQLITE_CONSTRAINT => QueryErrorKind::Constraint,
        ffi::SQLITE_BUSY | ffi::SQLITE_LOCKED => QueryErrorKind::Busy,
        ffi::SQLITE_PERM | ffi::SQLITE_AUTH | ffi::SQLITE_READONLY => QueryErrorKind::Permission,
        ffi::SQLITE_NOTFOUND => QueryErrorKind::NotFound,
        ffi::SQLITE_MISMATCH => QueryErrorKind::Unsupported,
        _ => QueryErrorKind::Database,
    }
}
