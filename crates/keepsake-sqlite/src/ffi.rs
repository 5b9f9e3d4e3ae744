//! The slice of libsqlite3 this backend uses.
//!
//! Bindings come from `libsqlite3-sys`, which also compiles and links the
//! bundled amalgamation. Only the handful of helpers below add anything.

pub use libsqlite3_sys::{
    SQLITE_AUTH, SQLITE_BLOB, SQLITE_BUSY, SQLITE_CONSTRAINT, SQLITE_DONE, SQLITE_FLOAT,
    SQLITE_INTEGER, SQLITE_LOCKED, SQLITE_MISMATCH, SQLITE_NOTFOUND, SQLITE_NULL, SQLITE_OK,
    SQLITE_OPEN_CREATE, SQLITE_OPEN_FULLMUTEX, SQLITE_OPEN_NOMUTEX, SQLITE_OPEN_READONLY,
    SQLITE_OPEN_READWRITE, SQLITE_OPEN_URI, SQLITE_PERM, SQLITE_READONLY, SQLITE_ROW, SQLITE_TEXT,
    SQLITE_TRANSIENT, sqlite3, sqlite3_bind_blob, sqlite3_bind_double, sqlite3_bind_int64,
    sqlite3_bind_null, sqlite3_bind_text, sqlite3_busy_timeout, sqlite3_changes,
    sqlite3_column_blob, sqlite3_column_bytes, sqlite3_column_count,
    sqlite3_column_double, sqlite3_column_int64, sqlite3_column_name, sqlite3_column_text,
    sqlite3_column_type, sqlite3_errcode, sqlite3_errmsg, sqlite3_errstr, sqlite3_exec,
    sqlite3_finalize, sqlite3_free, sqlite3_libversion, sqlite3_libversion_number,
    sqlite3_open_v2, sqlite3_prepare_v2, sqlite3_step, sqlite3_stmt,
};

use std::ffi::{CStr, c_int};

// libsqlite3-sys omits this from its pregenerated bindings; the symbol is
// still present in the bundled amalgamation.
unsafe extern "C" {
    pub fn sqlite3_close_v2(db: *mut sqlite3) -> c_int;
}

/// SQLite library version, e.g. "3.46.0".
pub fn version() -> &'static str {
    // SAFETY: sqlite3_libversion returns a static string
    unsafe { CStr::from_ptr(sqlite3_libversion()) }
        .to_str()
        .unwrap_or("unknown")
}

pub fn version_number() -> i32 {
    // SAFETY: always safe to call
    unsafe { sqlite3_libversion_number() }
}

/// English description of a result code.
pub fn error_string(code: c_int) -> &'static str {
    // SAFETY: sqlite3_errstr returns a static string for any code
    unsafe { CStr::from_ptr(sqlite3_errstr(code)) }
        .to_str()
        .unwrap_or("unknown error")
}

/// Last error message recorded on `db`.
///
/// # Safety
/// `db` must be a valid open connection handle.
pub unsafe fn last_error(db: *mut sqlite3) -> (c_int, String) {
    // SAFETY: caller guarantees db is valid; errmsg is owned by sqlite
    unsafe {
        let code = sqlite3_errcode(db);
        let msg = CStr::from_ptr(sqlite3_errmsg(db))
            .to_string_lossy()
            .into_owned();
        (code, msg)
    }
}
