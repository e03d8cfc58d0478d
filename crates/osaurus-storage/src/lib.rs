//! Osaurus Storage - the per-plugin SQLite sandbox.
//!
//! Each plugin owns one SQLite file, opened with WAL journaling, foreign
//! keys, and a 5 second busy timeout. Every operation goes through the
//! database's own serial work queue, so concurrent callers interleave
//! safely without the plugin needing any synchronisation of its own.
//!
//! Statements are screened before preparation: `ATTACH`, `DETACH`, and
//! anything mentioning `load_extension` are rejected, which keeps a plugin
//! inside its own file.
//!
//! Results cross the ABI as JSON: `exec` yields
//! `{"changes": n, "last_insert_rowid": m}`, `query` yields
//! `{"columns": [...], "rows": [[...], ...]}`, and every failure becomes
//! `{"error": "..."}` rather than a host crash.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod db;
mod error;
mod guard;
mod wire;

pub use db::{ExecOutcome, PluginDatabase, QueryOutcome};
pub use error::{DbError, DbResult};
pub use guard::check_statement;
