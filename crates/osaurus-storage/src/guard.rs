//! Forbidden-statement screening.
//!
//! Runs before `prepare`, so a rejected statement never reaches SQLite at
//! all and the database is left untouched.

use crate::error::{DbError, DbResult};

/// Reject statements that could escape the sandbox.
///
/// A statement is forbidden when its whitespace-trimmed, upper-cased text
/// begins with `ATTACH` or `DETACH`, or contains `LOAD_EXTENSION` anywhere.
///
/// # Errors
///
/// Returns [`DbError::Forbidden`] naming the offending construct.
pub fn check_statement(sql: &str) -> DbResult<()> {
    let upper = sql.trim().to_uppercase();

    if upper.starts_with("ATTACH") {
        return Err(DbError::Forbidden("ATTACH is not allowed".into()));
    }
    if upper.starts_with("DETACH") {
        return Err(DbError::Forbidden("DETACH is not allowed".into()));
    }
    if upper.contains("LOAD_EXTENSION") {
        return Err(DbError::Forbidden("load_extension is not allowed".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_and_detach_prefixes_are_rejected() {
        assert!(check_statement("ATTACH DATABASE '/tmp/x' AS x").is_err());
        assert!(check_statement("  attach database '/tmp/x' as x").is_err());
        assert!(check_statement("\n\tDetach Database x").is_err());
    }

    #[test]
    fn test_load_extension_is_rejected_anywhere() {
        assert!(check_statement("SELECT load_extension('/tmp/evil')").is_err());
        assert!(check_statement("SELECT 1 WHERE LOAD_EXTENSION('x')").is_err());
    }

    #[test]
    fn test_ordinary_statements_pass() {
        for sql in [
            "SELECT 1",
            "CREATE TABLE kv(k TEXT, v TEXT)",
            "INSERT INTO kv VALUES (?1, ?2)",
            // Mentions inside identifiers/strings that are not the construct
            // itself still pass the prefix rules.
            "SELECT 'attachment' FROM kv",
        ] {
            assert!(check_statement(sql).is_ok(), "{sql} should be allowed");
        }
    }

    #[test]
    fn test_forbidden_error_mentions_forbidden() {
        let err = check_statement("ATTACH DATABASE 'x' AS y").unwrap_err();
        assert!(err.to_string().contains("Forbidden"));
    }
}
