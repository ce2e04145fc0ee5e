//! Statement logging helpers.
//!
//! Statements are logged through `tracing` at debug level. Literal values
//! are replaced with placeholders before a statement reaches a log line so
//! that credentials and personal data embedded in SQL text stay out of logs.
//!
//! ## Fields
//!
//! Events emitted for statements carry:
//! - `operation`: one of the [`span_names`] constants
//! - `db.operation`: the statement's leading keyword (`SELECT`, `INSERT`, ...)
//! - `db.statement`: the sanitized statement text
//! - `connection_id`: pool-assigned identifier of the connection
//! - `params`: number of bound arguments

use crate::value::SqlValue;

/// Names of the operations the pool logs.
pub mod span_names {
    /// Opening a pool.
    pub const CONNECT: &str = "sqlpool.connect";
    /// Borrowing a connection.
    pub const ACQUIRE: &str = "sqlpool.acquire";
    /// Running a statement that returns no rows.
    pub const EXECUTE: &str = "sqlpool.execute";
    /// Opening a cursor.
    pub const QUERY: &str = "sqlpool.query";
    /// Running a single-row query.
    pub const QUERY_ROW: &str = "sqlpool.query_row";
    /// Beginning a transaction.
    pub const BEGIN_TRANSACTION: &str = "sqlpool.begin_transaction";
    /// Closing a pool.
    pub const CLOSE: &str = "sqlpool.close";
}

/// Longest statement text recorded in a log event.
pub const MAX_STATEMENT_LENGTH: usize = 2048;

/// Replace string and numeric literals in `sql` with `placeholder`.
///
/// Positional parameters (`$1`, `@p1`, `?`) and double-quoted identifiers
/// are kept as they are. An unterminated literal still becomes a
/// placeholder.
#[must_use]
pub fn sanitize_sql(sql: &str, placeholder: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut rest = sql;

    while let Some(c) = rest.chars().next() {
        match c {
            '\'' => {
                out.push_str(placeholder);
                rest = skip_literal(&rest[1..]);
            }
            '"' => {
                let len = quoted_identifier_len(rest);
                out.push_str(&rest[..len]);
                rest = &rest[len..];
            }
            c if c.is_ascii_digit() && !continues_word(&out) => {
                out.push_str(placeholder);
                rest = rest.trim_start_matches(|ch: char| ch.is_ascii_digit() || ch == '.');
            }
            c => {
                out.push(c);
                rest = &rest[c.len_utf8()..];
            }
        }
    }

    out
}

/// The text after the literal that `s` starts inside. `''` is an escaped
/// quote.
fn skip_literal(s: &str) -> &str {
    let mut rest = s;
    loop {
        match rest.find('\'') {
            None => return "",
            Some(i) if rest[i + 1..].starts_with('\'') => rest = &rest[i + 2..],
            Some(i) => return &rest[i + 1..],
        }
    }
}

/// Byte length of the quoted identifier at the start of `s`, quotes included.
fn quoted_identifier_len(s: &str) -> usize {
    s[1..].find('"').map_or(s.len(), |i| i + 2)
}

/// Digits right after an identifier character or `$` belong to a name or a
/// parameter, not a literal.
fn continues_word(out: &str) -> bool {
    out.ends_with(|ch: char| ch.is_alphanumeric() || ch == '_' || ch == '$')
}

const CUT_MARKER: &str = "...";

/// Truncate `s` to at most `max_len` bytes, marking the cut with `...`.
///
/// Below three bytes only part of the marker fits.
#[must_use]
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_owned();
    }
    if max_len < CUT_MARKER.len() {
        return CUT_MARKER[..max_len].to_owned();
    }
    let mut end = max_len - CUT_MARKER.len();
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{CUT_MARKER}", &s[..end])
}

/// Extract the operation keyword from a SQL statement.
#[must_use]
pub fn extract_operation(sql: &str) -> &'static str {
    let keyword = sql
        .trim_start()
        .split(|c: char| c.is_whitespace() || c == '(' || c == ';')
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();

    match keyword.as_str() {
        "SELECT" => "SELECT",
        "INSERT" => "INSERT",
        "UPDATE" => "UPDATE",
        "DELETE" => "DELETE",
        "WITH" => "WITH",
        "CALL" | "EXEC" | "EXECUTE" => "EXECUTE",
        "BEGIN" | "START" => "BEGIN",
        "COMMIT" => "COMMIT",
        "ROLLBACK" => "ROLLBACK",
        "CREATE" => "CREATE",
        "ALTER" => "ALTER",
        "DROP" => "DROP",
        "TRUNCATE" => "TRUNCATE",
        _ => "OTHER",
    }
}

/// Emit the debug event for a statement about to run.
pub(crate) fn log_statement(
    operation: &'static str,
    connection_id: u64,
    sql: &str,
    args: &[SqlValue],
) {
    if !tracing::enabled!(tracing::Level::DEBUG) {
        return;
    }
    let statement = truncate_string(&sanitize_sql(sql, "?"), MAX_STATEMENT_LENGTH);
    tracing::debug!(
        operation,
        db.operation = extract_operation(sql),
        db.statement = %statement,
        connection_id,
        params = args.len(),
        "running statement"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_operation() {
        assert_eq!(extract_operation("SELECT * FROM users"), "SELECT");
        assert_eq!(extract_operation("  select id from users"), "SELECT");
        assert_eq!(extract_operation("INSERT INTO users VALUES (1)"), "INSERT");
        assert_eq!(extract_operation("update users set name = 'foo'"), "UPDATE");
        assert_eq!(extract_operation("DELETE FROM users"), "DELETE");
        assert_eq!(extract_operation("WITH t AS (SELECT 1) SELECT * FROM t"), "WITH");
        assert_eq!(extract_operation("CALL refresh()"), "EXECUTE");
        assert_eq!(extract_operation("BEGIN"), "BEGIN");
        assert_eq!(extract_operation("START TRANSACTION"), "BEGIN");
        assert_eq!(extract_operation("COMMIT;"), "COMMIT");
        assert_eq!(extract_operation("CREATE TABLE foo (id int)"), "CREATE");
        assert_eq!(extract_operation("SELECTED"), "OTHER");
        assert_eq!(extract_operation(""), "OTHER");
    }

    #[test]
    fn test_sanitize_sql() {
        assert_eq!(
            sanitize_sql("SELECT * FROM users WHERE name = 'Alice'", "?"),
            "SELECT * FROM users WHERE name = ?"
        );
        assert_eq!(
            sanitize_sql("INSERT INTO t VALUES ('a', 'b')", "?"),
            "INSERT INTO t VALUES (?, ?)"
        );
        assert_eq!(
            sanitize_sql("SELECT * FROM t WHERE name = 'O''Brien'", "?"),
            "SELECT * FROM t WHERE name = ?"
        );
        assert_eq!(
            sanitize_sql("SELECT * FROM t WHERE id = 42 AND score > 1.5", "?"),
            "SELECT * FROM t WHERE id = ? AND score > ?"
        );
    }

    #[test]
    fn test_sanitize_keeps_parameters_and_identifiers() {
        assert_eq!(
            sanitize_sql("SELECT col1 FROM t2 WHERE id = $1 AND x = @p2", "?"),
            "SELECT col1 FROM t2 WHERE id = $1 AND x = @p2"
        );
        assert_eq!(
            sanitize_sql("SELECT \"Name\" FROM t", "?"),
            "SELECT \"Name\" FROM t"
        );
        assert_eq!(
            sanitize_sql("SELECT \"col 1\" FROM t WHERE x = 3", "?"),
            "SELECT \"col 1\" FROM t WHERE x = ?"
        );
    }

    #[test]
    fn test_sanitize_unterminated_literal() {
        assert_eq!(sanitize_sql("SELECT 'oops", "?"), "SELECT ?");
    }

    #[test]
    fn test_truncate_string() {
        assert_eq!(truncate_string("hello", 10), "hello");
        assert_eq!(truncate_string("hello world", 8), "hello...");
        assert_eq!(truncate_string("hi", 2), "hi");
        // Never splits a multi-byte character.
        assert_eq!(truncate_string("héllo wörld", 5), "h...");
    }

    #[test]
    fn test_truncate_string_never_exceeds_limit() {
        assert_eq!(truncate_string("hello", 3), "...");
        assert_eq!(truncate_string("hello", 2), "..");
        assert_eq!(truncate_string("hello", 0), "");
        for max in 0..12 {
            assert!(truncate_string("héllo wörld", max).len() <= max);
        }
    }
}
