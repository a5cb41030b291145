use std::path::Path;

use rusqlite::Connection;

use crate::error::Result;

/// Columns tried, in order, as the upsert key of a new table.
pub const KEY_CANDIDATES: &[&str] = &["hash", "ID"];

pub fn get_connection(db_path: &Path) -> Result<Connection> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let conn = Connection::open(db_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let mut stmt =
        conn.prepare("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1")?;
    Ok(stmt.exists([table])?)
}

pub fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
    let cols = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(cols)
}

/// Create `table` on first sight, keyed on the first of [`KEY_CANDIDATES`]
/// present, and add any columns a later export introduces. Identifier columns
/// are INTEGER, everything else TEXT.
pub fn ensure_table(conn: &Connection, table: &str, columns: &[String]) -> Result<()> {
    let column_type = |c: &str| if c.eq_ignore_ascii_case("id") { "INTEGER" } else { "TEXT" };

    if !table_exists(conn, table)? {
        let mut defs: Vec<String> = columns
            .iter()
            .map(|c| format!("{} {}", quote_ident(c), column_type(c)))
            .collect();
        if let Some(key) = KEY_CANDIDATES
            .iter()
            .find(|k| columns.iter().any(|c| c == *k))
        {
            defs.push(format!("PRIMARY KEY ({})", quote_ident(key)));
        }
        conn.execute_batch(&format!(
            "CREATE TABLE {} ({});",
            quote_ident(table),
            defs.join(", ")
        ))?;
        return Ok(());
    }

    let existing = table_columns(conn, table)?;
    for c in columns {
        if !existing.iter().any(|e| e == c) {
            conn.execute_batch(&format!(
                "ALTER TABLE {} ADD COLUMN {} {};",
                quote_ident(table),
                quote_ident(c),
                column_type(c)
            ))?;
        }
    }
    Ok(())
}

pub fn row_count(conn: &Connection, table: &str) -> Result<i64> {
    if !table_exists(conn, table)? {
        return Ok(0);
    }
    let n = conn.query_row(
        &format!("SELECT count(*) FROM {}", quote_ident(table)),
        [],
        |r| r.get(0),
    )?;
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> (tempfile::TempDir, Connection) {
        let dir = tempfile::tempdir().unwrap();
        let conn = get_connection(&dir.path().join("store").join("test.db")).unwrap();
        (dir, conn)
    }

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_ensure_table_creates_with_key() {
        let (_dir, conn) = test_db();
        ensure_table(&conn, "payments", &cols(&["ID", "AMOUNT"])).unwrap();
        assert!(table_exists(&conn, "payments").unwrap());
        assert_eq!(table_columns(&conn, "payments").unwrap(), cols(&["ID", "AMOUNT"]));
        let pk: i64 = conn
            .query_row(
                "SELECT pk FROM pragma_table_info('payments') WHERE name = 'ID'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(pk, 1);
    }

    #[test]
    fn test_ensure_table_prefers_hash_key() {
        let (_dir, conn) = test_db();
        ensure_table(&conn, "payments_premium", &cols(&["ID", "MEMBER_ID", "hash"])).unwrap();
        let pk: String = conn
            .query_row(
                "SELECT name FROM pragma_table_info('payments_premium') WHERE pk = 1",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(pk, "hash");
    }

    #[test]
    fn test_ensure_table_adds_new_columns() {
        let (_dir, conn) = test_db();
        ensure_table(&conn, "payments", &cols(&["ID"])).unwrap();
        ensure_table(&conn, "payments", &cols(&["ID", "NEW COL"])).unwrap();
        assert_eq!(table_columns(&conn, "payments").unwrap(), cols(&["ID", "NEW COL"]));
    }

    #[test]
    fn test_row_count_missing_table_is_zero() {
        let (_dir, conn) = test_db();
        assert_eq!(row_count(&conn, "nope").unwrap(), 0);
    }

    #[test]
    fn test_quote_ident_escapes() {
        assert_eq!(quote_ident(r#"a"b"#), r#""a""b""#);
    }
}
