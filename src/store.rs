use std::collections::HashSet;
use std::path::Path;

use rusqlite::{Connection, TransactionBehavior};
use tracing::{debug, info, trace};

use crate::db;
use crate::error::{Result, SyncError};
use crate::models::{PaymentRecord, Value};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamType {
    Int64,
    Utf8,
}

impl ParamType {
    /// Identifier columns are 64-bit integers, everything else text.
    pub fn for_column(column: &str) -> Self {
        if column.eq_ignore_ascii_case("id") {
            Self::Int64
        } else {
            Self::Utf8
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Int64 => "Int64",
            Self::Utf8 => "Utf8",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Int64(i64),
    Utf8(String),
}

impl ParamValue {
    pub fn param_type(&self) -> ParamType {
        match self {
            Self::Int64(_) => ParamType::Int64,
            Self::Utf8(_) => ParamType::Utf8,
        }
    }
}

/// One bound cell: `$<column>_<row>`.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub value: ParamValue,
}

/// A parameterized multi-row upsert. `tuples[i]` holds the parameter names of
/// record `i` in `columns` order.
#[derive(Debug, Clone)]
pub struct UpsertStatement {
    pub table: String,
    pub columns: Vec<String>,
    pub params: Vec<Param>,
    pub tuples: Vec<Vec<String>>,
}

/// A non-empty batch whose records all share the first record's column set.
/// Returns the columns in first-record order.
pub fn validate_batch(batch: &[PaymentRecord]) -> Result<Vec<String>> {
    let first = batch
        .first()
        .ok_or_else(|| SyncError::Validation("batch is empty".to_string()))?;
    let columns: Vec<String> = first.columns().map(str::to_string).collect();
    let expected: HashSet<&str> = first.columns().collect();

    for (i, record) in batch.iter().enumerate().skip(1) {
        let keys: HashSet<&str> = record.columns().collect();
        if keys != expected {
            return Err(SyncError::Validation(format!(
                "record {i} has columns {:?}, expected {:?}",
                sorted(&keys),
                sorted(&expected)
            )));
        }
    }
    Ok(columns)
}

fn sorted<'a>(set: &HashSet<&'a str>) -> Vec<&'a str> {
    let mut v: Vec<&str> = set.iter().copied().collect();
    v.sort_unstable();
    v
}

/// Parameter-safe stem per column. Stems are unique across the batch, so
/// `$<stem>_<row>` is unique per cell.
fn param_stems(columns: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    columns
        .iter()
        .enumerate()
        .map(|(i, column)| {
            let mut stem: String = column
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
                .collect();
            if !stem.starts_with(|c: char| c.is_ascii_alphabetic()) {
                stem.insert(0, 'p');
            }
            if !seen.insert(stem.clone()) {
                stem = format!("{stem}_c{i}");
                seen.insert(stem.clone());
            }
            stem
        })
        .collect()
}

fn to_param_value(column: &str, value: &Value, row: usize) -> Result<ParamValue> {
    match ParamType::for_column(column) {
        ParamType::Utf8 => Ok(ParamValue::Utf8(value.to_string())),
        ParamType::Int64 => {
            let parsed = match value {
                Value::Int(i) => Some(*i),
                Value::Decimal(d) if d.fract() == 0.0 => Some(*d as i64),
                Value::Decimal(_) => None,
                Value::Date(s) | Value::Text(s) => s.trim().parse().ok(),
            };
            parsed.map(ParamValue::Int64).ok_or_else(|| {
                SyncError::Validation(format!(
                    "record {row}: column {column} value {value} is not an integer"
                ))
            })
        }
    }
}

impl UpsertStatement {
    pub fn build(table: &str, batch: &[PaymentRecord]) -> Result<Self> {
        let columns = validate_batch(batch)?;
        let stems = param_stems(&columns);

        let mut params = Vec::with_capacity(batch.len() * columns.len());
        let mut tuples = Vec::with_capacity(batch.len());
        for (row, record) in batch.iter().enumerate() {
            let mut tuple = Vec::with_capacity(columns.len());
            for (column, stem) in columns.iter().zip(&stems) {
                let name = format!("${stem}_{row}");
                // validated above, every record has every column
                let value = record.get(column).ok_or_else(|| {
                    SyncError::Validation(format!("record {row} lacks column {column}"))
                })?;
                params.push(Param {
                    name: name.clone(),
                    value: to_param_value(column, value, row)?,
                });
                tuple.push(name);
            }
            tuples.push(tuple);
        }

        Ok(Self {
            table: table.to_string(),
            columns,
            params,
            tuples,
        })
    }

    fn values_clause(&self) -> String {
        self.tuples
            .iter()
            .map(|t| format!("({})", t.join(", ")))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// The statement as sent to the table store: a `DECLARE` per parameter,
    /// then one `UPSERT` with a value tuple per record.
    pub fn text(&self) -> String {
        let declares: Vec<String> = self
            .params
            .iter()
            .map(|p| format!("DECLARE {} AS {};", p.name, p.value.param_type().name()))
            .collect();
        let columns: Vec<String> = self.columns.iter().map(|c| format!("`{c}`")).collect();
        format!(
            "{}\nUPSERT INTO `{}` ({})\nVALUES {};",
            declares.join(" "),
            self.table,
            columns.join(", "),
            self.values_clause()
        )
    }

    /// SQLite rendition with the same named parameters.
    pub fn sqlite_text(&self) -> String {
        let columns: Vec<String> = self.columns.iter().map(|c| db::quote_ident(c)).collect();
        format!(
            "INSERT OR REPLACE INTO {} ({}) VALUES {}",
            db::quote_ident(&self.table),
            columns.join(", "),
            self.values_clause()
        )
    }
}

/// Destination for upsert batches. Each call is one atomic transaction.
pub trait TableStore {
    fn execute(&mut self, statement: &UpsertStatement) -> Result<()>;
}

/// Validate, build and execute one batch. Validation failures never reach the
/// store. Callers chunk large record sets themselves.
pub fn upsert<S: TableStore + ?Sized>(store: &mut S, table: &str, batch: &[PaymentRecord]) -> Result<()> {
    let statement = UpsertStatement::build(table, batch)?;
    debug!(table, rows = statement.tuples.len(), params = statement.params.len(), "upserting batch");
    trace!(statement = %statement.text());
    store.execute(&statement)
}

/// SQLite-backed store. Tables are created from the first batch's columns.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = db::get_connection(path)?;
        info!(path = %path.display(), "table store opened");
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Release the handle, surfacing any close error.
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| SyncError::Db(e))
    }
}

impl TableStore for SqliteStore {
    fn execute(&mut self, statement: &UpsertStatement) -> Result<()> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        db::ensure_table(&tx, &statement.table, &statement.columns)?;
        {
            let mut prepared = tx.prepare(&statement.sqlite_text())?;
            for param in &statement.params {
                let idx = prepared.parameter_index(&param.name)?.ok_or_else(|| {
                    SyncError::Validation(format!("parameter {} missing from statement", param.name))
                })?;
                match &param.value {
                    ParamValue::Int64(i) => prepared.raw_bind_parameter(idx, i)?,
                    ParamValue::Utf8(s) => prepared.raw_bind_parameter(idx, s)?,
                }
            }
            prepared.raw_execute()?;
        }
        tx.commit()?;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingStore;
    use super::*;

    fn record(pairs: &[(&str, Value)]) -> PaymentRecord {
        pairs.iter().map(|(k, v)| (*k, v.clone())).collect()
    }

    fn payment(id: &str, amount: f64, date: &str) -> PaymentRecord {
        record(&[
            ("ID", Value::from(id)),
            ("AMOUNT", Value::Decimal(amount)),
            ("DATE_OF_USE", Value::Date(date.into())),
        ])
    }

    fn test_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("store.db")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_empty_batch_is_rejected() {
        let mut store = RecordingStore::default();
        let err = upsert(&mut store, "payments", &[]).unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
        assert!(store.executed.is_empty());
    }

    #[test]
    fn test_mismatched_columns_rejected_before_store() {
        let mut store = RecordingStore::default();
        let batch = vec![
            record(&[("ID", Value::from("1")), ("A", Value::from("x"))]),
            record(&[("ID", Value::from("2")), ("B", Value::from("y"))]),
        ];
        let err = upsert(&mut store, "payments", &batch).unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
        assert!(store.executed.is_empty());
    }

    #[test]
    fn test_column_order_does_not_matter() {
        let batch = vec![
            record(&[("ID", Value::from("1")), ("A", Value::from("x"))]),
            record(&[("A", Value::from("y")), ("ID", Value::from("2"))]),
        ];
        let stmt = UpsertStatement::build("payments", &batch).unwrap();
        assert_eq!(stmt.tuples[1], vec!["$ID_1", "$A_1"]);
        assert_eq!(stmt.params[3].value, ParamValue::Utf8("y".into()));
    }

    #[test]
    fn test_statement_shape() {
        let batch: Vec<PaymentRecord> = (0..3)
            .map(|i| payment(&i.to_string(), 10.5, "2024-06-01"))
            .collect();
        let stmt = UpsertStatement::build("payments", &batch).unwrap();
        assert_eq!(stmt.params.len(), 3 * 3);
        assert_eq!(stmt.tuples.len(), 3);
        for (row, tuple) in stmt.tuples.iter().enumerate() {
            assert_eq!(
                tuple,
                &vec![
                    format!("$ID_{row}"),
                    format!("$AMOUNT_{row}"),
                    format!("$DATE_OF_USE_{row}")
                ]
            );
        }
        let names: HashSet<&str> = stmt.params.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names.len(), 9);
    }

    #[test]
    fn test_statement_types_and_text() {
        let stmt = UpsertStatement::build("payments", &[payment("7", 1234.56, "2024-06-01")]).unwrap();
        assert_eq!(stmt.params[0].value, ParamValue::Int64(7));
        assert_eq!(stmt.params[1].value, ParamValue::Utf8("1234.56".into()));
        let text = stmt.text();
        assert!(text.starts_with(
            "DECLARE $ID_0 AS Int64; DECLARE $AMOUNT_0 AS Utf8; DECLARE $DATE_OF_USE_0 AS Utf8;"
        ));
        assert!(text.contains("UPSERT INTO `payments` (`ID`, `AMOUNT`, `DATE_OF_USE`)"));
        assert!(text.ends_with("VALUES ($ID_0, $AMOUNT_0, $DATE_OF_USE_0);"));
    }

    #[test]
    fn test_lowercase_id_is_integer() {
        let stmt = UpsertStatement::build("t", &[record(&[("id", Value::from(" 3 "))])]).unwrap();
        assert_eq!(stmt.params[0].value, ParamValue::Int64(3));
    }

    #[test]
    fn test_integer_cells_bind_as_int64_and_text() {
        let stmt = UpsertStatement::build("t", &[record(&[("ID", Value::from(9)), ("N", Value::from(4))])])
            .unwrap();
        assert_eq!(stmt.params[0].value, ParamValue::Int64(9));
        assert_eq!(stmt.params[1].value, ParamValue::Utf8("4".into()));
    }

    #[test]
    fn test_non_integer_id_is_validation_error() {
        let mut store = RecordingStore::default();
        let err = upsert(&mut store, "payments", &[payment("abc", 1.0, "2024-01-01")]).unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
        assert!(store.executed.is_empty());
    }

    #[test]
    fn test_param_names_are_sanitized_and_unique() {
        let batch = vec![record(&[
            ("Сумма", Value::from("1")),
            ("A B", Value::from("2")),
            ("A-B", Value::from("3")),
            ("1st", Value::from("4")),
        ])];
        let stmt = UpsertStatement::build("t", &batch).unwrap();
        let names: Vec<&str> = stmt.params.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["$p______0", "$A_B_0", "$A_B_c2_0", "$p1st_0"]);
    }

    #[test]
    fn test_sqlite_store_upserts_idempotently() {
        let (_dir, mut store) = test_store();
        let batch = vec![payment("1", 10.0, "2024-06-01"), payment("2", 20.0, "2024-06-02")];
        upsert(&mut store, "payments", &batch).unwrap();
        upsert(&mut store, "payments", &[payment("1", 15.0, "2024-06-01")]).unwrap();

        let conn = store.connection();
        assert_eq!(db::row_count(conn, "payments").unwrap(), 2);
        let amount: String = conn
            .query_row("SELECT AMOUNT FROM payments WHERE ID = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(amount, "15.0");
        store.close().unwrap();
    }

    #[test]
    fn test_sqlite_store_premium_keyed_on_hash() {
        let (_dir, mut store) = test_store();
        let row = |hash: &str, amount: &str| {
            record(&[
                ("MEMBER_ID", Value::from("42")),
                ("ALL_AMOUNT", Value::from(amount)),
                ("hash", Value::from(hash)),
                ("DATE_PARSE", Value::Date("2024-07-01".into())),
            ])
        };
        upsert(&mut store, "payments_premium", &[row("h1", "1"), row("h2", "2")]).unwrap();
        upsert(&mut store, "payments_premium", &[row("h1", "3")]).unwrap();
        assert_eq!(db::row_count(store.connection(), "payments_premium").unwrap(), 2);
    }
}
