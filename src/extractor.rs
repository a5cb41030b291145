use chrono::{Datelike, NaiveDate};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::error::{Result, SyncError};
use crate::models::{FilterSpec, PaymentRecord, Value};
use crate::session::{Session, PAYOUT_PATH};
use crate::transport::{Request, Transport};

pub const HASH_COLUMN: &str = "hash";
pub const PERIOD_COLUMN: &str = "DATE_PARSE";
pub const MEMBER_COLUMN: &str = "MEMBER_ID";
pub const ID_COLUMN: &str = "ID";

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// `"1 234,56"` → `1234.56`. Spaces (plain or non-breaking) are thousands separators.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let s: String = raw
        .chars()
        .filter(|c| *c != ' ' && *c != '\u{a0}')
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    s.parse().ok()
}

/// `"01.06.2024"` → `"2024-06-01"`.
pub fn parse_date_dmy(raw: &str) -> Option<String> {
    NaiveDate::parse_from_str(raw.trim(), "%d.%m.%Y")
        .ok()
        .map(|d| d.format("%Y-%m-%d").to_string())
}

/// Stable dedup key for a premium row: hex SHA-256 of `member_id + "01-MM-YYYY"`.
pub fn premium_hash(member_id: &str, reference: NaiveDate) -> String {
    let mut hasher = Sha256::new();
    hasher.update(member_id.as_bytes());
    hasher.update(format!("01-{:02}-{}", reference.month(), reference.year()).as_bytes());
    hex::encode(hasher.finalize())
}

/// First day of the reference month, `YYYY-MM-01`.
pub fn reporting_period(reference: NaiveDate) -> String {
    format!("{}-{:02}-01", reference.year(), reference.month())
}

// ---------------------------------------------------------------------------
// Report kinds
// ---------------------------------------------------------------------------

/// Which columns get coerced, and how a row survives, for one report kind.
#[derive(Debug)]
pub struct ExtractionRules {
    pub amount_columns: &'static [&'static str],
    pub date_columns: &'static [&'static str],
    /// Rows are kept only when this column is non-empty.
    pub required_column: Option<&'static str>,
    /// Append `hash` and `DATE_PARSE` derived from the run's reference date.
    pub derive_period_key: bool,
}

const AMOUNT_COLUMNS: &[&str] = &["AMOUNT", "ALL_AMOUNT"];
const DATE_COLUMNS: &[&str] = &["DATE_OF_USE", "SUBSCRIPTION_START", "SUBSCRIPTION_END"];

const STANDARD_RULES: ExtractionRules = ExtractionRules {
    amount_columns: AMOUNT_COLUMNS,
    date_columns: DATE_COLUMNS,
    required_column: Some(ID_COLUMN),
    derive_period_key: false,
};

const PREMIUM_RULES: ExtractionRules = ExtractionRules {
    amount_columns: AMOUNT_COLUMNS,
    date_columns: DATE_COLUMNS,
    required_column: None,
    derive_period_key: true,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReportKind {
    Standard,
    Premium,
}

impl ReportKind {
    pub fn key(&self) -> &'static str {
        match self {
            Self::Standard => "payouts",
            Self::Premium => "payouts_premium",
        }
    }

    /// Filter and grid share this identifier on the portal.
    pub fn filter_id(&self) -> &'static str {
        match self {
            Self::Standard => "mp24_subscription_partner",
            Self::Premium => "mp24_subscription_premium_for_partners",
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            Self::Standard => "payments",
            Self::Premium => "payments_premium",
        }
    }

    pub fn rules(&self) -> &'static ExtractionRules {
        match self {
            Self::Standard => &STANDARD_RULES,
            Self::Premium => &PREMIUM_RULES,
        }
    }

    pub fn filter_spec(&self, reference: NaiveDate) -> FilterSpec {
        FilterSpec {
            filter_id: self.filter_id().to_string(),
            grid_id: self.filter_id().to_string(),
            month: reference.month(),
            year: reference.year(),
        }
    }
}

// ---------------------------------------------------------------------------
// CSV export
// ---------------------------------------------------------------------------

fn coerce(column: &str, raw: &str, rules: &ExtractionRules) -> Value {
    if rules.amount_columns.contains(&column) {
        match parse_amount(raw) {
            Some(v) => return Value::Decimal(v),
            None => warn!("Error processing field {column} with value {raw:?}: not a number"),
        }
    } else if rules.date_columns.contains(&column) {
        match parse_date_dmy(raw) {
            Some(v) => return Value::Date(v),
            None => warn!("Error processing field {column} with value {raw:?}: not a DD.MM.YYYY date"),
        }
    }
    Value::Text(raw.to_string())
}

/// Parse a `;`-delimited export. Exports end every line with `;`, which leaves an
/// empty sentinel column at the end of the header; it is dropped. Rows with at
/// most one field are skipped.
pub fn parse_csv_payments(
    content: &str,
    kind: ReportKind,
    reference: NaiveDate,
) -> Result<Vec<PaymentRecord>> {
    read_payments(content.as_bytes(), kind, reference)
}

fn read_payments(
    reader: impl std::io::Read,
    kind: ReportKind,
    reference: NaiveDate,
) -> Result<Vec<PaymentRecord>> {
    let rules = kind.rules();
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);
    let mut records = rdr.records();

    let mut header: Vec<String> = match records.next() {
        Some(h) => h
            .map_err(|e| SyncError::Parse(format!("unreadable export header: {e}")))?
            .iter()
            .map(|f| f.trim_start_matches('\u{feff}').to_string())
            .collect(),
        None => return Err(SyncError::Parse("export is empty, no header row".to_string())),
    };
    if header.last().is_some_and(|h| h.trim().is_empty()) {
        header.pop();
    }

    if rules.derive_period_key && !header.iter().any(|h| h == MEMBER_COLUMN) {
        return Err(SyncError::Parse(format!(
            "{} export has no {MEMBER_COLUMN} column",
            kind.key()
        )));
    }

    let mut payments = Vec::new();
    for result in records {
        let row = result.map_err(|e| SyncError::Parse(format!("unreadable export row: {e}")))?;
        if row.len() <= 1 {
            continue;
        }
        let mut payment = PaymentRecord::new();
        for (i, column) in header.iter().enumerate() {
            let raw = row.get(i).unwrap_or("");
            payment.insert(column.as_str(), coerce(column, raw, rules));
        }

        if rules.derive_period_key {
            let member = payment
                .get(MEMBER_COLUMN)
                .map(|v| v.to_string())
                .unwrap_or_default();
            payment.insert(HASH_COLUMN, Value::Text(premium_hash(&member, reference)));
            payment.insert(PERIOD_COLUMN, Value::Date(reporting_period(reference)));
        }

        if let Some(required) = rules.required_column {
            if payment.get(required).map_or(true, Value::is_empty) {
                continue;
            }
        }
        payments.push(payment);
    }
    Ok(payments)
}

/// Download and parse the export for `kind`. The month filter for that report
/// must already be applied in this session.
pub fn fetch_csv<T: Transport>(
    session: &Session<T>,
    kind: ReportKind,
    reference: NaiveDate,
) -> Result<Vec<PaymentRecord>> {
    let request = Request::get(session.portal().url(PAYOUT_PATH))
        .query("export", "Y")
        .query("sessid", session.token())
        .query("type", kind.key());
    let response = session.send(request).map_err(|e| {
        tracing::error!("Failed to fetch {}: {e}", kind.key());
        e
    })?;
    let payments = parse_csv_payments(&response.body, kind, reference)?;
    info!(report = kind.key(), rows = payments.len(), "export parsed");
    Ok(payments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::{session_with, TOKEN};
    use crate::transport::HttpResponse;

    fn july() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 7, 15).unwrap()
    }

    fn sha_hex(input: &str) -> String {
        hex::encode(Sha256::digest(input.as_bytes()))
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("1 234,56"), Some(1234.56));
        assert_eq!(parse_amount("1\u{a0}000,5"), Some(1000.5));
        assert_eq!(parse_amount("12"), Some(12.0));
        assert_eq!(parse_amount("abc"), None);
        assert_eq!(parse_amount(""), None);
    }

    #[test]
    fn test_parse_date_dmy() {
        assert_eq!(parse_date_dmy("01.06.2024"), Some("2024-06-01".to_string()));
        assert_eq!(parse_date_dmy("31.12.2023"), Some("2023-12-31".to_string()));
        assert_eq!(parse_date_dmy("2024-06-01"), None);
        assert_eq!(parse_date_dmy("31.02.2024"), None);
        assert_eq!(parse_date_dmy(""), None);
    }

    #[test]
    fn test_premium_hash_formula() {
        assert_eq!(premium_hash("42", july()), sha_hex("4201-07-2024"));
        assert_eq!(premium_hash("42", july()), premium_hash("42", july()));
        assert_ne!(premium_hash("43", july()), premium_hash("42", july()));
        let august = NaiveDate::from_ymd_opt(2024, 8, 1).unwrap();
        assert_ne!(premium_hash("42", august), premium_hash("42", july()));
    }

    #[test]
    fn test_reporting_period() {
        assert_eq!(reporting_period(july()), "2024-07-01");
    }

    #[test]
    fn test_standard_end_to_end_row() {
        let body = "ID;AMOUNT;DATE_OF_USE;X\n1;1 234,56;01.06.2024;foo\n";
        let rows = parse_csv_payments(body, ReportKind::Standard, july()).unwrap();
        let expected: PaymentRecord = vec![
            ("ID", Value::from("1")),
            ("AMOUNT", Value::Decimal(1234.56)),
            ("DATE_OF_USE", Value::Date("2024-06-01".into())),
            ("X", Value::from("foo")),
        ]
        .into_iter()
        .collect();
        assert_eq!(rows, vec![expected]);
    }

    #[test]
    fn test_standard_end_to_end_with_sentinel_column() {
        let body = "ID;AMOUNT;DATE_OF_USE;X;\n1;1 234,56;01.06.2024;foo;\n";
        let rows = parse_csv_payments(body, ReportKind::Standard, july()).unwrap();
        assert_eq!(rows.len(), 1);
        let r = &rows[0];
        assert_eq!(r.get("ID"), Some(&Value::from("1")));
        assert_eq!(r.get("AMOUNT"), Some(&Value::Decimal(1234.56)));
        assert_eq!(r.get("DATE_OF_USE"), Some(&Value::Date("2024-06-01".into())));
        assert_eq!(r.get("X"), Some(&Value::from("foo")));
        assert_eq!(r.len(), 4);
    }

    #[test]
    fn test_standard_drops_rows_without_id() {
        let body = "ID;AMOUNT;\n;10,00;\n2;oops;\n";
        let rows = parse_csv_payments(body, ReportKind::Standard, july()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("ID"), Some(&Value::from("2")));
        // failed coercion keeps the raw string and the row
        assert_eq!(rows[0].get("AMOUNT"), Some(&Value::from("oops")));
    }

    #[test]
    fn test_single_field_rows_are_skipped() {
        let body = "ID;AMOUNT;\n\n5\n3;1,5;\n";
        let rows = parse_csv_payments(body, ReportKind::Standard, july()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("AMOUNT"), Some(&Value::Decimal(1.5)));
    }

    #[test]
    fn test_short_rows_are_padded_to_header() {
        let body = "ID;AMOUNT;NAME;\n7;2,00\n";
        let rows = parse_csv_payments(body, ReportKind::Standard, july()).unwrap();
        assert_eq!(rows[0].columns().collect::<Vec<_>>(), vec!["ID", "AMOUNT", "NAME"]);
        assert_eq!(rows[0].get("NAME"), Some(&Value::from("")));
    }

    #[test]
    fn test_header_only_is_empty() {
        let rows = parse_csv_payments("ID;AMOUNT;\n", ReportKind::Standard, july()).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_empty_body_is_parse_error() {
        let err = parse_csv_payments("", ReportKind::Standard, july()).unwrap_err();
        assert!(matches!(err, SyncError::Parse(_)));
    }

    #[test]
    fn test_premium_rows_always_kept_with_derived_fields() {
        let body = "MEMBER_ID;ID;ALL_AMOUNT;SUBSCRIPTION_END;\n42;;5 000,00;bad-date;\n";
        let rows = parse_csv_payments(body, ReportKind::Premium, july()).unwrap();
        assert_eq!(rows.len(), 1);
        let r = &rows[0];
        assert_eq!(r.get(PERIOD_COLUMN), Some(&Value::Date("2024-07-01".into())));
        assert_eq!(r.get(HASH_COLUMN), Some(&Value::Text(sha_hex("4201-07-2024"))));
        assert_eq!(r.get("ALL_AMOUNT"), Some(&Value::Decimal(5000.0)));
        assert_eq!(r.get("SUBSCRIPTION_END"), Some(&Value::from("bad-date")));
        assert_eq!(
            r.columns().collect::<Vec<_>>(),
            vec!["MEMBER_ID", "ID", "ALL_AMOUNT", "SUBSCRIPTION_END", "hash", "DATE_PARSE"]
        );
    }

    #[test]
    fn test_premium_without_member_column_is_parse_error() {
        let err = parse_csv_payments("ID;AMOUNT;\n1;2;\n", ReportKind::Premium, july()).unwrap_err();
        assert!(matches!(err, SyncError::Parse(_)));
    }

    #[test]
    fn test_unreadable_row_is_parse_error() {
        let body: &[u8] = b"ID;AMOUNT;\n1;2,00;\n2;\xff\xfe;\n";
        let err = read_payments(body, ReportKind::Standard, july()).unwrap_err();
        assert!(matches!(err, SyncError::Parse(ref m) if m.contains("row")));
    }

    #[test]
    fn test_unreadable_header_is_parse_error() {
        let body: &[u8] = b"ID;\xc3;\n1;2;\n";
        let err = read_payments(body, ReportKind::Standard, july()).unwrap_err();
        assert!(matches!(err, SyncError::Parse(ref m) if m.contains("header")));
    }

    #[test]
    fn test_quoted_fields() {
        let body = "ID;NAME;\n9;\"Acme; Ltd\";\n";
        let rows = parse_csv_payments(body, ReportKind::Standard, july()).unwrap();
        assert_eq!(rows[0].get("NAME"), Some(&Value::from("Acme; Ltd")));
    }

    #[test]
    fn test_fetch_csv_requests_export() {
        let session = session_with(|_| Ok(HttpResponse::ok("MEMBER_ID;\n42;x\n")));
        let rows = fetch_csv(&session, ReportKind::Premium, july()).unwrap();
        assert_eq!(rows.len(), 1);

        let sent = session.transport().requests();
        assert!(sent[0].url.ends_with("/sale/payout.php"));
        assert_eq!(sent[0].query_value("export"), Some("Y"));
        assert_eq!(sent[0].query_value("type"), Some("payouts_premium"));
        assert_eq!(sent[0].query_value("sessid"), Some(TOKEN));
    }

    #[test]
    fn test_fetch_csv_propagates_http_failure() {
        let session = session_with(|_| {
            Ok(HttpResponse {
                status: 502,
                body: String::new(),
            })
        });
        let err = fetch_csv(&session, ReportKind::Standard, july()).unwrap_err();
        assert!(matches!(err, SyncError::Transport(_)));
    }

    #[test]
    fn test_filter_spec_for_kind() {
        let spec = ReportKind::Premium.filter_spec(july());
        assert_eq!(spec.filter_id, "mp24_subscription_premium_for_partners");
        assert_eq!(spec.grid_id, spec.filter_id);
        assert_eq!((spec.month, spec.year), (7, 2024));
    }
}
