use chrono::NaiveDate;
use tracing::{info, warn};

use crate::error::Result;
use crate::extractor::{fetch_csv, ReportKind};
use crate::filter::apply_date_filter;
use crate::session::Session;
use crate::store::{upsert, TableStore};
use crate::transport::Transport;

/// Report kinds in the order a run loads them.
pub const RUN_ORDER: &[ReportKind] = &[ReportKind::Premium, ReportKind::Standard];

#[derive(Debug, Default, PartialEq)]
pub struct SyncSummary {
    pub premium: usize,
    pub standard: usize,
    pub batches: usize,
}

/// `DD.MM.YYYY` from the trigger; anything else means "today".
pub fn parse_run_date(raw: Option<&str>, today: NaiveDate) -> NaiveDate {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => today,
        Some(s) => NaiveDate::parse_from_str(s, "%d.%m.%Y").unwrap_or_else(|_| {
            warn!("Ignoring unparseable run date {s:?}, using {today}");
            today
        }),
    }
}

/// Filter, export and persist one report kind. Returns (records, batches).
pub fn sync_report<T: Transport, S: TableStore + ?Sized>(
    session: &Session<T>,
    store: &mut S,
    kind: ReportKind,
    reference: NaiveDate,
    chunk_size: usize,
) -> Result<(usize, usize)> {
    apply_date_filter(session, &kind.filter_spec(reference))?;
    let payments = fetch_csv(session, kind, reference)?;
    info!("Updating {}: {} records", kind.table(), payments.len());

    let mut batches = 0;
    for chunk in payments.chunks(chunk_size.max(1)) {
        upsert(store, kind.table(), chunk)?;
        batches += 1;
    }
    Ok((payments.len(), batches))
}

/// One full run against an authenticated session: premium payouts, then
/// standard payouts. Any failure aborts the run.
pub fn run<T: Transport, S: TableStore + ?Sized>(
    session: &Session<T>,
    store: &mut S,
    reference: NaiveDate,
    chunk_size: usize,
) -> Result<SyncSummary> {
    let mut summary = SyncSummary::default();
    for &kind in RUN_ORDER {
        let (records, batches) = sync_report(session, store, kind, reference, chunk_size)?;
        match kind {
            ReportKind::Premium => summary.premium = records,
            ReportKind::Standard => summary.standard = records,
        }
        summary.batches += batches;
    }
    Ok(summary)
}
