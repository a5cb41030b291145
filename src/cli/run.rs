use chrono::NaiveDate;
use colored::Colorize;
use serde::Serialize;
use tracing::error;

use crate::error::{Result, SyncError};
use crate::session::{authenticate, Portal};
use crate::settings::{load_settings, Settings};
use crate::store::SqliteStore;
use crate::sync::{self, parse_run_date, SyncSummary};
use crate::transport::HttpTransport;

/// What the trigger gets back. Partial failure is not distinguished from
/// total failure here; the logs say which stage broke.
#[derive(Debug, Serialize)]
struct RunStatus {
    #[serde(rename = "statusCode")]
    status_code: u16,
    body: String,
}

fn execute(settings: &Settings, reference: NaiveDate) -> Result<SyncSummary> {
    let credentials = settings.credentials()?;
    let mut store = SqliteStore::open(&settings.store_path())?;
    let transport = HttpTransport::new(None)?;
    let session = authenticate(transport, Portal::new(&settings.base_url), &credentials)?;

    let result = sync::run(&session, &mut store, reference, settings.chunk_size);
    let closed = store.close();
    let summary = result?;
    closed?;
    Ok(summary)
}

/// `200 ok` on success, `500` with the error text otherwise.
fn run_status(outcome: &Result<SyncSummary>) -> RunStatus {
    match outcome {
        Ok(_) => RunStatus {
            status_code: 200,
            body: "ok".to_string(),
        },
        Err(e) => RunStatus {
            status_code: 500,
            body: e.to_string(),
        },
    }
}

fn status_json(status: &RunStatus) -> Result<String> {
    serde_json::to_string(status).map_err(|e| SyncError::Settings(e.to_string()))
}

pub fn run(date: Option<&str>, json: bool) -> Result<()> {
    let settings = load_settings();
    let reference = parse_run_date(date, chrono::Local::now().date_naive());

    let outcome = execute(&settings, reference);
    if let Err(e) = &outcome {
        error!("Run for {} failed: {e}", reference.format("%m.%Y"));
    }
    let status = run_status(&outcome);

    if json {
        println!("{}", status_json(&status)?);
    } else {
        if let Ok(summary) = &outcome {
            println!("Month:     {}", reference.format("%m.%Y"));
            println!("Premium:   {} records", summary.premium);
            println!("Standard:  {} records", summary.standard);
            println!("Batches:   {}", summary.batches);
        }
        let line = format!("{} {}", status.status_code, status.body);
        if outcome.is_ok() {
            println!("{}", line.green());
        } else {
            println!("{}", line.red());
        }
    }

    outcome.map(|_| ())
}
