use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::error::Result;
use crate::scraper::{app_list_query, client_list_query, fetch_all_pages, Completion, Listing, ListingQuery};
use crate::session::{authenticate, Portal};
use crate::settings::load_settings;
use crate::transport::HttpTransport;

pub fn render(listing: &Listing) -> Table {
    let mut headers: Vec<String> = listing
        .records
        .first()
        .map(|r| r.cells.iter().map(|(h, _)| h.clone()).collect())
        .unwrap_or_default();
    let with_id = listing.records.iter().any(|r| r.id.is_some());
    if with_id {
        headers.insert(0, "id".to_string());
    }

    let mut table = Table::new();
    table.set_header(headers);
    for record in &listing.records {
        let mut row: Vec<Cell> = Vec::with_capacity(record.cells.len() + 1);
        if with_id {
            row.push(Cell::new(record.id.map(|i| i.to_string()).unwrap_or_default()));
        }
        row.extend(record.cells.iter().map(|(_, v)| Cell::new(v)));
        table.add_row(row);
    }
    table
}

fn show(title: &str, build: impl FnOnce(&str, usize) -> ListingQuery) -> Result<()> {
    let settings = load_settings();
    let credentials = settings.credentials()?;
    let session = authenticate(
        HttpTransport::new(None)?,
        Portal::new(&settings.base_url),
        &credentials,
    )?;

    let listing = fetch_all_pages(&session, &build(session.token(), settings.max_pages));
    let partial = if listing.is_truncated() { ", partial" } else { "" };
    println!("{title} ({}{partial})\n{}", listing.records.len(), render(&listing));
    match &listing.completion {
        Completion::Aborted { page, error } => {
            eprintln!("{}", format!("Stopped early at page {page}: {error}").yellow());
        }
        Completion::PageLimit => {
            eprintln!("{}", format!("Stopped at the {}-page limit", settings.max_pages).yellow());
        }
        Completion::Exhausted { .. } => {}
    }
    Ok(())
}

pub fn apps() -> Result<()> {
    show("Apps", app_list_query)
}

pub fn clients(app_id: &str) -> Result<()> {
    show("Clients", |_, max_pages| client_list_query(app_id, max_pages))
}
