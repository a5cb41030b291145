use regex::Regex;
use tracing::{debug, error, info};

use crate::error::SyncError;
use crate::html::{self, Element};
use crate::models::ListingRecord;
use crate::session::{Session, APP_LIST_AJAX_ID, APP_LIST_PATH, CLIENT_LIST_PATH};
use crate::transport::{Request, Transport};

pub const DEFAULT_MAX_PAGES: usize = 100;

/// Where the header labels of a grid live.
#[derive(Debug, Clone)]
pub enum HeaderRule {
    /// `<thead><th>` cells; blank labels are dropped.
    TheadCells,
    /// `<td>` cells of the first `<tr>` carrying `class`; blank labels become `fallback`.
    RowCells { class: String, fallback: String },
}

/// Which `<tr>` elements of the grid hold data.
#[derive(Debug, Clone)]
pub enum RowRule {
    /// Class attribute is exactly this string.
    ClassEquals(String),
    /// No class attribute, or one of these exact class strings.
    UnclassedOr(Vec<String>),
}

/// Everything needed to walk one paginated grid.
#[derive(Debug, Clone)]
pub struct ListingQuery {
    pub path: String,
    pub params: Vec<(String, String)>,
    pub page_param: String,
    /// `{page}` is replaced with the 1-based page number.
    pub page_template: String,
    pub table_id: String,
    pub header_rule: HeaderRule,
    pub row_rule: RowRule,
    /// Pattern with one numeric capture, matched against the row's action menu.
    pub action_id: Option<Regex>,
    /// A page holding a single matching row has no data (client grid quirk).
    pub single_row_is_empty: bool,
    pub max_pages: usize,
}

/// Why a listing stopped.
#[derive(Debug)]
pub enum Completion {
    /// The grid ran out on this page; nothing on it was kept.
    Exhausted { page: usize },
    /// Every page up to the bound had data.
    PageLimit,
    /// A page failed to load; earlier pages were kept.
    Aborted { page: usize, error: SyncError },
}

#[derive(Debug)]
pub struct Listing {
    pub records: Vec<ListingRecord>,
    pub completion: Completion,
}

impl Listing {
    pub fn is_truncated(&self) -> bool {
        matches!(self.completion, Completion::Aborted { .. })
    }
}

// ---------------------------------------------------------------------------
// Grid queries
// ---------------------------------------------------------------------------

pub fn app_list_query(token: &str, max_pages: usize) -> ListingQuery {
    ListingQuery {
        path: APP_LIST_PATH.to_string(),
        params: vec![
            ("internal".into(), "true".into()),
            ("sessid".into(), token.to_string()),
            ("grid_id".into(), "vendor_app_list".into()),
            ("grid_action".into(), "pagination".into()),
            ("bxajaxid".into(), APP_LIST_AJAX_ID.into()),
        ],
        page_param: "nav-moderator-app-list".into(),
        page_template: "page-{page}".into(),
        table_id: "vendor_app_list_table".into(),
        header_rule: HeaderRule::TheadCells,
        row_rule: RowRule::ClassEquals("main-grid-row main-grid-row-body".into()),
        action_id: Regex::new(r"bx24vendorClients\((\d+)\)").ok(),
        single_row_is_empty: false,
        max_pages,
    }
}

pub fn client_list_query(app_id: &str, max_pages: usize) -> ListingQuery {
    ListingQuery {
        path: CLIENT_LIST_PATH.to_string(),
        params: vec![("ID".into(), app_id.to_string())],
        page_param: "nav-client".into(),
        page_template: "page-{page}".into(),
        table_id: "mp24_client".into(),
        header_rule: HeaderRule::RowCells {
            class: "bx-grid-head".into(),
            fallback: "actions".into(),
        },
        row_rule: RowRule::UnclassedOr(vec![" dru".into()]),
        action_id: None,
        single_row_is_empty: true,
        max_pages,
    }
}

// ---------------------------------------------------------------------------
// Page parsing
// ---------------------------------------------------------------------------

fn header_labels(table: &Element, rule: &HeaderRule) -> Vec<String> {
    match rule {
        HeaderRule::TheadCells => table
            .first("thead")
            .map(|thead| {
                html::descendants(thead.inner, "th")
                    .iter()
                    .map(Element::text)
                    .filter(|t| !t.is_empty())
                    .collect()
            })
            .unwrap_or_default(),
        HeaderRule::RowCells { class, fallback } => html::descendants(table.inner, "tr")
            .into_iter()
            .find(|tr| tr.has_class(class))
            .map(|tr| {
                tr.children("td")
                    .iter()
                    .map(|td| {
                        let t = td.text();
                        if t.is_empty() { fallback.clone() } else { t }
                    })
                    .collect()
            })
            .unwrap_or_default(),
    }
}

fn row_matches(row: &Element, rule: &RowRule) -> bool {
    let class = row.class();
    match rule {
        RowRule::ClassEquals(want) => class.as_deref() == Some(want.as_str()),
        RowRule::UnclassedOr(allowed) => match class {
            None => true,
            Some(c) => allowed.iter().any(|a| *a == c),
        },
    }
}

fn action_id(row: &Element, pattern: &Regex) -> Option<u64> {
    html::descendants(row.inner, "span")
        .into_iter()
        .find(|span| span.has_class("main-grid-row-action-button"))
        .and_then(|span| span.attr("data-actions"))
        .and_then(|actions| {
            pattern
                .captures(&actions)
                .and_then(|caps| caps.get(1))
                .and_then(|m| m.as_str().parse().ok())
        })
}

/// Rows of one page, or `None` when the page signals the grid is exhausted.
pub fn parse_page(body: &str, query: &ListingQuery) -> Option<Vec<ListingRecord>> {
    let table = html::find_by_id(body, "table", &query.table_id)?;

    let headers = header_labels(&table, &query.header_rule);
    if headers.is_empty() {
        return None;
    }

    let rows: Vec<Element> = html::descendants(table.inner, "tr")
        .into_iter()
        .filter(|tr| row_matches(tr, &query.row_rule))
        .collect();
    if rows.is_empty() || (query.single_row_is_empty && rows.len() == 1) {
        return None;
    }

    let mut records = Vec::new();
    for row in &rows {
        let cells = row.children("td");
        // shorter rows would misalign fields
        if cells.len() < headers.len() {
            continue;
        }
        let mut record = ListingRecord {
            cells: headers
                .iter()
                .zip(cells.iter())
                .map(|(h, td)| (h.clone(), td.text()))
                .collect(),
            id: None,
        };
        if let Some(pattern) = &query.action_id {
            record.id = action_id(row, pattern);
        }
        records.push(record);
    }
    Some(records)
}

/// Walk pages 1..=max_pages. Exhaustion ends the walk normally; a failed page
/// ends it early and is reported as [`Completion::Aborted`] with what was
/// gathered so far.
pub fn fetch_all_pages<T: Transport>(session: &Session<T>, query: &ListingQuery) -> Listing {
    let mut records = Vec::new();
    for page in 1..=query.max_pages {
        let mut request = Request::get(session.portal().url(&query.path));
        for (k, v) in &query.params {
            request = request.query(k, v.as_str());
        }
        let request = request.query(
            &query.page_param,
            query.page_template.replace("{page}", &page.to_string()),
        );

        let body = match session.send(request) {
            Ok(resp) => resp.body,
            Err(error) => {
                error!("Failed to fetch {} page {page}: {error}", query.table_id);
                return Listing {
                    records,
                    completion: Completion::Aborted { page, error },
                };
            }
        };

        match parse_page(&body, query) {
            Some(rows) => {
                debug!(table = %query.table_id, page, rows = rows.len(), "page scraped");
                records.extend(rows);
            }
            None => {
                info!(table = %query.table_id, page, total = records.len(), "listing exhausted");
                return Listing {
                    records,
                    completion: Completion::Exhausted { page },
                };
            }
        }
    }
    info!(table = %query.table_id, pages = query.max_pages, "listing stopped at page bound");
    Listing {
        records,
        completion: Completion::PageLimit,
    }
}
