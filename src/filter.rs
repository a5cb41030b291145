use tracing::info;

use crate::error::Result;
use crate::models::FilterSpec;
use crate::session::{Session, FILTER_PATH, PAYOUT_AJAX_ID, PAYOUT_PATH};
use crate::transport::{Request, Transport};

const PRESET_ID: &str = "tmp_filter";
const FILTER_NAME: &str = "Фильтр";
const DATE_FIELD: &str = "DATE_OF_USE";

/// A filter payload before form encoding: leaves are strings, branches keep
/// their children in insertion order.
#[derive(Debug, Clone, PartialEq)]
pub enum FormValue {
    Leaf(String),
    Node(Vec<(String, FormValue)>),
}

impl FormValue {
    pub fn node<K: Into<String>>(children: Vec<(K, FormValue)>) -> Self {
        FormValue::Node(children.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn leaf(value: impl Into<String>) -> Self {
        FormValue::Leaf(value.into())
    }
}

/// Flatten a tree into `key[sub][sub2]=value` pairs, depth first.
pub fn flatten(tree: &[(String, FormValue)]) -> Vec<(String, String)> {
    let mut out = Vec::new();
    flatten_into(tree, "", &mut out);
    out
}

fn flatten_into(tree: &[(String, FormValue)], prefix: &str, out: &mut Vec<(String, String)>) {
    for (key, value) in tree {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}[{key}]")
        };
        match value {
            FormValue::Leaf(v) => out.push((path, v.clone())),
            FormValue::Node(children) => flatten_into(children, &path, out),
        }
    }
}

/// The filter tree for one month. Every field except month and year is sent
/// empty so the grid applies no other narrowing.
pub fn date_filter_tree(spec: &FilterSpec) -> Vec<(String, FormValue)> {
    fn leaf(v: impl Into<String>) -> FormValue {
        FormValue::leaf(v)
    }
    let params = FormValue::node(vec![
        ("FILTER_ID", leaf(spec.filter_id.as_str())),
        ("GRID_ID", leaf(spec.grid_id.as_str())),
        ("action", leaf("setFilter")),
        ("forAll", leaf("False")),
        ("commonPresetsId", leaf("")),
        ("apply_filter", leaf("Y")),
        ("clear_filter", leaf("N")),
        ("with_preset", leaf("N")),
        ("save", leaf("Y")),
        ("isSetOutside", leaf("false")),
    ]);
    let fields = FormValue::node(vec![
        ("FIND".to_string(), leaf("")),
        (format!("{DATE_FIELD}_from"), leaf("")),
        (format!("{DATE_FIELD}_to"), leaf("")),
        (format!("{DATE_FIELD}_days"), leaf("")),
        (format!("{DATE_FIELD}_quarter"), leaf("")),
        (format!("{DATE_FIELD}_datesel"), leaf("MONTH")),
        (format!("{DATE_FIELD}_month"), leaf(spec.month.to_string())),
        (format!("{DATE_FIELD}_year"), leaf(spec.year.to_string())),
    ]);
    let data = FormValue::node(vec![
        ("fields", fields),
        ("rows", leaf(DATE_FIELD)),
        ("preset_id", leaf(PRESET_ID)),
        ("name", leaf(FILTER_NAME)),
    ]);
    vec![("params".to_string(), params), ("data".to_string(), data)]
}

/// Store the month filter against the grid, then have the report grid apply it
/// and reset its pagination. Both calls must succeed, in this order, before an
/// export reflects the month.
pub fn apply_date_filter<T: Transport>(session: &Session<T>, spec: &FilterSpec) -> Result<()> {
    let portal = session.portal();

    let store = Request::post(portal.url(FILTER_PATH))
        .query("mode", "ajax")
        .query("c", "bitrix:main.ui.filter")
        .query("action", "setFilter")
        .form_pairs(flatten(&date_filter_tree(spec)));
    session.send(store)?;

    let apply = Request::post(portal.url(PAYOUT_PATH))
        .query("sessid", session.token())
        .query("internal", "true")
        .query("grid_id", spec.grid_id.as_str())
        .query("apply_filter", "Y")
        .query("clear_nav", "Y")
        .query("grid_action", "showpage")
        .query("bxajaxid", PAYOUT_AJAX_ID)
        .form("apply_filter", "Y")
        .form("clear_nav", "Y");
    session.send(apply)?;

    info!(grid = %spec.grid_id, month = spec.month, year = spec.year, "date filter applied");
    Ok(())
}
