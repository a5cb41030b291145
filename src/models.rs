use std::fmt;

/// A single cell of an exported payment row after coercion.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Exports never coerce to integers; records built in code may carry them
    /// and the store binds them directly to identifier columns.
    Int(i64),
    Decimal(f64),
    /// ISO date, `YYYY-MM-DD`.
    Date(String),
    Text(String),
}

impl Value {
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Date(s) | Value::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Debug keeps the trailing ".0" on whole amounts
            Value::Int(i) => write!(f, "{i}"),
            Value::Decimal(d) => write!(f, "{d:?}"),
            Value::Date(s) | Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

/// One row of a CSV export, keyed by the export's header labels in header order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaymentRecord {
    fields: Vec<(String, Value)>,
}

impl PaymentRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a column, replacing the value in place if the column already exists.
    pub fn insert(&mut self, column: impl Into<String>, value: Value) {
        let column = column.into();
        match self.fields.iter_mut().find(|(c, _)| *c == column) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((column, value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields.iter().find(|(c, _)| c == column).map(|(_, v)| v)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(c, _)| c.as_str())
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for PaymentRecord {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        let mut record = PaymentRecord::new();
        for (k, v) in iter {
            record.insert(k, v);
        }
        record
    }
}

/// A scraped listing row. Headers vary by grid, so cells stay raw text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingRecord {
    pub cells: Vec<(String, String)>,
    /// Numeric id pulled out of the row's action menu, when the grid has one.
    pub id: Option<u64>,
}

impl ListingRecord {
    #[cfg(test)]
    pub fn get(&self, header: &str) -> Option<&str> {
        self.cells
            .iter()
            .find(|(h, _)| h == header)
            .map(|(_, v)| v.as_str())
    }
}

/// What the portal needs to narrow a report grid to one month.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterSpec {
    pub filter_id: String,
    pub grid_id: String,
    pub month: u32,
    pub year: i32,
}
