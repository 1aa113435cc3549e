use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

pub const AIRPORT_COLUMN: &str = "airport";

/// A single spreadsheet value. `Null` renders as an empty cell.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
#[serde(untagged)]
pub enum Cell {
    #[default]
    Null,
    Number(f64),
    Text(String),
    Bool(bool),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    pub fn text(s: impl Into<String>) -> Self {
        Cell::Text(s.into())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cell::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl From<&Value> for Cell {
    fn from(v: &Value) -> Self {
        match v {
            Value::Null => Cell::Null,
            Value::Bool(b) => Cell::Bool(*b),
            Value::Number(n) => n.as_f64().map(Cell::Number).unwrap_or(Cell::Null),
            Value::String(s) => Cell::Text(s.clone()),
            // Nested values have no cell representation; keep their JSON text.
            other => Cell::Text(other.to_string()),
        }
    }
}

pub type Row = BTreeMap<String, Cell>;

/// One provider response laid out as rows keyed by column name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ForecastTable {
    /// Column names in the order the provider returned them.
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl ForecastTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowGroup {
    pub airport: String,
    pub rows: usize,
}

/// All airports' rows for one run, airport-major.
#[derive(Debug, Clone, Default)]
pub struct ForecastBatch {
    columns: BTreeSet<String>,
    groups: Vec<RowGroup>,
    rows: Vec<Row>,
}

impl ForecastBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tags every row of `table` with `airport` and appends it after the rows already held.
    pub fn push(&mut self, airport: &str, table: ForecastTable) {
        self.columns.extend(table.columns.iter().cloned());
        self.columns.insert(AIRPORT_COLUMN.to_string());

        self.groups.push(RowGroup {
            airport: airport.to_string(),
            rows: table.rows.len(),
        });

        self.rows.reserve(table.rows.len());
        for mut row in table.rows {
            row.insert(AIRPORT_COLUMN.to_string(), Cell::text(airport));
            self.rows.push(row);
        }
    }

    /// Union of the columns seen across every pushed table.
    pub fn columns(&self) -> &BTreeSet<String> {
        &self.columns
    }

    pub fn groups(&self) -> &[RowGroup] {
        &self.groups
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
