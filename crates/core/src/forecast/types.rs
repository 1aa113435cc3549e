use crate::domain::forecast::{Cell, ForecastTable, Row};
use anyhow::{bail, ensure, Result};
use serde_json::Value;

/// Turns a columnar provider response (`{"temperature": [..], "qpf": [..]}`) into rows.
///
/// Every array must have the same length; that length is the row count. Scalar members are
/// repeated on every row. An empty object yields an empty table.
pub fn decode_columnar(value: &Value) -> Result<ForecastTable> {
    let Some(obj) = value.as_object() else {
        bail!("forecast response is not a JSON object: {}", type_name(value));
    };

    if obj.is_empty() {
        return Ok(ForecastTable::default());
    }

    let mut len: Option<usize> = None;
    for (key, v) in obj {
        if let Value::Array(items) = v {
            match len {
                None => len = Some(items.len()),
                Some(n) => ensure!(
                    n == items.len(),
                    "forecast column {key} has {} values, expected {n}",
                    items.len()
                ),
            }
        }
    }
    let Some(len) = len else {
        bail!("forecast response has no array columns");
    };

    let columns: Vec<String> = obj.keys().cloned().collect();
    let mut rows: Vec<Row> = (0..len).map(|_| Row::new()).collect();

    for (key, v) in obj {
        match v {
            Value::Array(items) => {
                for (row, item) in rows.iter_mut().zip(items) {
                    row.insert(key.clone(), Cell::from(item));
                }
            }
            scalar => {
                let cell = Cell::from(scalar);
                for row in rows.iter_mut() {
                    row.insert(key.clone(), cell.clone());
                }
            }
        }
    }

    Ok(ForecastTable { columns, rows })
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
