use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::FetchError;

/// One stored record: item key -> string value (`None` for JSON null).
pub type Row = BTreeMap<String, Option<String>>;

/// Column set inferred from the first item of a search response, in the
/// item's own key order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowSchema {
    pub columns: Vec<String>,
}

impl RowSchema {
    /// Read the keys of `items[0]`. An empty first page has nothing to infer from.
    pub fn infer(response: &Value) -> Result<RowSchema, FetchError> {
        let first = items(response)?
            .first()
            .ok_or(FetchError::EmptySchemaSample)?;
        let obj = first.as_object().ok_or(FetchError::NotAnObject)?;
        let mut columns: Vec<String> = Vec::with_capacity(obj.len());
        for key in obj.keys() {
            if let Some(prev) = columns.iter().find(|c| c.eq_ignore_ascii_case(key)) {
                return Err(FetchError::DuplicateColumn {
                    first: prev.clone(),
                    second: key.clone(),
                });
            }
            columns.push(key.clone());
        }
        Ok(RowSchema { columns })
    }
}

/// The `items` list of a search response.
pub fn items(response: &Value) -> Result<&Vec<Value>, FetchError> {
    response
        .get("items")
        .and_then(|v| v.as_array())
        .ok_or(FetchError::MissingItems)
}

/// Convert an item to a row using the item's own keys. The schema is not
/// consulted here; mismatches surface when the row is written.
pub fn item_to_row(item: &Value) -> Result<Row, FetchError> {
    let obj = item.as_object().ok_or(FetchError::NotAnObject)?;
    Ok(obj
        .iter()
        .map(|(k, v)| (k.clone(), stringify(v)))
        .collect())
}

pub fn items_to_rows(response: &Value) -> Result<Vec<Row>, FetchError> {
    items(response)?.iter().map(item_to_row).collect()
}

fn stringify(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        // arrays and objects keep their JSON text
        other => Some(other.to_string()),
    }
}
