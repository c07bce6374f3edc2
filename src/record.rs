use std::collections::HashMap;

/// One `{field, value}` pair as returned by the query service.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawField {
    pub field: Option<String>,
    pub value: Option<String>,
}

impl RawField {
    pub fn new(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            value: Some(value.into()),
        }
    }
}

/// One matched log record, fields in service order.
pub type RawRow = Vec<RawField>;

/// Flat field name -> value view of a single result row.
pub type NormalizedRecord = HashMap<String, String>;

/// Drop incomplete pairs and index the rest by field name.
///
/// Duplicate field names resolve to the last value seen.
pub fn normalize(row: &[RawField]) -> NormalizedRecord {
    row.iter()
        .filter_map(|pair| match (&pair.field, &pair.value) {
            (Some(field), Some(value)) => Some((field.clone(), value.clone())),
            _ => None,
        })
        .collect()
}

pub fn normalize_all(rows: &[RawRow]) -> Vec<NormalizedRecord> {
    rows.iter().map(|row| normalize(row)).collect()
}
