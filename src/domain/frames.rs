//! Columnar query results and conversion into variable options.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::MetricFindValue;

const TEXT_COLUMNS: [&str; 4] = ["text", "__text", "name", "label"];
const VALUE_COLUMNS: [&str; 3] = ["value", "__value", "id"];

/// Results keyed by query `refId`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryDataResponse {
    pub responses: BTreeMap<String, DataResponse>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataResponse {
    #[serde(default)]
    pub frames: Vec<Frame>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub fields: Vec<Field>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<FrameMeta>,
}

/// One column. Cells may be null for nullable columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(default)]
    pub values: Vec<Value>,
}

impl Field {
    pub fn new(name: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameMeta {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub executed_query_string: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Clears executed query text so it never reaches an anonymous caller.
pub fn sanitize_metadata(response: &mut QueryDataResponse) {
    for frame in response.responses.values_mut().flat_map(|r| r.frames.iter_mut()) {
        if let Some(meta) = frame.meta.as_mut() {
            meta.executed_query_string.clear();
        }
    }
}

/// Flattens every successful frame into `(text, value)` pairs.
pub fn extract_options(response: &QueryDataResponse) -> Vec<MetricFindValue> {
    let mut options = Vec::new();

    for (ref_id, result) in &response.responses {
        if let Some(error) = &result.error {
            tracing::warn!(ref_id = %ref_id, "Skipping failed variable query response: {}", error);
            continue;
        }

        for frame in &result.frames {
            let Some((text_field, value_field)) = pick_columns(frame) else {
                continue;
            };

            for (row, cell) in text_field.values.iter().enumerate() {
                let text = cell_to_string(cell);
                if text.is_empty() {
                    continue;
                }
                let value = value_field
                    .values
                    .get(row)
                    .map(cell_to_string)
                    .unwrap_or_else(|| text.clone());
                options.push(MetricFindValue { text, value });
            }
        }
    }

    options
}

/// Named text/value columns, falling back to the first column for either.
fn pick_columns(frame: &Frame) -> Option<(&Field, &Field)> {
    let mut text = None;
    let mut value = None;
    for field in &frame.fields {
        let name = field.name.to_lowercase();
        if TEXT_COLUMNS.contains(&name.as_str()) {
            text = Some(field);
        }
        if VALUE_COLUMNS.contains(&name.as_str()) {
            value = Some(field);
        }
    }

    let text = text.or_else(|| frame.fields.first())?;
    Some((text, value.unwrap_or(text)))
}

pub fn cell_to_string(cell: &Value) -> String {
    match cell {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => match (n.as_i64(), n.as_u64(), n.as_f64()) {
            (Some(i), _, _) => i.to_string(),
            (_, Some(u), _) => u.to_string(),
            (_, _, Some(f)) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}
