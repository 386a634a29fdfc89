//! Per-panel query extraction for both dashboard schemas.
//!
//! v1 documents keep panels in `panels[]` with queries in `targets[]`; rows
//! that are collapsed hold their children in a nested `panels[]`. v2 documents
//! keep panels in the `elements{}` map with queries nested at
//! `spec.data.spec.queries[].spec.query.spec`.

use serde_json::{json, Map, Value};
use std::collections::HashMap;

use super::document::{as_i64_lenient, JsonExt};

/// Datasource uid of server-side expressions.
pub const EXPRESSION_DATASOURCE_UID: &str = "__expr__";
/// Pre-8.3 dashboards reference expressions by this id.
pub const LEGACY_EXPRESSION_DATASOURCE_UID: &str = "-100";
/// Type given to datasources inherited from the panel.
pub const INHERITED_DATASOURCE_TYPE: &str = "public-ds";

/// Fields that reveal query text to an anonymous viewer.
const SENSITIVE_QUERY_FIELDS: [&str; 3] = ["expr", "query", "rawSql"];

pub type QueriesByPanel = HashMap<i64, Vec<Value>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaVersion {
    V1,
    V2,
}

/// Dashboard-level time settings as stored in the document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentTime {
    pub from: String,
    pub to: String,
    pub timezone: String,
}

pub trait QueryExtractionStrategy: Send + Sync {
    fn schema(&self) -> SchemaVersion;

    /// Surviving queries for every panel, keyed by panel id.
    fn queries_by_panel(&self, document: &Value) -> QueriesByPanel;

    /// True if any query of the panel targets the expression datasource.
    fn panel_has_expression(&self, panel: &Value) -> bool;

    fn document_time(&self, document: &Value) -> DocumentTime;

    /// The panel's relative `timeFrom` override, if any.
    fn panel_time_from(&self, document: &Value, panel_id: i64) -> Option<String>;

    /// Strips query text from every query in the document.
    fn sanitize(&self, document: &mut Value);
}

pub struct SchemaV1;
pub struct SchemaV2;

/// v2 documents are recognised by their `elements` map.
pub fn strategy_for(document: &Value) -> &'static dyn QueryExtractionStrategy {
    if document.has("elements") {
        &SchemaV2
    } else {
        &SchemaV1
    }
}

/// Removes query text from every query of a v1 or v2 document.
pub fn sanitize_document(document: &mut Value) {
    let strategy = strategy_for(document);
    strategy.sanitize(document);
}

pub fn is_expression_uid(uid: &str) -> bool {
    uid == EXPRESSION_DATASOURCE_UID || uid == LEGACY_EXPRESSION_DATASOURCE_UID
}

/// `datasource.uid`, or the bare string older dashboards store as `datasource`.
pub fn datasource_uid_v1(node: &Value) -> &str {
    match node.get("datasource") {
        Some(Value::String(uid)) => uid.as_str(),
        Some(ds) => ds.str_at("uid"),
        None => "",
    }
}

/// v2 references datasources by `datasource.name`.
pub fn datasource_uid_v2(node: &Value) -> &str {
    match node.get("datasource") {
        Some(Value::String(uid)) => uid.as_str(),
        Some(ds) => ds.str_at("name"),
        None => "",
    }
}

fn is_collapsed_row(panel: &Value) -> bool {
    panel.str_at("type") == "row" && panel.bool_at("collapsed")
}

/// Drops unsupported fields and fills in the inherited datasource.
fn prepare_query(query: &mut Map<String, Value>, inherited: impl FnOnce() -> Value) {
    // Exemplars are not supported for public dashboards.
    query.remove("exemplar");
    if !query.contains_key("datasource") {
        query.insert("datasource".to_string(), inherited());
    }
}

impl SchemaV1 {
    fn collect(&self, panels: &[Value], out: &mut QueriesByPanel) {
        for panel in panels {
            if is_collapsed_row(panel) {
                self.collect(panel.array_at("panels"), out);
                continue;
            }

            // Hidden queries stay when an expression may depend on them.
            let has_expression = self.panel_has_expression(panel);
            let panel_uid = datasource_uid_v1(panel);

            let queries = panel
                .array_at("targets")
                .iter()
                .filter(|target| has_expression || !target.bool_at("hide"))
                .filter_map(|target| {
                    let mut query = target.as_object()?.clone();
                    prepare_query(&mut query, || {
                        json!({"type": INHERITED_DATASOURCE_TYPE, "uid": panel_uid})
                    });
                    Some(Value::Object(query))
                })
                .collect();

            out.insert(panel.i64_at("id"), queries);
        }
    }

    fn find_time_from(panels: &[Value], panel_id: i64) -> Option<String> {
        for panel in panels {
            if is_collapsed_row(panel) {
                if let Some(found) = Self::find_time_from(panel.array_at("panels"), panel_id) {
                    return Some(found);
                }
                continue;
            }
            if panel.i64_at("id") == panel_id {
                return Some(panel.str_at("timeFrom").to_string()).filter(|s| !s.is_empty());
            }
        }
        None
    }

    fn sanitize_panels(panels: &mut [Value]) {
        for panel in panels {
            if is_collapsed_row(panel) {
                if let Some(children) = panel.get_mut("panels").and_then(Value::as_array_mut) {
                    Self::sanitize_panels(children);
                }
                continue;
            }
            if let Some(targets) = panel.get_mut("targets").and_then(Value::as_array_mut) {
                for target in targets.iter_mut().filter_map(Value::as_object_mut) {
                    for field in SENSITIVE_QUERY_FIELDS {
                        target.remove(field);
                    }
                }
            }
        }
    }
}

impl QueryExtractionStrategy for SchemaV1 {
    fn schema(&self) -> SchemaVersion {
        SchemaVersion::V1
    }

    fn queries_by_panel(&self, document: &Value) -> QueriesByPanel {
        let mut result = QueriesByPanel::new();
        self.collect(document.array_at("panels"), &mut result);
        result
    }

    fn panel_has_expression(&self, panel: &Value) -> bool {
        panel
            .array_at("targets")
            .iter()
            .any(|target| is_expression_uid(datasource_uid_v1(target)))
    }

    fn document_time(&self, document: &Value) -> DocumentTime {
        let time = document.get("time").unwrap_or(&Value::Null);
        DocumentTime {
            from: time.str_at("from").to_string(),
            to: time.str_at("to").to_string(),
            timezone: document.str_at("timezone").to_string(),
        }
    }

    fn panel_time_from(&self, document: &Value, panel_id: i64) -> Option<String> {
        Self::find_time_from(document.array_at("panels"), panel_id)
    }

    fn sanitize(&self, document: &mut Value) {
        if let Some(panels) = document.get_mut("panels").and_then(Value::as_array_mut) {
            Self::sanitize_panels(panels);
        }
    }
}

impl SchemaV2 {
    fn element_id(element: &Value) -> i64 {
        element.path(&["spec", "id"]).map(as_i64_lenient).unwrap_or_default()
    }

    fn element_queries(element: &Value) -> &[Value] {
        element
            .path(&["spec", "data", "spec", "queries"])
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    fn elements(document: &Value) -> impl Iterator<Item = &Value> {
        document
            .get("elements")
            .and_then(Value::as_object)
            .into_iter()
            .flat_map(|elements| elements.values())
    }
}

impl QueryExtractionStrategy for SchemaV2 {
    fn schema(&self) -> SchemaVersion {
        SchemaVersion::V2
    }

    fn queries_by_panel(&self, document: &Value) -> QueriesByPanel {
        let mut result = QueriesByPanel::new();

        for element in Self::elements(document) {
            let has_expression = self.panel_has_expression(element);

            let queries = Self::element_queries(element)
                .iter()
                .filter_map(|panel_query| {
                    let spec = panel_query.get("spec")?;
                    if !has_expression && spec.bool_at("hidden") {
                        return None;
                    }
                    let kind = spec.get("query")?;
                    let mut query = kind.get("spec")?.as_object()?.clone();
                    prepare_query(&mut query, || {
                        json!({"type": kind.str_at("group"), "uid": datasource_uid_v2(kind)})
                    });
                    Some(Value::Object(query))
                })
                .collect();

            result.insert(Self::element_id(element), queries);
        }

        result
    }

    fn panel_has_expression(&self, panel: &Value) -> bool {
        Self::element_queries(panel).iter().any(|panel_query| {
            let Some(kind) = panel_query.path(&["spec", "query"]) else {
                return false;
            };
            let payload_uid = kind
                .get("spec")
                .map(datasource_uid_v1)
                .unwrap_or_default();
            is_expression_uid(datasource_uid_v2(kind)) || is_expression_uid(payload_uid)
        })
    }

    fn document_time(&self, document: &Value) -> DocumentTime {
        let settings = document.get("timeSettings").unwrap_or(&Value::Null);
        DocumentTime {
            from: settings.str_at("from").to_string(),
            to: settings.str_at("to").to_string(),
            timezone: settings.str_at("timezone").to_string(),
        }
    }

    fn panel_time_from(&self, document: &Value, panel_id: i64) -> Option<String> {
        let element = Self::elements(document).find(|e| Self::element_id(e) == panel_id)?;
        element
            .path(&["spec", "data", "spec", "queryOptions", "timeFrom"])
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    fn sanitize(&self, document: &mut Value) {
        let Some(elements) = document.get_mut("elements").and_then(Value::as_object_mut) else {
            return;
        };
        for element in elements.values_mut() {
            let Some(queries) = element
                .path_mut(&["spec", "data", "spec", "queries"])
                .and_then(Value::as_array_mut)
            else {
                continue;
            };
            for panel_query in queries {
                if let Some(payload) = panel_query
                    .path_mut(&["spec", "query", "spec"])
                    .and_then(Value::as_object_mut)
                {
                    for field in SENSITIVE_QUERY_FIELDS {
                        payload.remove(field);
                    }
                }
            }
        }
    }
}
