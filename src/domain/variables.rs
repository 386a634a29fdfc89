//! Template variable definitions and the option branches that need no
//! datasource round trip.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};

use super::document::JsonExt;
use super::frames::cell_to_string;
use super::interpolate::interpolate;
use super::{DomainError, MetricFindValue, VariableValueMap};

/// Built-in choices for interval variables that declare none.
pub const DEFAULT_INTERVALS: [&str; 11] = [
    "1m", "5m", "10m", "30m", "1h", "6h", "12h", "1d", "7d", "14d", "30d",
];

/// Reference id of the synthetic variable query.
pub const VARIABLE_QUERY_REF_ID: &str = "A";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum VariableKind {
    Query,
    Custom,
    Constant,
    Interval,
    Other(String),
}

impl From<String> for VariableKind {
    fn from(kind: String) -> Self {
        match kind.as_str() {
            "query" => VariableKind::Query,
            "custom" => VariableKind::Custom,
            "constant" => VariableKind::Constant,
            "interval" => VariableKind::Interval,
            _ => VariableKind::Other(kind),
        }
    }
}

impl From<VariableKind> for String {
    fn from(kind: VariableKind) -> Self {
        match kind {
            VariableKind::Query => "query".to_string(),
            VariableKind::Custom => "custom".to_string(),
            VariableKind::Constant => "constant".to_string(),
            VariableKind::Interval => "interval".to_string(),
            VariableKind::Other(other) => other,
        }
    }
}

impl Default for VariableKind {
    fn default() -> Self {
        VariableKind::Other(String::new())
    }
}

/// A `templating.list` entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VariableDefinition {
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(rename = "type", deserialize_with = "null_as_default")]
    pub kind: VariableKind,
    pub query: Value,
    pub datasource: Value,
    #[serde(deserialize_with = "null_as_default")]
    pub options: Vec<VariableOption>,
    #[serde(deserialize_with = "null_as_default")]
    pub current: VariableCurrent,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VariableOption {
    pub text: Value,
    pub value: Value,
    #[serde(deserialize_with = "null_as_default")]
    pub selected: bool,
}

/// Stored dashboards write `null` where a field has no value yet; read it as
/// the field's zero value.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VariableCurrent {
    pub text: Value,
    pub value: Value,
}

impl VariableDefinition {
    /// `datasource.uid`, or the bare string form older dashboards use.
    pub fn datasource_uid(&self) -> &str {
        match &self.datasource {
            Value::String(uid) => uid.as_str(),
            ds => ds.str_at("uid"),
        }
    }

    pub fn datasource_type(&self) -> &str {
        self.datasource.str_at("type")
    }

    /// The query as an object plus its text. Plain string queries become
    /// `{"query": text}`.
    pub fn query_parts(&self) -> (Map<String, Value>, String) {
        match &self.query {
            Value::String(text) => {
                let mut obj = Map::new();
                obj.insert("query".to_string(), json!(text));
                (obj, text.clone())
            }
            Value::Object(obj) => (obj.clone(), obj_query_text(obj)),
            _ => (Map::new(), String::new()),
        }
    }
}

fn obj_query_text(obj: &Map<String, Value>) -> String {
    obj.get("query")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Finds `name` in `templating.list`.
pub fn find_variable(document: &Value, name: &str) -> Result<VariableDefinition, DomainError> {
    let templating = document
        .get("templating")
        .filter(|t| !t.is_null())
        .ok_or_else(|| DomainError::VariableNotFound("no templating section found in dashboard".to_string()))?;

    let list = templating
        .get("list")
        .and_then(Value::as_array)
        .ok_or_else(|| DomainError::VariableNotFound("no templating.list found in dashboard".to_string()))?;

    let raw = list
        .iter()
        .find(|v| v.str_at("name") == name)
        .ok_or_else(|| DomainError::VariableNotFound(format!("variable '{}' not found", name)))?;

    serde_json::from_value(raw.clone()).map_err(|e| {
        DomainError::InternalServerError(format!("failed to decode variable '{}': {}", name, e))
    })
}

/// The single query sent to the datasource for a `query` variable, or `None`
/// when the variable has no datasource.
pub fn build_variable_query(definition: &VariableDefinition, other_variables: &VariableValueMap) -> Option<Value> {
    if definition.datasource_uid().is_empty() {
        return None;
    }

    let (mut query_obj, mut query_text) = definition.query_parts();
    if !other_variables.is_empty() && !query_text.is_empty() {
        query_text = interpolate(&query_text, other_variables);
        query_obj.insert("query".to_string(), json!(query_text));
    }

    let mut data = Map::new();
    data.insert("datasource".to_string(), definition.datasource.clone());
    data.extend(query_obj);
    data.insert("refId".to_string(), json!(VARIABLE_QUERY_REF_ID));

    // Datasources disagree on where query text lives.
    if !query_text.is_empty() {
        data.insert("query".to_string(), json!(query_text));
        data.insert("expr".to_string(), json!(query_text));
        data.insert("rawQuery".to_string(), json!(true));
        data.insert("rawSql".to_string(), json!(query_text));
    }

    Some(Value::Object(data))
}

/// Options for every kind except `query`.
pub fn local_options(definition: &VariableDefinition) -> Vec<MetricFindValue> {
    match definition.kind {
        VariableKind::Custom => custom_options(definition),
        VariableKind::Constant => constant_options(definition),
        VariableKind::Interval => interval_options(definition),
        _ => static_options(definition),
    }
}

/// `a:1, b:2, c` → `[a/1, b/2, c/c]`.
pub fn custom_options(definition: &VariableDefinition) -> Vec<MetricFindValue> {
    let Some(query) = definition.query.as_str() else {
        return Vec::new();
    };

    query
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(|token| match token.split_once(':') {
            Some((text, value)) => MetricFindValue::new(text.trim(), value.trim()),
            None => MetricFindValue::new(token, token),
        })
        .collect()
}

pub fn constant_options(definition: &VariableDefinition) -> Vec<MetricFindValue> {
    let value = first_scalar(&definition.current.value);
    if value.is_empty() {
        return Vec::new();
    }
    let text = definition
        .current
        .text
        .as_str()
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| value.clone());
    vec![MetricFindValue { text, value }]
}

pub fn interval_options(definition: &VariableDefinition) -> Vec<MetricFindValue> {
    if !definition.options.is_empty() {
        return static_options(definition);
    }
    DEFAULT_INTERVALS
        .iter()
        .map(|interval| MetricFindValue::new(*interval, *interval))
        .collect()
}

/// The options stored with the definition.
pub fn static_options(definition: &VariableDefinition) -> Vec<MetricFindValue> {
    definition
        .options
        .iter()
        .filter_map(|opt| {
            let text = first_scalar(&opt.text);
            let value = first_scalar(&opt.value);
            match (text.is_empty(), value.is_empty()) {
                (true, true) => None,
                (true, false) => Some(MetricFindValue::new(value.clone(), value)),
                (false, true) => Some(MetricFindValue::new(text.clone(), text)),
                (false, false) => Some(MetricFindValue { text, value }),
            }
        })
        .collect()
}

/// The variable's current selection, one option per selected value.
pub fn current_value_options(definition: &VariableDefinition) -> Vec<MetricFindValue> {
    let current = &definition.current;
    match &current.value {
        Value::String(value) if !value.is_empty() => {
            let text = current
                .text
                .as_str()
                .filter(|t| !t.is_empty())
                .unwrap_or(value);
            vec![MetricFindValue::new(text, value.as_str())]
        }
        Value::Array(values) => {
            let texts = current.text.as_array();
            values
                .iter()
                .enumerate()
                .filter_map(|(i, v)| {
                    let value = v.as_str().filter(|s| !s.is_empty())?;
                    let text = texts
                        .and_then(|t| t.get(i))
                        .and_then(Value::as_str)
                        .unwrap_or(value);
                    Some(MetricFindValue::new(text, value))
                })
                .collect()
        }
        _ => Vec::new(),
    }
}

/// Case-insensitive substring match on text or value.
pub fn filter_options(options: Vec<MetricFindValue>, filter: &str) -> Vec<MetricFindValue> {
    let filter = filter.to_lowercase();
    options
        .into_iter()
        .filter(|opt| opt.text.to_lowercase().contains(&filter) || opt.value.to_lowercase().contains(&filter))
        .collect()
}

/// Falls back to the current selection when nothing resolved, then applies
/// the search filter.
pub fn finalize_options(
    definition: &VariableDefinition,
    mut options: Vec<MetricFindValue>,
    search_filter: &str,
) -> Vec<MetricFindValue> {
    if options.is_empty() {
        options = current_value_options(definition);
    }
    if search_filter.is_empty() {
        options
    } else {
        filter_options(options, search_filter)
    }
}

/// Strings as-is, arrays by their first element.
fn first_scalar(value: &Value) -> String {
    match value {
        Value::Array(items) => items.first().map(cell_to_string).unwrap_or_default(),
        Value::Object(_) => String::new(),
        other => cell_to_string(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(value: Value) -> VariableDefinition {
        serde_json::from_value(value).unwrap()
    }

    fn document() -> Value {
        json!({
            "templating": {"list": [
                {"name": "env", "type": "custom", "query": "prod,dev"},
                {
                    "name": "server",
                    "type": "query",
                    "datasource": {"type": "prometheus", "uid": "prom"},
                    "query": {"query": "label_values(up{env=\"$env\"}, instance)", "refId": "PrometheusVariableQueryEditor-VariableQuery"},
                    "current": {"text": "a", "value": "a"},
                    "refresh": 1
                }
            ]}
        })
    }

    #[test]
    fn test_find_variable() {
        let var = find_variable(&document(), "server").unwrap();
        assert_eq!(var.kind, VariableKind::Query);
        assert_eq!(var.datasource_uid(), "prom");
        assert_eq!(var.datasource_type(), "prometheus");
    }

    #[test]
    fn test_missing_variable_or_templating_is_not_found() {
        assert!(matches!(find_variable(&document(), "nope"), Err(DomainError::VariableNotFound(_))));
        assert!(matches!(find_variable(&json!({}), "env"), Err(DomainError::VariableNotFound(_))));
        assert!(matches!(
            find_variable(&json!({"templating": {}}), "env"),
            Err(DomainError::VariableNotFound(_))
        ));
    }

    #[test]
    fn test_malformed_definition_is_internal_error() {
        let doc = json!({"templating": {"list": [{"name": "x", "options": "sometimes"}]}});
        assert!(matches!(find_variable(&doc, "x"), Err(DomainError::InternalServerError(_))));
    }

    #[test]
    fn test_null_fields_read_as_empty() {
        let doc = json!({"templating": {"list": [
            {"name": "env", "type": "custom", "query": "a,b", "current": null, "options": null},
            {"name": "untyped", "type": null, "current": {"text": null, "value": "x"},
             "options": [{"text": "x", "value": "x", "selected": null}]}
        ]}});

        let env = find_variable(&doc, "env").unwrap();
        assert_eq!(env.kind, VariableKind::Custom);
        assert!(env.options.is_empty());
        assert_eq!(env.current, VariableCurrent::default());
        assert_eq!(
            finalize_options(&env, local_options(&env), ""),
            vec![MetricFindValue::new("a", "a"), MetricFindValue::new("b", "b")]
        );

        let untyped = find_variable(&doc, "untyped").unwrap();
        assert_eq!(untyped.kind, VariableKind::default());
        assert!(!untyped.options[0].selected);
        assert_eq!(local_options(&untyped), vec![MetricFindValue::new("x", "x")]);
    }

    #[test]
    fn test_unknown_kind_round_trips() {
        let var = definition(json!({"name": "t", "type": "textbox"}));
        assert_eq!(var.kind, VariableKind::Other("textbox".into()));
        assert_eq!(serde_json::to_value(&var).unwrap()["type"], "textbox");
    }

    #[test]
    fn test_custom_options() {
        let var = definition(json!({"type": "custom", "query": "a:1,b:2"}));
        assert_eq!(
            custom_options(&var),
            vec![MetricFindValue::new("a", "1"), MetricFindValue::new("b", "2")]
        );

        let var = definition(json!({"type": "custom", "query": " x , ,y: 9 "}));
        assert_eq!(
            custom_options(&var),
            vec![MetricFindValue::new("x", "x"), MetricFindValue::new("y", "9")]
        );
    }

    #[test]
    fn test_constant_prefers_current_text() {
        let var = definition(json!({"type": "constant", "current": {"text": "Label", "value": "v"}}));
        assert_eq!(constant_options(&var), vec![MetricFindValue::new("Label", "v")]);

        let var = definition(json!({"type": "constant", "current": {"value": ["first", "second"]}}));
        assert_eq!(constant_options(&var), vec![MetricFindValue::new("first", "first")]);
    }

    #[test]
    fn test_interval_defaults() {
        let var = definition(json!({"type": "interval"}));
        let options = interval_options(&var);
        let values: Vec<&str> = options.iter().map(|o| o.value.as_str()).collect();
        assert_eq!(values, DEFAULT_INTERVALS.to_vec());
        assert!(options.iter().all(|o| o.text == o.value));

        let var = definition(json!({"type": "interval", "options": [{"text": "2m", "value": "2m"}]}));
        assert_eq!(interval_options(&var), vec![MetricFindValue::new("2m", "2m")]);
    }

    #[test]
    fn test_static_options_fill_missing_side() {
        let var = definition(json!({"type": "textbox", "options": [
            {"text": "only-text"},
            {"value": "only-value"},
            {"text": ["multi"], "value": ["m1", "m2"]},
            {}
        ]}));
        assert_eq!(
            local_options(&var),
            vec![
                MetricFindValue::new("only-text", "only-text"),
                MetricFindValue::new("only-value", "only-value"),
                MetricFindValue::new("multi", "m1"),
            ]
        );
    }

    #[test]
    fn test_current_value_fallback() {
        let var = definition(json!({"type": "datasource", "current": {"text": ["A", "B"], "value": ["a", "b", ""]}}));
        assert_eq!(
            finalize_options(&var, Vec::new(), ""),
            vec![MetricFindValue::new("A", "a"), MetricFindValue::new("B", "b")]
        );

        let var = definition(json!({"type": "datasource", "current": {"value": "solo"}}));
        assert_eq!(finalize_options(&var, Vec::new(), ""), vec![MetricFindValue::new("solo", "solo")]);

        let var = definition(json!({"type": "datasource"}));
        assert!(finalize_options(&var, Vec::new(), "").is_empty());
    }

    #[test]
    fn test_search_filter_is_case_insensitive() {
        let options = vec![
            MetricFindValue::new("server1", "10.0.0.1"),
            MetricFindValue::new("other", "SERVICE"),
            MetricFindValue::new("other", "x"),
        ];
        let var = VariableDefinition::default();
        assert_eq!(
            finalize_options(&var, options, "Serv"),
            vec![MetricFindValue::new("server1", "10.0.0.1"), MetricFindValue::new("other", "SERVICE")]
        );
    }

    #[test]
    fn test_build_variable_query_interpolates_dependencies() {
        let var = find_variable(&document(), "server").unwrap();
        let others: VariableValueMap = serde_json::from_value(json!({"env": "prod"})).unwrap();

        let query = build_variable_query(&var, &others).unwrap();
        let expected = "label_values(up{env=\"prod\"}, instance)";
        assert_eq!(query["refId"], "A");
        assert_eq!(query["datasource"], json!({"type": "prometheus", "uid": "prom"}));
        assert_eq!(query["query"], expected);
        assert_eq!(query["expr"], expected);
        assert_eq!(query["rawSql"], expected);
        assert_eq!(query["rawQuery"], true);
    }

    #[test]
    fn test_build_variable_query_string_form_and_missing_datasource() {
        let var = definition(json!({"type": "query", "datasource": "legacy-ds", "query": "SHOW TAG VALUES"}));
        let query = build_variable_query(&var, &VariableValueMap::new()).unwrap();
        assert_eq!(query["refId"], "A");
        assert_eq!(query["query"], "SHOW TAG VALUES");

        let var = definition(json!({"type": "query", "query": "up"}));
        assert!(build_variable_query(&var, &VariableValueMap::new()).is_none());
    }
}
