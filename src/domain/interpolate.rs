//! Template variable substitution.
//!
//! Only an allow-list of text fields is ever rewritten. Ids, types and flags
//! can contain `$`-looking substrings and must survive byte for byte.

use regex::{Captures, Regex};
use serde_json::Value;
use std::collections::HashMap;

use super::document::{deep_copy, rewrite_str, JsonExt, Outcome};
use super::{Dashboard, VariableValueMap};

/// Query fields that carry datasource query text.
pub const QUERY_TEXT_FIELDS: [&str; 16] = [
    "expr",
    "query",
    "rawQuery",
    "select",
    "from",
    "where",
    "group",
    "alias",
    "legendFormat",
    "format",
    "interval",
    "step",
    "measurement",
    "metric",
    "table",
    "database",
];

/// Substitutes `${name}` and `$name` placeholders in a single left-to-right
/// pass. Replacement text is never scanned again.
pub struct Interpolator {
    pattern: Option<Regex>,
    values: HashMap<String, String>,
}

impl Interpolator {
    pub fn new(vars: &VariableValueMap) -> Self {
        let values: HashMap<String, String> = vars
            .iter()
            .filter(|(name, _)| !name.is_empty())
            .filter_map(|(name, value)| render_value(value).map(|v| (name.clone(), v)))
            .collect();

        if values.is_empty() {
            return Self {
                pattern: None,
                values,
            };
        }

        // Longest names first so `$variable` is never taken as `$var` + "iable".
        let mut names: Vec<&str> = values.keys().map(String::as_str).collect();
        names.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        let alternatives = names
            .iter()
            .map(|n| regex::escape(n))
            .collect::<Vec<_>>()
            .join("|");

        let pattern = format!(r"\$\{{({alts})\}}|\$({alts})", alts = alternatives);
        let pattern = match Regex::new(&pattern) {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::warn!("Failed to compile variable pattern, skipping interpolation: {}", e);
                None
            }
        };

        Self { pattern, values }
    }

    pub fn is_empty(&self) -> bool {
        self.pattern.is_none()
    }

    pub fn interpolate(&self, text: &str) -> String {
        let Some(pattern) = &self.pattern else {
            return text.to_string();
        };

        pattern
            .replace_all(text, |caps: &Captures| {
                let name = match (caps.get(1), caps.get(2)) {
                    (Some(braced), _) => braced.as_str(),
                    // `$name` must end at an ASCII word boundary: `$host` is
                    // replaced before `é` but not before `_` or a digit.
                    (None, Some(bare)) if at_word_boundary(bare.as_str(), &text[bare.end()..]) => bare.as_str(),
                    _ => return caps[0].to_string(),
                };
                match self.values.get(name) {
                    Some(value) => value.clone(),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn at_word_boundary(name: &str, rest: &str) -> bool {
    let before = name.chars().next_back().map_or(false, is_word_char);
    let after = rest.chars().next().map_or(false, is_word_char);
    before != after
}

/// Convenience wrapper for one-off substitutions.
pub fn interpolate(text: &str, vars: &VariableValueMap) -> String {
    Interpolator::new(vars).interpolate(text)
}

/// String form of a variable value. `None` means the placeholder stays as is.
pub fn render_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(render_value)
                .collect::<Vec<_>>()
                .join(","),
        ),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Object(_) => Some(value.to_string()),
    }
}

/// Returns a copy of `dashboard` with variables substituted into the
/// allow-listed fields. The input is never modified; if it cannot be copied
/// the original comes back as `Outcome::Degraded`.
pub fn apply_template_variables(dashboard: &Dashboard, vars: &VariableValueMap) -> Outcome<Dashboard> {
    let mut data = match deep_copy(&dashboard.data) {
        Ok(data) => data,
        Err(cause) => {
            tracing::warn!(
                dashboard_uid = %dashboard.uid,
                "Failed to copy dashboard for variable interpolation, using original: {}",
                cause
            );
            return Outcome::Degraded(dashboard.clone(), cause);
        }
    };

    let interpolator = Interpolator::new(vars);
    interpolate_document(&mut data, &interpolator);

    Outcome::Ok(Dashboard {
        id: dashboard.id,
        uid: dashboard.uid.clone(),
        org_id: dashboard.org_id,
        title: interpolator.interpolate(&dashboard.title),
        data,
        created: dashboard.created,
        updated: dashboard.updated,
    })
}

/// Rewrites the allow-listed fields of `document` in place.
pub fn interpolate_document(document: &mut Value, interpolator: &Interpolator) {
    if interpolator.is_empty() {
        return;
    }

    rewrite_str(document, "title", |s| interpolator.interpolate(s));

    if let Some(panels) = document.get_mut("panels").and_then(Value::as_array_mut) {
        for panel in panels {
            interpolate_panel(panel, interpolator);
        }
    }

    if let Some(elements) = document.get_mut("elements").and_then(Value::as_object_mut) {
        for element in elements.values_mut() {
            interpolate_element(element, interpolator);
        }
    }
}

fn interpolate_panel(panel: &mut Value, interpolator: &Interpolator) {
    rewrite_str(panel, "title", |s| interpolator.interpolate(s));
    rewrite_str(panel, "description", |s| interpolator.interpolate(s));

    // Queries without their own datasource inherit this one.
    if let Some(datasource) = panel.get_mut("datasource") {
        rewrite_str(datasource, "uid", |s| interpolator.interpolate(s));
    }

    if let Some(targets) = panel.get_mut("targets").and_then(Value::as_array_mut) {
        for target in targets {
            interpolate_query(target, interpolator);
        }
    }

    // Rows carry their children here.
    if let Some(children) = panel.get_mut("panels").and_then(Value::as_array_mut) {
        for child in children {
            interpolate_panel(child, interpolator);
        }
    }
}

fn interpolate_element(element: &mut Value, interpolator: &Interpolator) {
    let Some(spec) = element.get_mut("spec") else {
        return;
    };

    rewrite_str(spec, "title", |s| interpolator.interpolate(s));
    rewrite_str(spec, "description", |s| interpolator.interpolate(s));

    if let Some(datasource) = spec.get_mut("datasource") {
        rewrite_str(datasource, "uid", |s| interpolator.interpolate(s));
        rewrite_str(datasource, "name", |s| interpolator.interpolate(s));
    }

    let Some(queries) = spec
        .path_mut(&["data", "spec", "queries"])
        .and_then(Value::as_array_mut)
    else {
        return;
    };

    for panel_query in queries {
        let Some(kind) = panel_query.path_mut(&["spec", "query"]) else {
            continue;
        };
        if let Some(datasource) = kind.get_mut("datasource") {
            rewrite_str(datasource, "name", |s| interpolator.interpolate(s));
        }
        if let Some(payload) = kind.get_mut("spec") {
            interpolate_query(payload, interpolator);
        }
    }
}

fn interpolate_query(query: &mut Value, interpolator: &Interpolator) {
    for field in QUERY_TEXT_FIELDS {
        rewrite_str(query, field, |s| interpolator.interpolate(s));
    }
    if let Some(datasource) = query.get_mut("datasource") {
        rewrite_str(datasource, "uid", |s| interpolator.interpolate(s));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(value: Value) -> VariableValueMap {
        serde_json::from_value(value).unwrap()
    }

    fn dashboard(data: Value) -> Dashboard {
        Dashboard {
            id: 1,
            uid: "test-uid".into(),
            org_id: 1,
            title: "Test".into(),
            data,
            created: None,
            updated: None,
        }
    }

    #[test]
    fn test_interpolate_placeholder_forms() {
        let cases = [
            ("SELECT * FROM t WHERE col = ${myVar}", json!({"myVar": "v"}), "SELECT * FROM t WHERE col = v"),
            ("SELECT * FROM t WHERE col = $myVar", json!({"myVar": "v"}), "SELECT * FROM t WHERE col = v"),
            (
                "SELECT $field FROM $table WHERE id = ${id}",
                json!({"field": "name", "table": "users", "id": "123"}),
                "SELECT name FROM users WHERE id = 123",
            ),
            ("IN (${values})", json!({"values": ["a", "b", "c"]}), "IN (a,b,c)"),
            ("LIMIT ${limit}", json!({"limit": 100}), "LIMIT 100"),
            ("enabled=${on}", json!({"on": true}), "enabled=true"),
            ("This has $variable not $var", json!({"var": "test"}), "This has $variable not test"),
            ("col = ${myVar}", json!({}), "col = ${myVar}"),
            ("col = ${my.var-name}", json!({"my.var-name": "v"}), "col = v"),
        ];

        for (text, values, expected) in cases {
            assert_eq!(interpolate(text, &vars(values)), expected, "text: {}", text);
        }
    }

    #[test]
    fn test_undefined_and_null_variables_are_left_alone() {
        let values = vars(json!({"defined_var": "value", "null_var": null}));
        assert_eq!(
            interpolate(r#"up{a="${undefined_var}",b="${null_var}",c="$null_var"}"#, &values),
            r#"up{a="${undefined_var}",b="${null_var}",c="$null_var"}"#
        );
    }

    #[test]
    fn test_substituted_text_is_not_rescanned() {
        let values = vars(json!({"a": "$b", "b": "boom"}));
        assert_eq!(interpolate("${a} $b", &values), "$b boom");
    }

    #[test]
    fn test_bare_placeholder_boundary_is_ascii() {
        let values = vars(json!({"host": "web1"}));
        assert_eq!(interpolate("$hosté $host_x $host1 $host.", &values), "web1é $host_x $host1 web1.");

        let dotted = vars(json!({"svc.": "api"}));
        assert_eq!(interpolate("$svc.v1 $svc. done", &dotted), "apiv1 $svc. done");
    }

    #[test]
    fn test_longer_names_win_over_prefixes() {
        let values = vars(json!({"var": "short", "variable": "long"}));
        assert_eq!(interpolate("$variable $var", &values), "long short");
    }

    #[test]
    fn test_apply_to_complex_dashboard() {
        let original = dashboard(json!({
            "title": "Dashboard with ${env} environment",
            "panels": [{
                "id": 1,
                "type": "timeseries",
                "title": "Panel for ${service}",
                "description": "$service details",
                "datasource": {"type": "prometheus", "uid": "${ds}"},
                "targets": [
                    {
                        "expr": "rate(${metric}[${interval}])",
                        "legendFormat": "${service} - {{instance}}",
                        "refId": "A"
                    },
                    {"expr": "up{service=~\"${services}\"}", "refId": "B"}
                ]
            }]
        }));
        let values = vars(json!({
            "env": "production",
            "service": "api-service",
            "metric": "http_requests_total",
            "interval": "5m",
            "services": ["api", "web", "worker"],
            "ds": "prom-1"
        }));

        let result = apply_template_variables(&original, &values);
        assert!(!result.is_degraded());
        let result = result.into_inner();

        assert_eq!(result.data["title"], "Dashboard with production environment");
        let panel = &result.data["panels"][0];
        assert_eq!(panel["title"], "Panel for api-service");
        assert_eq!(panel["description"], "api-service details");
        assert_eq!(panel["datasource"]["uid"], "prom-1");
        assert_eq!(panel["targets"][0]["expr"], "rate(http_requests_total[5m])");
        assert_eq!(panel["targets"][0]["legendFormat"], "api-service - {{instance}}");
        assert_eq!(panel["targets"][1]["expr"], "up{service=~\"api,web,worker\"}");
    }

    #[test]
    fn test_input_document_is_not_mutated() {
        let original = dashboard(json!({
            "title": "${env}",
            "panels": [{"id": 1, "targets": [{"expr": "up{instance=\"${server}\"}"}]}]
        }));
        let before = serde_json::to_string(&original.data).unwrap();

        let result = apply_template_variables(&original, &vars(json!({"env": "prod", "server": "localhost:9090"})))
            .into_inner();

        assert_eq!(serde_json::to_string(&original.data).unwrap(), before);
        assert_ne!(result.data, original.data);
        assert_eq!(
            result.data["panels"][0]["targets"][0]["expr"],
            "up{instance=\"localhost:9090\"}"
        );
    }

    #[test]
    fn test_fields_outside_allow_list_are_untouched() {
        let original = dashboard(json!({
            "uid": "$env",
            "panels": [{
                "id": 1,
                "type": "$env",
                "targets": [{"refId": "$env", "rawSql": "SELECT $env", "expr": "$env", "hide": false}]
            }]
        }));

        let result = apply_template_variables(&original, &vars(json!({"env": "prod"}))).into_inner();
        let panel = &result.data["panels"][0];
        assert_eq!(result.data["uid"], "$env");
        assert_eq!(panel["type"], "$env");
        assert_eq!(panel["targets"][0]["refId"], "$env");
        assert_eq!(panel["targets"][0]["rawSql"], "SELECT $env");
        assert_eq!(panel["targets"][0]["expr"], "prod");
    }

    #[test]
    fn test_collapsed_row_children_are_interpolated() {
        let original = dashboard(json!({
            "panels": [{
                "id": 10,
                "type": "row",
                "collapsed": true,
                "panels": [{"id": 11, "title": "$host", "targets": [{"expr": "up{host=\"$host\"}"}]}]
            }]
        }));

        let result = apply_template_variables(&original, &vars(json!({"host": "db1"}))).into_inner();
        let child = &result.data["panels"][0]["panels"][0];
        assert_eq!(child["title"], "db1");
        assert_eq!(child["targets"][0]["expr"], "up{host=\"db1\"}");
    }

    #[test]
    fn test_v2_elements_are_interpolated() {
        let original = dashboard(json!({
            "elements": {
                "panel-1": {
                    "kind": "Panel",
                    "spec": {
                        "id": 1,
                        "title": "CPU on $host",
                        "datasource": {"name": "${ds}"},
                        "data": {"kind": "QueryGroup", "spec": {"queries": [{
                            "kind": "PanelQuery",
                            "spec": {
                                "refId": "$host",
                                "query": {
                                    "kind": "DataQuery",
                                    "group": "prometheus",
                                    "datasource": {"name": "${ds}"},
                                    "spec": {"expr": "cpu{host=\"$host\"}", "datasource": {"uid": "$ds"}}
                                }
                            }
                        }]}}
                    }
                }
            }
        }));

        let result = apply_template_variables(&original, &vars(json!({"host": "web1", "ds": "prom"})))
            .into_inner();
        let spec = &result.data["elements"]["panel-1"]["spec"];
        assert_eq!(spec["title"], "CPU on web1");
        assert_eq!(spec["datasource"]["name"], "prom");

        let panel_query = &spec["data"]["spec"]["queries"][0]["spec"];
        assert_eq!(panel_query["refId"], "$host");
        assert_eq!(panel_query["query"]["datasource"]["name"], "prom");
        assert_eq!(panel_query["query"]["spec"]["expr"], "cpu{host=\"web1\"}");
        assert_eq!(panel_query["query"]["spec"]["datasource"]["uid"], "prom");
    }

    #[test]
    fn test_uncopyable_document_degrades_to_original() {
        let mut nested = json!({"expr": "$x"});
        for _ in 0..200 {
            nested = json!({"panels": [nested]});
        }
        let original = dashboard(nested);

        let result = apply_template_variables(&original, &vars(json!({"x": "y"})));
        assert!(result.is_degraded());
        assert!(result.cause().is_some());
        assert_eq!(result.into_inner(), original);
    }
}
