use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use super::extraction::strategy_for;
use super::time_window::{resolve_time_window, safe_interval_and_max_data_points};
use super::validation::validate_query_request;
use super::{DomainError, MetricRequest, PublicDashboard, PublicDashboardQuery};

/// Builds the request for one panel of `document`.
///
/// An empty query list is not an error here; callers decide whether a panel
/// without queries is acceptable.
pub fn build_metric_request(
    document: &Value,
    public_dashboard: &PublicDashboard,
    panel_id: i64,
    query: &PublicDashboardQuery,
    now: DateTime<Utc>,
) -> Result<MetricRequest, DomainError> {
    validate_query_request(query, public_dashboard, now)?;

    let strategy = strategy_for(document);
    let mut queries = strategy
        .queries_by_panel(document)
        .remove(&panel_id)
        .ok_or_else(|| {
            DomainError::PanelNotFound(format!("public dashboard panel {} not found", panel_id))
        })?;

    let window = resolve_time_window(
        document,
        &query.time_range,
        panel_id,
        public_dashboard.time_selection_enabled,
        now,
    );

    let (interval_ms, max_data_points) = safe_interval_and_max_data_points(query, &window);
    for q in queries.iter_mut().filter_map(Value::as_object_mut) {
        q.insert("intervalMs".to_string(), json!(interval_ms));
        q.insert("maxDataPoints".to_string(), json!(max_data_points));
        q.insert("queryCachingTTL".to_string(), json!(query.query_caching_ttl));
    }

    Ok(MetricRequest {
        from: window.from,
        to: window.to,
        queries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TimeRangeDto;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap()
    }

    fn public_dashboard(time_selection_enabled: bool) -> PublicDashboard {
        PublicDashboard {
            uid: "pd".into(),
            access_token: "abc123".into(),
            dashboard_uid: "dash".into(),
            org_id: 1,
            is_enabled: true,
            time_selection_enabled,
            annotations_enabled: false,
        }
    }

    fn document() -> Value {
        json!({
            "time": {"from": "now-6h", "to": "now"},
            "panels": [
                {
                    "id": 1,
                    "datasource": {"type": "prometheus", "uid": "prom"},
                    "targets": [
                        {"refId": "A", "expr": "up", "exemplar": true},
                        {"refId": "B", "expr": "down", "hide": true}
                    ]
                },
                {"id": 2, "targets": []}
            ]
        })
    }

    #[test]
    fn test_builds_request_for_panel() {
        let query = PublicDashboardQuery {
            interval_ms: 60_000,
            max_data_points: 500,
            query_caching_ttl: 30,
            ..Default::default()
        };

        let req = build_metric_request(&document(), &public_dashboard(false), 1, &query, now()).unwrap();

        assert_eq!(req.from, (now() - Duration::hours(6)).timestamp_millis().to_string());
        assert_eq!(req.to, now().timestamp_millis().to_string());
        assert_eq!(req.queries.len(), 1);

        let q = &req.queries[0];
        assert_eq!(q["refId"], "A");
        assert!(q.get("exemplar").is_none());
        assert_eq!(q["datasource"], json!({"type": "public-ds", "uid": "prom"}));
        assert_eq!(q["intervalMs"], 60_000);
        assert_eq!(q["maxDataPoints"], 500);
        assert_eq!(q["queryCachingTTL"], 30);
    }

    #[test]
    fn test_unknown_panel_is_not_found() {
        let err = build_metric_request(&document(), &public_dashboard(false), 99, &PublicDashboardQuery::default(), now())
            .unwrap_err();
        assert!(matches!(err, DomainError::PanelNotFound(_)));
    }

    #[test]
    fn test_panel_without_queries_yields_empty_list() {
        let req = build_metric_request(&document(), &public_dashboard(false), 2, &PublicDashboardQuery::default(), now())
            .unwrap();
        assert!(req.queries.is_empty());
    }

    #[test]
    fn test_time_selection_disabled_ignores_caller_range() {
        let query = PublicDashboardQuery {
            time_range: TimeRangeDto {
                from: "now-1h".into(),
                to: "now".into(),
                timezone: "UTC".into(),
            },
            ..Default::default()
        };

        let disabled = build_metric_request(&document(), &public_dashboard(false), 1, &query, now()).unwrap();
        assert_eq!(disabled.from, (now() - Duration::hours(6)).timestamp_millis().to_string());

        let enabled = build_metric_request(&document(), &public_dashboard(true), 1, &query, now()).unwrap();
        assert_eq!(enabled.from, (now() - Duration::hours(1)).timestamp_millis().to_string());
    }
}
