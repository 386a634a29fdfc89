use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::{
    domain::{
        frames::extract_options,
        time_window::trailing_window,
        variables::{build_variable_query, finalize_options, local_options, VariableDefinition, VariableKind},
        Dashboard, MetricFindValue, MetricRequest, PublicDashboard, ServiceIdentity, VariableValueMap,
    },
    ports::QueryDataService,
};

/// Query variables look back one hour.
const VARIABLE_QUERY_WINDOW: &str = "now-1h";

/// Resolves the option list of a single template variable.
///
/// Never fails: a variable picker that cannot be populated renders with its
/// current selection instead of breaking the dashboard.
pub struct VariableOptionResolver {
    query_data: Arc<dyn QueryDataService>,
}

impl VariableOptionResolver {
    pub fn new(query_data: Arc<dyn QueryDataService>) -> Self {
        Self { query_data }
    }

    pub async fn resolve(
        &self,
        cancel: &CancellationToken,
        dashboard: &Dashboard,
        public_dashboard: &PublicDashboard,
        definition: &VariableDefinition,
        other_variables: &VariableValueMap,
        search_filter: &str,
    ) -> Vec<MetricFindValue> {
        let options = match definition.kind {
            VariableKind::Query => {
                self.query_options(cancel, dashboard, public_dashboard, definition, other_variables)
                    .await
            }
            _ => local_options(definition),
        };

        finalize_options(definition, options, search_filter)
    }

    async fn query_options(
        &self,
        cancel: &CancellationToken,
        dashboard: &Dashboard,
        public_dashboard: &PublicDashboard,
        definition: &VariableDefinition,
        other_variables: &VariableValueMap,
    ) -> Vec<MetricFindValue> {
        let Some(query) = build_variable_query(definition, other_variables) else {
            tracing::warn!(
                dashboard_uid = %dashboard.uid,
                public_dashboard_uid = %public_dashboard.uid,
                variable = %definition.name,
                "Query variable has no datasource, skipping execution"
            );
            return Vec::new();
        };

        let window = trailing_window(VARIABLE_QUERY_WINDOW, Utc::now());
        let request = MetricRequest {
            from: window.from,
            to: window.to,
            queries: vec![query],
        };
        let identity = ServiceIdentity {
            org_id: dashboard.org_id,
        };

        let result = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::warn!(variable = %definition.name, "Variable query cancelled");
                return Vec::new();
            }
            result = self.query_data.query_data(&identity, false, &request) => result,
        };

        match result {
            Ok(response) => {
                let options = extract_options(&response);
                tracing::debug!(
                    variable = %definition.name,
                    datasource_type = %definition.datasource_type(),
                    "Variable query returned {} options",
                    options.len()
                );
                options
            }
            Err(e) => {
                tracing::warn!(
                    variable = %definition.name,
                    datasource_uid = %definition.datasource_uid(),
                    backend = self.query_data.backend_name(),
                    "Variable query failed: {}",
                    e
                );
                Vec::new()
            }
        }
    }
}
