pub mod variables;

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::{
    domain::{
        document::{deep_copy, Outcome},
        extraction::sanitize_document,
        frames::{sanitize_metadata, QueryDataResponse},
        interpolate::apply_template_variables,
        metric_request::build_metric_request,
        validation::{validate_access_token, validate_variable_name},
        variables::find_variable,
        Dashboard, DomainError, MetricFindValue, MetricRequest, PublicDashboard, PublicDashboardQuery,
        ServiceIdentity, VariableQueryRequest, VariableValueMap,
    },
    ports::{PublicDashboardStore, QueryDataService},
};

use self::variables::VariableOptionResolver;

pub struct PublicDashboardService {
    store: Arc<dyn PublicDashboardStore>,
    query_data: Arc<dyn QueryDataService>,
}

impl PublicDashboardService {
    pub fn new(store: Arc<dyn PublicDashboardStore>, query_data: Arc<dyn QueryDataService>) -> Self {
        Self { store, query_data }
    }

    pub async fn find_enabled_public_dashboard_and_dashboard(
        &self,
        access_token: &str,
    ) -> Result<(PublicDashboard, Dashboard), DomainError> {
        validate_access_token(access_token)?;

        let public_dashboard = self
            .store
            .find_by_access_token(access_token)
            .await?
            .ok_or_else(|| {
                tracing::debug!(store = self.store.store_name(), "Unknown access token");
                DomainError::PublicDashboardNotFound(format!("no public dashboard for token {}", access_token))
            })?;

        if !public_dashboard.is_enabled {
            return Err(DomainError::PublicDashboardDisabled(public_dashboard.uid));
        }

        let dashboard = self
            .store
            .find_dashboard(public_dashboard.org_id, &public_dashboard.dashboard_uid)
            .await?
            .ok_or_else(|| DomainError::DashboardNotFound(public_dashboard.dashboard_uid.clone()))?;

        Ok((public_dashboard, dashboard))
    }

    pub fn get_metric_request(
        &self,
        dashboard: &Dashboard,
        public_dashboard: &PublicDashboard,
        panel_id: i64,
        query: &PublicDashboardQuery,
    ) -> Result<MetricRequest, DomainError> {
        build_metric_request(&dashboard.data, public_dashboard, panel_id, query, Utc::now())
    }

    /// Builds the metric request for a panel after applying the caller's
    /// variables, without executing it.
    pub async fn build_panel_request(
        &self,
        access_token: &str,
        panel_id: i64,
        query: &PublicDashboardQuery,
    ) -> Result<(Dashboard, MetricRequest), DomainError> {
        let (public_dashboard, dashboard) = self.find_enabled_public_dashboard_and_dashboard(access_token).await?;
        let dashboard = with_variables(dashboard, query.variables.as_ref());
        let request = self.get_metric_request(&dashboard, &public_dashboard, panel_id, query)?;
        Ok((dashboard, request))
    }

    pub async fn get_query_data_response(
        &self,
        cancel: &CancellationToken,
        skip_cache: bool,
        query: &PublicDashboardQuery,
        panel_id: i64,
        access_token: &str,
    ) -> Result<QueryDataResponse, DomainError> {
        tracing::info!(panel_id, "Running public dashboard panel query");

        let (dashboard, request) = self.build_panel_request(access_token, panel_id, query).await?;
        if request.queries.is_empty() {
            return Err(DomainError::PanelQueriesNotFound(format!(
                "panel {} has no queries to run",
                panel_id
            )));
        }

        // Queries run as the dashboard's organization.
        let identity = ServiceIdentity {
            org_id: dashboard.org_id,
        };
        let datasource_types = request.unique_datasource_types();

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(DomainError::Cancelled(format!("panel {} query", panel_id))),
            result = self.query_data.query_data(&identity, skip_cache, &request) => result,
        };

        match result {
            Ok(mut response) => {
                tracing::info!(
                    panel_id,
                    datasource_types = ?datasource_types,
                    backend = self.query_data.backend_name(),
                    "Public dashboard query succeeded"
                );
                sanitize_metadata(&mut response);
                Ok(response)
            }
            Err(e) => {
                tracing::warn!(
                    panel_id,
                    datasource_types = ?datasource_types,
                    backend = self.query_data.backend_name(),
                    "Public dashboard query failed: {}",
                    e
                );
                Err(e)
            }
        }
    }

    pub async fn get_variable_query_response(
        &self,
        cancel: &CancellationToken,
        access_token: &str,
        variable_name: &str,
        request: &VariableQueryRequest,
    ) -> Result<Vec<MetricFindValue>, DomainError> {
        validate_variable_name(variable_name)?;
        tracing::info!(variable = variable_name, "Resolving public dashboard variable");

        let (public_dashboard, dashboard) = self.find_enabled_public_dashboard_and_dashboard(access_token).await?;
        let definition = find_variable(&dashboard.data, variable_name)?;

        let empty = VariableValueMap::new();
        let other_variables = request.variables.as_ref().unwrap_or(&empty);

        let resolver = VariableOptionResolver::new(Arc::clone(&self.query_data));
        Ok(resolver
            .resolve(
                cancel,
                &dashboard,
                &public_dashboard,
                &definition,
                other_variables,
                &request.search_filter,
            )
            .await)
    }

    /// The dashboard document with every query's text removed.
    pub async fn get_public_dashboard_view(&self, access_token: &str) -> Result<Value, DomainError> {
        let (_, dashboard) = self.find_enabled_public_dashboard_and_dashboard(access_token).await?;
        let mut document = deep_copy(&dashboard.data)?;
        sanitize_document(&mut document);
        Ok(document)
    }
}

fn with_variables(dashboard: Dashboard, variables: Option<&VariableValueMap>) -> Dashboard {
    let Some(variables) = variables.filter(|v| !v.is_empty()) else {
        return dashboard;
    };

    match apply_template_variables(&dashboard, variables) {
        Outcome::Ok(interpolated) => interpolated,
        Outcome::Degraded(original, cause) => {
            tracing::warn!(
                dashboard_uid = %original.uid,
                "Template variables not applied, using original dashboard: {}",
                cause
            );
            original
        }
    }
}
