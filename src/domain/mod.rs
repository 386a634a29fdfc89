pub mod document;
pub mod extraction;
pub mod frames;
pub mod interpolate;
pub mod metric_request;
pub mod time_window;
pub mod validation;
pub mod variables;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

/// Request-scoped variable values, keyed by variable name. A value is either a
/// scalar or an array for multi-value selections.
pub type VariableValueMap = HashMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    #[serde(default)]
    pub id: i64,
    pub uid: String,
    #[serde(default)]
    pub org_id: i64,
    #[serde(default)]
    pub title: String,
    pub data: Value,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicDashboard {
    pub uid: String,
    pub access_token: String,
    pub dashboard_uid: String,
    #[serde(default)]
    pub org_id: i64,
    #[serde(default)]
    pub is_enabled: bool,
    #[serde(default)]
    pub time_selection_enabled: bool,
    #[serde(default)]
    pub annotations_enabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeRangeDto {
    pub from: String,
    pub to: String,
    pub timezone: String,
}

/// Body of a panel query request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PublicDashboardQuery {
    pub interval_ms: i64,
    pub max_data_points: i64,
    #[serde(rename = "queryCachingTTL")]
    pub query_caching_ttl: i64,
    pub time_range: TimeRangeDto,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variables: Option<VariableValueMap>,
}

/// Body of a variable options request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VariableQueryRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variables: Option<VariableValueMap>,
    pub search_filter: String,
}

/// Queries for a single panel, ready to be handed to query execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricRequest {
    pub from: String,
    pub to: String,
    pub queries: Vec<Value>,
}

impl MetricRequest {
    pub fn unique_datasource_types(&self) -> Vec<String> {
        let types: BTreeSet<String> = self
            .queries
            .iter()
            .filter_map(|q| q.get("datasource"))
            .filter_map(|ds| ds.get("type"))
            .filter_map(|t| t.as_str())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        types.into_iter().collect()
    }
}

/// Absolute query window. `from` and `to` are epoch milliseconds.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeWindow {
    pub from: String,
    pub to: String,
    pub timezone: Tz,
}

impl TimeWindow {
    pub fn span_ms(&self) -> i64 {
        let from = self.from.parse::<i64>().unwrap_or_default();
        let to = self.to.parse::<i64>().unwrap_or_default();
        (to - from).max(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricFindValue {
    pub text: String,
    pub value: String,
}

impl MetricFindValue {
    pub fn new(text: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            value: value.into(),
        }
    }
}

/// Identity used against the query backend. Public dashboards have no signed
/// in user, so queries run as the owning organization's service identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceIdentity {
    pub org_id: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error("Panel not found: {0}")]
    PanelNotFound(String),

    #[error("Variable not found: {0}")]
    VariableNotFound(String),

    #[error("Public dashboard not found: {0}")]
    PublicDashboardNotFound(String),

    #[error("Dashboard not found: {0}")]
    DashboardNotFound(String),

    #[error("Public dashboard is disabled: {0}")]
    PublicDashboardDisabled(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Invalid access token: {0}")]
    InvalidAccessToken(String),

    #[error("Invalid panel id: {0}")]
    InvalidPanelId(String),

    #[error("Invalid time range: {0}")]
    InvalidTimeRange(String),

    #[error("Internal server error: {0}")]
    InternalServerError(String),

    #[error("Panel queries not found: {0}")]
    PanelQueriesNotFound(String),

    #[error("Query execution failed: {0}")]
    QueryExecution(String),

    #[error("Request cancelled: {0}")]
    Cancelled(String),

    #[error("Store error: {0}")]
    Store(String),
}

impl DomainError {
    /// HTTP status the transport layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            DomainError::PanelNotFound(_)
            | DomainError::VariableNotFound(_)
            | DomainError::PublicDashboardNotFound(_)
            | DomainError::DashboardNotFound(_) => 404,
            DomainError::PublicDashboardDisabled(_) => 403,
            DomainError::BadRequest(_)
            | DomainError::InvalidAccessToken(_)
            | DomainError::InvalidPanelId(_)
            | DomainError::InvalidTimeRange(_)
            | DomainError::PanelQueriesNotFound(_) => 400,
            DomainError::QueryExecution(_) => 502,
            DomainError::Cancelled(_) => 499,
            DomainError::InternalServerError(_) | DomainError::Store(_) => 500,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status_code() == 404
    }
}
