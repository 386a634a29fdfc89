use crate::domain::frames::QueryDataResponse;
use crate::domain::{Dashboard, DomainError, MetricRequest, PublicDashboard, ServiceIdentity};
use async_trait::async_trait;

#[async_trait]
pub trait PublicDashboardStore: Send + Sync {
    async fn find_by_access_token(&self, access_token: &str) -> Result<Option<PublicDashboard>, DomainError>;
    async fn find_dashboard(&self, org_id: i64, uid: &str) -> Result<Option<Dashboard>, DomainError>;
    fn store_name(&self) -> &'static str;
}

/// Executes datasource queries. Implementations must not retry.
#[async_trait]
pub trait QueryDataService: Send + Sync {
    async fn query_data(
        &self,
        identity: &ServiceIdentity,
        skip_cache: bool,
        request: &MetricRequest,
    ) -> Result<QueryDataResponse, DomainError>;
    fn backend_name(&self) -> &'static str;
}
