use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::{
    domain::{Dashboard, DomainError, PublicDashboard},
    ports::PublicDashboardStore,
};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoreFile {
    #[serde(default)]
    dashboards: Vec<Dashboard>,
    #[serde(default)]
    public_dashboards: Vec<PublicDashboard>,
}

/// Read-only store backed by a single JSON file, loaded once at open.
pub struct FileStoreAdapter {
    path: PathBuf,
    contents: StoreFile,
}

impl FileStoreAdapter {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, DomainError> {
        let path = path.as_ref().to_path_buf();
        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| DomainError::Store(format!("failed to read {}: {}", path.display(), e)))?;
        let contents: StoreFile = serde_json::from_str(&raw)
            .map_err(|e| DomainError::Store(format!("failed to parse {}: {}", path.display(), e)))?;

        tracing::debug!(
            path = %path.display(),
            "Loaded {} dashboards and {} public dashboards",
            contents.dashboards.len(),
            contents.public_dashboards.len()
        );

        Ok(Self { path, contents })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PublicDashboardStore for FileStoreAdapter {
    async fn find_by_access_token(&self, access_token: &str) -> Result<Option<PublicDashboard>, DomainError> {
        Ok(self
            .contents
            .public_dashboards
            .iter()
            .find(|pd| pd.access_token == access_token)
            .cloned())
    }

    async fn find_dashboard(&self, org_id: i64, uid: &str) -> Result<Option<Dashboard>, DomainError> {
        Ok(self
            .contents
            .dashboards
            .iter()
            .find(|d| d.org_id == org_id && d.uid == uid)
            .cloned())
    }

    fn store_name(&self) -> &'static str {
        "file"
    }
}
