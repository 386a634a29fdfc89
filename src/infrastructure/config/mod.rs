use anyhow::{anyhow, Context, Result};
use std::{env, path::PathBuf, time::Duration};

pub const STORE_PATH_VAR: &str = "PUBDASH_STORE_PATH";
pub const QUERY_URL_VAR: &str = "PUBDASH_QUERY_URL";
pub const QUERY_TOKEN_VAR: &str = "PUBDASH_QUERY_TOKEN";
pub const QUERY_TIMEOUT_VAR: &str = "PUBDASH_QUERY_TIMEOUT_SECS";

const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub store_path: PathBuf,
    pub query_url: Option<String>,
    pub query_token: Option<String>,
    pub query_timeout: Duration,
}

impl Settings {
    /// Reads settings from the process environment. Call `dotenv()` first to
    /// pick up a `.env` file.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let store_path = non_empty(STORE_PATH_VAR)
            .map(PathBuf::from)
            .ok_or_else(|| anyhow!("{} must be set", STORE_PATH_VAR))?;

        let query_timeout = match non_empty(QUERY_TIMEOUT_VAR) {
            Some(raw) => raw
                .parse::<u64>()
                .with_context(|| format!("{} must be a whole number of seconds, got {:?}", QUERY_TIMEOUT_VAR, raw))?,
            None => DEFAULT_QUERY_TIMEOUT_SECS,
        };

        Ok(Self {
            store_path,
            query_url: non_empty(QUERY_URL_VAR),
            query_token: non_empty(QUERY_TOKEN_VAR),
            query_timeout: Duration::from_secs(query_timeout),
        })
    }

    pub fn require_query_url(&self) -> Result<&str> {
        self.query_url
            .as_deref()
            .ok_or_else(|| anyhow!("{} must be set to run queries", QUERY_URL_VAR))
    }
}
