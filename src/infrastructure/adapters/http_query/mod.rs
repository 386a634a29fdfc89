use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::{
    domain::{
        frames::{DataResponse, Field, Frame, FrameMeta, QueryDataResponse},
        DomainError, MetricRequest, ServiceIdentity,
    },
    ports::QueryDataService,
};

const QUERY_PATH: &str = "/api/ds/query";
const ORG_ID_HEADER: &str = "X-Grafana-Org-Id";
const CACHE_SKIP_HEADER: &str = "X-Cache-Skip";

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    results: BTreeMap<String, WireResult>,
}

#[derive(Debug, Deserialize)]
struct WireResult {
    #[serde(default)]
    frames: Vec<WireFrame>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WireFrame {
    #[serde(default)]
    schema: WireSchema,
    #[serde(default)]
    data: WireData,
}

#[derive(Debug, Default, Deserialize)]
struct WireSchema {
    #[serde(default)]
    name: String,
    #[serde(default)]
    fields: Vec<WireField>,
    #[serde(default)]
    meta: Option<FrameMeta>,
}

#[derive(Debug, Deserialize)]
struct WireField {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct WireData {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

/// Executes metric requests against a remote `/api/ds/query` endpoint.
pub struct HttpQueryAdapter {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpQueryAdapter {
    pub fn new(base_url: &str, token: Option<&str>, timeout: Duration) -> Result<Self, DomainError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = token {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", token))
                    .map_err(|e| DomainError::QueryExecution(e.to_string()))?,
            );
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| DomainError::QueryExecution(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}{}", base_url.trim_end_matches('/'), QUERY_PATH),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn decode_response(wire: WireResponse) -> QueryDataResponse {
    let responses = wire
        .results
        .into_iter()
        .map(|(ref_id, result)| {
            let frames = result.frames.into_iter().map(decode_frame).collect();
            (
                ref_id,
                DataResponse {
                    frames,
                    error: result.error.filter(|e| !e.is_empty()),
                },
            )
        })
        .collect();
    QueryDataResponse { responses }
}

/// Columns arrive as a schema plus a parallel array of value columns.
fn decode_frame(wire: WireFrame) -> Frame {
    let mut columns = wire.data.values.into_iter();
    let fields = wire
        .schema
        .fields
        .into_iter()
        .map(|field| Field::new(field.name, columns.next().unwrap_or_default()))
        .collect();

    Frame {
        name: wire.schema.name,
        fields,
        meta: wire.schema.meta,
    }
}

#[async_trait]
impl QueryDataService for HttpQueryAdapter {
    async fn query_data(
        &self,
        identity: &ServiceIdentity,
        skip_cache: bool,
        request: &MetricRequest,
    ) -> Result<QueryDataResponse, DomainError> {
        let mut builder = self
            .client
            .post(&self.endpoint)
            .header(ORG_ID_HEADER, identity.org_id.to_string())
            .json(request);
        if skip_cache {
            builder = builder.header(CACHE_SKIP_HEADER, "true");
        }

        let response = builder
            .send()
            .await
            .map_err(|e| DomainError::QueryExecution(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| DomainError::QueryExecution(e.to_string()))?;

        // Failed queries still come back with per-refId errors in the body.
        let backend_error = || DomainError::QueryExecution(format!("query backend returned {}: {}", status, body));
        match serde_json::from_str::<WireResponse>(&body) {
            Ok(wire) if status.is_success() || !wire.results.is_empty() => Ok(decode_response(wire)),
            Ok(_) => Err(backend_error()),
            Err(_) if !status.is_success() => Err(backend_error()),
            Err(e) => Err(DomainError::QueryExecution(format!("invalid query response: {}", e))),
        }
    }

    fn backend_name(&self) -> &'static str {
        "http"
    }
}
