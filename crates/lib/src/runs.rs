//! Run listing, detail, QC metrics and report links.

use crate::api::endpoints::{self, RunId};
use crate::api::{ApiClient, ApiError, ApiRequest};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One pipeline run as listed by `GET /runs/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub pk: RunId,
    pub run_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub pipeline: String,
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub s3_report_key: String,
}

impl RunSummary {
    /// Chat is only offered for runs that finished successfully.
    pub fn is_chat_ready(&self) -> bool {
        matches!(self.status.to_uppercase().as_str(), "COMPLETED" | "SUCCEEDED")
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status.to_uppercase().as_str(), "FAILED" | "ERROR")
    }
}

/// `GET /runs/{id}/`: summary fields plus free-form metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunDetail {
    #[serde(flatten)]
    pub summary: RunSummary,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub normalized_context: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
struct MultiqcReport {
    multiqc_report_url: String,
}

/// Typed access to the run endpoints.
#[derive(Clone)]
pub struct RunsApi {
    client: ApiClient,
}

impl RunsApi {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    /// GET /runs/: with `refresh`, the backend re-syncs runs from the orchestrator first.
    pub async fn list_runs(&self, refresh: bool) -> Result<Vec<RunSummary>, ApiError> {
        let mut req = ApiRequest::get(endpoints::RUNS);
        if refresh {
            req = req.param("refresh", "true");
        }
        self.client.request_json(&req).await
    }

    pub async fn run_detail(&self, id: RunId) -> Result<RunDetail, ApiError> {
        self.client
            .request_json(&ApiRequest::get(endpoints::run_detail(id)))
            .await
    }

    /// GET /runs/{id}/metrics/: normalized QC metrics, passed through as JSON.
    pub async fn run_metrics(&self, id: RunId) -> Result<serde_json::Value, ApiError> {
        self.client
            .request_json(&ApiRequest::get(endpoints::run_metrics(id)))
            .await
    }

    /// GET /runs/{id}/multiqc-report/: returns a pre-signed URL to the HTML report.
    pub async fn multiqc_report_url(&self, id: RunId) -> Result<String, ApiError> {
        let report: MultiqcReport = self
            .client
            .request_json(&ApiRequest::get(endpoints::multiqc_report(id)))
            .await?;
        Ok(report.multiqc_report_url)
    }
}
