//! Outbound call to the external analytics generator.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use insight_core::config::GatewayConfig;
use insight_core::{DashboardError, DashboardResult};
use serde::Serialize;
use tracing::{error, info};
use url::Url;
use uuid::Uuid;

use crate::normalize::{normalize_response, NormalizedResponse};

/// Body of one generator invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayRequest {
    /// Internal property id the normalized rows are keyed by. Not sent.
    #[serde(skip)]
    pub property_id: String,
    pub account_external_id: String,
    pub property_external_id: String,
    pub date_start: NaiveDate,
    pub date_end: NaiveDate,
    pub run_id: Uuid,
}

/// Source of externally generated web-analytics rows.
#[async_trait]
pub trait AnalyticsGateway: Send + Sync {
    async fn fetch(&self, request: &GatewayRequest) -> DashboardResult<NormalizedResponse>;
}

/// reqwest-backed gateway. One POST per call, hard-aborted after the
/// configured timeout.
pub struct HttpAnalyticsGateway {
    client: reqwest::Client,
    endpoint: Option<Url>,
    timeout: Duration,
}

impl HttpAnalyticsGateway {
    pub fn new(config: &GatewayConfig) -> DashboardResult<Self> {
        let endpoint = config
            .url
            .as_deref()
            .map(Url::parse)
            .transpose()
            .map_err(|e| DashboardError::config(format!("invalid analytics gateway url: {e}")))?;

        if endpoint.is_none() {
            info!("Analytics gateway url not set; cache misses will fail until configured");
        }

        Ok(Self {
            client: reqwest::Client::new(),
            endpoint,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn exchange(&self, endpoint: Url, request: &GatewayRequest) -> DashboardResult<String> {
        let response = self
            .client
            .post(endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| DashboardError::upstream(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DashboardError::upstream(format!(
                "analytics service answered {status}"
            )));
        }

        response
            .text()
            .await
            .map_err(|e| DashboardError::upstream(e.to_string()))
    }

    async fn fetch_normalized(
        &self,
        endpoint: Url,
        request: &GatewayRequest,
    ) -> DashboardResult<NormalizedResponse> {
        let body = tokio::time::timeout(self.timeout, self.exchange(endpoint, request))
            .await
            .map_err(|_| {
                DashboardError::upstream(format!("timed out after {}s", self.timeout.as_secs()))
            })??;

        let value: serde_json::Value = serde_json::from_str(&body)
            .map_err(|e| DashboardError::format(format!("response is not JSON: {e}")))?;
        normalize_response(&value, &request.property_id)
    }
}

#[async_trait]
impl AnalyticsGateway for HttpAnalyticsGateway {
    async fn fetch(&self, request: &GatewayRequest) -> DashboardResult<NormalizedResponse> {
        let endpoint = self
            .endpoint
            .clone()
            .ok_or_else(|| DashboardError::config("analytics gateway url is not configured"))?;

        metrics::counter!("gateway.fetches").increment(1);
        let started = std::time::Instant::now();

        match self.fetch_normalized(endpoint, request).await {
            Ok(normalized) => {
                info!(
                    run_id = %request.run_id,
                    property_id = %request.property_id,
                    rows = normalized.snapshot.row_count(),
                    rejected = normalized.rejected.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Analytics gateway call completed"
                );
                Ok(normalized)
            }
            Err(e) => {
                metrics::counter!("gateway.fetch_errors", "kind" => e.kind()).increment(1);
                error!(
                    error = %e,
                    kind = e.kind(),
                    run_id = %request.run_id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Analytics gateway call failed"
                );
                Err(e)
            }
        }
    }
}
