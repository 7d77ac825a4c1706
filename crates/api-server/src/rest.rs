//! REST handlers for the dashboard metrics endpoints and operational probes.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::QueryRejection;
use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::NaiveDate;
use insight_core::types::{
    AggregatedCampaignRecord, CampaignAggregationQuery, ImportRun, MetricsQuery,
};
use insight_core::DashboardError;
use insight_gateway::AnalyticsGateway;
use insight_reporting::{
    CampaignAggregationService, DirectMailMetricsService, EmailMetricsReport,
    EmailMetricsService, MailMetricsReport, WebMetricsReport, WebMetricsService,
};
use insight_store::MetricsStore;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub web: Arc<WebMetricsService>,
    pub email: Arc<EmailMetricsService>,
    pub direct_mail: Arc<DirectMailMetricsService>,
    pub campaigns: Arc<CampaignAggregationService>,
    pub start_time: Instant,
}

impl AppState {
    /// Wire every service onto one store and one gateway.
    pub fn new(store: Arc<dyn MetricsStore>, gateway: Arc<dyn AnalyticsGateway>) -> Self {
        let email = Arc::new(EmailMetricsService::new(store.clone()));
        let direct_mail = Arc::new(DirectMailMetricsService::new(store.clone()));
        let campaigns = Arc::new(CampaignAggregationService::new(
            email.clone(),
            direct_mail.clone(),
        ));
        Self {
            web: Arc::new(WebMetricsService::new(store, gateway)),
            email,
            direct_mail,
            campaigns,
            start_time: Instant::now(),
        }
    }
}

/// `?from=YYYY-MM-DD&to=YYYY-MM-DD[&user_id=...]`
#[derive(Debug, Deserialize)]
pub struct RangeParams {
    pub from: NaiveDate,
    pub to: NaiveDate,
    #[serde(default)]
    pub user_id: Option<String>,
}

impl RangeParams {
    fn into_query(self, owner_id: String) -> MetricsQuery {
        MetricsQuery {
            owner_id,
            from: self.from,
            to: self.to,
            requested_by: self.user_id,
        }
    }
}

/// Maps a [`DashboardError`] onto its HTTP status and a JSON body.
#[derive(Debug)]
pub struct ApiError(pub DashboardError);

impl From<DashboardError> for ApiError {
    fn from(err: DashboardError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!(error = %self.0, kind = self.0.kind(), "Request failed");
        } else {
            warn!(error = %self.0, kind = self.0.kind(), "Request rejected");
        }
        metrics::counter!("api.errors", "kind" => self.0.kind()).increment(1);

        (
            status,
            Json(ErrorResponse {
                error: self.0.kind().to_string(),
                message: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self(DashboardError::validation(rejection.body_text()))
    }
}

/// `Query` whose rejections use the same JSON error body as every other failure.
#[derive(Debug, FromRequestParts)]
#[from_request(via(Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);

type ApiResult<T> = Result<Json<T>, ApiError>;

/// GET /api/v1/properties/:id/metrics
pub async fn web_metrics(
    State(state): State<AppState>,
    Path(property_id): Path<String>,
    ApiQuery(params): ApiQuery<RangeParams>,
) -> ApiResult<WebMetricsReport> {
    let report = state.web.get_metrics(&params.into_query(property_id)).await?;
    Ok(Json(report))
}

/// POST /api/v1/properties/:id/refresh
pub async fn refresh_web_metrics(
    State(state): State<AppState>,
    Path(property_id): Path<String>,
    ApiQuery(params): ApiQuery<RangeParams>,
) -> ApiResult<WebMetricsReport> {
    let report = state.web.refresh(&params.into_query(property_id)).await?;
    Ok(Json(report))
}

/// GET /api/v1/properties/:id/import-runs
pub async fn import_runs(
    State(state): State<AppState>,
    Path(property_id): Path<String>,
) -> ApiResult<Vec<ImportRun>> {
    Ok(Json(state.web.import_runs(&property_id).await?))
}

/// GET /api/v1/email/clients/:id/metrics
pub async fn email_metrics(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
    ApiQuery(params): ApiQuery<RangeParams>,
) -> ApiResult<EmailMetricsReport> {
    let report = state.email.get_metrics(&params.into_query(client_id)).await?;
    Ok(Json(report))
}

/// GET /api/v1/direct-mail/clients/:id/metrics
pub async fn direct_mail_metrics(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
    ApiQuery(params): ApiQuery<RangeParams>,
) -> ApiResult<MailMetricsReport> {
    let report = state
        .direct_mail
        .get_metrics(&params.into_query(client_id))
        .await?;
    Ok(Json(report))
}

/// GET /api/v1/campaigns/aggregate
pub async fn campaign_aggregation(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<CampaignAggregationQuery>,
) -> ApiResult<Vec<AggregatedCampaignRecord>> {
    let records = state.campaigns.get_campaign_aggregation_metrics(&query).await?;
    metrics::counter!("api.campaign_aggregations").increment(1);
    Ok(Json(records))
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// GET /ready
pub async fn readiness() -> StatusCode {
    StatusCode::OK
}

/// GET /live
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
}
