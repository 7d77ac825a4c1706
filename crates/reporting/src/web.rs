//! Web-analytics metrics: cache-first reads with a gateway refetch on miss.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use insight_core::period;
use insight_core::types::{
    ImportRun, ImportStatus, MetricRow, MetricsQuery, MetricsSnapshot, MonthlyMetric, Property,
};
use insight_core::{DashboardError, DashboardResult};
use insight_gateway::{AnalyticsGateway, GatewayRequest};
use insight_store::MetricsStore;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::inflight::InFlight;
use crate::rollup::{self, GroupSummary, WebPeriodSummary};

/// Percent change of each headline KPI against the prior-year window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebChanges {
    pub sessions: Option<f64>,
    pub page_views_per_session: Option<f64>,
    pub engagement_rate: Option<f64>,
    pub avg_session_duration_sec: Option<f64>,
    pub goal_completions: Option<f64>,
    pub goal_completion_rate: Option<f64>,
}

impl WebChanges {
    pub fn between(current: &WebPeriodSummary, previous: &WebPeriodSummary) -> Self {
        Self {
            sessions: period::percent_change(current.sessions as f64, previous.sessions as f64),
            page_views_per_session: period::percent_change(
                current.page_views_per_session,
                previous.page_views_per_session,
            ),
            engagement_rate: period::percent_change(
                current.engagement_rate,
                previous.engagement_rate,
            ),
            avg_session_duration_sec: period::percent_change(
                current.avg_session_duration_sec,
                previous.avg_session_duration_sec,
            ),
            goal_completions: period::percent_change(
                current.goal_completions as f64,
                previous.goal_completions as f64,
            ),
            goal_completion_rate: period::percent_change(
                current.goal_completion_rate,
                previous.goal_completion_rate,
            ),
        }
    }
}

/// A month of the requested window next to the same month a year earlier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyComparison {
    pub year_month: i32,
    pub current: MonthlyMetric,
    pub previous: Option<MonthlyMetric>,
    pub sessions_change: Option<f64>,
    pub engagement_rate_change: Option<f64>,
    pub goal_completions_change: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebMetricsReport {
    pub property_id: String,
    pub property_name: String,
    pub from: NaiveDate,
    pub to: NaiveDate,
    /// True when this response was served from a fresh gateway fetch.
    pub refreshed: bool,
    pub current: WebPeriodSummary,
    pub previous: WebPeriodSummary,
    pub changes: WebChanges,
    pub monthly: Vec<MonthlyComparison>,
    pub channels: Vec<GroupSummary>,
    pub sources: Vec<GroupSummary>,
    pub daily: Vec<MetricRow>,
}

pub struct WebMetricsService {
    store: Arc<dyn MetricsStore>,
    gateway: Arc<dyn AnalyticsGateway>,
    inflight: InFlight<Arc<MetricsSnapshot>>,
}

impl WebMetricsService {
    pub fn new(store: Arc<dyn MetricsStore>, gateway: Arc<dyn AnalyticsGateway>) -> Self {
        Self {
            store,
            gateway,
            inflight: InFlight::new(),
        }
    }

    /// Serve `[from, to]` plus its prior-year window. Reads the store first and
    /// only calls the gateway when one of the four metric families has no rows
    /// for the extended window.
    pub async fn get_metrics(&self, query: &MetricsQuery) -> DashboardResult<WebMetricsReport> {
        query.validate()?;
        let property = self.property(&query.owner_id).await?;
        let window_from = period::extended_from(query.from);

        let cached = self.load_cached(&property.id, window_from, query.to).await?;
        if cached.is_complete() {
            metrics::counter!("reporting.cache_hit").increment(1);
            info!(property_id = %property.id, rows = cached.row_count(), "Serving cached metrics");
            return Ok(build_report(&property, query, &cached, false));
        }

        metrics::counter!("reporting.cache_miss").increment(1);
        info!(
            property_id = %property.id,
            missing = ?cached.missing_families(),
            "Metrics cache miss, refetching window"
        );
        let fresh = self.refetch(&property, window_from, query).await?;
        Ok(build_report(&property, query, &fresh, true))
    }

    /// Refetch the extended window regardless of what is cached.
    pub async fn refresh(&self, query: &MetricsQuery) -> DashboardResult<WebMetricsReport> {
        query.validate()?;
        let property = self.property(&query.owner_id).await?;
        let window_from = period::extended_from(query.from);

        let fresh = self.refetch(&property, window_from, query).await?;
        Ok(build_report(&property, query, &fresh, true))
    }

    pub async fn import_runs(&self, property_id: &str) -> DashboardResult<Vec<ImportRun>> {
        let property = self.property(property_id).await?;
        self.store.list_import_runs(&property.id).await
    }

    async fn property(&self, property_id: &str) -> DashboardResult<Property> {
        self.store
            .find_property(property_id)
            .await?
            .ok_or_else(|| DashboardError::not_found(format!("property {property_id}")))
    }

    async fn load_cached(
        &self,
        property_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> DashboardResult<MetricsSnapshot> {
        let (daily, monthly, channels, sources) = tokio::try_join!(
            self.store.find_daily(property_id, from, to),
            self.store.find_monthly_range(
                property_id,
                period::year_month(from),
                period::year_month(to)
            ),
            self.store.find_channel_breakdown(property_id, from, to),
            self.store.find_source_breakdown(property_id, from, to),
        )?;
        Ok(MetricsSnapshot {
            daily,
            monthly,
            channels,
            sources,
        })
    }

    async fn refetch(
        &self,
        property: &Property,
        window_from: NaiveDate,
        query: &MetricsQuery,
    ) -> DashboardResult<Arc<MetricsSnapshot>> {
        let key = format!("{}|{}|{}", property.id, window_from, query.to);
        let store = self.store.clone();
        let gateway = self.gateway.clone();
        let request = GatewayRequest {
            property_id: property.id.clone(),
            account_external_id: property.account_external_id.clone(),
            property_external_id: property.property_external_id.clone(),
            date_start: window_from,
            date_end: query.to,
            run_id: Uuid::new_v4(),
        };
        let requested_by = query.requested_by.clone();

        self.inflight
            .run(&key, move || fetch_and_persist(store, gateway, request, requested_by))
            .await
    }
}

/// One gateway round trip. Writes every returned family in a single store
/// transaction, then records exactly one import run with the outcome: `ok` only
/// when the rows were both fetched and persisted.
async fn fetch_and_persist(
    store: Arc<dyn MetricsStore>,
    gateway: Arc<dyn AnalyticsGateway>,
    request: GatewayRequest,
    requested_by: Option<String>,
) -> DashboardResult<Arc<MetricsSnapshot>> {
    let created_at = Utc::now();
    let outcome = fetch_then_persist(store.as_ref(), gateway.as_ref(), &request).await;

    let run = ImportRun {
        id: request.run_id,
        property_id: request.property_id.clone(),
        date_range_start: request.date_start,
        date_range_end: request.date_end,
        requested_by,
        status: if outcome.is_ok() {
            ImportStatus::Ok
        } else {
            ImportStatus::Error
        },
        created_at,
    };

    match outcome {
        Ok(snapshot) => {
            store.append_import_run(&run).await?;
            Ok(Arc::new(snapshot))
        }
        Err(e) => {
            if let Err(audit) = store.append_import_run(&run).await {
                warn!(run_id = %run.id, error = %audit, "Failed to record failed import run");
            }
            Err(e)
        }
    }
}

async fn fetch_then_persist(
    store: &dyn MetricsStore,
    gateway: &dyn AnalyticsGateway,
    request: &GatewayRequest,
) -> DashboardResult<MetricsSnapshot> {
    let normalized = gateway.fetch(request).await?;

    let mut snapshot = normalized.snapshot;
    if snapshot.monthly.is_empty() && !snapshot.daily.is_empty() {
        snapshot.monthly = rollup::monthly_from_daily(&snapshot.daily);
        info!(
            property_id = %request.property_id,
            months = snapshot.monthly.len(),
            "Derived monthly rows from daily rows"
        );
    }

    let written = store.upsert_snapshot(&snapshot).await?;
    info!(
        run_id = %request.run_id,
        property_id = %request.property_id,
        written,
        rejected = normalized.rejected.len(),
        "Import run persisted"
    );
    Ok(snapshot)
}

/// Assemble the dashboard payload from rows covering the extended window.
pub fn build_report(
    property: &Property,
    query: &MetricsQuery,
    snapshot: &MetricsSnapshot,
    refreshed: bool,
) -> WebMetricsReport {
    let prev_from = period::one_year_back(query.from);
    let prev_to = period::one_year_back(query.to);

    let daily = rollup::daily_in_range(&snapshot.daily, query.from, query.to);
    let previous_daily = rollup::daily_in_range(&snapshot.daily, prev_from, prev_to);
    let current = WebPeriodSummary::from_rows(&daily);
    let previous = WebPeriodSummary::from_rows(&previous_daily);

    let monthly = period::months_between(query.from, query.to)
        .into_iter()
        .filter_map(|year_month| {
            let current = find_month(&snapshot.monthly, year_month)?;
            let previous = find_month(&snapshot.monthly, period::prior_year_month(year_month));
            Some(compare_month(current, previous))
        })
        .collect();

    WebMetricsReport {
        property_id: property.id.clone(),
        property_name: property.name.clone(),
        from: query.from,
        to: query.to,
        refreshed,
        changes: WebChanges::between(&current, &previous),
        current,
        previous,
        monthly,
        channels: rollup::summarize_groups(&snapshot.channels, query.from, query.to),
        sources: rollup::summarize_groups(&snapshot.sources, query.from, query.to),
        daily,
    }
}

fn find_month(rows: &[MonthlyMetric], year_month: i32) -> Option<&MonthlyMetric> {
    rows.iter().find(|m| m.year_month == year_month)
}

fn compare_month(current: &MonthlyMetric, previous: Option<&MonthlyMetric>) -> MonthlyComparison {
    let change = |value: fn(&MonthlyMetric) -> f64| {
        previous.and_then(|p| period::percent_change(value(current), value(p)))
    };
    MonthlyComparison {
        year_month: current.year_month,
        sessions_change: change(|m| m.sessions as f64),
        engagement_rate_change: change(|m| m.engagement_rate),
        goal_completions_change: change(|m| m.goal_completions as f64),
        current: current.clone(),
        previous: previous.cloned(),
    }
}
