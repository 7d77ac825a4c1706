//! Fixtures shared by the reporting tests.

#![allow(clippy::unwrap_used)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use insight_core::types::{
    BreakdownRow, Channel, Client, EmailCampaign, EmailDailyStat, ImportRun, MetricRow,
    MetricsSnapshot, MonthlyMetric, Property, UspsCampaign, UspsCampaignSummary,
};
use insight_core::{DashboardError, DashboardResult};
use insight_gateway::{AnalyticsGateway, GatewayRequest, NormalizedResponse};
use insight_store::{InMemoryMetricsStore, MetricsStore};
use parking_lot::Mutex;

use crate::rollup::monthly_from_daily;

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn property(id: &str) -> Property {
    Property {
        id: id.into(),
        name: format!("Property {id}"),
        account_external_id: "acct-1".into(),
        property_external_id: format!("GA-{id}"),
    }
}

pub fn store_with_property(id: &str) -> Arc<InMemoryMetricsStore> {
    let store = Arc::new(InMemoryMetricsStore::new());
    store.insert_property(property(id));
    store
}

/// One row per day in `[from, to]` for every family. Sessions are 100 per
/// day over the last 365 days up to `to` and 80 before that.
pub fn snapshot(property_id: &str, from: NaiveDate, to: NaiveDate) -> MetricsSnapshot {
    let mut out = MetricsSnapshot::default();
    for day in from.iter_days().take_while(|d| *d <= to) {
        let sessions = if day >= to - chrono::Days::new(364) { 100 } else { 80 };
        out.daily.push(MetricRow {
            property_id: property_id.into(),
            date: day,
            sessions,
            page_views_per_session: 3.0,
            engagement_rate: 0.5,
            avg_session_duration_sec: 120,
            goal_completions: sessions / 10,
            goal_completion_rate: 0.1,
        });
        for (key, share) in [("Organic Search", 60), ("Direct", 40)] {
            let row = BreakdownRow {
                property_id: property_id.into(),
                date: day,
                group_key: key.into(),
                sessions: sessions * share / 100,
                engagement_rate: 0.5,
                goal_completions: 1,
                goal_completion_rate: 0.1,
            };
            out.channels.push(row.clone());
            out.sources.push(BreakdownRow {
                group_key: format!("{key} source"),
                ..row
            });
        }
    }
    out.monthly = monthly_from_daily(&out.daily);
    out
}

/// Gateway double that counts calls and answers with a fixed outcome.
pub struct FakeGateway {
    calls: AtomicUsize,
    delay: Duration,
    outcome: Mutex<DashboardResult<MetricsSnapshot>>,
    requests: Mutex<Vec<GatewayRequest>>,
}

impl FakeGateway {
    pub fn answering(snapshot: MetricsSnapshot) -> Arc<Self> {
        Self::with_outcome(Ok(snapshot), Duration::ZERO)
    }

    pub fn failing(err: DashboardError) -> Arc<Self> {
        Self::with_outcome(Err(err), Duration::ZERO)
    }

    pub fn with_outcome(outcome: DashboardResult<MetricsSnapshot>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay,
            outcome: Mutex::new(outcome),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<GatewayRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl AnalyticsGateway for FakeGateway {
    async fn fetch(&self, request: &GatewayRequest) -> DashboardResult<NormalizedResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let snapshot = self.outcome.lock().clone()?;
        Ok(NormalizedResponse {
            snapshot,
            ..Default::default()
        })
    }
}

/// In-memory store whose snapshot writes always fail. Every other call is
/// served by the wrapped store.
pub struct SnapshotWritesFail(pub Arc<InMemoryMetricsStore>);

#[async_trait]
impl MetricsStore for SnapshotWritesFail {
    async fn find_property(&self, property_id: &str) -> DashboardResult<Option<Property>> {
        self.0.find_property(property_id).await
    }

    async fn find_client(
        &self,
        client_id: &str,
        channel: Channel,
    ) -> DashboardResult<Option<Client>> {
        self.0.find_client(client_id, channel).await
    }

    async fn find_daily(
        &self,
        property_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> DashboardResult<Vec<MetricRow>> {
        self.0.find_daily(property_id, from, to).await
    }

    async fn find_monthly(
        &self,
        property_id: &str,
        year_month: i32,
    ) -> DashboardResult<Option<MonthlyMetric>> {
        self.0.find_monthly(property_id, year_month).await
    }

    async fn find_monthly_range(
        &self,
        property_id: &str,
        from_month: i32,
        to_month: i32,
    ) -> DashboardResult<Vec<MonthlyMetric>> {
        self.0.find_monthly_range(property_id, from_month, to_month).await
    }

    async fn find_channel_breakdown(
        &self,
        property_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> DashboardResult<Vec<BreakdownRow>> {
        self.0.find_channel_breakdown(property_id, from, to).await
    }

    async fn find_source_breakdown(
        &self,
        property_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> DashboardResult<Vec<BreakdownRow>> {
        self.0.find_source_breakdown(property_id, from, to).await
    }

    async fn upsert_daily(&self, rows: &[MetricRow]) -> DashboardResult<usize> {
        self.0.upsert_daily(rows).await
    }

    async fn upsert_monthly(&self, rows: &[MonthlyMetric]) -> DashboardResult<usize> {
        self.0.upsert_monthly(rows).await
    }

    async fn upsert_channel_breakdown(&self, rows: &[BreakdownRow]) -> DashboardResult<usize> {
        self.0.upsert_channel_breakdown(rows).await
    }

    async fn upsert_source_breakdown(&self, rows: &[BreakdownRow]) -> DashboardResult<usize> {
        self.0.upsert_source_breakdown(rows).await
    }

    async fn upsert_snapshot(&self, _snapshot: &MetricsSnapshot) -> DashboardResult<usize> {
        Err(DashboardError::store("connection reset"))
    }

    async fn append_import_run(&self, run: &ImportRun) -> DashboardResult<()> {
        self.0.append_import_run(run).await
    }

    async fn list_import_runs(&self, property_id: &str) -> DashboardResult<Vec<ImportRun>> {
        self.0.list_import_runs(property_id).await
    }

    async fn find_email_campaigns(
        &self,
        client_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> DashboardResult<Vec<EmailCampaign>> {
        self.0.find_email_campaigns(client_id, from, to).await
    }

    async fn find_email_daily_stats(
        &self,
        campaign_ids: &[String],
        from: NaiveDate,
        to: NaiveDate,
    ) -> DashboardResult<Vec<EmailDailyStat>> {
        self.0.find_email_daily_stats(campaign_ids, from, to).await
    }

    async fn find_usps_campaigns(
        &self,
        client_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> DashboardResult<Vec<UspsCampaign>> {
        self.0.find_usps_campaigns(client_id, from, to).await
    }

    async fn find_usps_summaries(
        &self,
        campaign_ids: &[String],
    ) -> DashboardResult<Vec<UspsCampaignSummary>> {
        self.0.find_usps_summaries(campaign_ids).await
    }
}
