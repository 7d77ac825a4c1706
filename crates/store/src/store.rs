//! Storage contract consumed by the aggregation services.
//!
//! Reads are range-filtered; writes are upserts keyed by each row's natural
//! key. Every write is durable before the returned future resolves.

use async_trait::async_trait;
use chrono::NaiveDate;
use insight_core::types::{
    BreakdownRow, Channel, Client, EmailCampaign, EmailDailyStat, ImportRun, MetricRow,
    MetricsSnapshot, MonthlyMetric, Property, UspsCampaign, UspsCampaignSummary,
};
use insight_core::DashboardResult;

#[async_trait]
pub trait MetricsStore: Send + Sync {
    // ─── Directory ─────────────────────────────────────────────────────────

    async fn find_property(&self, property_id: &str) -> DashboardResult<Option<Property>>;

    async fn find_client(&self, client_id: &str, channel: Channel)
        -> DashboardResult<Option<Client>>;

    // ─── Web analytics families ────────────────────────────────────────────

    async fn find_daily(
        &self,
        property_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> DashboardResult<Vec<MetricRow>>;

    async fn find_monthly(
        &self,
        property_id: &str,
        year_month: i32,
    ) -> DashboardResult<Option<MonthlyMetric>>;

    /// Monthly rows with `from_month <= year_month <= to_month`, ascending.
    async fn find_monthly_range(
        &self,
        property_id: &str,
        from_month: i32,
        to_month: i32,
    ) -> DashboardResult<Vec<MonthlyMetric>>;

    async fn find_channel_breakdown(
        &self,
        property_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> DashboardResult<Vec<BreakdownRow>>;

    async fn find_source_breakdown(
        &self,
        property_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> DashboardResult<Vec<BreakdownRow>>;

    async fn upsert_daily(&self, rows: &[MetricRow]) -> DashboardResult<usize>;

    async fn upsert_monthly(&self, rows: &[MonthlyMetric]) -> DashboardResult<usize>;

    async fn upsert_channel_breakdown(&self, rows: &[BreakdownRow]) -> DashboardResult<usize>;

    async fn upsert_source_breakdown(&self, rows: &[BreakdownRow]) -> DashboardResult<usize>;

    /// Write all four families as one unit: either every row lands or none do.
    async fn upsert_snapshot(&self, snapshot: &MetricsSnapshot) -> DashboardResult<usize>;

    // ─── Import audit log ──────────────────────────────────────────────────

    async fn append_import_run(&self, run: &ImportRun) -> DashboardResult<()>;

    /// Runs for one property, newest first.
    async fn list_import_runs(&self, property_id: &str) -> DashboardResult<Vec<ImportRun>>;

    // ─── Campaign tables ───────────────────────────────────────────────────

    /// Email campaigns of a client whose send date falls in `[from, to]`.
    async fn find_email_campaigns(
        &self,
        client_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> DashboardResult<Vec<EmailCampaign>>;

    async fn find_email_daily_stats(
        &self,
        campaign_ids: &[String],
        from: NaiveDate,
        to: NaiveDate,
    ) -> DashboardResult<Vec<EmailDailyStat>>;

    /// USPS campaigns of a client whose mail date falls in `[from, to]`.
    async fn find_usps_campaigns(
        &self,
        client_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> DashboardResult<Vec<UspsCampaign>>;

    async fn find_usps_summaries(
        &self,
        campaign_ids: &[String],
    ) -> DashboardResult<Vec<UspsCampaignSummary>>;
}
