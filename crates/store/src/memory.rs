//! In-process metrics store backed by DashMap and a single lock over the
//! web-analytics tables.
//!
//! Used in development mode (no database URL) and as the test double for
//! the aggregation services. Holding every web family behind one lock is
//! what makes `upsert_snapshot` all-or-nothing here.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use insight_core::types::{
    BreakdownRow, Channel, Client, EmailCampaign, EmailDailyStat, ImportRun, MetricRow,
    MetricsSnapshot, MonthlyMetric, Property, UspsCampaign, UspsCampaignSummary,
};
use insight_core::DashboardResult;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::store::MetricsStore;

type DayKey = (String, NaiveDate);
type MonthKey = (String, i32);
type GroupKey = (String, NaiveDate, String);

#[derive(Default)]
struct WebTables {
    daily: BTreeMap<DayKey, MetricRow>,
    monthly: BTreeMap<MonthKey, MonthlyMetric>,
    channels: BTreeMap<GroupKey, BreakdownRow>,
    sources: BTreeMap<GroupKey, BreakdownRow>,
}

impl WebTables {
    fn put_daily(&mut self, rows: &[MetricRow]) -> usize {
        for row in rows {
            self.daily
                .insert((row.property_id.clone(), row.date), row.clone());
        }
        rows.len()
    }

    fn put_monthly(&mut self, rows: &[MonthlyMetric]) -> usize {
        for row in rows {
            self.monthly
                .insert((row.property_id.clone(), row.year_month), row.clone());
        }
        rows.len()
    }

    fn put_groups(table: &mut BTreeMap<GroupKey, BreakdownRow>, rows: &[BreakdownRow]) -> usize {
        for row in rows {
            table.insert(
                (row.property_id.clone(), row.date, row.group_key.clone()),
                row.clone(),
            );
        }
        rows.len()
    }
}

fn groups_in_range(
    table: &BTreeMap<GroupKey, BreakdownRow>,
    property_id: &str,
    from: NaiveDate,
    to: NaiveDate,
) -> Vec<BreakdownRow> {
    table
        .values()
        .filter(|r| r.property_id == property_id && r.date >= from && r.date <= to)
        .cloned()
        .collect()
}

fn counted(written: usize) -> usize {
    metrics::counter!("store.rows_upserted").increment(written as u64);
    written
}

/// Thread-safe in-memory implementation of [`MetricsStore`].
#[derive(Default)]
pub struct InMemoryMetricsStore {
    properties: DashMap<String, Property>,
    clients: DashMap<(String, Channel), Client>,
    web: RwLock<WebTables>,
    import_runs: RwLock<Vec<ImportRun>>,
    email_campaigns: DashMap<String, EmailCampaign>,
    email_daily_stats: DashMap<(String, NaiveDate), EmailDailyStat>,
    usps_campaigns: DashMap<String, UspsCampaign>,
    usps_summaries: DashMap<String, UspsCampaignSummary>,
}

impl InMemoryMetricsStore {
    pub fn new() -> Self {
        info!("Metrics store initialized (in-memory, development mode)");
        Self::default()
    }

    // ─── Seeding ───────────────────────────────────────────────────────────
    // The directory and campaign tables are written by other subsystems; these
    // inserts stand in for them in development mode and tests.

    pub fn insert_property(&self, property: Property) {
        self.properties.insert(property.id.clone(), property);
    }

    pub fn insert_client(&self, client: Client) {
        self.clients
            .insert((client.id.clone(), client.channel), client);
    }

    pub fn insert_email_campaign(&self, campaign: EmailCampaign) {
        self.email_campaigns.insert(campaign.id.clone(), campaign);
    }

    pub fn insert_email_daily_stat(&self, stat: EmailDailyStat) {
        self.email_daily_stats
            .insert((stat.campaign_id.clone(), stat.date), stat);
    }

    pub fn insert_usps_campaign(&self, campaign: UspsCampaign) {
        self.usps_campaigns.insert(campaign.id.clone(), campaign);
    }

    pub fn insert_usps_summary(&self, summary: UspsCampaignSummary) {
        self.usps_summaries
            .insert(summary.campaign_id.clone(), summary);
    }

    pub fn import_run_count(&self) -> usize {
        self.import_runs.read().len()
    }
}

#[async_trait]
impl MetricsStore for InMemoryMetricsStore {
    async fn find_property(&self, property_id: &str) -> DashboardResult<Option<Property>> {
        Ok(self.properties.get(property_id).map(|r| r.value().clone()))
    }

    async fn find_client(
        &self,
        client_id: &str,
        channel: Channel,
    ) -> DashboardResult<Option<Client>> {
        Ok(self
            .clients
            .get(&(client_id.to_string(), channel))
            .map(|r| r.value().clone()))
    }

    async fn find_daily(
        &self,
        property_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> DashboardResult<Vec<MetricRow>> {
        if from > to {
            return Ok(Vec::new());
        }
        let web = self.web.read();
        let start = (property_id.to_string(), from);
        let end = (property_id.to_string(), to);
        Ok(web.daily.range(start..=end).map(|(_, r)| r.clone()).collect())
    }

    async fn find_monthly(
        &self,
        property_id: &str,
        year_month: i32,
    ) -> DashboardResult<Option<MonthlyMetric>> {
        let web = self.web.read();
        Ok(web
            .monthly
            .get(&(property_id.to_string(), year_month))
            .cloned())
    }

    async fn find_monthly_range(
        &self,
        property_id: &str,
        from_month: i32,
        to_month: i32,
    ) -> DashboardResult<Vec<MonthlyMetric>> {
        if from_month > to_month {
            return Ok(Vec::new());
        }
        let web = self.web.read();
        let start = (property_id.to_string(), from_month);
        let end = (property_id.to_string(), to_month);
        Ok(web
            .monthly
            .range(start..=end)
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn find_channel_breakdown(
        &self,
        property_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> DashboardResult<Vec<BreakdownRow>> {
        let web = self.web.read();
        Ok(groups_in_range(&web.channels, property_id, from, to))
    }

    async fn find_source_breakdown(
        &self,
        property_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> DashboardResult<Vec<BreakdownRow>> {
        let web = self.web.read();
        Ok(groups_in_range(&web.sources, property_id, from, to))
    }

    async fn upsert_daily(&self, rows: &[MetricRow]) -> DashboardResult<usize> {
        Ok(counted(self.web.write().put_daily(rows)))
    }

    async fn upsert_monthly(&self, rows: &[MonthlyMetric]) -> DashboardResult<usize> {
        Ok(counted(self.web.write().put_monthly(rows)))
    }

    async fn upsert_channel_breakdown(&self, rows: &[BreakdownRow]) -> DashboardResult<usize> {
        let mut web = self.web.write();
        Ok(counted(WebTables::put_groups(&mut web.channels, rows)))
    }

    async fn upsert_source_breakdown(&self, rows: &[BreakdownRow]) -> DashboardResult<usize> {
        let mut web = self.web.write();
        Ok(counted(WebTables::put_groups(&mut web.sources, rows)))
    }

    async fn upsert_snapshot(&self, snapshot: &MetricsSnapshot) -> DashboardResult<usize> {
        let mut web = self.web.write();
        let mut written = web.put_daily(&snapshot.daily);
        written += web.put_monthly(&snapshot.monthly);
        written += WebTables::put_groups(&mut web.channels, &snapshot.channels);
        written += WebTables::put_groups(&mut web.sources, &snapshot.sources);
        debug!(rows = written, "Snapshot written to in-memory store");
        Ok(counted(written))
    }

    async fn append_import_run(&self, run: &ImportRun) -> DashboardResult<()> {
        self.import_runs.write().push(run.clone());
        Ok(())
    }

    async fn list_import_runs(&self, property_id: &str) -> DashboardResult<Vec<ImportRun>> {
        let mut runs: Vec<ImportRun> = self
            .import_runs
            .read()
            .iter()
            .filter(|r| r.property_id == property_id)
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(runs)
    }

    async fn find_email_campaigns(
        &self,
        client_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> DashboardResult<Vec<EmailCampaign>> {
        let mut campaigns: Vec<EmailCampaign> = self
            .email_campaigns
            .iter()
            .filter(|r| {
                let c = r.value();
                c.client_id == client_id
                    && c.send_date.is_some_and(|d| d >= from && d <= to)
            })
            .map(|r| r.value().clone())
            .collect();
        campaigns.sort_by(|a, b| a.send_date.cmp(&b.send_date).then(a.id.cmp(&b.id)));
        Ok(campaigns)
    }

    async fn find_email_daily_stats(
        &self,
        campaign_ids: &[String],
        from: NaiveDate,
        to: NaiveDate,
    ) -> DashboardResult<Vec<EmailDailyStat>> {
        let mut stats: Vec<EmailDailyStat> = self
            .email_daily_stats
            .iter()
            .filter(|r| {
                let s = r.value();
                campaign_ids.contains(&s.campaign_id) && s.date >= from && s.date <= to
            })
            .map(|r| r.value().clone())
            .collect();
        stats.sort_by(|a, b| a.date.cmp(&b.date).then(a.campaign_id.cmp(&b.campaign_id)));
        Ok(stats)
    }

    async fn find_usps_campaigns(
        &self,
        client_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> DashboardResult<Vec<UspsCampaign>> {
        let mut campaigns: Vec<UspsCampaign> = self
            .usps_campaigns
            .iter()
            .filter(|r| {
                let c = r.value();
                c.client_id == client_id
                    && c.mail_date.is_some_and(|d| d >= from && d <= to)
            })
            .map(|r| r.value().clone())
            .collect();
        campaigns.sort_by(|a, b| a.mail_date.cmp(&b.mail_date).then(a.id.cmp(&b.id)));
        Ok(campaigns)
    }

    async fn find_usps_summaries(
        &self,
        campaign_ids: &[String],
    ) -> DashboardResult<Vec<UspsCampaignSummary>> {
        Ok(campaign_ids
            .iter()
            .filter_map(|id| self.usps_summaries.get(id).map(|r| r.value().clone()))
            .collect())
    }
}
