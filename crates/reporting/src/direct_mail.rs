//! Direct-mail (USPS) campaign metrics with year-over-year comparison.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::NaiveDate;
use insight_core::period;
use insight_core::types::{
    Channel, Client, MailCampaignMetric, MetricsQuery, UspsCampaign, UspsCampaignSummary,
};
use insight_core::{DashboardError, DashboardResult};
use insight_store::MetricsStore;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MailTotals {
    pub campaigns: usize,
    pub pieces: i64,
    pub delivered: i64,
    pub undelivered: i64,
    pub delivery_rate: f64,
}

impl MailTotals {
    fn from_metrics<'a>(metrics: impl IntoIterator<Item = &'a MailCampaignMetric>) -> Self {
        let mut totals = Self::default();
        for m in metrics {
            totals.campaigns += 1;
            totals.pieces += m.pieces;
            totals.delivered += m.delivered;
        }
        totals.undelivered = totals.pieces - totals.delivered;
        totals.delivery_rate = period::rate_percent(totals.delivered, totals.pieces);
        totals
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MailChanges {
    pub pieces: Option<f64>,
    pub delivered: Option<f64>,
    pub delivery_rate: Option<f64>,
}

impl MailChanges {
    pub fn between(current: &MailTotals, previous: &MailTotals) -> Self {
        Self {
            pieces: period::percent_change(current.pieces as f64, previous.pieces as f64),
            delivered: period::percent_change(current.delivered as f64, previous.delivered as f64),
            delivery_rate: period::percent_change(current.delivery_rate, previous.delivery_rate),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailMonth {
    pub year_month: i32,
    pub current: MailTotals,
    pub previous: Option<MailTotals>,
    pub changes: MailChanges,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailMetricsReport {
    pub client_id: String,
    pub client_name: String,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub current: MailTotals,
    pub previous: MailTotals,
    pub changes: MailChanges,
    pub monthly: Vec<MailMonth>,
    pub campaigns: Vec<MailCampaignMetric>,
}

pub struct DirectMailMetricsService {
    store: Arc<dyn MetricsStore>,
}

impl DirectMailMetricsService {
    pub fn new(store: Arc<dyn MetricsStore>) -> Self {
        Self { store }
    }

    pub async fn get_metrics(&self, query: &MetricsQuery) -> DashboardResult<MailMetricsReport> {
        query.validate()?;
        let client = self.client(&query.owner_id).await?;
        let window_from = period::extended_from(query.from);

        let campaigns = self
            .store
            .find_usps_campaigns(&client.id, window_from, query.to)
            .await?;
        let ids: Vec<String> = campaigns.iter().map(|c| c.id.clone()).collect();
        let summaries = if ids.is_empty() {
            Vec::new()
        } else {
            self.store.find_usps_summaries(&ids).await?
        };
        debug!(
            client_id = %client.id,
            campaigns = campaigns.len(),
            summaries = summaries.len(),
            "Loaded direct mail campaign rows"
        );

        Ok(build_report(&client, query, &campaigns, &summaries))
    }

    /// Per-campaign rows for drops mailed within `[from, to]`.
    pub async fn campaign_metrics(
        &self,
        query: &MetricsQuery,
    ) -> DashboardResult<Vec<MailCampaignMetric>> {
        Ok(self.get_metrics(query).await?.campaigns)
    }

    async fn client(&self, client_id: &str) -> DashboardResult<Client> {
        self.store
            .find_client(client_id, Channel::DirectMail)
            .await?
            .ok_or_else(|| DashboardError::not_found(format!("direct mail client {client_id}")))
    }
}

fn build_report(
    client: &Client,
    query: &MetricsQuery,
    campaigns: &[UspsCampaign],
    summaries: &[UspsCampaignSummary],
) -> MailMetricsReport {
    let by_campaign: HashMap<&str, &UspsCampaignSummary> = summaries
        .iter()
        .map(|s| (s.campaign_id.as_str(), s))
        .collect();

    // A drop without a tracking summary has no confirmed deliveries yet.
    let mut metrics: Vec<MailCampaignMetric> = campaigns
        .iter()
        .map(|c| {
            let summary = by_campaign.get(c.id.as_str());
            MailCampaignMetric {
                campaign_name: c.campaign_name.clone(),
                pieces: c.pieces,
                delivered: summary.map_or(0, |s| s.delivered),
                mail_date: c.mail_date,
                last_scan_date: summary.and_then(|s| s.last_scan_date),
            }
        })
        .collect();
    metrics.sort_by(|a, b| {
        a.mail_date
            .cmp(&b.mail_date)
            .then_with(|| a.campaign_name.cmp(&b.campaign_name))
    });

    let mailed_within = |m: &MailCampaignMetric, from: NaiveDate, to: NaiveDate| {
        m.mail_date.is_some_and(|d| d >= from && d <= to)
    };
    let prev_from = period::one_year_back(query.from);
    let prev_to = period::one_year_back(query.to);
    let current_rows: Vec<&MailCampaignMetric> = metrics
        .iter()
        .filter(|m| mailed_within(*m, query.from, query.to))
        .collect();
    let current = MailTotals::from_metrics(current_rows.iter().copied());
    let previous =
        MailTotals::from_metrics(metrics.iter().filter(|m| mailed_within(*m, prev_from, prev_to)));

    let mut by_month: BTreeMap<i32, Vec<&MailCampaignMetric>> = BTreeMap::new();
    for m in &metrics {
        if let Some(mailed) = m.mail_date {
            by_month.entry(period::year_month(mailed)).or_default().push(m);
        }
    }
    let monthly = period::months_between(query.from, query.to)
        .into_iter()
        .filter_map(|year_month| {
            let current = MailTotals::from_metrics(by_month.get(&year_month)?.iter().copied());
            let previous = by_month
                .get(&period::prior_year_month(year_month))
                .map(|rows| MailTotals::from_metrics(rows.iter().copied()));
            let changes = previous
                .as_ref()
                .map(|p| MailChanges::between(&current, p))
                .unwrap_or_default();
            Some(MailMonth {
                year_month,
                current,
                previous,
                changes,
            })
        })
        .collect();

    MailMetricsReport {
        client_id: client.id.clone(),
        client_name: client.name.clone(),
        from: query.from,
        to: query.to,
        changes: MailChanges::between(&current, &previous),
        current,
        previous,
        monthly,
        campaigns: current_rows.into_iter().cloned().collect(),
    }
}
