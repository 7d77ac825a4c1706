//! Email campaign metrics with year-over-year comparison.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::NaiveDate;
use insight_core::period;
use insight_core::types::{
    Channel, Client, EmailCampaign, EmailCampaignMetric, EmailDailyStat, MetricsQuery,
};
use insight_core::{DashboardError, DashboardResult};
use insight_store::MetricsStore;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmailTotals {
    pub campaigns: usize,
    pub sent: i64,
    pub delivered: i64,
    pub unique_opens: i64,
    pub unique_clicks: i64,
    pub bounces: i64,
    pub unsubscribes: i64,
    pub delivery_rate: f64,
    pub open_rate: f64,
    pub click_rate: f64,
    pub click_through_rate: f64,
    pub click_to_open_rate: f64,
    pub bounce_rate: f64,
    pub unsubscribe_rate: f64,
}

impl EmailTotals {
    fn from_tallies<'a>(tallies: impl IntoIterator<Item = &'a CampaignTally>) -> Self {
        let mut totals = Self::default();
        for tally in tallies {
            totals.campaigns += 1;
            totals.sent += tally.sent;
            totals.delivered += tally.delivered;
            totals.unique_opens += tally.unique_opens;
            totals.unique_clicks += tally.unique_clicks;
            totals.bounces += tally.bounces;
            totals.unsubscribes += tally.unsubscribes;
        }
        totals.delivery_rate = period::rate_percent(totals.delivered, totals.sent);
        totals.open_rate = period::rate_percent(totals.unique_opens, totals.delivered);
        totals.click_rate = period::rate_percent(totals.unique_clicks, totals.delivered);
        totals.click_through_rate = period::rate_percent(totals.unique_clicks, totals.sent);
        totals.click_to_open_rate = period::rate_percent(totals.unique_clicks, totals.unique_opens);
        totals.bounce_rate = period::rate_percent(totals.bounces, totals.sent);
        totals.unsubscribe_rate = period::rate_percent(totals.unsubscribes, totals.delivered);
        totals
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmailChanges {
    pub sent: Option<f64>,
    pub delivered: Option<f64>,
    pub unique_opens: Option<f64>,
    pub unique_clicks: Option<f64>,
    pub open_rate: Option<f64>,
    pub click_rate: Option<f64>,
}

impl EmailChanges {
    pub fn between(current: &EmailTotals, previous: &EmailTotals) -> Self {
        let count = |c: i64, p: i64| period::percent_change(c as f64, p as f64);
        Self {
            sent: count(current.sent, previous.sent),
            delivered: count(current.delivered, previous.delivered),
            unique_opens: count(current.unique_opens, previous.unique_opens),
            unique_clicks: count(current.unique_clicks, previous.unique_clicks),
            open_rate: period::percent_change(current.open_rate, previous.open_rate),
            click_rate: period::percent_change(current.click_rate, previous.click_rate),
        }
    }
}

/// Campaigns sent in one month, next to those sent in the same month a year
/// earlier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailMonth {
    pub year_month: i32,
    pub current: EmailTotals,
    pub previous: Option<EmailTotals>,
    pub changes: EmailChanges,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailDailyPoint {
    pub date: NaiveDate,
    pub delivered: i64,
    pub unique_opens: i64,
    pub unique_clicks: i64,
    pub bounces: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailMetricsReport {
    pub client_id: String,
    pub client_name: String,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub current: EmailTotals,
    pub previous: EmailTotals,
    pub changes: EmailChanges,
    pub monthly: Vec<EmailMonth>,
    pub daily: Vec<EmailDailyPoint>,
    pub campaigns: Vec<EmailCampaignMetric>,
}

/// One campaign with its daily stats folded in.
#[derive(Debug, Clone)]
struct CampaignTally {
    campaign_name: String,
    send_date: Option<NaiveDate>,
    sent: i64,
    delivered: i64,
    unique_opens: i64,
    unique_clicks: i64,
    bounces: i64,
    unsubscribes: i64,
    last_event_date: Option<NaiveDate>,
}

impl CampaignTally {
    fn new(campaign: &EmailCampaign) -> Self {
        Self {
            campaign_name: campaign.campaign_name.clone(),
            send_date: campaign.send_date,
            sent: campaign.sent,
            delivered: 0,
            unique_opens: 0,
            unique_clicks: 0,
            bounces: 0,
            unsubscribes: 0,
            last_event_date: None,
        }
    }

    fn add(&mut self, stat: &EmailDailyStat) {
        self.delivered += stat.delivered;
        self.unique_opens += stat.unique_opens;
        self.unique_clicks += stat.unique_clicks;
        self.bounces += stat.bounces;
        self.unsubscribes += stat.unsubscribes;
        self.last_event_date = self.last_event_date.max(Some(stat.date));
    }

    fn sent_within(&self, from: NaiveDate, to: NaiveDate) -> bool {
        self.send_date.is_some_and(|d| d >= from && d <= to)
    }

    fn to_metric(&self) -> EmailCampaignMetric {
        EmailCampaignMetric {
            campaign_name: self.campaign_name.clone(),
            sent: self.sent,
            delivered: self.delivered,
            unique_opens: self.unique_opens,
            unique_clicks: self.unique_clicks,
            send_date: self.send_date,
            last_event_date: self.last_event_date,
        }
    }
}

pub struct EmailMetricsService {
    store: Arc<dyn MetricsStore>,
}

impl EmailMetricsService {
    pub fn new(store: Arc<dyn MetricsStore>) -> Self {
        Self { store }
    }

    pub async fn get_metrics(&self, query: &MetricsQuery) -> DashboardResult<EmailMetricsReport> {
        query.validate()?;
        let client = self.client(&query.owner_id).await?;
        let window_from = period::extended_from(query.from);

        let campaigns = self
            .store
            .find_email_campaigns(&client.id, window_from, query.to)
            .await?;
        let ids: Vec<String> = campaigns.iter().map(|c| c.id.clone()).collect();
        let stats = if ids.is_empty() {
            Vec::new()
        } else {
            self.store
                .find_email_daily_stats(&ids, window_from, query.to)
                .await?
        };
        debug!(
            client_id = %client.id,
            campaigns = campaigns.len(),
            stats = stats.len(),
            "Loaded email campaign rows"
        );

        Ok(build_report(&client, query, &campaigns, &stats))
    }

    /// Per-campaign rows for campaigns sent within `[from, to]`.
    pub async fn campaign_metrics(
        &self,
        query: &MetricsQuery,
    ) -> DashboardResult<Vec<EmailCampaignMetric>> {
        Ok(self.get_metrics(query).await?.campaigns)
    }

    async fn client(&self, client_id: &str) -> DashboardResult<Client> {
        self.store
            .find_client(client_id, Channel::Email)
            .await?
            .ok_or_else(|| DashboardError::not_found(format!("email client {client_id}")))
    }
}

fn build_report(
    client: &Client,
    query: &MetricsQuery,
    campaigns: &[EmailCampaign],
    stats: &[EmailDailyStat],
) -> EmailMetricsReport {
    let mut tallies: HashMap<&str, CampaignTally> = campaigns
        .iter()
        .map(|c| (c.id.as_str(), CampaignTally::new(c)))
        .collect();
    let mut daily: BTreeMap<NaiveDate, EmailDailyPoint> = BTreeMap::new();
    for stat in stats {
        if let Some(tally) = tallies.get_mut(stat.campaign_id.as_str()) {
            tally.add(stat);
        }
        if stat.date >= query.from && stat.date <= query.to {
            let point = daily.entry(stat.date).or_insert(EmailDailyPoint {
                date: stat.date,
                delivered: 0,
                unique_opens: 0,
                unique_clicks: 0,
                bounces: 0,
            });
            point.delivered += stat.delivered;
            point.unique_opens += stat.unique_opens;
            point.unique_clicks += stat.unique_clicks;
            point.bounces += stat.bounces;
        }
    }

    let prev_from = period::one_year_back(query.from);
    let prev_to = period::one_year_back(query.to);
    let mut current_tallies: Vec<&CampaignTally> = tallies
        .values()
        .filter(|t| t.sent_within(query.from, query.to))
        .collect();
    current_tallies.sort_by(|a, b| {
        a.send_date
            .cmp(&b.send_date)
            .then_with(|| a.campaign_name.cmp(&b.campaign_name))
    });
    let current = EmailTotals::from_tallies(current_tallies.iter().copied());
    let previous = EmailTotals::from_tallies(
        tallies.values().filter(|t| t.sent_within(prev_from, prev_to)),
    );

    let mut by_month: BTreeMap<i32, Vec<&CampaignTally>> = BTreeMap::new();
    for tally in tallies.values() {
        if let Some(sent) = tally.send_date {
            by_month.entry(period::year_month(sent)).or_default().push(tally);
        }
    }
    let monthly = period::months_between(query.from, query.to)
        .into_iter()
        .filter_map(|year_month| {
            let current = EmailTotals::from_tallies(by_month.get(&year_month)?.iter().copied());
            let previous = by_month
                .get(&period::prior_year_month(year_month))
                .map(|t| EmailTotals::from_tallies(t.iter().copied()));
            let changes = previous
                .as_ref()
                .map(|p| EmailChanges::between(&current, p))
                .unwrap_or_default();
            Some(EmailMonth {
                year_month,
                current,
                previous,
                changes,
            })
        })
        .collect();

    EmailMetricsReport {
        client_id: client.id.clone(),
        client_name: client.name.clone(),
        from: query.from,
        to: query.to,
        changes: EmailChanges::between(&current, &previous),
        current,
        previous,
        monthly,
        daily: daily.into_values().collect(),
        campaigns: current_tallies.iter().map(|t| t.to_metric()).collect(),
    }
}
