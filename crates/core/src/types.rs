use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DashboardError, DashboardResult};

// ─── Directory ──────────────────────────────────────────────────────────────

/// Marketing medium with its own metrics schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    WebAnalytics,
    Email,
    DirectMail,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WebAnalytics => "web_analytics",
            Self::Email => "email",
            Self::DirectMail => "direct_mail",
        }
    }
}

/// A tracked web destination and the external identifiers the analytics
/// generator knows it by.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub id: String,
    pub name: String,
    pub account_external_id: String,
    pub property_external_id: String,
}

/// An email or direct-mail client account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
    pub id: String,
    pub name: String,
    pub channel: Channel,
}

// ─── Web analytics families ────────────────────────────────────────────────

/// Daily KPIs for one property, keyed by `(property_id, date)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRow {
    pub property_id: String,
    pub date: NaiveDate,
    pub sessions: i64,
    pub page_views_per_session: f64,
    pub engagement_rate: f64,
    pub avg_session_duration_sec: i64,
    pub goal_completions: i64,
    pub goal_completion_rate: f64,
}

/// Monthly KPIs, keyed by `(property_id, year_month)` with `year_month` as YYYYMM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyMetric {
    pub property_id: String,
    pub year_month: i32,
    pub sessions: i64,
    pub page_views_per_session: f64,
    pub engagement_rate: f64,
    pub avg_session_duration_sec: i64,
    pub goal_completions: i64,
    pub goal_completion_rate: f64,
}

/// Per-channel or per-source daily slice, keyed by `(property_id, date, group_key)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakdownRow {
    pub property_id: String,
    pub date: NaiveDate,
    pub group_key: String,
    pub sessions: i64,
    pub engagement_rate: f64,
    pub goal_completions: i64,
    pub goal_completion_rate: f64,
}

pub type ChannelBreakdownRow = BreakdownRow;
pub type SourceBreakdownRow = BreakdownRow;

/// The four web-analytics row families for one property.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub daily: Vec<MetricRow>,
    pub monthly: Vec<MonthlyMetric>,
    pub channels: Vec<ChannelBreakdownRow>,
    pub sources: Vec<SourceBreakdownRow>,
}

impl MetricsSnapshot {
    /// True when every family has at least one row.
    pub fn is_complete(&self) -> bool {
        !self.daily.is_empty()
            && !self.monthly.is_empty()
            && !self.channels.is_empty()
            && !self.sources.is_empty()
    }

    /// Names of the families with no rows.
    pub fn missing_families(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.daily.is_empty() {
            missing.push("daily");
        }
        if self.monthly.is_empty() {
            missing.push("monthly");
        }
        if self.channels.is_empty() {
            missing.push("channel");
        }
        if self.sources.is_empty() {
            missing.push("source");
        }
        missing
    }

    pub fn row_count(&self) -> usize {
        self.daily.len() + self.monthly.len() + self.channels.len() + self.sources.len()
    }
}

// ─── Import audit log ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportStatus {
    Ok,
    Error,
}

impl ImportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("ok") {
            Self::Ok
        } else {
            Self::Error
        }
    }
}

/// One external-fetch invocation. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportRun {
    pub id: Uuid,
    pub property_id: String,
    pub date_range_start: NaiveDate,
    pub date_range_end: NaiveDate,
    pub requested_by: Option<String>,
    pub status: ImportStatus,
    pub created_at: DateTime<Utc>,
}

// ─── Campaign tables ───────────────────────────────────────────────────────

/// An email blast as recorded by the campaign-tracking tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailCampaign {
    pub id: String,
    pub client_id: String,
    pub campaign_name: String,
    pub send_date: Option<NaiveDate>,
    pub sent: i64,
}

/// Engagement counters for one email campaign on one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailDailyStat {
    pub campaign_id: String,
    pub date: NaiveDate,
    pub delivered: i64,
    pub unique_opens: i64,
    pub unique_clicks: i64,
    pub bounces: i64,
    pub unsubscribes: i64,
}

/// A USPS mail drop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UspsCampaign {
    pub id: String,
    pub client_id: String,
    pub campaign_name: String,
    pub mail_date: Option<NaiveDate>,
    pub pieces: i64,
}

/// Latest delivery tracking rollup for one USPS campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UspsCampaignSummary {
    pub campaign_id: String,
    pub delivered: i64,
    pub last_scan_date: Option<NaiveDate>,
}

/// Per-campaign email metrics derived from the campaign and its daily stats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailCampaignMetric {
    pub campaign_name: String,
    pub sent: i64,
    pub delivered: i64,
    pub unique_opens: i64,
    pub unique_clicks: i64,
    pub send_date: Option<NaiveDate>,
    pub last_event_date: Option<NaiveDate>,
}

/// Per-campaign direct-mail metrics derived from the campaign and its summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailCampaignMetric {
    pub campaign_name: String,
    pub pieces: i64,
    pub delivered: i64,
    pub mail_date: Option<NaiveDate>,
    pub last_scan_date: Option<NaiveDate>,
}

/// One row of the cross-channel campaign view. Request-scoped, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedCampaignRecord {
    pub campaign_name: String,
    pub emails_sent: i64,
    pub email_clicks: i64,
    pub email_click_through_rate: f64,
    pub usps_pieces_sent: i64,
    pub usps_delivered: i64,
    pub usps_undelivered: i64,
    pub usps_sent_date: Option<NaiveDate>,
    pub usps_received_by_post_office_date: Option<NaiveDate>,
    pub usps_delivered_to_homes_date: Option<NaiveDate>,
    pub conversion_rate: f64,
}

impl AggregatedCampaignRecord {
    pub fn new(campaign_name: impl Into<String>) -> Self {
        Self {
            campaign_name: campaign_name.into(),
            emails_sent: 0,
            email_clicks: 0,
            email_click_through_rate: 0.0,
            usps_pieces_sent: 0,
            usps_delivered: 0,
            usps_undelivered: 0,
            usps_sent_date: None,
            usps_received_by_post_office_date: None,
            usps_delivered_to_homes_date: None,
            conversion_rate: 0.0,
        }
    }
}

// ─── Queries ───────────────────────────────────────────────────────────────

/// Input to every per-channel metrics service. `owner_id` is the property id
/// for web analytics and the client id for email and direct mail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsQuery {
    pub owner_id: String,
    pub from: NaiveDate,
    pub to: NaiveDate,
    #[serde(default)]
    pub requested_by: Option<String>,
}

impl MetricsQuery {
    pub fn new(owner_id: impl Into<String>, from: NaiveDate, to: NaiveDate) -> Self {
        Self {
            owner_id: owner_id.into(),
            from,
            to,
            requested_by: None,
        }
    }

    pub fn requested_by(mut self, user_id: impl Into<String>) -> Self {
        self.requested_by = Some(user_id.into());
        self
    }

    pub fn validate(&self) -> DashboardResult<()> {
        if self.owner_id.trim().is_empty() {
            return Err(DashboardError::validation("identifier must not be empty"));
        }
        if self.from > self.to {
            return Err(DashboardError::validation(format!(
                "from date {} is after to date {}",
                self.from, self.to
            )));
        }
        Ok(())
    }
}

/// Input to the cross-channel campaign join. Identifiers are trusted to have
/// passed the caller's access check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignAggregationQuery {
    pub user_id: String,
    pub email_client_id: String,
    pub usps_client_id: String,
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl CampaignAggregationQuery {
    pub fn email_query(&self) -> MetricsQuery {
        MetricsQuery::new(self.email_client_id.clone(), self.from, self.to)
            .requested_by(self.user_id.clone())
    }

    pub fn usps_query(&self) -> MetricsQuery {
        MetricsQuery::new(self.usps_client_id.clone(), self.from, self.to)
            .requested_by(self.user_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_query_rejects_inverted_range() {
        let query = MetricsQuery::new("p1", date(2024, 2, 1), date(2024, 1, 1));
        assert!(matches!(query.validate(), Err(DashboardError::Validation(_))));
        let query = MetricsQuery::new("p1", date(2024, 1, 1), date(2024, 1, 1));
        assert!(query.validate().is_ok());
    }

    #[test]
    fn test_missing_families() {
        let snapshot = MetricsSnapshot {
            daily: vec![MetricRow {
                property_id: "p1".into(),
                date: date(2024, 1, 1),
                sessions: 1,
                page_views_per_session: 1.0,
                engagement_rate: 0.5,
                avg_session_duration_sec: 30,
                goal_completions: 0,
                goal_completion_rate: 0.0,
            }],
            ..Default::default()
        };
        assert!(!snapshot.is_complete());
        assert_eq!(snapshot.missing_families(), vec!["monthly", "channel", "source"]);
    }

    #[test]
    fn test_aggregated_record_serializes_camel_case() {
        let json = serde_json::to_value(AggregatedCampaignRecord::new("Jan Promo")).unwrap();
        assert_eq!(json["campaignName"], "Jan Promo");
        assert_eq!(json["uspsUndelivered"], 0);
        assert!(json["uspsReceivedByPostOfficeDate"].is_null());
    }
}
