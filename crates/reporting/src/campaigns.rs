//! Cross-channel campaign view: email and direct-mail campaigns joined on a
//! case-insensitive campaign name.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use insight_core::period;
use insight_core::types::{
    AggregatedCampaignRecord, CampaignAggregationQuery, EmailCampaignMetric, MailCampaignMetric,
    MetricsQuery,
};
use insight_core::DashboardResult;
use tracing::info;

use crate::direct_mail::DirectMailMetricsService;
use crate::email::EmailMetricsService;

/// Per-campaign email rows for one client and date range.
#[async_trait]
pub trait EmailCampaignFeed: Send + Sync {
    async fn email_campaigns(&self, query: &MetricsQuery)
        -> DashboardResult<Vec<EmailCampaignMetric>>;
}

/// Per-campaign direct-mail rows for one client and date range.
#[async_trait]
pub trait MailCampaignFeed: Send + Sync {
    async fn mail_campaigns(&self, query: &MetricsQuery)
        -> DashboardResult<Vec<MailCampaignMetric>>;
}

#[async_trait]
impl EmailCampaignFeed for EmailMetricsService {
    async fn email_campaigns(
        &self,
        query: &MetricsQuery,
    ) -> DashboardResult<Vec<EmailCampaignMetric>> {
        self.campaign_metrics(query).await
    }
}

#[async_trait]
impl MailCampaignFeed for DirectMailMetricsService {
    async fn mail_campaigns(
        &self,
        query: &MetricsQuery,
    ) -> DashboardResult<Vec<MailCampaignMetric>> {
        self.campaign_metrics(query).await
    }
}

/// Builds the joined campaign list. Both channel fetches run concurrently and
/// either failing fails the whole request.
pub struct CampaignAggregationService {
    email: Arc<dyn EmailCampaignFeed>,
    mail: Arc<dyn MailCampaignFeed>,
}

impl CampaignAggregationService {
    pub fn new(email: Arc<dyn EmailCampaignFeed>, mail: Arc<dyn MailCampaignFeed>) -> Self {
        Self { email, mail }
    }

    pub async fn get_campaign_aggregation_metrics(
        &self,
        query: &CampaignAggregationQuery,
    ) -> DashboardResult<Vec<AggregatedCampaignRecord>> {
        let email_query = query.email_query();
        let mail_query = query.usps_query();
        let (email, mail) = tokio::try_join!(
            self.email.email_campaigns(&email_query),
            self.mail.mail_campaigns(&mail_query),
        )?;

        let records = merge_campaigns(&email, &mail);
        info!(
            user_id = %query.user_id,
            email_campaigns = email.len(),
            mail_campaigns = mail.len(),
            joined = records.len(),
            "Campaign aggregation built"
        );
        Ok(records)
    }
}

/// Join key: the campaign name, lowercased.
pub fn campaign_key(name: &str) -> String {
    name.to_lowercase()
}

/// Accumulates records by join key. Every mutation leaves each record with
/// `usps_undelivered == usps_pieces_sent - usps_delivered` and a click-through
/// rate recomputed from its current totals.
#[derive(Debug, Default)]
pub struct CampaignJoin {
    records: HashMap<String, AggregatedCampaignRecord>,
}

impl CampaignJoin {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, name: &str) -> &mut AggregatedCampaignRecord {
        self.records
            .entry(campaign_key(name))
            .or_insert_with(|| AggregatedCampaignRecord::new(name))
    }

    pub fn add_email(&mut self, metric: &EmailCampaignMetric) {
        let record = self.entry(&metric.campaign_name);
        record.emails_sent += metric.sent;
        record.email_clicks += metric.unique_clicks;
        record.email_click_through_rate =
            period::rate_percent(record.email_clicks, record.emails_sent);
    }

    pub fn add_mail(&mut self, metric: &MailCampaignMetric) {
        let record = self.entry(&metric.campaign_name);
        record.usps_pieces_sent += metric.pieces;
        record.usps_delivered += metric.delivered;
        record.usps_undelivered = record.usps_pieces_sent - record.usps_delivered;
        record.usps_sent_date = earliest(record.usps_sent_date, metric.mail_date);
        record.usps_delivered_to_homes_date =
            latest(record.usps_delivered_to_homes_date, metric.last_scan_date);
    }

    pub fn get(&self, name: &str) -> Option<&AggregatedCampaignRecord> {
        self.records.get(&campaign_key(name))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records ordered by join key.
    pub fn into_records(self) -> Vec<AggregatedCampaignRecord> {
        let mut keyed: Vec<(String, AggregatedCampaignRecord)> = self.records.into_iter().collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        keyed.into_iter().map(|(_, record)| record).collect()
    }
}

fn earliest<T: Ord>(a: Option<T>, b: Option<T>) -> Option<T> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn latest<T: Ord>(a: Option<T>, b: Option<T>) -> Option<T> {
    a.max(b)
}

/// Email rows are applied first, so a name seen in both channels keeps its
/// email spelling.
pub fn merge_campaigns(
    email: &[EmailCampaignMetric],
    mail: &[MailCampaignMetric],
) -> Vec<AggregatedCampaignRecord> {
    let mut join = CampaignJoin::new();
    for metric in email {
        join.add_email(metric);
    }
    for metric in mail {
        join.add_mail(metric);
    }
    join.into_records()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::testing::date;
    use chrono::NaiveDate;
    use insight_core::types::{
        Channel, Client, EmailCampaign, EmailDailyStat, UspsCampaign, UspsCampaignSummary,
    };
    use insight_core::DashboardError;
    use insight_store::InMemoryMetricsStore;

    fn email(name: &str, sent: i64, clicks: i64) -> EmailCampaignMetric {
        EmailCampaignMetric {
            campaign_name: name.into(),
            sent,
            delivered: sent,
            unique_opens: clicks * 2,
            unique_clicks: clicks,
            send_date: Some(date(2024, 1, 10)),
            last_event_date: None,
        }
    }

    fn mail(name: &str, pieces: i64, delivered: i64, mailed: NaiveDate) -> MailCampaignMetric {
        MailCampaignMetric {
            campaign_name: name.into(),
            pieces,
            delivered,
            mail_date: Some(mailed),
            last_scan_date: Some(mailed + chrono::Days::new(4)),
        }
    }

    struct StaticEmail(DashboardResult<Vec<EmailCampaignMetric>>);
    struct StaticMail(DashboardResult<Vec<MailCampaignMetric>>);

    #[async_trait]
    impl EmailCampaignFeed for StaticEmail {
        async fn email_campaigns(
            &self,
            _query: &MetricsQuery,
        ) -> DashboardResult<Vec<EmailCampaignMetric>> {
            self.0.clone()
        }
    }

    #[async_trait]
    impl MailCampaignFeed for StaticMail {
        async fn mail_campaigns(
            &self,
            _query: &MetricsQuery,
        ) -> DashboardResult<Vec<MailCampaignMetric>> {
            self.0.clone()
        }
    }

    fn query() -> CampaignAggregationQuery {
        CampaignAggregationQuery {
            user_id: "u1".into(),
            email_client_id: "c1".into(),
            usps_client_id: "m1".into(),
            from: date(2024, 1, 1),
            to: date(2024, 1, 31),
        }
    }

    fn assert_consistent(record: &AggregatedCampaignRecord) {
        assert_eq!(
            record.usps_undelivered,
            record.usps_pieces_sent - record.usps_delivered
        );
        let expected_ctr = if record.emails_sent > 0 {
            record.email_clicks as f64 / record.emails_sent as f64 * 100.0
        } else {
            0.0
        };
        assert!((record.email_click_through_rate - expected_ctr).abs() < 1e-9);
    }

    #[test]
    fn test_names_join_case_insensitively() {
        let records = merge_campaigns(
            &[email("Jan Promo", 1000, 50)],
            &[mail("jan promo", 500, 480, date(2024, 1, 5))],
        );

        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.campaign_name, "Jan Promo");
        assert_eq!(r.emails_sent, 1000);
        assert_eq!(r.email_clicks, 50);
        assert!((r.email_click_through_rate - 5.0).abs() < 1e-9);
        assert_eq!(r.usps_pieces_sent, 500);
        assert_eq!(r.usps_delivered, 480);
        assert_eq!(r.usps_undelivered, 20);
        assert_eq!(r.usps_sent_date, Some(date(2024, 1, 5)));
        assert_eq!(r.usps_delivered_to_homes_date, Some(date(2024, 1, 9)));
        assert_eq!(r.usps_received_by_post_office_date, None);
        assert_eq!(r.conversion_rate, 0.0);
    }

    #[test]
    fn test_single_channel_campaigns_keep_zero_defaults() {
        let records = merge_campaigns(
            &[email("Email Only", 200, 0)],
            &[mail("Mail Only", 100, 90, date(2024, 1, 7))],
        );

        assert_eq!(records.len(), 2);
        let email_only = records.iter().find(|r| r.campaign_name == "Email Only").unwrap();
        assert_eq!(email_only.usps_pieces_sent, 0);
        assert_eq!(email_only.usps_undelivered, 0);
        assert_eq!(email_only.email_click_through_rate, 0.0);
        assert_eq!(email_only.usps_sent_date, None);

        let mail_only = records.iter().find(|r| r.campaign_name == "Mail Only").unwrap();
        assert_eq!(mail_only.emails_sent, 0);
        assert_eq!(mail_only.email_click_through_rate, 0.0);
        assert_eq!(mail_only.usps_undelivered, 10);
    }

    #[test]
    fn test_repeated_rows_accumulate() {
        let records = merge_campaigns(
            &[email("Spring", 100, 5), email("SPRING", 300, 15)],
            &[
                mail("spring", 50, 40, date(2024, 1, 20)),
                mail("Spring", 70, 70, date(2024, 1, 3)),
            ],
        );

        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.campaign_name, "Spring");
        assert_eq!(r.emails_sent, 400);
        assert!((r.email_click_through_rate - 5.0).abs() < 1e-9);
        assert_eq!(r.usps_undelivered, 10);
        assert_eq!(r.usps_sent_date, Some(date(2024, 1, 3)));
        assert_eq!(r.usps_delivered_to_homes_date, Some(date(2024, 1, 24)));
    }

    #[test]
    fn test_invariants_hold_after_every_step_in_any_order() {
        enum Step {
            Email(EmailCampaignMetric),
            Mail(MailCampaignMetric),
        }
        let steps = || {
            vec![
                Step::Email(email("Promo", 100, 3)),
                Step::Mail(mail("promo", 80, 75, date(2024, 1, 2))),
                Step::Email(email("PROMO", 0, 0)),
                Step::Mail(mail("Promo", 20, 0, date(2024, 1, 9))),
                Step::Email(email("promo", 900, 47)),
            ]
        };
        let orders: [[usize; 5]; 4] = [
            [0, 1, 2, 3, 4],
            [4, 3, 2, 1, 0],
            [1, 3, 0, 2, 4],
            [3, 0, 4, 1, 2],
        ];

        let mut finals = Vec::new();
        for order in orders {
            let mut all: Vec<Option<Step>> = steps().into_iter().map(Some).collect();
            let mut join = CampaignJoin::new();
            for i in order {
                match all[i].take().unwrap() {
                    Step::Email(m) => join.add_email(&m),
                    Step::Mail(m) => join.add_mail(&m),
                }
                assert_consistent(join.get("promo").unwrap());
            }
            assert_eq!(join.len(), 1);
            finals.push(join.into_records().remove(0));
        }

        for r in &finals {
            assert_eq!(r.emails_sent, 1000);
            assert_eq!(r.email_clicks, 50);
            assert_eq!(r.usps_pieces_sent, 100);
            assert_eq!(r.usps_undelivered, 25);
            assert_eq!(r.usps_sent_date, Some(date(2024, 1, 2)));
        }
    }

    #[tokio::test]
    async fn test_service_joins_both_feeds() {
        let svc = CampaignAggregationService::new(
            Arc::new(StaticEmail(Ok(vec![email("Jan Promo", 1000, 50)]))),
            Arc::new(StaticMail(Ok(vec![mail("jan promo", 500, 480, date(2024, 1, 5))]))),
        );

        let records = svc.get_campaign_aggregation_metrics(&query()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert!((records[0].email_click_through_rate - 5.0).abs() < 1e-9);
        assert_eq!(records[0].usps_undelivered, 20);
    }

    #[tokio::test]
    async fn test_either_feed_failing_fails_the_request() {
        let svc = CampaignAggregationService::new(
            Arc::new(StaticEmail(Ok(vec![email("Jan Promo", 1000, 50)]))),
            Arc::new(StaticMail(Err(DashboardError::store("connection reset")))),
        );
        let err = svc.get_campaign_aggregation_metrics(&query()).await.unwrap_err();
        assert!(matches!(err, DashboardError::Store(_)));

        let svc = CampaignAggregationService::new(
            Arc::new(StaticEmail(Err(DashboardError::not_found("email client c1")))),
            Arc::new(StaticMail(Ok(Vec::new()))),
        );
        let err = svc.get_campaign_aggregation_metrics(&query()).await.unwrap_err();
        assert!(matches!(err, DashboardError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_joins_store_backed_services() {
        let store = Arc::new(InMemoryMetricsStore::new());
        store.insert_client(Client {
            id: "c1".into(),
            name: "Acme".into(),
            channel: Channel::Email,
        });
        store.insert_client(Client {
            id: "m1".into(),
            name: "Acme".into(),
            channel: Channel::DirectMail,
        });
        store.insert_email_campaign(EmailCampaign {
            id: "e1".into(),
            client_id: "c1".into(),
            campaign_name: "Jan Promo".into(),
            send_date: Some(date(2024, 1, 10)),
            sent: 1000,
        });
        store.insert_email_daily_stat(EmailDailyStat {
            campaign_id: "e1".into(),
            date: date(2024, 1, 10),
            delivered: 980,
            unique_opens: 300,
            unique_clicks: 50,
            bounces: 20,
            unsubscribes: 1,
        });
        store.insert_usps_campaign(UspsCampaign {
            id: "u1".into(),
            client_id: "m1".into(),
            campaign_name: "jan promo".into(),
            mail_date: Some(date(2024, 1, 5)),
            pieces: 500,
        });
        store.insert_usps_summary(UspsCampaignSummary {
            campaign_id: "u1".into(),
            delivered: 480,
            last_scan_date: Some(date(2024, 1, 9)),
        });

        let svc = CampaignAggregationService::new(
            Arc::new(EmailMetricsService::new(store.clone())),
            Arc::new(DirectMailMetricsService::new(store)),
        );
        let records = svc.get_campaign_aggregation_metrics(&query()).await.unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].campaign_name, "Jan Promo");
        assert!((records[0].email_click_through_rate - 5.0).abs() < 1e-9);
        assert_eq!(records[0].usps_undelivered, 20);
        assert_eq!(records[0].usps_delivered_to_homes_date, Some(date(2024, 1, 9)));
    }
}
