//! PostgreSQL implementation of [`MetricsStore`] built on sqlx.
//!
//! Upserts use `INSERT .. ON CONFLICT (natural key) DO UPDATE`, so a
//! re-fetch fully overwrites the rows it returns. `upsert_snapshot` wraps
//! all four web families in one transaction.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use insight_core::config::DatabaseConfig;
use insight_core::types::{
    BreakdownRow, Channel, Client, EmailCampaign, EmailDailyStat, ImportRun, ImportStatus,
    MetricRow, MetricsSnapshot, MonthlyMetric, Property, UspsCampaign, UspsCampaignSummary,
};
use insight_core::{DashboardError, DashboardResult};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool};
use tracing::{debug, info};
use uuid::Uuid;

use crate::store::MetricsStore;

fn map_sqlx_error(e: sqlx::Error) -> DashboardError {
    DashboardError::store(e.to_string())
}

#[derive(Clone, Copy)]
enum BreakdownTable {
    Channel,
    Source,
}

impl BreakdownTable {
    fn name(self) -> &'static str {
        match self {
            Self::Channel => "metrics_channel_daily",
            Self::Source => "metrics_source_daily",
        }
    }
}

pub struct PostgresMetricsStore {
    pool: PgPool,
}

impl PostgresMetricsStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a connection pool and apply pending migrations.
    pub async fn connect(config: &DatabaseConfig) -> DashboardResult<Self> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| DashboardError::config("database url is not set"))?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(url)
            .await
            .map_err(map_sqlx_error)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| DashboardError::store(e.to_string()))?;

        info!(max_connections = config.max_connections, "PostgreSQL metrics store ready");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn find_breakdown(
        &self,
        table: BreakdownTable,
        property_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> DashboardResult<Vec<BreakdownRow>> {
        let sql = format!(
            "SELECT property_id, date, group_key, sessions, engagement_rate, \
             goal_completions, goal_completion_rate \
             FROM {} WHERE property_id = $1 AND date BETWEEN $2 AND $3 \
             ORDER BY date, group_key",
            table.name()
        );
        let rows = sqlx::query_as::<_, BreakdownDbRow>(&sql)
            .bind(property_id)
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn commit_counted(
        &self,
        tx: sqlx::Transaction<'_, sqlx::Postgres>,
        written: usize,
    ) -> DashboardResult<usize> {
        tx.commit().await.map_err(map_sqlx_error)?;
        metrics::counter!("store.rows_upserted").increment(written as u64);
        Ok(written)
    }
}

// ─── Writers shared by single-family upserts and snapshot writes ───────────

async fn write_daily(conn: &mut PgConnection, rows: &[MetricRow]) -> Result<usize, sqlx::Error> {
    for row in rows {
        sqlx::query(
            r#"
            INSERT INTO metrics_daily
                (property_id, date, sessions, page_views_per_session, engagement_rate,
                 avg_session_duration_sec, goal_completions, goal_completion_rate)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (property_id, date) DO UPDATE SET
                sessions = EXCLUDED.sessions,
                page_views_per_session = EXCLUDED.page_views_per_session,
                engagement_rate = EXCLUDED.engagement_rate,
                avg_session_duration_sec = EXCLUDED.avg_session_duration_sec,
                goal_completions = EXCLUDED.goal_completions,
                goal_completion_rate = EXCLUDED.goal_completion_rate
            "#,
        )
        .bind(&row.property_id)
        .bind(row.date)
        .bind(row.sessions)
        .bind(row.page_views_per_session)
        .bind(row.engagement_rate)
        .bind(row.avg_session_duration_sec)
        .bind(row.goal_completions)
        .bind(row.goal_completion_rate)
        .execute(&mut *conn)
        .await?;
    }
    Ok(rows.len())
}

async fn write_monthly(
    conn: &mut PgConnection,
    rows: &[MonthlyMetric],
) -> Result<usize, sqlx::Error> {
    for row in rows {
        sqlx::query(
            r#"
            INSERT INTO metrics_monthly
                (property_id, year_month, sessions, page_views_per_session, engagement_rate,
                 avg_session_duration_sec, goal_completions, goal_completion_rate)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (property_id, year_month) DO UPDATE SET
                sessions = EXCLUDED.sessions,
                page_views_per_session = EXCLUDED.page_views_per_session,
                engagement_rate = EXCLUDED.engagement_rate,
                avg_session_duration_sec = EXCLUDED.avg_session_duration_sec,
                goal_completions = EXCLUDED.goal_completions,
                goal_completion_rate = EXCLUDED.goal_completion_rate
            "#,
        )
        .bind(&row.property_id)
        .bind(row.year_month)
        .bind(row.sessions)
        .bind(row.page_views_per_session)
        .bind(row.engagement_rate)
        .bind(row.avg_session_duration_sec)
        .bind(row.goal_completions)
        .bind(row.goal_completion_rate)
        .execute(&mut *conn)
        .await?;
    }
    Ok(rows.len())
}

async fn write_breakdown(
    conn: &mut PgConnection,
    table: BreakdownTable,
    rows: &[BreakdownRow],
) -> Result<usize, sqlx::Error> {
    let sql = format!(
        "INSERT INTO {} \
             (property_id, date, group_key, sessions, engagement_rate, \
              goal_completions, goal_completion_rate) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         ON CONFLICT (property_id, date, group_key) DO UPDATE SET \
             sessions = EXCLUDED.sessions, \
             engagement_rate = EXCLUDED.engagement_rate, \
             goal_completions = EXCLUDED.goal_completions, \
             goal_completion_rate = EXCLUDED.goal_completion_rate",
        table.name()
    );
    for row in rows {
        sqlx::query(&sql)
            .bind(&row.property_id)
            .bind(row.date)
            .bind(&row.group_key)
            .bind(row.sessions)
            .bind(row.engagement_rate)
            .bind(row.goal_completions)
            .bind(row.goal_completion_rate)
            .execute(&mut *conn)
            .await?;
    }
    Ok(rows.len())
}

#[async_trait]
impl MetricsStore for PostgresMetricsStore {
    async fn find_property(&self, property_id: &str) -> DashboardResult<Option<Property>> {
        let row = sqlx::query_as::<_, PropertyDbRow>(
            "SELECT id, name, account_external_id, property_external_id \
             FROM properties WHERE id = $1",
        )
        .bind(property_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(row.map(Into::into))
    }

    async fn find_client(
        &self,
        client_id: &str,
        channel: Channel,
    ) -> DashboardResult<Option<Client>> {
        let row = sqlx::query_as::<_, ClientDbRow>(
            "SELECT id, name FROM clients WHERE id = $1 AND channel = $2",
        )
        .bind(client_id)
        .bind(channel.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(row.map(|r| Client {
            id: r.id,
            name: r.name,
            channel,
        }))
    }

    async fn find_daily(
        &self,
        property_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> DashboardResult<Vec<MetricRow>> {
        let rows = sqlx::query_as::<_, DailyDbRow>(
            r#"
            SELECT property_id, date, sessions, page_views_per_session, engagement_rate,
                   avg_session_duration_sec, goal_completions, goal_completion_rate
            FROM metrics_daily
            WHERE property_id = $1 AND date BETWEEN $2 AND $3
            ORDER BY date
            "#,
        )
        .bind(property_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn find_monthly(
        &self,
        property_id: &str,
        year_month: i32,
    ) -> DashboardResult<Option<MonthlyMetric>> {
        let row = sqlx::query_as::<_, MonthlyDbRow>(
            r#"
            SELECT property_id, year_month, sessions, page_views_per_session, engagement_rate,
                   avg_session_duration_sec, goal_completions, goal_completion_rate
            FROM metrics_monthly
            WHERE property_id = $1 AND year_month = $2
            "#,
        )
        .bind(property_id)
        .bind(year_month)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(row.map(Into::into))
    }

    async fn find_monthly_range(
        &self,
        property_id: &str,
        from_month: i32,
        to_month: i32,
    ) -> DashboardResult<Vec<MonthlyMetric>> {
        let rows = sqlx::query_as::<_, MonthlyDbRow>(
            r#"
            SELECT property_id, year_month, sessions, page_views_per_session, engagement_rate,
                   avg_session_duration_sec, goal_completions, goal_completion_rate
            FROM metrics_monthly
            WHERE property_id = $1 AND year_month BETWEEN $2 AND $3
            ORDER BY year_month
            "#,
        )
        .bind(property_id)
        .bind(from_month)
        .bind(to_month)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn find_channel_breakdown(
        &self,
        property_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> DashboardResult<Vec<BreakdownRow>> {
        self.find_breakdown(BreakdownTable::Channel, property_id, from, to)
            .await
    }

    async fn find_source_breakdown(
        &self,
        property_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> DashboardResult<Vec<BreakdownRow>> {
        self.find_breakdown(BreakdownTable::Source, property_id, from, to)
            .await
    }

    async fn upsert_daily(&self, rows: &[MetricRow]) -> DashboardResult<usize> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let written = write_daily(&mut tx, rows).await.map_err(map_sqlx_error)?;
        self.commit_counted(tx, written).await
    }

    async fn upsert_monthly(&self, rows: &[MonthlyMetric]) -> DashboardResult<usize> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let written = write_monthly(&mut tx, rows).await.map_err(map_sqlx_error)?;
        self.commit_counted(tx, written).await
    }

    async fn upsert_channel_breakdown(&self, rows: &[BreakdownRow]) -> DashboardResult<usize> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let written = write_breakdown(&mut tx, BreakdownTable::Channel, rows)
            .await
            .map_err(map_sqlx_error)?;
        self.commit_counted(tx, written).await
    }

    async fn upsert_source_breakdown(&self, rows: &[BreakdownRow]) -> DashboardResult<usize> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let written = write_breakdown(&mut tx, BreakdownTable::Source, rows)
            .await
            .map_err(map_sqlx_error)?;
        self.commit_counted(tx, written).await
    }

    async fn upsert_snapshot(&self, snapshot: &MetricsSnapshot) -> DashboardResult<usize> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let mut written = write_daily(&mut tx, &snapshot.daily)
            .await
            .map_err(map_sqlx_error)?;
        written += write_monthly(&mut tx, &snapshot.monthly)
            .await
            .map_err(map_sqlx_error)?;
        written += write_breakdown(&mut tx, BreakdownTable::Channel, &snapshot.channels)
            .await
            .map_err(map_sqlx_error)?;
        written += write_breakdown(&mut tx, BreakdownTable::Source, &snapshot.sources)
            .await
            .map_err(map_sqlx_error)?;
        // Dropping `tx` on any error above rolls the whole snapshot back.
        let written = self.commit_counted(tx, written).await?;
        debug!(rows = written, "Snapshot committed to PostgreSQL");
        Ok(written)
    }

    async fn append_import_run(&self, run: &ImportRun) -> DashboardResult<()> {
        sqlx::query(
            r#"
            INSERT INTO import_runs
                (id, property_id, date_range_start, date_range_end, requested_by,
                 status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(run.id)
        .bind(&run.property_id)
        .bind(run.date_range_start)
        .bind(run.date_range_end)
        .bind(&run.requested_by)
        .bind(run.status.as_str())
        .bind(run.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn list_import_runs(&self, property_id: &str) -> DashboardResult<Vec<ImportRun>> {
        let rows = sqlx::query_as::<_, ImportRunDbRow>(
            r#"
            SELECT id, property_id, date_range_start, date_range_end, requested_by,
                   status, created_at
            FROM import_runs
            WHERE property_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(property_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn find_email_campaigns(
        &self,
        client_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> DashboardResult<Vec<EmailCampaign>> {
        let rows = sqlx::query_as::<_, EmailCampaignDbRow>(
            r#"
            SELECT id, client_id, campaign_name, send_date, sent
            FROM email_campaigns
            WHERE client_id = $1 AND send_date BETWEEN $2 AND $3
            ORDER BY send_date, id
            "#,
        )
        .bind(client_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn find_email_daily_stats(
        &self,
        campaign_ids: &[String],
        from: NaiveDate,
        to: NaiveDate,
    ) -> DashboardResult<Vec<EmailDailyStat>> {
        if campaign_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, EmailDailyStatDbRow>(
            r#"
            SELECT campaign_id, date, delivered, unique_opens, unique_clicks, bounces, unsubscribes
            FROM email_daily_stats
            WHERE campaign_id = ANY($1) AND date BETWEEN $2 AND $3
            ORDER BY date, campaign_id
            "#,
        )
        .bind(campaign_ids)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn find_usps_campaigns(
        &self,
        client_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> DashboardResult<Vec<UspsCampaign>> {
        let rows = sqlx::query_as::<_, UspsCampaignDbRow>(
            r#"
            SELECT id, client_id, campaign_name, mail_date, pieces
            FROM usps_campaigns
            WHERE client_id = $1 AND mail_date BETWEEN $2 AND $3
            ORDER BY mail_date, id
            "#,
        )
        .bind(client_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn find_usps_summaries(
        &self,
        campaign_ids: &[String],
    ) -> DashboardResult<Vec<UspsCampaignSummary>> {
        if campaign_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, UspsSummaryDbRow>(
            "SELECT campaign_id, delivered, last_scan_date \
             FROM usps_campaign_summary WHERE campaign_id = ANY($1)",
        )
        .bind(campaign_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}

// ─── Row types ─────────────────────────────────────────────────────────────

#[derive(sqlx::FromRow)]
struct PropertyDbRow {
    id: String,
    name: String,
    account_external_id: String,
    property_external_id: String,
}

impl From<PropertyDbRow> for Property {
    fn from(r: PropertyDbRow) -> Self {
        Self {
            id: r.id,
            name: r.name,
            account_external_id: r.account_external_id,
            property_external_id: r.property_external_id,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ClientDbRow {
    id: String,
    name: String,
}

#[derive(sqlx::FromRow)]
struct DailyDbRow {
    property_id: String,
    date: NaiveDate,
    sessions: i64,
    page_views_per_session: f64,
    engagement_rate: f64,
    avg_session_duration_sec: i64,
    goal_completions: i64,
    goal_completion_rate: f64,
}

impl From<DailyDbRow> for MetricRow {
    fn from(r: DailyDbRow) -> Self {
        Self {
            property_id: r.property_id,
            date: r.date,
            sessions: r.sessions,
            page_views_per_session: r.page_views_per_session,
            engagement_rate: r.engagement_rate,
            avg_session_duration_sec: r.avg_session_duration_sec,
            goal_completions: r.goal_completions,
            goal_completion_rate: r.goal_completion_rate,
        }
    }
}

#[derive(sqlx::FromRow)]
struct MonthlyDbRow {
    property_id: String,
    year_month: i32,
    sessions: i64,
    page_views_per_session: f64,
    engagement_rate: f64,
    avg_session_duration_sec: i64,
    goal_completions: i64,
    goal_completion_rate: f64,
}

impl From<MonthlyDbRow> for MonthlyMetric {
    fn from(r: MonthlyDbRow) -> Self {
        Self {
            property_id: r.property_id,
            year_month: r.year_month,
            sessions: r.sessions,
            page_views_per_session: r.page_views_per_session,
            engagement_rate: r.engagement_rate,
            avg_session_duration_sec: r.avg_session_duration_sec,
            goal_completions: r.goal_completions,
            goal_completion_rate: r.goal_completion_rate,
        }
    }
}

#[derive(sqlx::FromRow)]
struct BreakdownDbRow {
    property_id: String,
    date: NaiveDate,
    group_key: String,
    sessions: i64,
    engagement_rate: f64,
    goal_completions: i64,
    goal_completion_rate: f64,
}

impl From<BreakdownDbRow> for BreakdownRow {
    fn from(r: BreakdownDbRow) -> Self {
        Self {
            property_id: r.property_id,
            date: r.date,
            group_key: r.group_key,
            sessions: r.sessions,
            engagement_rate: r.engagement_rate,
            goal_completions: r.goal_completions,
            goal_completion_rate: r.goal_completion_rate,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ImportRunDbRow {
    id: Uuid,
    property_id: String,
    date_range_start: NaiveDate,
    date_range_end: NaiveDate,
    requested_by: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
}

impl From<ImportRunDbRow> for ImportRun {
    fn from(r: ImportRunDbRow) -> Self {
        Self {
            id: r.id,
            property_id: r.property_id,
            date_range_start: r.date_range_start,
            date_range_end: r.date_range_end,
            requested_by: r.requested_by,
            status: ImportStatus::parse(&r.status),
            created_at: r.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct EmailCampaignDbRow {
    id: String,
    client_id: String,
    campaign_name: String,
    send_date: Option<NaiveDate>,
    sent: i64,
}

impl From<EmailCampaignDbRow> for EmailCampaign {
    fn from(r: EmailCampaignDbRow) -> Self {
        Self {
            id: r.id,
            client_id: r.client_id,
            campaign_name: r.campaign_name,
            send_date: r.send_date,
            sent: r.sent,
        }
    }
}

#[derive(sqlx::FromRow)]
struct EmailDailyStatDbRow {
    campaign_id: String,
    date: NaiveDate,
    delivered: i64,
    unique_opens: i64,
    unique_clicks: i64,
    bounces: i64,
    unsubscribes: i64,
}

impl From<EmailDailyStatDbRow> for EmailDailyStat {
    fn from(r: EmailDailyStatDbRow) -> Self {
        Self {
            campaign_id: r.campaign_id,
            date: r.date,
            delivered: r.delivered,
            unique_opens: r.unique_opens,
            unique_clicks: r.unique_clicks,
            bounces: r.bounces,
            unsubscribes: r.unsubscribes,
        }
    }
}

#[derive(sqlx::FromRow)]
struct UspsCampaignDbRow {
    id: String,
    client_id: String,
    campaign_name: String,
    mail_date: Option<NaiveDate>,
    pieces: i64,
}

impl From<UspsCampaignDbRow> for UspsCampaign {
    fn from(r: UspsCampaignDbRow) -> Self {
        Self {
            id: r.id,
            client_id: r.client_id,
            campaign_name: r.campaign_name,
            mail_date: r.mail_date,
            pieces: r.pieces,
        }
    }
}

#[derive(sqlx::FromRow)]
struct UspsSummaryDbRow {
    campaign_id: String,
    delivered: i64,
    last_scan_date: Option<NaiveDate>,
}

impl From<UspsSummaryDbRow> for UspsCampaignSummary {
    fn from(r: UspsSummaryDbRow) -> Self {
        Self {
            campaign_id: r.campaign_id,
            delivered: r.delivered,
            last_scan_date: r.last_scan_date,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn daily(day: NaiveDate, sessions: i64) -> MetricRow {
        MetricRow {
            property_id: "p1".into(),
            date: day,
            sessions,
            page_views_per_session: 2.5,
            engagement_rate: 0.6,
            avg_session_duration_sec: 95,
            goal_completions: 3,
            goal_completion_rate: 0.03,
        }
    }

    fn group(day: NaiveDate, key: &str, sessions: i64) -> BreakdownRow {
        BreakdownRow {
            property_id: "p1".into(),
            date: day,
            group_key: key.into(),
            sessions,
            engagement_rate: 0.4,
            goal_completions: 1,
            goal_completion_rate: 0.1,
        }
    }

    fn run(created_at: DateTime<Utc>, status: ImportStatus) -> ImportRun {
        ImportRun {
            id: Uuid::new_v4(),
            property_id: "p1".into(),
            date_range_start: date(2023, 1, 1),
            date_range_end: date(2024, 1, 31),
            requested_by: Some("u1".into()),
            status,
            created_at,
        }
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn test_upsert_overwrites_existing_rows(pool: PgPool) {
        let store = PostgresMetricsStore::new(pool);
        let day = date(2024, 1, 5);

        store.upsert_daily(&[daily(day, 10)]).await.unwrap();
        store.upsert_daily(&[daily(day, 42)]).await.unwrap();
        store
            .upsert_channel_breakdown(&[group(day, "Direct", 1), group(day, "Email", 2)])
            .await
            .unwrap();
        store
            .upsert_channel_breakdown(&[group(day, "Direct", 7)])
            .await
            .unwrap();

        let rows = store.find_daily("p1", day, day).await.unwrap();
        assert_eq!(rows, vec![daily(day, 42)]);

        let groups = store.find_channel_breakdown("p1", day, day).await.unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].group_key, "Direct");
        assert_eq!(groups[0].sessions, 7);
        assert!(store.find_source_breakdown("p1", day, day).await.unwrap().is_empty());
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn test_snapshot_round_trips_every_family(pool: PgPool) {
        let store = PostgresMetricsStore::new(pool);
        let day = date(2024, 3, 1);
        let snapshot = MetricsSnapshot {
            daily: vec![daily(day, 10)],
            monthly: vec![MonthlyMetric {
                property_id: "p1".into(),
                year_month: 202403,
                sessions: 10,
                page_views_per_session: 2.5,
                engagement_rate: 0.6,
                avg_session_duration_sec: 95,
                goal_completions: 3,
                goal_completion_rate: 0.03,
            }],
            channels: vec![group(day, "Direct", 10)],
            sources: vec![group(day, "google", 10)],
        };

        assert_eq!(store.upsert_snapshot(&snapshot).await.unwrap(), 4);
        assert_eq!(
            store.find_monthly("p1", 202403).await.unwrap(),
            Some(snapshot.monthly[0].clone())
        );
        assert_eq!(store.find_monthly_range("p1", 202401, 202412).await.unwrap().len(), 1);
        assert_eq!(store.find_source_breakdown("p1", day, day).await.unwrap(), snapshot.sources);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn test_snapshot_rolls_back_when_one_family_fails(pool: PgPool) {
        let store = PostgresMetricsStore::new(pool.clone());
        let day = date(2024, 3, 1);
        sqlx::query("DROP TABLE metrics_source_daily")
            .execute(&pool)
            .await
            .unwrap();

        let snapshot = MetricsSnapshot {
            daily: vec![daily(day, 10)],
            monthly: Vec::new(),
            channels: vec![group(day, "Direct", 10)],
            sources: vec![group(day, "google", 10)],
        };
        let err = store.upsert_snapshot(&snapshot).await.unwrap_err();
        assert!(matches!(err, DashboardError::Store(_)));

        assert!(store.find_daily("p1", day, day).await.unwrap().is_empty());
        assert!(store.find_channel_breakdown("p1", day, day).await.unwrap().is_empty());
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn test_import_runs_newest_first(pool: PgPool) {
        let store = PostgresMetricsStore::new(pool);
        let now = Utc::now();
        let oldest = run(now - chrono::Duration::hours(2), ImportStatus::Ok);
        let newest = run(now, ImportStatus::Error);
        let middle = run(now - chrono::Duration::hours(1), ImportStatus::Ok);

        for r in [&oldest, &newest, &middle] {
            store.append_import_run(r).await.unwrap();
        }

        let runs = store.list_import_runs("p1").await.unwrap();
        let ids: Vec<Uuid> = runs.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![newest.id, middle.id, oldest.id]);
        assert_eq!(runs[0].status, ImportStatus::Error);
        assert_eq!(runs[0].requested_by.as_deref(), Some("u1"));
        assert!(store.list_import_runs("p2").await.unwrap().is_empty());
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn test_campaign_reads_by_id_list(pool: PgPool) {
        sqlx::query(
            "INSERT INTO clients (id, channel, name) VALUES \
             ('c1', 'email', 'Acme'), ('m1', 'direct_mail', 'Acme Mail')",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO email_campaigns (id, client_id, campaign_name, send_date, sent) VALUES \
             ('e1', 'c1', 'Jan Promo', '2024-01-10', 1000), \
             ('e2', 'c1', 'Feb Promo', '2024-02-10', 500), \
             ('e3', 'c1', 'Undated', NULL, 10)",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO email_daily_stats \
             (campaign_id, date, delivered, unique_opens, unique_clicks, bounces, unsubscribes) \
             VALUES ('e1', '2024-01-10', 990, 200, 50, 10, 1), \
                    ('e1', '2024-01-11', 0, 20, 5, 0, 0), \
                    ('e2', '2024-02-10', 495, 90, 9, 5, 0)",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO usps_campaigns (id, client_id, campaign_name, mail_date, pieces) VALUES \
             ('u1', 'm1', 'jan promo', '2024-01-05', 500), \
             ('u2', 'm1', 'untracked', '2024-01-20', 100)",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO usps_campaign_summary (campaign_id, delivered, last_scan_date) \
             VALUES ('u1', 480, '2024-01-09')",
        )
        .execute(&pool)
        .await
        .unwrap();

        let store = PostgresMetricsStore::new(pool);
        let client = store.find_client("m1", Channel::DirectMail).await.unwrap().unwrap();
        assert_eq!(client.name, "Acme Mail");
        assert!(store.find_client("m1", Channel::Email).await.unwrap().is_none());

        let email = store
            .find_email_campaigns("c1", date(2024, 1, 1), date(2024, 1, 31))
            .await
            .unwrap();
        assert_eq!(email.len(), 1);
        assert_eq!(email[0].id, "e1");

        let ids = vec!["e1".to_string(), "e2".to_string()];
        let stats = store
            .find_email_daily_stats(&ids, date(2024, 1, 1), date(2024, 1, 31))
            .await
            .unwrap();
        assert_eq!(stats.len(), 2);
        assert!(stats.iter().all(|s| s.campaign_id == "e1"));
        assert_eq!(stats[0].delivered, 990);

        let summaries = store
            .find_usps_summaries(&["u1".to_string(), "u2".to_string()])
            .await
            .unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].campaign_id, "u1");
        assert_eq!(summaries[0].last_scan_date, Some(date(2024, 1, 9)));
        assert!(store.find_usps_summaries(&[]).await.unwrap().is_empty());
    }
}
