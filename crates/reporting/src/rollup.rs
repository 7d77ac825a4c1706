//! Time-bucketing and sessions-weighted rollups over web-analytics rows.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use insight_core::period;
use insight_core::types::{BreakdownRow, MetricRow, MonthlyMetric};
use serde::{Deserialize, Serialize};

/// Aggregate of daily rows over one period.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebPeriodSummary {
    pub days: usize,
    pub sessions: i64,
    pub page_views_per_session: f64,
    pub engagement_rate: f64,
    pub avg_session_duration_sec: f64,
    pub goal_completions: i64,
    pub goal_completion_rate: f64,
}

impl WebPeriodSummary {
    pub fn from_rows<'a, I>(rows: I) -> Self
    where
        I: IntoIterator<Item = &'a MetricRow>,
        I::IntoIter: Clone,
    {
        let rows = rows.into_iter();
        let weighted = |value: fn(&MetricRow) -> f64| {
            period::weighted_mean(rows.clone().map(|r| (value(r), r.sessions)))
        };
        Self {
            days: rows.clone().count(),
            sessions: rows.clone().map(|r| r.sessions).sum(),
            page_views_per_session: weighted(|r| r.page_views_per_session),
            engagement_rate: weighted(|r| r.engagement_rate),
            avg_session_duration_sec: weighted(|r| r.avg_session_duration_sec as f64),
            goal_completions: rows.clone().map(|r| r.goal_completions).sum(),
            goal_completion_rate: weighted(|r| r.goal_completion_rate),
        }
    }
}

/// Derive monthly rows from daily rows: sums for counts, sessions-weighted
/// means for rates and durations.
pub fn monthly_from_daily(rows: &[MetricRow]) -> Vec<MonthlyMetric> {
    let mut buckets: BTreeMap<(String, i32), Vec<&MetricRow>> = BTreeMap::new();
    for row in rows {
        buckets
            .entry((row.property_id.clone(), period::year_month(row.date)))
            .or_default()
            .push(row);
    }

    buckets
        .into_iter()
        .map(|((property_id, year_month), days)| {
            let summary = WebPeriodSummary::from_rows(days.iter().copied());
            MonthlyMetric {
                property_id,
                year_month,
                sessions: summary.sessions,
                page_views_per_session: summary.page_views_per_session,
                engagement_rate: summary.engagement_rate,
                avg_session_duration_sec: summary.avg_session_duration_sec.round() as i64,
                goal_completions: summary.goal_completions,
                goal_completion_rate: summary.goal_completion_rate,
            }
        })
        .collect()
}

/// Rows with `from <= date <= to`, in date order.
pub fn daily_in_range(rows: &[MetricRow], from: NaiveDate, to: NaiveDate) -> Vec<MetricRow> {
    let mut selected: Vec<MetricRow> = rows
        .iter()
        .filter(|r| r.date >= from && r.date <= to)
        .cloned()
        .collect();
    selected.sort_by_key(|r| r.date);
    selected
}

/// One channel or source over the requested period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub group_key: String,
    pub sessions: i64,
    pub share_of_sessions: f64,
    pub engagement_rate: f64,
    pub goal_completions: i64,
    pub goal_completion_rate: f64,
    pub previous_sessions: i64,
    pub sessions_change: Option<f64>,
}

#[derive(Default)]
struct GroupAccumulator {
    sessions: i64,
    goal_completions: i64,
    engagement: Vec<(f64, i64)>,
    completion_rate: Vec<(f64, i64)>,
}

/// Group breakdown rows by key for `[from, to]` and compare session counts
/// with the same window one year earlier. Sorted by sessions, descending.
pub fn summarize_groups(
    rows: &[BreakdownRow],
    from: NaiveDate,
    to: NaiveDate,
) -> Vec<GroupSummary> {
    let prev_from = period::one_year_back(from);
    let prev_to = period::one_year_back(to);

    let mut current: HashMap<&str, GroupAccumulator> = HashMap::new();
    let mut previous: HashMap<&str, i64> = HashMap::new();
    for row in rows {
        if row.date >= from && row.date <= to {
            let acc = current.entry(row.group_key.as_str()).or_default();
            acc.sessions += row.sessions;
            acc.goal_completions += row.goal_completions;
            acc.engagement.push((row.engagement_rate, row.sessions));
            acc.completion_rate.push((row.goal_completion_rate, row.sessions));
        } else if row.date >= prev_from && row.date <= prev_to {
            *previous.entry(row.group_key.as_str()).or_default() += row.sessions;
        }
    }

    let total_sessions: i64 = current.values().map(|a| a.sessions).sum();
    let mut groups: Vec<GroupSummary> = current
        .into_iter()
        .map(|(key, acc)| {
            let previous_sessions = previous.get(key).copied().unwrap_or(0);
            GroupSummary {
                group_key: key.to_string(),
                sessions: acc.sessions,
                share_of_sessions: period::rate_percent(acc.sessions, total_sessions),
                engagement_rate: period::weighted_mean(acc.engagement),
                goal_completions: acc.goal_completions,
                goal_completion_rate: period::weighted_mean(acc.completion_rate),
                previous_sessions,
                sessions_change: period::percent_change(
                    acc.sessions as f64,
                    previous_sessions as f64,
                ),
            }
        })
        .collect();
    groups.sort_by(|a, b| b.sessions.cmp(&a.sessions).then(a.group_key.cmp(&b.group_key)));
    groups
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn day(d: NaiveDate, sessions: i64, engagement_rate: f64) -> MetricRow {
        MetricRow {
            property_id: "p1".into(),
            date: d,
            sessions,
            page_views_per_session: 2.0,
            engagement_rate,
            avg_session_duration_sec: 100,
            goal_completions: sessions / 10,
            goal_completion_rate: 0.1,
        }
    }

    #[test]
    fn test_monthly_engagement_is_sessions_weighted() {
        let rows = vec![day(date(2024, 1, 1), 10, 0.5), day(date(2024, 1, 2), 90, 0.1)];
        let monthly = monthly_from_daily(&rows);
        assert_eq!(monthly.len(), 1);
        assert_eq!(monthly[0].year_month, 202401);
        assert_eq!(monthly[0].sessions, 100);
        assert!((monthly[0].engagement_rate - 0.14).abs() < 1e-9);
        assert!((monthly[0].engagement_rate - 0.3).abs() > 0.1);
    }

    #[test]
    fn test_zero_session_days_do_not_poison_averages() {
        let rows = vec![day(date(2024, 2, 1), 0, 0.9), day(date(2024, 2, 2), 0, 0.7)];
        let monthly = monthly_from_daily(&rows);
        assert_eq!(monthly[0].sessions, 0);
        assert_eq!(monthly[0].engagement_rate, 0.0);
        assert!(monthly[0].page_views_per_session.is_finite());
    }

    #[test]
    fn test_monthly_buckets_split_by_month() {
        let rows = vec![
            day(date(2024, 1, 31), 10, 0.5),
            day(date(2024, 2, 1), 20, 0.5),
            day(date(2024, 2, 2), 30, 0.5),
        ];
        let monthly = monthly_from_daily(&rows);
        assert_eq!(
            monthly.iter().map(|m| (m.year_month, m.sessions)).collect::<Vec<_>>(),
            vec![(202401, 10), (202402, 50)]
        );
    }

    #[test]
    fn test_group_summary_compares_prior_year() {
        let row = |d: NaiveDate, key: &str, sessions: i64| BreakdownRow {
            property_id: "p1".into(),
            date: d,
            group_key: key.into(),
            sessions,
            engagement_rate: 0.5,
            goal_completions: 1,
            goal_completion_rate: 0.1,
        };
        let rows = vec![
            row(date(2024, 1, 5), "Direct", 30),
            row(date(2024, 1, 6), "Direct", 30),
            row(date(2024, 1, 5), "Email", 40),
            row(date(2023, 1, 5), "Direct", 40),
        ];
        let groups = summarize_groups(&rows, date(2024, 1, 1), date(2024, 1, 31));
        assert_eq!(groups[0].group_key, "Direct");
        assert_eq!(groups[0].sessions, 60);
        assert_eq!(groups[0].previous_sessions, 40);
        assert_eq!(groups[0].sessions_change, Some(50.0));
        assert!((groups[0].share_of_sessions - 60.0).abs() < 1e-9);
        assert_eq!(groups[1].group_key, "Email");
        assert_eq!(groups[1].sessions_change, None);
    }
}
