//! Normalization of the analytics generator's loosely-typed response into
//! canonical metric rows.
//!
//! The generator answers with `{ datasets: [{ table, rows }, ..] }` (or an
//! array of such objects). Table names, object keys and field spellings vary
//! between runs, so every lookup goes through an explicit alias table and a
//! case/whitespace-insensitive key comparison. A bad row is dropped and
//! reported; it never fails the batch.

use chrono::{DateTime, NaiveDate};
use insight_core::period;
use insight_core::types::{BreakdownRow, MetricRow, MetricsSnapshot, MonthlyMetric};
use insight_core::{DashboardError, DashboardResult};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Row families the generator can return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKind {
    Daily,
    Monthly,
    Channel,
    Source,
}

impl DatasetKind {
    /// Resolve a dataset table name against the fixed vocabulary.
    pub fn resolve(table: &str) -> Option<Self> {
        match normalize_token(table).as_str() {
            "dailymetrics" | "kpidaily" | "daily" => Some(Self::Daily),
            "monthlymetrics" | "kpimonthly" | "monthly" => Some(Self::Monthly),
            "channelmetrics" | "channeldaily" | "channel" => Some(Self::Channel),
            "sourcemetrics" | "sourcedaily" | "source" => Some(Self::Source),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Monthly => "monthly",
            Self::Channel => "channel",
            Self::Source => "source",
        }
    }
}

/// Canonical row fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Date,
    YearMonth,
    Sessions,
    PageViewsPerSession,
    EngagementRate,
    AvgSessionDuration,
    GoalCompletions,
    GoalCompletionRate,
    ChannelGroup,
    Source,
}

impl Field {
    /// Accepted spellings, tried in order. First present key wins.
    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            Self::Date => &["date", "day", "report_date"],
            Self::YearMonth => &["year_month", "yearMonth", "month"],
            Self::Sessions => &["sessions", "total_sessions", "session_count"],
            Self::PageViewsPerSession => &[
                "page_views_per_session",
                "pageviews_per_session",
                "screenPageViewsPerSession",
                "views_per_session",
            ],
            Self::EngagementRate => &["engagement_rate", "engagementRate", "engaged_rate"],
            Self::AvgSessionDuration => &[
                "avg_session_duration_sec",
                "avg_session_duration",
                "averageSessionDuration",
                "avg_session_duration_seconds",
            ],
            Self::GoalCompletions => &[
                "goal_completions",
                "conversions",
                "key_events",
                "keyEvents",
            ],
            Self::GoalCompletionRate => &[
                "goal_completion_rate",
                "conversion_rate",
                "session_key_event_rate",
                "sessionKeyEventRate",
            ],
            Self::ChannelGroup => &[
                "channel",
                "channel_group",
                "default_channel_group",
                "sessionDefaultChannelGroup",
            ],
            Self::Source => &["source", "session_source", "sessionSource", "source_medium"],
        }
    }
}

/// A row that could not be mapped. Logged and dropped, never escalated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowRejection {
    pub table: DatasetKind,
    pub index: usize,
    pub reason: String,
}

/// Canonical output of one generator response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedResponse {
    pub snapshot: MetricsSnapshot,
    pub rejected: Vec<RowRejection>,
    pub ignored_tables: Vec<String>,
}

/// Lowercase and drop whitespace, `_` and `-`, so `Page Views_Per-Session`
/// and `pageviewspersession` compare equal.
fn normalize_token(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

fn get_key<'a>(object: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    let wanted = normalize_token(name);
    object
        .iter()
        .find(|(key, _)| normalize_token(key) == wanted)
        .map(|(_, value)| value)
}

fn get_field(object: &Map<String, Value>, field: Field) -> Option<&Value> {
    field
        .aliases()
        .iter()
        .find_map(|alias| get_key(object, alias))
        .filter(|value| !value.is_null())
}

fn as_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }?;
    number.is_finite().then_some(number)
}

/// Numeric field, `0.0` when absent or unparseable.
fn float_field(object: &Map<String, Value>, field: Field) -> f64 {
    get_field(object, field).and_then(as_number).unwrap_or(0.0)
}

/// Integer field, rounded, `0` when absent or unparseable.
fn int_field(object: &Map<String, Value>, field: Field) -> i64 {
    float_field(object, field).round() as i64
}

fn text_field(object: &Map<String, Value>, field: Field) -> Option<String> {
    match get_field(object, field)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Accepts `YYYY-MM-DD`, `YYYYMMDD` and RFC 3339 timestamps.
pub fn parse_date(value: &Value) -> Option<NaiveDate> {
    let raw = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(&raw, "%Y%m%d"))
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(&raw)
                .ok()
                .map(|dt| dt.date_naive())
        })
}

/// Accepts `202401`, `"202401"`, `"2024-01"` and full dates.
pub fn parse_year_month(value: &Value) -> Option<i32> {
    let raw = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let candidate = if raw.len() == 6 && raw.chars().all(|c| c.is_ascii_digit()) {
        raw.parse::<i32>().ok()
    } else if raw.len() == 7 && raw.as_bytes()[4] == b'-' {
        format!("{}{}", &raw[..4], &raw[5..]).parse::<i32>().ok()
    } else {
        parse_date(value).map(period::year_month)
    };
    candidate.filter(|ym| (1..=12).contains(&(ym % 100)) && *ym / 100 > 0)
}

fn map_daily(property_id: &str, row: &Map<String, Value>) -> Result<MetricRow, String> {
    let date = get_field(row, Field::Date)
        .and_then(parse_date)
        .ok_or_else(|| "missing or invalid date".to_string())?;
    Ok(MetricRow {
        property_id: property_id.to_string(),
        date,
        sessions: int_field(row, Field::Sessions),
        page_views_per_session: float_field(row, Field::PageViewsPerSession),
        engagement_rate: float_field(row, Field::EngagementRate),
        avg_session_duration_sec: int_field(row, Field::AvgSessionDuration),
        goal_completions: int_field(row, Field::GoalCompletions),
        goal_completion_rate: float_field(row, Field::GoalCompletionRate),
    })
}

fn map_monthly(property_id: &str, row: &Map<String, Value>) -> Result<MonthlyMetric, String> {
    let year_month = get_field(row, Field::YearMonth)
        .or_else(|| get_field(row, Field::Date))
        .and_then(parse_year_month)
        .ok_or_else(|| "missing or invalid month".to_string())?;
    Ok(MonthlyMetric {
        property_id: property_id.to_string(),
        year_month,
        sessions: int_field(row, Field::Sessions),
        page_views_per_session: float_field(row, Field::PageViewsPerSession),
        engagement_rate: float_field(row, Field::EngagementRate),
        avg_session_duration_sec: int_field(row, Field::AvgSessionDuration),
        goal_completions: int_field(row, Field::GoalCompletions),
        goal_completion_rate: float_field(row, Field::GoalCompletionRate),
    })
}

fn map_breakdown(
    property_id: &str,
    group_field: Field,
    row: &Map<String, Value>,
) -> Result<BreakdownRow, String> {
    let date = get_field(row, Field::Date)
        .and_then(parse_date)
        .ok_or_else(|| "missing or invalid date".to_string())?;
    Ok(BreakdownRow {
        property_id: property_id.to_string(),
        date,
        group_key: text_field(row, group_field).unwrap_or_else(|| "(not set)".to_string()),
        sessions: int_field(row, Field::Sessions),
        engagement_rate: float_field(row, Field::EngagementRate),
        goal_completions: int_field(row, Field::GoalCompletions),
        goal_completion_rate: float_field(row, Field::GoalCompletionRate),
    })
}

/// `rows` may arrive as an array or as a JSON string holding one.
fn dataset_rows(block: &Map<String, Value>) -> Option<Vec<Value>> {
    match get_key(block, "rows")? {
        Value::Array(rows) => Some(rows.clone()),
        Value::String(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Array(rows)) => Some(rows),
            _ => None,
        },
        _ => None,
    }
}

/// Collect the dataset blocks, accepting either the object form or an array
/// of objects. Missing `datasets` is a format error.
fn dataset_blocks(response: &Value) -> DashboardResult<Vec<Map<String, Value>>> {
    let envelopes: Vec<&Map<String, Value>> = match response {
        Value::Object(object) => vec![object],
        Value::Array(items) => items.iter().filter_map(Value::as_object).collect(),
        _ => Vec::new(),
    };

    let mut blocks = Vec::new();
    let mut found = false;
    for envelope in envelopes {
        let datasets = match get_key(envelope, "datasets") {
            Some(Value::Array(items)) => items.clone(),
            Some(Value::String(raw)) => match serde_json::from_str::<Value>(raw) {
                Ok(Value::Array(items)) => items,
                _ => continue,
            },
            _ => continue,
        };
        found = true;
        blocks.extend(datasets.into_iter().filter_map(|d| match d {
            Value::Object(map) => Some(map),
            _ => None,
        }));
    }

    if !found {
        return Err(DashboardError::format("response has no datasets array"));
    }
    Ok(blocks)
}

/// Map a full generator response onto canonical rows for `property_id`.
pub fn normalize_response(
    response: &Value,
    property_id: &str,
) -> DashboardResult<NormalizedResponse> {
    let mut out = NormalizedResponse::default();

    for block in dataset_blocks(response)? {
        let table_name = get_key(&block, "table")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let Some(kind) = DatasetKind::resolve(&table_name) else {
            warn!(table = %table_name, "Ignoring dataset with unknown table name");
            out.ignored_tables.push(table_name);
            continue;
        };

        let Some(rows) = dataset_rows(&block) else {
            warn!(table = kind.as_str(), "Skipping dataset whose rows are not an array");
            continue;
        };

        for (index, row) in rows.iter().enumerate() {
            let Some(object) = row.as_object() else {
                out.reject(kind, index, "row is not an object");
                continue;
            };
            let mapped = match kind {
                DatasetKind::Daily => {
                    map_daily(property_id, object).map(|r| out.snapshot.daily.push(r))
                }
                DatasetKind::Monthly => {
                    map_monthly(property_id, object).map(|r| out.snapshot.monthly.push(r))
                }
                DatasetKind::Channel => map_breakdown(property_id, Field::ChannelGroup, object)
                    .map(|r| out.snapshot.channels.push(r)),
                DatasetKind::Source => map_breakdown(property_id, Field::Source, object)
                    .map(|r| out.snapshot.sources.push(r)),
            };
            if let Err(reason) = mapped {
                out.reject(kind, index, reason);
            }
        }
    }

    debug!(
        property_id = property_id,
        daily = out.snapshot.daily.len(),
        monthly = out.snapshot.monthly.len(),
        channel = out.snapshot.channels.len(),
        source = out.snapshot.sources.len(),
        rejected = out.rejected.len(),
        "Normalized analytics response"
    );
    Ok(out)
}

impl NormalizedResponse {
    fn reject(&mut self, table: DatasetKind, index: usize, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(
            table = table.as_str(),
            index = index,
            reason = %reason,
            "Dropping malformed dataset row"
        );
        metrics::counter!("gateway.rows_rejected").increment(1);
        self.rejected.push(RowRejection {
            table,
            index,
            reason,
        });
    }
}
