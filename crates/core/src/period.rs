//! Calendar helpers for year-over-year windows and YYYYMM month keys.

use chrono::{Datelike, Months, NaiveDate};

/// Start of the lookback window used for year-over-year comparison.
/// Feb 29 maps to Feb 28 of the previous year.
pub fn extended_from(from: NaiveDate) -> NaiveDate {
    one_year_back(from)
}

pub fn one_year_back(date: NaiveDate) -> NaiveDate {
    date.checked_sub_months(Months::new(12)).unwrap_or(date)
}

/// Month key as YYYYMM.
pub fn year_month(date: NaiveDate) -> i32 {
    date.year() * 100 + date.month() as i32
}

/// Same month one year earlier.
pub fn prior_year_month(year_month: i32) -> i32 {
    year_month - 100
}

pub fn month_start(year_month: i32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year_month / 100, (year_month % 100) as u32, 1)
}

/// Every YYYYMM key touched by `[from, to]`, ascending.
pub fn months_between(from: NaiveDate, to: NaiveDate) -> Vec<i32> {
    let mut months = Vec::new();
    let Some(mut cursor) = from.with_day(1) else {
        return months;
    };
    while cursor <= to {
        months.push(year_month(cursor));
        match cursor.checked_add_months(Months::new(1)) {
            Some(next) => cursor = next,
            None => break,
        }
    }
    months
}

/// `(current - previous) / |previous| * 100`, or `None` when there is no
/// usable baseline.
pub fn percent_change(current: f64, previous: f64) -> Option<f64> {
    if previous == 0.0 || !previous.is_finite() || !current.is_finite() {
        return None;
    }
    let change = (current - previous) / previous.abs() * 100.0;
    change.is_finite().then_some(change)
}

/// `numerator / denominator * 100`, zero when the denominator is not positive.
pub fn rate_percent(numerator: i64, denominator: i64) -> f64 {
    if denominator <= 0 {
        return 0.0;
    }
    numerator as f64 / denominator as f64 * 100.0
}

/// Sessions-weighted mean of `(value, weight)` pairs. Zero-weight entries
/// contribute nothing; an all-zero input yields 0.
pub fn weighted_mean<I>(pairs: I) -> f64
where
    I: IntoIterator<Item = (f64, i64)>,
{
    let mut weighted_sum = 0.0;
    let mut total_weight: i64 = 0;
    for (value, weight) in pairs {
        if weight <= 0 || !value.is_finite() {
            continue;
        }
        weighted_sum += value * weight as f64;
        total_weight += weight;
    }
    if total_weight == 0 {
        0.0
    } else {
        weighted_sum / total_weight as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_extended_from_is_one_year_back() {
        assert_eq!(extended_from(date(2024, 1, 1)), date(2023, 1, 1));
        assert_eq!(extended_from(date(2024, 2, 29)), date(2023, 2, 28));
    }

    #[test]
    fn test_year_month_arithmetic() {
        assert_eq!(year_month(date(2024, 1, 15)), 202401);
        assert_eq!(prior_year_month(202401), 202301);
        assert_eq!(month_start(202312), Some(date(2023, 12, 1)));
        assert_eq!(month_start(202313), None);
    }

    #[test]
    fn test_months_between_crosses_year() {
        assert_eq!(
            months_between(date(2023, 11, 20), date(2024, 2, 1)),
            vec![202311, 202312, 202401, 202402]
        );
        assert!(months_between(date(2024, 2, 1), date(2024, 1, 1)).is_empty());
    }

    #[test]
    fn test_percent_change_zero_baseline() {
        assert_eq!(percent_change(10.0, 0.0), None);
        assert_eq!(percent_change(0.0, 0.0), None);
        assert_eq!(percent_change(f64::NAN, 5.0), None);
    }

    #[test]
    fn test_percent_change_uses_absolute_baseline() {
        assert_eq!(percent_change(150.0, 100.0), Some(50.0));
        assert_eq!(percent_change(50.0, 100.0), Some(-50.0));
        assert_eq!(percent_change(0.0, -10.0), Some(100.0));
    }

    #[test]
    fn test_weighted_mean() {
        let mean = weighted_mean([(0.5, 10), (0.1, 90)]);
        assert!((mean - 0.14).abs() < 1e-9);
        assert_eq!(weighted_mean([(0.5, 0), (0.9, 0)]), 0.0);
    }

    #[test]
    fn test_rate_percent() {
        assert!((rate_percent(50, 1000) - 5.0).abs() < 1e-9);
        assert_eq!(rate_percent(5, 0), 0.0);
    }
}
