// Statistics Aggregator - daily, monthly, per-category totals and month status
//
// Daily and monthly results are dense (every day / month present, empty ones
// zeroed). Category results are sparse: categories without records in the
// window are left out.

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::debug;

use crate::closure::MonthClosurePolicy;
use crate::error::{FinanceError, Result};
use crate::gateway::Gateway;
use crate::models::{days_in_month, Record, Window};

// ============================================================================
// RESULT TYPES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyStatistic {
    pub date: NaiveDate,
    pub total: Decimal,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyStatistic {
    pub month: u32,
    pub total: Decimal,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryStatistic {
    pub category_id: i64,
    pub total: Decimal,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthStatus {
    pub year: i32,
    pub month: u32,
    pub closed: bool,
}

// ============================================================================
// AGGREGATION
// ============================================================================

fn accumulate(bucket: &mut (Decimal, usize), value: Decimal) -> Result<()> {
    bucket.0 = bucket
        .0
        .checked_add(value)
        .ok_or_else(|| FinanceError::Internal(format!("total overflows adding {value}")))?;
    bucket.1 += 1;
    Ok(())
}

/// One entry per day of the month, ascending. Records outside the month are ignored.
pub fn daily(records: &[Record], year: i32, month: u32) -> Result<Vec<DailyStatistic>> {
    let days = days_in_month(year, month)?;
    let window = Window::Month { year, month };
    let mut buckets = vec![(Decimal::ZERO, 0usize); days as usize];

    for record in records.iter().filter(|r| window.contains(&r.timestamp)) {
        accumulate(&mut buckets[record.timestamp.day0() as usize], record.value)?;
    }

    buckets
        .into_iter()
        .enumerate()
        .map(|(index, (total, count))| {
            let date = NaiveDate::from_ymd_opt(year, month, index as u32 + 1).ok_or_else(|| {
                FinanceError::Internal(format!("day {} of {year}-{month} out of range", index + 1))
            })?;
            Ok(DailyStatistic { date, total, count })
        })
        .collect()
}

/// Always twelve entries, January first.
pub fn monthly(records: &[Record], year: i32) -> Result<Vec<MonthlyStatistic>> {
    let window = Window::Year(year);
    let mut buckets = [(Decimal::ZERO, 0usize); 12];

    for record in records.iter().filter(|r| window.contains(&r.timestamp)) {
        accumulate(&mut buckets[record.timestamp.month0() as usize], record.value)?;
    }

    Ok(buckets
        .iter()
        .enumerate()
        .map(|(index, (total, count))| MonthlyStatistic {
            month: index as u32 + 1,
            total: *total,
            count: *count,
        })
        .collect())
}

/// Totals per category with at least one record in the month, by category id.
pub fn category_monthly(records: &[Record], year: i32, month: u32) -> Result<Vec<CategoryStatistic>> {
    let window = Window::Month { year, month };
    let mut buckets: BTreeMap<i64, (Decimal, usize)> = BTreeMap::new();

    for record in records.iter().filter(|r| window.contains(&r.timestamp)) {
        let bucket = buckets
            .entry(record.category_id)
            .or_insert((Decimal::ZERO, 0));
        accumulate(bucket, record.value)?;
    }

    Ok(buckets
        .into_iter()
        .map(|(category_id, (total, count))| CategoryStatistic {
            category_id,
            total,
            count,
        })
        .collect())
}

pub fn month_status(year: i32, month: u32, closed: bool) -> MonthStatus {
    MonthStatus {
        year,
        month,
        closed,
    }
}

// ============================================================================
// REQUEST VALIDATION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatisticsType {
    Daily,
    Monthly,
    CategoryMonthly,
    MonthStatus,
}

impl FromStr for StatisticsType {
    type Err = FinanceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DAILY" => Ok(StatisticsType::Daily),
            "MONTHLY" => Ok(StatisticsType::Monthly),
            "CATEGORY_MONTHLY" => Ok(StatisticsType::CategoryMonthly),
            "MONTH_STATUS" => Ok(StatisticsType::MonthStatus),
            other => Err(FinanceError::invalid(
                "type",
                format!("unknown statistics type '{other}'"),
            )),
        }
    }
}

/// Raw query parameters as they arrive over HTTP or the CLI.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatisticsQuery {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub month: Option<String>,
    pub year: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatisticsRequest {
    Daily { year: i32, month: u32 },
    Monthly { year: i32 },
    CategoryMonthly { year: i32, month: u32 },
    MonthStatus { year: i32, month: u32 },
}

/// Non-numeric input counts as absent.
fn parse_number(raw: &Option<String>) -> Option<i64> {
    raw.as_deref().and_then(|s| s.trim().parse::<i64>().ok())
}

pub(crate) fn check_month(month: i64) -> Result<u32> {
    if (1..=12).contains(&month) {
        Ok(month as u32)
    } else {
        Err(FinanceError::invalid("month", format!("{month} is not between 1 and 12")))
    }
}

pub(crate) fn check_year(year: i64) -> Result<i32> {
    if (1..=9999).contains(&year) {
        Ok(year as i32)
    } else {
        Err(FinanceError::invalid("year", format!("{year} is not between 1 and 9999")))
    }
}

impl StatisticsQuery {
    /// Turn raw parameters into a request. Touches no data.
    pub fn validate(&self) -> Result<StatisticsRequest> {
        let kind = match self.kind.as_deref().map(str::trim) {
            Some(kind) if !kind.is_empty() => StatisticsType::from_str(kind)?,
            _ => return Err(FinanceError::missing(["type"])),
        };

        let month = parse_number(&self.month);
        let year = parse_number(&self.year);

        let needs_month = kind != StatisticsType::Monthly;
        let mut missing = Vec::new();
        if needs_month && month.is_none() {
            missing.push("month");
        }
        if year.is_none() {
            missing.push("year");
        }
        if !missing.is_empty() {
            return Err(FinanceError::missing(missing));
        }

        let year = check_year(year.unwrap_or_default())?;
        let month = if needs_month {
            check_month(month.unwrap_or_default())?
        } else {
            0
        };

        Ok(match kind {
            StatisticsType::Daily => StatisticsRequest::Daily { year, month },
            StatisticsType::Monthly => StatisticsRequest::Monthly { year },
            StatisticsType::CategoryMonthly => StatisticsRequest::CategoryMonthly { year, month },
            StatisticsType::MonthStatus => StatisticsRequest::MonthStatus { year, month },
        })
    }
}

// ============================================================================
// RESULT ENVELOPE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StatisticsData {
    Daily(Vec<DailyStatistic>),
    Monthly(Vec<MonthlyStatistic>),
    CategoryMonthly(Vec<CategoryStatistic>),
    MonthStatus(MonthStatus),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatisticsResult {
    #[serde(rename = "type")]
    pub kind: StatisticsType,
    pub year: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub month: Option<u32>,
    pub data: StatisticsData,
}

/// Fetch the owner's records for the request's window and aggregate them.
pub fn compute(
    gateway: &dyn Gateway,
    policy: &dyn MonthClosurePolicy,
    owner: &str,
    request: StatisticsRequest,
) -> Result<StatisticsResult> {
    let result = match request {
        StatisticsRequest::Daily { year, month } => {
            let records = gateway.list(owner, Window::Month { year, month })?;
            StatisticsResult {
                kind: StatisticsType::Daily,
                year,
                month: Some(month),
                data: StatisticsData::Daily(daily(&records, year, month)?),
            }
        }
        StatisticsRequest::Monthly { year } => {
            let records = gateway.list(owner, Window::Year(year))?;
            StatisticsResult {
                kind: StatisticsType::Monthly,
                year,
                month: None,
                data: StatisticsData::Monthly(monthly(&records, year)?),
            }
        }
        StatisticsRequest::CategoryMonthly { year, month } => {
            let records = gateway.list(owner, Window::Month { year, month })?;
            StatisticsResult {
                kind: StatisticsType::CategoryMonthly,
                year,
                month: Some(month),
                data: StatisticsData::CategoryMonthly(category_monthly(&records, year, month)?),
            }
        }
        StatisticsRequest::MonthStatus { year, month } => {
            // Policies need not touch storage, so check the owner here
            gateway.get_user(owner)?;
            let closed = policy.is_closed(owner, year, month)?;
            StatisticsResult {
                kind: StatisticsType::MonthStatus,
                year,
                month: Some(month),
                data: StatisticsData::MonthStatus(month_status(year, month, closed)),
            }
        }
    };

    debug!(owner, kind = ?result.kind, "statistics computed");
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn record(id: i64, y: i32, m: u32, d: u32, value: i64, category_id: i64) -> Record {
        Record {
            id,
            description: format!("record {id}"),
            value: Decimal::from(value),
            timestamp: Utc.with_ymd_and_hms(y, m, d, 12, 30, 0).unwrap(),
            wallet_id: 1,
            category_id,
            owner: "alice".into(),
            external_reference: None,
        }
    }

    fn query(kind: Option<&str>, month: Option<&str>, year: Option<&str>) -> StatisticsQuery {
        StatisticsQuery {
            kind: kind.map(str::to_string),
            month: month.map(str::to_string),
            year: year.map(str::to_string),
        }
    }

    fn missing_fields(err: FinanceError) -> Vec<String> {
        match err {
            FinanceError::MissingProperty(fields) => fields,
            other => panic!("expected MissingProperty, got {other:?}"),
        }
    }

    #[test]
    fn test_overflowing_totals_are_errors() {
        let huge = |id, category_id| Record {
            value: Decimal::from_str("50000000000000000000000000000").unwrap(),
            ..record(id, 2024, 3, 1, 0, category_id)
        };
        let records = [huge(1, 1), huge(2, 1)];

        assert!(matches!(daily(&records, 2024, 3), Err(FinanceError::Internal(_))));
        assert!(matches!(monthly(&records, 2024), Err(FinanceError::Internal(_))));
        assert!(matches!(
            category_monthly(&records, 2024, 3),
            Err(FinanceError::Internal(_))
        ));

        // Different categories never share a bucket
        assert_eq!(category_monthly(&[huge(1, 1), huge(2, 2)], 2024, 3).unwrap().len(), 2);
    }

    #[test]
    fn test_daily_march_scenario() {
        let records = vec![
            record(1, 2024, 3, 1, 10, 1),
            record(2, 2024, 3, 1, -3, 1),
            record(3, 2024, 3, 15, 5, 2),
        ];
        let days = daily(&records, 2024, 3).unwrap();

        assert_eq!(days.len(), 31);
        assert_eq!(days[0].date, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert_eq!((days[0].total, days[0].count), (Decimal::from(7), 2));
        assert_eq!((days[14].total, days[14].count), (Decimal::from(5), 1));
        for (index, day) in days.iter().enumerate() {
            if index != 0 && index != 14 {
                assert_eq!((day.total, day.count), (Decimal::ZERO, 0), "day {}", index + 1);
            }
        }
        assert!(days.windows(2).all(|w| w[0].date < w[1].date));
    }

    #[test]
    fn test_daily_length_and_count_sum() {
        let records = vec![
            record(1, 2024, 2, 29, 1, 1),
            record(2, 2024, 2, 1, 1, 1),
            record(3, 2024, 3, 1, 1, 1), // other month
            record(4, 2023, 2, 1, 1, 1), // other year
        ];
        let days = daily(&records, 2024, 2).unwrap();
        assert_eq!(days.len(), 29);
        assert_eq!(days.iter().map(|d| d.count).sum::<usize>(), 2);

        assert_eq!(daily(&[], 2023, 2).unwrap().len(), 28);
        assert_eq!(daily(&[], 2024, 4).unwrap().len(), 30);
    }

    #[test]
    fn test_monthly_always_twelve() {
        let empty = monthly(&[], 2024).unwrap();
        assert_eq!(empty.len(), 12);
        assert!(empty.iter().all(|m| m.total.is_zero() && m.count == 0));

        let records = vec![
            record(1, 2024, 1, 5, 100, 1),
            record(2, 2024, 1, 20, -40, 1),
            record(3, 2024, 12, 31, 7, 1),
            record(4, 2025, 1, 1, 999, 1),
        ];
        let months = monthly(&records, 2024).unwrap();
        assert_eq!(months.len(), 12);
        assert_eq!(months[0].month, 1);
        assert_eq!((months[0].total, months[0].count), (Decimal::from(60), 2));
        assert_eq!((months[11].total, months[11].count), (Decimal::from(7), 1));
        assert_eq!(months[5].count, 0);
    }

    #[test]
    fn test_category_monthly_is_sparse() {
        let records = vec![
            record(1, 2024, 3, 1, -20, 7),
            record(2, 2024, 3, 2, -5, 3),
            record(3, 2024, 3, 9, -10, 7),
            record(4, 2024, 4, 1, -99, 11),
        ];
        let categories = category_monthly(&records, 2024, 3).unwrap();

        assert_eq!(categories.len(), 2, "category 11 has no March records");
        assert_eq!(categories[0].category_id, 3);
        assert_eq!(categories[0].total, Decimal::from(-5));
        assert_eq!(categories[1].category_id, 7);
        assert_eq!((categories[1].total, categories[1].count), (Decimal::from(-30), 2));

        assert!(category_monthly(&[], 2024, 3).unwrap().is_empty());
    }

    #[test]
    fn test_missing_type() {
        let err = query(None, Some("3"), Some("2024")).validate().unwrap_err();
        assert_eq!(missing_fields(err), vec!["type"]);

        let err = query(Some(" "), None, None).validate().unwrap_err();
        assert_eq!(missing_fields(err), vec!["type"]);
    }

    #[test]
    fn test_daily_missing_month() {
        let err = query(Some("DAILY"), None, Some("2024")).validate().unwrap_err();
        assert_eq!(missing_fields(err), vec!["month"]);
    }

    #[test]
    fn test_missing_fields_are_listed_exactly() {
        let err = query(Some("CATEGORY_MONTHLY"), None, None).validate().unwrap_err();
        assert_eq!(missing_fields(err), vec!["month", "year"]);

        let err = query(Some("MONTH_STATUS"), Some("3"), None).validate().unwrap_err();
        assert_eq!(missing_fields(err), vec!["year"]);

        // Monthly never needs a month
        let err = query(Some("MONTHLY"), None, None).validate().unwrap_err();
        assert_eq!(missing_fields(err), vec!["year"]);

        // Non-numeric counts as absent
        let err = query(Some("DAILY"), Some("march"), Some("2024")).validate().unwrap_err();
        assert_eq!(missing_fields(err), vec!["month"]);
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            query(Some("WEEKLY"), Some("3"), Some("2024")).validate(),
            Err(FinanceError::InvalidProperty { .. })
        ));
        assert!(matches!(
            query(Some("DAILY"), Some("13"), Some("2024")).validate(),
            Err(FinanceError::InvalidProperty { .. })
        ));
        assert!(matches!(
            query(Some("MONTHLY"), None, Some("0")).validate(),
            Err(FinanceError::InvalidProperty { .. })
        ));
    }

    #[test]
    fn test_valid_requests() {
        assert_eq!(
            query(Some("daily"), Some("3"), Some("2024")).validate().unwrap(),
            StatisticsRequest::Daily { year: 2024, month: 3 }
        );
        assert_eq!(
            query(Some("MONTHLY"), Some("junk"), Some("2024")).validate().unwrap(),
            StatisticsRequest::Monthly { year: 2024 }
        );
    }

    #[test]
    fn test_envelope_json() {
        let result = StatisticsResult {
            kind: StatisticsType::MonthStatus,
            year: 2024,
            month: Some(3),
            data: StatisticsData::MonthStatus(month_status(2024, 3, true)),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["type"], "MONTH_STATUS");
        assert_eq!(json["month"], 3);
        assert_eq!(json["data"]["closed"], true);
    }
}
