// Domain entities: records, wallets, categories, users and query windows

use chrono::{DateTime, Datelike, NaiveDate, SecondsFormat, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{FinanceError, Result};

// ============================================================================
// RECORD
// ============================================================================

/// One financial transaction owned by a user.
///
/// Negative values decrease the wallet balance, positive values increase it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: i64,
    pub description: String,
    pub value: Decimal,
    pub timestamp: DateTime<Utc>,
    pub wallet_id: i64,
    pub category_id: i64,
    pub owner: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_reference: Option<String>,
}

/// A record that has not been persisted yet.
///
/// This is both the create payload and the import candidate. The owner is
/// assigned by whoever persists it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRecord {
    pub description: String,
    pub value: Decimal,
    pub timestamp: DateTime<Utc>,
    pub wallet_id: i64,
    pub category_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_reference: Option<String>,
}

impl NewRecord {
    pub fn validate(&self) -> Result<()> {
        if self.description.trim().is_empty() {
            return Err(FinanceError::invalid("description", "must not be empty"));
        }
        if let Some(reference) = &self.external_reference {
            if reference.trim().is_empty() {
                return Err(FinanceError::invalid(
                    "externalReference",
                    "must not be empty when present",
                ));
            }
        }
        Ok(())
    }
}

/// Partial update. Only fields that are `Some` change; a supplied zero value
/// is a real change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordPatch {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub value: Option<Decimal>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub wallet_id: Option<i64>,
    #[serde(default)]
    pub category_id: Option<i64>,
}

impl RecordPatch {
    pub fn validate(&self) -> Result<()> {
        if let Some(description) = &self.description {
            if description.trim().is_empty() {
                return Err(FinanceError::invalid("description", "must not be empty"));
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.description.is_none()
            && self.value.is_none()
            && self.timestamp.is_none()
            && self.wallet_id.is_none()
            && self.category_id.is_none()
    }
}

// ============================================================================
// WALLETS, CATEGORIES, USERS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wallet {
    pub id: i64,
    pub name: String,
    pub owner: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub owner: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub username: String,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// TIME WINDOW
// ============================================================================

/// Range of records a query is interested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    All,
    Year(i32),
    Month { year: i32, month: u32 },
}

impl Window {
    /// Half-open `[start, end)` UTC bounds, `None` for `All`.
    pub fn bounds(&self) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>> {
        match *self {
            Window::All => Ok(None),
            Window::Year(year) => {
                let start = month_start(year, 1)?;
                let end = month_start(year + 1, 1)?;
                Ok(Some((start, end)))
            }
            Window::Month { year, month } => {
                let start = month_start(year, month)?;
                let (next_year, next_month) = next_month(year, month);
                let end = month_start(next_year, next_month)?;
                Ok(Some((start, end)))
            }
        }
    }

    pub fn contains(&self, timestamp: &DateTime<Utc>) -> bool {
        match *self {
            Window::All => true,
            Window::Year(year) => timestamp.year() == year,
            Window::Month { year, month } => {
                timestamp.year() == year && timestamp.month() == month
            }
        }
    }
}

pub(crate) fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}

fn month_start(year: i32, month: u32) -> Result<DateTime<Utc>> {
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .ok_or_else(|| FinanceError::invalid("month", format!("{year}-{month} is not a valid month")))
}

/// Number of days in a calendar month.
pub fn days_in_month(year: i32, month: u32) -> Result<u32> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| FinanceError::invalid("month", format!("{year}-{month} is not a valid month")))?;
    let (next_year, next) = next_month(year, month);
    let following = NaiveDate::from_ymd_opt(next_year, next, 1)
        .ok_or_else(|| FinanceError::invalid("year", format!("{next_year} is out of range")))?;
    Ok((following - first).num_days() as u32)
}

/// Storage form of a timestamp. Fixed width so text comparison orders correctly.
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_days_in_month() {
        assert_eq!(days_in_month(2024, 2).unwrap(), 29);
        assert_eq!(days_in_month(2023, 2).unwrap(), 28);
        assert_eq!(days_in_month(2024, 3).unwrap(), 31);
        assert_eq!(days_in_month(2024, 4).unwrap(), 30);
        assert_eq!(days_in_month(2024, 12).unwrap(), 31);
        assert!(days_in_month(2024, 13).is_err());
    }

    #[test]
    fn test_month_window_bounds() {
        let (start, end) = Window::Month { year: 2024, month: 12 }
            .bounds()
            .unwrap()
            .unwrap();
        assert_eq!(format_timestamp(&start), "2024-12-01T00:00:00.000Z");
        assert_eq!(format_timestamp(&end), "2025-01-01T00:00:00.000Z");
        assert!(Window::All.bounds().unwrap().is_none());
    }

    #[test]
    fn test_window_contains() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap();
        assert!(Window::Month { year: 2024, month: 3 }.contains(&ts));
        assert!(!Window::Month { year: 2024, month: 4 }.contains(&ts));
        assert!(Window::Year(2024).contains(&ts));
        assert!(Window::All.contains(&ts));
    }

    #[test]
    fn test_new_record_rejects_blank_description() {
        let record = NewRecord {
            description: "   ".into(),
            value: Decimal::from_str("1.00").unwrap(),
            timestamp: Utc::now(),
            wallet_id: 1,
            category_id: 1,
            external_reference: None,
        };
        assert!(matches!(
            record.validate(),
            Err(FinanceError::InvalidProperty { .. })
        ));
    }

    #[test]
    fn test_record_json_is_camel_case() {
        let record = NewRecord {
            description: "Coffee".into(),
            value: Decimal::from_str("-3.50").unwrap(),
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            wallet_id: 2,
            category_id: 5,
            external_reference: Some("abc".into()),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["walletId"], 2);
        assert_eq!(json["categoryId"], 5);
        assert_eq!(json["externalReference"], "abc");
        assert_eq!(json["value"], "-3.50");
    }

    #[test]
    fn test_patch_accepts_numeric_value() {
        let patch: RecordPatch = serde_json::from_str(r#"{"value": 0}"#).unwrap();
        assert_eq!(patch.value, Some(Decimal::ZERO));
        assert!(patch.description.is_none());
        assert!(!patch.is_empty());
    }
}
