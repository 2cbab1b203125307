// ⚖️ Reconciliation - check a parsed statement adds up
//
//   opening_balance + Σ entries = closing_balance
//
// Decimal arithmetic, so "adds up" means exactly equal.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::parser::ParsedStatement;

// ============================================================================
// RECONCILIATION RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconciliationResult {
    Balanced {
        opening: Decimal,
        closing: Decimal,
    },

    /// `expected` is what the closing balance should be given the entries.
    Discrepancy {
        expected: Decimal,
        actual: Decimal,
        difference: Decimal,
    },

    /// Opening or closing balance missing from the statement.
    Unverifiable,
}

impl ReconciliationResult {
    pub fn is_balanced(&self) -> bool {
        matches!(self, ReconciliationResult::Balanced { .. })
    }

    pub fn difference(&self) -> Decimal {
        match self {
            ReconciliationResult::Discrepancy { difference, .. } => *difference,
            _ => Decimal::ZERO,
        }
    }
}

// ============================================================================
// RECONCILIATION REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationReport {
    pub statement_reference: Option<String>,
    pub account: Option<String>,
    pub entry_count: usize,
    pub entries_total: Decimal,
    pub result: ReconciliationResult,
}

impl ReconciliationReport {
    pub fn summary(&self) -> String {
        format!(
            "Statement {} ({}): {} entries totalling {}, difference {}",
            self.statement_reference.as_deref().unwrap_or("?"),
            self.account.as_deref().unwrap_or("?"),
            self.entry_count,
            self.entries_total,
            self.result.difference()
        )
    }
}

pub fn reconcile(statement: &ParsedStatement) -> ReconciliationReport {
    let result = match (&statement.opening, &statement.closing) {
        (Some(opening), Some(closing)) => {
            match opening.amount.checked_add(statement.entries_total) {
                Some(expected) if expected == closing.amount => ReconciliationResult::Balanced {
                    opening: opening.amount,
                    closing: closing.amount,
                },
                Some(expected) => match closing.amount.checked_sub(expected) {
                    Some(difference) => ReconciliationResult::Discrepancy {
                        expected,
                        actual: closing.amount,
                        difference,
                    },
                    None => ReconciliationResult::Unverifiable,
                },
                // Sums beyond Decimal range cannot be checked
                None => ReconciliationResult::Unverifiable,
            }
        }
        _ => ReconciliationResult::Unverifiable,
    };

    ReconciliationReport {
        statement_reference: statement.reference.clone(),
        account: statement.account.clone(),
        entry_count: statement.entry_count,
        entries_total: statement.entries_total,
        result,
    }
}

pub fn reconcile_all(statements: &[ParsedStatement]) -> Vec<ReconciliationReport> {
    statements.iter().map(reconcile).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Balance;
    use chrono::NaiveDate;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn balance(amount: &str) -> Balance {
        Balance {
            date: NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
            amount: dec(amount),
            currency: "EUR".into(),
        }
    }

    fn statement(opening: Option<&str>, closing: Option<&str>, total: &str) -> ParsedStatement {
        ParsedStatement {
            reference: Some("STMT".into()),
            account: Some("ACC".into()),
            sequence: None,
            opening: opening.map(balance),
            closing: closing.map(balance),
            entries_total: dec(total),
            entry_count: 2,
        }
    }

    #[test]
    fn test_balanced_statement() {
        let report = reconcile(&statement(Some("1000.00"), Some("1474.50"), "474.50"));
        assert!(report.result.is_balanced());
        assert_eq!(report.result.difference(), Decimal::ZERO);
    }

    #[test]
    fn test_discrepancy() {
        let report = reconcile(&statement(Some("1000.00"), Some("1500.00"), "474.50"));
        assert_eq!(
            report.result,
            ReconciliationResult::Discrepancy {
                expected: dec("1474.50"),
                actual: dec("1500.00"),
                difference: dec("25.50"),
            }
        );
        assert!(report.summary().contains("difference 25.50"));
    }

    #[test]
    fn test_missing_balance_is_unverifiable() {
        let report = reconcile(&statement(None, Some("10"), "10"));
        assert_eq!(report.result, ReconciliationResult::Unverifiable);
        assert!(!report.result.is_balanced());
    }

    #[test]
    fn test_negative_opening_balance() {
        let report = reconcile(&statement(Some("-50.00"), Some("25.00"), "75.00"));
        assert!(report.result.is_balanced());
    }

    #[test]
    fn test_overflowing_sum_is_unverifiable() {
        let report = reconcile(&statement(Some("70000000000000000000000000000"), Some("1"), "70000000000000000000000000000"));
        assert_eq!(report.result, ReconciliationResult::Unverifiable);
    }

    #[test]
    fn test_result_serializes_with_status_tag() {
        let json = serde_json::to_value(ReconciliationResult::Unverifiable).unwrap();
        assert_eq!(json["status"], "UNVERIFIABLE");
    }
}
