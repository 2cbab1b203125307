// Month closure rules
//
// Whether a month is "closed" is a business decision made outside the
// aggregator. The aggregator only carries the flag a policy returns.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{FinanceError, Result};
use crate::gateway::Gateway;
use crate::models::next_month;

pub trait MonthClosurePolicy: Send + Sync {
    fn is_closed(&self, owner: &str, year: i32, month: u32) -> Result<bool>;
}

/// Source of "today", injectable for tests.
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Utc::now().date_naive()
    }
}

pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}

// ============================================================================
// POLICIES
// ============================================================================

/// A month is closed once its last day is in the past.
pub struct ElapsedMonthPolicy<C: Clock = SystemClock> {
    clock: C,
}

impl ElapsedMonthPolicy<SystemClock> {
    pub fn new() -> Self {
        Self { clock: SystemClock }
    }
}

impl Default for ElapsedMonthPolicy<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> ElapsedMonthPolicy<C> {
    pub fn with_clock(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> MonthClosurePolicy for ElapsedMonthPolicy<C> {
    fn is_closed(&self, _owner: &str, year: i32, month: u32) -> Result<bool> {
        let (next_year, next) = next_month(year, month);
        let following = NaiveDate::from_ymd_opt(next_year, next, 1).ok_or_else(|| {
            FinanceError::invalid("month", format!("{year}-{month} is not a valid month"))
        })?;
        Ok(self.clock.today() >= following)
    }
}

/// A month is closed when the owner stored an explicit close marker for it.
pub struct CloseMarkerPolicy {
    gateway: Arc<dyn Gateway>,
}

impl CloseMarkerPolicy {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self { gateway }
    }
}

impl MonthClosurePolicy for CloseMarkerPolicy {
    fn is_closed(&self, owner: &str, year: i32, month: u32) -> Result<bool> {
        self.gateway.is_month_marked_closed(owner, year, month)
    }
}

// ============================================================================
// SELECTION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClosurePolicyKind {
    Elapsed,
    Markers,
}

impl FromStr for ClosurePolicyKind {
    type Err = FinanceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "elapsed" => Ok(ClosurePolicyKind::Elapsed),
            "markers" => Ok(ClosurePolicyKind::Markers),
            other => Err(FinanceError::invalid(
                "closure_policy",
                format!("unknown policy '{other}' (expected 'elapsed' or 'markers')"),
            )),
        }
    }
}

pub fn build_policy(kind: ClosurePolicyKind, gateway: Arc<dyn Gateway>) -> Arc<dyn MonthClosurePolicy> {
    match kind {
        ClosurePolicyKind::Elapsed => Arc::new(ElapsedMonthPolicy::new()),
        ClosurePolicyKind::Markers => Arc::new(CloseMarkerPolicy::new(gateway)),
    }
}
