//! Chart and card figures derived from the aggregate ledger view.
//!
//! Everything here is a pure function over already-fetched records. The sign
//! convention is load-bearing: negative amounts are expenses, positive are revenue.

use std::collections::BTreeMap;

use chrono::{Datelike, Months, NaiveDate};
use rust_decimal::Decimal;

use crate::models::{LedgerRecord, TagId, TagRecord};

/// Slice color for the unspent part of the month's revenue.
pub const FREE_BALANCE_COLOR: &str = "#14B8A6";

// ============================================================================
// Month navigation
// ============================================================================

/// A calendar month, used both as a chart column and as the selected period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MonthCursor {
    year: i32,
    month: u32,
}

impl MonthCursor {
    /// Returns `None` when `month` is outside 1..=12.
    pub fn new(year: i32, month: u32) -> Option<Self> {
        if (1..=12).contains(&month) {
            Some(Self { year, month })
        } else {
            None
        }
    }

    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    pub fn last_day(&self) -> NaiveDate {
        self.next()
            .first_day()
            .pred_opt()
            .unwrap_or(NaiveDate::MAX)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date.year() == self.year && date.month() == self.month
    }

    pub fn prev(&self) -> Self {
        if self.month == 1 {
            Self { year: self.year - 1, month: 12 }
        } else {
            Self { year: self.year, month: self.month - 1 }
        }
    }

    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self { year: self.year + 1, month: 1 }
        } else {
            Self { year: self.year, month: self.month + 1 }
        }
    }

    pub fn today(today: NaiveDate) -> Self {
        Self::of(today)
    }

    /// "Oct 2026"
    pub fn label(&self) -> String {
        self.first_day().format("%b %Y").to_string()
    }

    /// The `count` months ending at this one, oldest first.
    pub fn trailing(&self, count: usize) -> Vec<MonthCursor> {
        let mut months = Vec::with_capacity(count);
        let mut cursor = *self;
        for _ in 0..count {
            months.push(cursor);
            cursor = cursor.prev();
        }
        months.reverse();
        months
    }
}

impl std::fmt::Display for MonthCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Start of the aggregate fetch window: `months` calendar months before `today`.
pub fn window_start(today: NaiveDate, months: u32) -> NaiveDate {
    today.checked_sub_months(Months::new(months)).unwrap_or(NaiveDate::MIN)
}

// ============================================================================
// Expenses per tag per month
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct MonthColumn {
    pub month: MonthCursor,
    /// Absolute expense total per tag. Every charted tag has an entry, possibly zero.
    pub totals: BTreeMap<TagId, Decimal>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TagExpenseChart {
    /// Tags with at least one expense in the input, in tag-list order.
    pub tags: Vec<TagRecord>,
    pub months: Vec<MonthColumn>,
}

impl TagExpenseChart {
    pub fn total(&self, month: MonthCursor, tag_id: TagId) -> Decimal {
        self.months
            .iter()
            .find(|column| column.month == month)
            .and_then(|column| column.totals.get(&tag_id).copied())
            .unwrap_or(Decimal::ZERO)
    }

    pub fn has_data(&self) -> bool {
        self.months
            .iter()
            .any(|column| column.totals.values().any(|v| !v.is_zero()))
    }
}

pub fn tag_expenses_by_month(
    records: &[LedgerRecord],
    tags: &[TagRecord],
    today: NaiveDate,
    months: usize,
) -> TagExpenseChart {
    let expenses: Vec<&LedgerRecord> = records.iter().filter(|r| r.is_expense()).collect();

    let charted: Vec<TagRecord> = tags
        .iter()
        .filter(|tag| {
            tag.id
                .map(|id| expenses.iter().any(|r| r.tag_id == id))
                .unwrap_or(false)
        })
        .cloned()
        .collect();

    let columns = MonthCursor::today(today)
        .trailing(months)
        .into_iter()
        .map(|month| {
            let totals = charted
                .iter()
                .filter_map(|tag| tag.id)
                .map(|tag_id| {
                    let sum: Decimal = expenses
                        .iter()
                        .filter(|r| r.tag_id == tag_id && month.contains(r.date))
                        .map(|r| r.amount)
                        .sum();
                    (tag_id, sum.abs())
                })
                .collect();
            MonthColumn { month, totals }
        })
        .collect();

    TagExpenseChart {
        tags: charted,
        months: columns,
    }
}

// ============================================================================
// Monthly distribution
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct DistributionSlice {
    /// `None` for the free-balance slice.
    pub tag_id: Option<TagId>,
    pub label: String,
    pub color: String,
    pub amount: Decimal,
    /// Percentage of the chart total, rounded to two places.
    pub share: Decimal,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Distribution {
    pub slices: Vec<DistributionSlice>,
    pub total: Decimal,
}

/// Expenses per tag for one month, plus a free-balance slice when revenue exceeds expenses.
pub fn distribution(
    records: &[LedgerRecord],
    tags: &[TagRecord],
    month: MonthCursor,
) -> Distribution {
    let in_month: Vec<&LedgerRecord> = records.iter().filter(|r| month.contains(r.date)).collect();
    let overview = overview_of(in_month.iter().copied());

    if overview.expenses.is_zero() && overview.balance <= Decimal::ZERO {
        return Distribution::default();
    }

    let mut slices: Vec<DistributionSlice> = tags
        .iter()
        .filter_map(|tag| {
            let id = tag.id?;
            let amount: Decimal = in_month
                .iter()
                .filter(|r| r.is_expense() && r.tag_id == id)
                .map(|r| r.amount.abs())
                .sum();
            (amount > Decimal::ZERO).then(|| DistributionSlice {
                tag_id: Some(id),
                label: tag.name.clone(),
                color: tag.color.clone(),
                amount,
                share: Decimal::ZERO,
            })
        })
        .collect();

    if overview.balance > Decimal::ZERO {
        slices.push(DistributionSlice {
            tag_id: None,
            label: "Free balance".to_string(),
            color: FREE_BALANCE_COLOR.to_string(),
            amount: overview.balance,
            share: Decimal::ZERO,
        });
    }

    let total: Decimal = slices.iter().map(|s| s.amount).sum();
    if !total.is_zero() {
        for slice in &mut slices {
            slice.share = (slice.amount * Decimal::ONE_HUNDRED / total).round_dp(2);
        }
    }

    Distribution { slices, total }
}

// ============================================================================
// Period overview
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PeriodOverview {
    pub revenue: Decimal,
    /// Absolute value of the month's expenses.
    pub expenses: Decimal,
    pub balance: Decimal,
}

fn overview_of<'a>(records: impl Iterator<Item = &'a LedgerRecord>) -> PeriodOverview {
    let mut revenue = Decimal::ZERO;
    let mut spent = Decimal::ZERO;
    for record in records {
        if record.is_revenue() {
            revenue += record.amount;
        } else if record.is_expense() {
            spent += record.amount;
        }
    }
    let expenses = spent.abs();
    PeriodOverview {
        revenue,
        expenses,
        balance: revenue - expenses,
    }
}

pub fn period_overview(records: &[LedgerRecord], month: MonthCursor) -> PeriodOverview {
    overview_of(records.iter().filter(|r| month.contains(r.date)))
}
