//! Filter state for the ledger table.
//!
//! `FilterStateMachine` owns the active `FilterSet` plus the page index and
//! decides, on every change, whether a fetch is well-formed. The only rule is
//! that a custom period needs both bounds before anything is requested.

use chrono::{Datelike, Duration, NaiveDate};
use sha2::{Digest, Sha256};

use crate::models::{EntryQuery, TagId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PeriodKind {
    #[default]
    All,
    Last7Days,
    Last15Days,
    Last30Days,
    ThisMonth,
    Custom,
}

impl PeriodKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodKind::All => "all",
            PeriodKind::Last7Days => "7d",
            PeriodKind::Last15Days => "15d",
            PeriodKind::Last30Days => "30d",
            PeriodKind::ThisMonth => "this-month",
            PeriodKind::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Some(PeriodKind::All),
            "7d" => Some(PeriodKind::Last7Days),
            "15d" => Some(PeriodKind::Last15Days),
            "30d" => Some(PeriodKind::Last30Days),
            "this-month" | "month" => Some(PeriodKind::ThisMonth),
            "custom" => Some(PeriodKind::Custom),
            _ => None,
        }
    }

    /// Length of a trailing window, in days including today.
    fn trailing_days(&self) -> Option<i64> {
        match self {
            PeriodKind::Last7Days => Some(7),
            PeriodKind::Last15Days => Some(15),
            PeriodKind::Last30Days => Some(30),
            _ => None,
        }
    }
}

impl std::fmt::Display for PeriodKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Inclusive date bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Builds a range, swapping the bounds if they are reversed.
    pub fn new(a: NaiveDate, b: NaiveDate) -> Self {
        if a <= b {
            Self { start: a, end: b }
        } else {
            Self { start: b, end: a }
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FilterSet {
    pub period: PeriodKind,
    pub custom_start: Option<NaiveDate>,
    pub custom_end: Option<NaiveDate>,
    pub tag_id: Option<TagId>,
    search: Option<String>,
}

impl FilterSet {
    pub fn search(&self) -> Option<&str> {
        self.search.as_deref()
    }

    /// Stores trimmed search text. Blank text means no search.
    pub fn set_search_text(&mut self, text: &str) {
        let trimmed = text.trim();
        self.search = if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        };
    }

    /// False only for a custom period that is missing a bound.
    pub fn is_complete(&self) -> bool {
        self.period != PeriodKind::Custom
            || (self.custom_start.is_some() && self.custom_end.is_some())
    }

    pub fn is_default(&self) -> bool {
        *self == FilterSet::default()
    }

    /// Fixed-order text form. Custom bounds only count for a custom period.
    fn canonical(&self) -> String {
        let fmt_date = |d: Option<NaiveDate>| {
            d.map(|d| d.format("%Y-%m-%d").to_string()).unwrap_or_default()
        };
        let (start, end) = if self.period == PeriodKind::Custom {
            (fmt_date(self.custom_start), fmt_date(self.custom_end))
        } else {
            (String::new(), String::new())
        };
        format!(
            "period={}\nstart={}\nend={}\ntag={}\nsearch={}",
            self.period,
            start,
            end,
            self.tag_id.map(|t| t.to_string()).unwrap_or_default(),
            self.search.as_deref().unwrap_or_default(),
        )
    }

    /// SHA-256 of the canonical form, hex encoded.
    pub fn digest(&self) -> String {
        hex::encode(Sha256::digest(self.canonical().as_bytes()))
    }

    /// Digest plus the resolved bounds, so a rolling period gets a new key when the day changes.
    pub fn cache_digest(&self, today: NaiveDate) -> String {
        match self.resolve_range(today) {
            Some(range) => format!("{}:{}..{}", self.digest(), range.start, range.end),
            None => self.digest(),
        }
    }

    /// Concrete bounds for the period relative to `today`. `None` means unbounded or incomplete.
    pub fn resolve_range(&self, today: NaiveDate) -> Option<DateRange> {
        match self.period {
            PeriodKind::All => None,
            PeriodKind::ThisMonth => {
                let first =
                    NaiveDate::from_ymd_opt(today.year(), today.month(), 1).unwrap_or(today);
                Some(DateRange::new(first, today))
            }
            PeriodKind::Custom => match (self.custom_start, self.custom_end) {
                (Some(a), Some(b)) => Some(DateRange::new(a, b)),
                _ => None,
            },
            kind => {
                let days = kind.trailing_days().unwrap_or(1);
                Some(DateRange::new(today - Duration::days(days - 1), today))
            }
        }
    }

    /// Request parameters for one table page, or `None` while incomplete.
    pub fn to_query(&self, page: u32, size: u32, today: NaiveDate) -> Option<EntryQuery> {
        if !self.is_complete() {
            return None;
        }
        let mut query = EntryQuery::newest_first(page, size);
        if let Some(range) = self.resolve_range(today) {
            query.start_date = Some(range.start);
            query.end_date = Some(range.end);
        }
        query.tag_id = self.tag_id;
        query.search = self.search.clone();
        Some(query)
    }
}

/// Active filters plus the table's page index.
///
/// Every setter returns `true` when the caller should fetch now. Any filter
/// change resets the page index to 0.
#[derive(Debug, Clone, Default)]
pub struct FilterStateMachine {
    filters: FilterSet,
    page: u32,
}

impl FilterStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filters(&self) -> &FilterSet {
        &self.filters
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn digest(&self) -> String {
        self.filters.digest()
    }

    pub fn is_ready(&self) -> bool {
        self.filters.is_complete()
    }

    pub fn cache_digest(&self, today: NaiveDate) -> String {
        self.filters.cache_digest(today)
    }

    fn update(&mut self, change: impl FnOnce(&mut FilterSet)) -> bool {
        let before = self.filters.digest();
        change(&mut self.filters);
        if self.filters.digest() == before {
            return false;
        }
        self.page = 0;
        self.is_ready()
    }

    pub fn set_period(&mut self, period: PeriodKind) -> bool {
        self.update(|f| f.period = period)
    }

    pub fn set_custom_start(&mut self, date: Option<NaiveDate>) -> bool {
        self.update(|f| f.custom_start = date)
    }

    pub fn set_custom_end(&mut self, date: Option<NaiveDate>) -> bool {
        self.update(|f| f.custom_end = date)
    }

    /// Switches to a custom period with both bounds in one step.
    pub fn set_custom_range(&mut self, start: NaiveDate, end: NaiveDate) -> bool {
        self.update(|f| {
            f.period = PeriodKind::Custom;
            f.custom_start = Some(start);
            f.custom_end = Some(end);
        })
    }

    pub fn set_tag(&mut self, tag_id: Option<TagId>) -> bool {
        self.update(|f| f.tag_id = tag_id)
    }

    pub fn set_search(&mut self, text: &str) -> bool {
        self.update(|f| f.set_search_text(text))
    }

    pub fn set_page(&mut self, page: u32) -> bool {
        if page == self.page {
            return false;
        }
        self.page = page;
        self.is_ready()
    }

    /// Back to the "all" filter set on page 0. Calling it twice changes nothing the second time.
    pub fn clear(&mut self) -> bool {
        let changed = !self.filters.is_default() || self.page != 0;
        self.filters = FilterSet::default();
        self.page = 0;
        changed
    }

    pub fn query(&self, size: u32, today: NaiveDate) -> Option<EntryQuery> {
        self.filters.to_query(self.page, size, today)
    }
}
