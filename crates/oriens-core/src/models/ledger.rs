use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Server-assigned ledger entry id.
pub type EntryId = i64;

/// Server-assigned tag id.
pub type TagId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum RecurrencePattern {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl RecurrencePattern {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Some(RecurrencePattern::Daily),
            "weekly" => Some(RecurrencePattern::Weekly),
            "monthly" => Some(RecurrencePattern::Monthly),
            "yearly" => Some(RecurrencePattern::Yearly),
            _ => None,
        }
    }
}

/// Repetition rule attached to a recurring entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recurrence {
    pub pattern: RecurrencePattern,
    pub end_date: Option<NaiveDate>,
}

/// A single ledger entry. Negative amounts are expenses, positive amounts are revenue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct LedgerRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EntryId>,
    #[cfg_attr(feature = "ts", ts(type = "number"))]
    pub amount: Decimal,
    #[serde(rename = "entryDate")]
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "tagId")]
    pub tag_id: TagId,
    #[serde(rename = "isRecurring", default)]
    pub is_recurring: bool,
    #[serde(rename = "recurrencePattern", default, skip_serializing_if = "Option::is_none")]
    pub recurrence_pattern: Option<RecurrencePattern>,
    #[serde(rename = "recurrenceEndDate", default, skip_serializing_if = "Option::is_none")]
    pub recurrence_end_date: Option<NaiveDate>,
    #[serde(rename = "parentEntryId", default, skip_serializing_if = "Option::is_none")]
    pub parent_entry_id: Option<EntryId>,
    #[serde(rename = "createdAt", default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<NaiveDateTime>,
    #[serde(rename = "updatedAt", default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<NaiveDateTime>,
    /// Client-side handle for a record that has not been confirmed by the server yet.
    #[serde(skip)]
    #[cfg_attr(feature = "ts", ts(skip))]
    pub local_id: Option<Uuid>,
}

impl LedgerRecord {
    pub fn new(amount: Decimal, date: NaiveDate, tag_id: TagId) -> Self {
        Self {
            id: None,
            amount,
            date,
            description: None,
            tag_id,
            is_recurring: false,
            recurrence_pattern: None,
            recurrence_end_date: None,
            parent_entry_id: None,
            created_at: None,
            updated_at: None,
            local_id: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_recurrence(mut self, recurrence: Recurrence) -> Self {
        self.is_recurring = true;
        self.recurrence_pattern = Some(recurrence.pattern);
        self.recurrence_end_date = recurrence.end_date;
        self
    }

    pub fn recurrence(&self) -> Option<Recurrence> {
        if !self.is_recurring {
            return None;
        }
        self.recurrence_pattern.map(|pattern| Recurrence {
            pattern,
            end_date: self.recurrence_end_date,
        })
    }

    pub fn is_expense(&self) -> bool {
        self.amount.is_sign_negative() && !self.amount.is_zero()
    }

    pub fn is_revenue(&self) -> bool {
        self.amount.is_sign_positive() && !self.amount.is_zero()
    }

    /// True when `other` refers to the same entry, by server id or by provisional handle.
    pub fn same_entry(&self, other: &LedgerRecord) -> bool {
        match (self.id, other.id) {
            (Some(a), Some(b)) => a == b,
            _ => self.local_id.is_some() && self.local_id == other.local_id,
        }
    }
}

/// A spending/revenue category owned by one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct TagRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<TagId>,
    pub name: String,
    /// `#RRGGBB`
    pub color: String,
    #[serde(rename = "isDefault", default)]
    pub is_default: bool,
    #[serde(rename = "allowNegative", default = "default_allow_negative")]
    pub allow_negative: bool,
    #[serde(rename = "createdAt", default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<NaiveDateTime>,
}

fn default_allow_negative() -> bool {
    true
}

impl TagRecord {
    pub fn new(name: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            color: color.into(),
            is_default: false,
            allow_negative: true,
            created_at: None,
        }
    }
}

/// One page of a server-side paginated listing. Page numbers are zero-indexed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Page<T> {
    #[serde(rename = "content")]
    pub items: Vec<T>,
    #[serde(rename = "number")]
    pub page_index: u32,
    #[serde(rename = "totalPages")]
    pub total_pages: u32,
    #[serde(rename = "totalElements")]
    pub total_elements: u64,
    #[serde(default)]
    pub size: u32,
}

impl<T> Page<T> {
    pub fn empty(size: u32) -> Self {
        Self {
            items: Vec::new(),
            page_index: 0,
            total_pages: 0,
            total_elements: 0,
            size,
        }
    }

    pub fn is_first(&self) -> bool {
        self.page_index == 0
    }

    pub fn is_last(&self) -> bool {
        self.total_pages == 0 || self.page_index + 1 >= self.total_pages
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortDirection {
    #[serde(rename = "ASC")]
    Asc,
    #[serde(rename = "DESC")]
    Desc,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// Parameters of a list-entries request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryQuery {
    pub page: u32,
    pub size: u32,
    pub sort_by: String,
    pub direction: SortDirection,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub tag_id: Option<TagId>,
    pub search: Option<String>,
}

impl EntryQuery {
    pub fn newest_first(page: u32, size: u32) -> Self {
        Self {
            page,
            size,
            sort_by: "entryDate".to_string(),
            direction: SortDirection::Desc,
            start_date: None,
            end_date: None,
            tag_id: None,
            search: None,
        }
    }

    /// Query-string pairs in the order the API documents them.
    pub fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("page", self.page.to_string()),
            ("size", self.size.to_string()),
            ("sortBy", self.sort_by.clone()),
            ("direction", self.direction.as_str().to_string()),
        ];
        if let Some(start) = self.start_date {
            params.push(("startDate", start.format("%Y-%m-%d").to_string()));
        }
        if let Some(end) = self.end_date {
            params.push(("endDate", end.format("%Y-%m-%d").to_string()));
        }
        if let Some(tag_id) = self.tag_id {
            params.push(("tagId", tag_id.to_string()));
        }
        if let Some(ref search) = self.search {
            params.push(("search", search.clone()));
        }
        params
    }

    /// Whether `record` falls inside this query's filters. Used to place optimistic rows.
    pub fn matches(&self, record: &LedgerRecord) -> bool {
        if let Some(start) = self.start_date {
            if record.date < start {
                return false;
            }
        }
        if let Some(end) = self.end_date {
            if record.date > end {
                return false;
            }
        }
        if let Some(tag_id) = self.tag_id {
            if record.tag_id != tag_id {
                return false;
            }
        }
        if let Some(ref search) = self.search {
            let description = record.description.as_deref().unwrap_or_default();
            if !crate::utils::contains_ignore_case(description, search) {
                return false;
            }
        }
        true
    }
}
