//! Client-side checks run before a write is dispatched. Invalid writes never reach the server.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use thiserror::Error;

use crate::api::ApiError;
use crate::models::{LedgerRecord, TagId, TagRecord};

pub const MAX_DESCRIPTION_CHARS: usize = 255;
pub const MIN_AMOUNT: Decimal = dec!(-999999999.99);
pub const MAX_AMOUNT: Decimal = dec!(999999999999.99);
pub const TAG_NAME_CHARS: std::ops::RangeInclusive<usize> = 2..=50;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("Invalid input: {0}")]
    Invalid(String),

    #[error("Unknown tag: {0}")]
    UnknownTag(TagId),

    #[error("Entry has not been saved yet")]
    Unsaved,

    #[error("Filters are incomplete")]
    IncompleteFilters,

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl SyncError {
    fn invalid(msg: impl Into<String>) -> Self {
        SyncError::Invalid(msg.into())
    }
}

pub fn validate_entry(record: &LedgerRecord, tags: &[TagRecord]) -> Result<(), SyncError> {
    if let Some(ref description) = record.description {
        if description.chars().count() > MAX_DESCRIPTION_CHARS {
            return Err(SyncError::invalid(format!(
                "description is longer than {} characters",
                MAX_DESCRIPTION_CHARS
            )));
        }
    }

    if record.amount < MIN_AMOUNT || record.amount > MAX_AMOUNT {
        return Err(SyncError::invalid("amount is out of range"));
    }
    if record.amount.normalize().scale() > 2 {
        return Err(SyncError::invalid("amount has more than two decimal places"));
    }

    let tag = tags
        .iter()
        .find(|t| t.id == Some(record.tag_id))
        .ok_or(SyncError::UnknownTag(record.tag_id))?;
    if record.is_expense() && !tag.allow_negative {
        return Err(SyncError::invalid(format!("tag '{}' does not allow expenses", tag.name)));
    }

    if record.is_recurring && record.recurrence_pattern.is_none() {
        return Err(SyncError::invalid("recurring entry needs a pattern"));
    }
    if let Some(end) = record.recurrence_end_date {
        if end < record.date {
            return Err(SyncError::invalid("recurrence ends before the entry date"));
        }
    }

    Ok(())
}

pub fn validate_tag(tag: &TagRecord) -> Result<(), SyncError> {
    let name_len = tag.name.trim().chars().count();
    if !TAG_NAME_CHARS.contains(&name_len) {
        return Err(SyncError::invalid("tag name must be 2 to 50 characters"));
    }
    if !is_hex_color(&tag.color) {
        return Err(SyncError::invalid("tag color must be #RRGGBB"));
    }
    Ok(())
}

fn is_hex_color(s: &str) -> bool {
    s.len() == 7
        && s.starts_with('#')
        && s[1..].chars().all(|c| c.is_ascii_hexdigit())
}
