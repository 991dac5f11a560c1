//! Data models for Oriens entities.
//!
//! This module contains the wire types shared with the Oriens API:
//!
//! - `LedgerRecord`, `TagRecord`, `Page`: the financial ledger
//! - `PreferenceRecord`, `PreferencePatch`: per-user settings
//! - `Project`, `Objective`: projects and their id-addressed objectives
//!
//! Field names follow the API's camelCase JSON.

pub mod ledger;
pub mod preferences;
pub mod project;

pub use ledger::{
    EntryId, EntryQuery, LedgerRecord, Page, Recurrence, RecurrencePattern, SortDirection, TagId,
    TagRecord,
};
pub use preferences::{PreferencePatch, PreferenceRecord, Theme};
pub use project::{Objective, ObjectiveId, ObjectiveStatus, Project, ProjectId};
