//! Async seams between the sync core and the Oriens API.
//!
//! `ApiClient` implements every trait here over HTTP. Tests and offline tools
//! plug in their own implementations.

use async_trait::async_trait;

use crate::models::{
    EntryId, EntryQuery, LedgerRecord, Objective, ObjectiveId, Page, PreferencePatch,
    PreferenceRecord, Project, ProjectId, TagId, TagRecord,
};

use super::ApiError;

/// Ledger entries and tags of the signed-in user.
#[async_trait]
pub trait LedgerRemote: Send + Sync {
    async fn list_entries(&self, query: &EntryQuery) -> Result<Page<LedgerRecord>, ApiError>;

    async fn create_entry(&self, record: &LedgerRecord) -> Result<LedgerRecord, ApiError>;

    async fn update_entry(
        &self,
        id: EntryId,
        record: &LedgerRecord,
    ) -> Result<LedgerRecord, ApiError>;

    async fn delete_entry(&self, id: EntryId) -> Result<(), ApiError>;

    async fn count_entries(&self) -> Result<u64, ApiError>;

    async fn recurring_entries(&self) -> Result<Vec<LedgerRecord>, ApiError>;

    async fn list_tags(&self) -> Result<Vec<TagRecord>, ApiError>;

    async fn create_tag(&self, tag: &TagRecord) -> Result<TagRecord, ApiError>;

    async fn update_tag(&self, id: TagId, tag: &TagRecord) -> Result<TagRecord, ApiError>;

    async fn delete_tag(&self, id: TagId) -> Result<(), ApiError>;
}

/// Settings record of the signed-in user.
#[async_trait]
pub trait PreferenceRemote: Send + Sync {
    async fn get_preferences(&self) -> Result<PreferenceRecord, ApiError>;

    /// Returns the server's canonical record after the patch.
    async fn patch_preferences(&self, patch: &PreferencePatch)
        -> Result<PreferenceRecord, ApiError>;
}

/// Projects and their objectives. Objectives are always addressed by id.
#[async_trait]
pub trait ProjectRemote: Send + Sync {
    async fn get_project(&self, id: ProjectId) -> Result<Project, ApiError>;

    async fn add_objective(
        &self,
        project: ProjectId,
        objective: &Objective,
    ) -> Result<Project, ApiError>;

    async fn update_objective(
        &self,
        project: ProjectId,
        objective: &Objective,
    ) -> Result<Project, ApiError>;

    async fn delete_objective(
        &self,
        project: ProjectId,
        objective: ObjectiveId,
    ) -> Result<Project, ApiError>;
}
