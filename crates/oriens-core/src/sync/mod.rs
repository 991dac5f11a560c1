//! Keeping local views and the Oriens API in step.
//!
//! - `LedgerSyncCoordinator`: filtered table, aggregate window and tags of the ledger
//! - `PreferenceSyncAgent`: the settings record and its theme side effect
//! - `ObjectiveBoard`: objectives of one project, addressed by id
//! - `OptimisticMutationController`: apply-now, confirm-or-roll-back writes shared by all three
//!
//! Remote calls run as spawned tasks and report back over channels. Each
//! component is driven from a single owner that drains those channels with
//! `next_event` / `check_background_tasks`, so no state is shared across tasks.

#[cfg(test)]
pub(crate) mod fakes;
pub mod ledger;
pub mod mutation;
pub mod notice;
pub mod objectives;
pub mod preferences;
pub mod requests;
pub mod validate;

pub use ledger::{
    FetchResult, LedgerChange, LedgerEvent, LedgerMutation, LedgerSettings, LedgerSnapshot,
    LedgerSyncCoordinator, Pipeline,
};
pub use mutation::{
    Mutation, MutationSnapshot, MutationTarget, OptimisticMutationController, Settled, Settlement,
    MUTATION_TIMEOUT_SECS,
};
pub use notice::{Notice, Notifier};
pub use objectives::{ObjectiveBoard, ObjectiveChange, ObjectiveMutation};
pub use preferences::{
    NoTheme, PreferenceEvent, PreferenceMutation, PreferenceSyncAgent, ThemeApplier,
};
pub use requests::{RequestStamps, Stamp};
pub use validate::{validate_entry, validate_tag, SyncError};
