//! Oriens Core - Shared library for the Oriens clients.
//!
//! This crate provides the client-side data layer of Oriens:
//! - API client and remote seams (`api`)
//! - Data models (`models`)
//! - Query cache and offline fallback store (`cache`)
//! - Ledger filters (`filter`) and chart summaries (`summary`)
//! - Optimistic sync of ledger, preferences and objectives (`sync`)
//! - Session persistence (`auth`) and configuration (`config`)
//! - Per-user wiring (`context`)

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod context;
pub mod filter;
pub mod models;
pub mod summary;
pub mod sync;
pub mod utils;

pub use api::{ApiClient, ApiError};
pub use auth::{Session, SessionData};
pub use cache::{FallbackStore, QueryCache};
pub use config::Config;
pub use context::{Remotes, UserContext};
pub use filter::{FilterSet, FilterStateMachine, PeriodKind};
pub use sync::{
    LedgerSyncCoordinator, Notice, ObjectiveBoard, OptimisticMutationController,
    PreferenceSyncAgent, SyncError, ThemeApplier,
};
