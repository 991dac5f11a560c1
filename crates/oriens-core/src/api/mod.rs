//! REST API client module for Oriens services.
//!
//! This module provides the `ApiClient` for talking to the Oriens API, the
//! `ApiError` taxonomy used by every sync path, and the async traits the
//! sync core is written against.
//!
//! The API uses JWT bearer token authentication. Tokens are issued by the
//! login flow, which lives outside this crate.

pub mod client;
pub mod error;
pub mod remote;

pub use client::ApiClient;
pub use error::ApiError;
pub use remote::{LedgerRemote, PreferenceRemote, ProjectRemote};
