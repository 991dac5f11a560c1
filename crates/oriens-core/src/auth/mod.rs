//! Session handling for the signed-in user.
//!
//! Login itself happens outside this crate. `Session` persists the issued
//! bearer token and user id so the sync core can be rebuilt on the next run,
//! and honors the `ORIENS_TOKEN` / `ORIENS_USER_ID` overrides.

pub mod session;

pub use session::{Session, SessionData};
