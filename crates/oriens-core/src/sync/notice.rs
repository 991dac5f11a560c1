//! Non-blocking user notices.

use tokio::sync::mpsc;
use tracing::warn;

use crate::api::ApiError;

/// Capacity of the notice channel. Notices are advisory, so a full channel drops them.
pub const NOTICE_BUFFER_SIZE: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Error { title: String, detail: String },
    Success { title: String, detail: String },
    /// The session boundary should send the user back through login.
    ReauthRequired,
}

impl Notice {
    pub fn error(title: impl Into<String>, detail: impl Into<String>) -> Self {
        Notice::Error {
            title: title.into(),
            detail: detail.into(),
        }
    }

    pub fn success(title: impl Into<String>, detail: impl Into<String>) -> Self {
        Notice::Success {
            title: title.into(),
            detail: detail.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Notice::Error { .. })
    }
}

/// Sending half of the notice channel, shared by every sync component.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: mpsc::Sender<Notice>,
}

impl Notifier {
    pub fn channel() -> (Self, mpsc::Receiver<Notice>) {
        let (tx, rx) = mpsc::channel(NOTICE_BUFFER_SIZE);
        (Self { tx }, rx)
    }

    pub fn send(&self, notice: Notice) {
        if let Err(e) = self.tx.try_send(notice) {
            warn!(error = %e, "Dropping notice");
        }
    }

    /// Error notice for a failed remote call, plus a re-auth notice when the session is gone.
    pub fn api_failure(&self, title: &str, err: &ApiError) {
        self.send(Notice::error(title, err.user_message()));
        if err.requires_reauth() {
            self.send(Notice::ReauthRequired);
        }
    }
}
