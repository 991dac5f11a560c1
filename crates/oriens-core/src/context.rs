//! Everything that belongs to one signed-in user.
//!
//! A `UserContext` is built at login and dropped at logout. Nothing it owns is
//! global, so the next user starts from an empty cache and fresh channels.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::info;

use crate::api::{ApiClient, LedgerRemote, PreferenceRemote, ProjectRemote};
use crate::auth::SessionData;
use crate::cache::FallbackStore;
use crate::config::Config;
use crate::sync::{
    LedgerSyncCoordinator, Notice, Notifier, ObjectiveBoard, PreferenceSyncAgent, ThemeApplier,
};

/// The three remote seams a context talks to.
#[derive(Clone)]
pub struct Remotes {
    pub ledger: Arc<dyn LedgerRemote>,
    pub preferences: Arc<dyn PreferenceRemote>,
    pub projects: Arc<dyn ProjectRemote>,
}

impl Remotes {
    /// All three seams served by one HTTP client.
    pub fn http(client: ApiClient) -> Self {
        let client = Arc::new(client);
        Self {
            ledger: Arc::clone(&client) as Arc<dyn LedgerRemote>,
            preferences: Arc::clone(&client) as Arc<dyn PreferenceRemote>,
            projects: client as Arc<dyn ProjectRemote>,
        }
    }
}

pub struct UserContext {
    user_id: i64,
    store: FallbackStore,
    pub ledger: LedgerSyncCoordinator,
    pub preferences: PreferenceSyncAgent,
    pub objectives: ObjectiveBoard,
    notices: mpsc::Receiver<Notice>,
}

impl UserContext {
    /// Builds a context backed by the Oriens API.
    pub fn connect(
        config: &Config,
        session: &SessionData,
        applier: Box<dyn ThemeApplier>,
    ) -> Result<Self> {
        let mut client =
            ApiClient::new(&config.api_url, session.user_id, config.request_timeout_secs)
                .context("Failed to build API client")?;
        client.set_token(session.token.clone());
        let cache_root = config.cache_dir()?;
        Self::new(config, session.user_id, &cache_root, Remotes::http(client), applier)
    }

    /// Builds a context over arbitrary remotes. The fallback store lives in `cache_root/<user_id>`.
    pub fn new(
        config: &Config,
        user_id: i64,
        cache_root: &Path,
        remotes: Remotes,
        applier: Box<dyn ThemeApplier>,
    ) -> Result<Self> {
        let store = FallbackStore::new(cache_root.join(user_id.to_string()))
            .context("Failed to open fallback store")?;
        let (notifier, notices) = Notifier::channel();

        let ledger = LedgerSyncCoordinator::new(
            remotes.ledger,
            Some(store.clone()),
            notifier.clone(),
            config.ledger_settings(),
        );
        let preferences = PreferenceSyncAgent::new(
            remotes.preferences,
            Some(store.clone()),
            applier,
            notifier.clone(),
            config.mutation_timeout(),
        );
        let objectives = ObjectiveBoard::new(
            remotes.projects,
            Some(store.clone()),
            notifier,
            config.mutation_timeout(),
        );

        Ok(Self {
            user_id,
            store,
            ledger,
            preferences,
            objectives,
            notices,
        })
    }

    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    pub fn store(&self) -> &FallbackStore {
        &self.store
    }

    /// Cold start: paint cached data, then start every read.
    pub fn open(&mut self) {
        info!(user_id = self.user_id, "Opening user context");
        self.ledger.paint_from_fallback();
        self.ledger.refresh_all();
        self.preferences.open();
    }

    /// Drives ledger and preference work until both are idle.
    pub async fn run_until_idle(&mut self) {
        loop {
            tokio::select! {
                Some(event) = self.ledger.next_event() => self.ledger.process_event(event),
                Some(event) = self.preferences.next_event() => {
                    self.preferences.process_event(event)
                }
                else => break,
            }
        }
        self.objectives.run_until_idle().await;
    }

    /// Applies whatever has already finished, without waiting.
    pub fn check_background_tasks(&mut self) -> usize {
        self.ledger.check_background_tasks() + self.preferences.check_background_tasks()
    }

    /// Notices raised since the last call, oldest first.
    pub fn drain_notices(&mut self) -> Vec<Notice> {
        let mut drained = Vec::new();
        while let Ok(notice) = self.notices.try_recv() {
            drained.push(notice);
        }
        drained
    }

    /// Logout: drops cached pages, pending writes and displayed values.
    /// The fallback files stay on disk for this user's next cold start.
    pub fn close(mut self) {
        info!(user_id = self.user_id, "Closing user context");
        self.ledger.close();
        self.preferences.close();
        self.objectives.close();
        self.notices.close();
    }
}
