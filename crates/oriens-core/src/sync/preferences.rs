//! Preference sync: notifications, sound and theme for the signed-in user.
//!
//! Cold start paints from the fallback store, then reads the server. Writes
//! are optimistic PATCHes through the mutation controller. The theme is a
//! visible side effect, applied and reverted through the same `install` path.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::api::{ApiError, PreferenceRemote};
use crate::cache::FallbackStore;
use crate::models::{PreferencePatch, PreferenceRecord, Theme};

use super::mutation::{Mutation, MutationTarget, OptimisticMutationController, Settlement};
use super::notice::Notifier;

/// Applies a theme to whatever renders the app.
pub trait ThemeApplier: Send {
    fn apply_theme(&mut self, theme: Theme);
}

/// Theme applier for headless use.
#[derive(Debug, Default)]
pub struct NoTheme;

impl ThemeApplier for NoTheme {
    fn apply_theme(&mut self, _theme: Theme) {}
}

// ============================================================================
// Displayed state
// ============================================================================

/// `record` is the synced value. `None` means nothing has been painted or
/// confirmed yet; rolling back to it removes the fallback file.
struct PreferenceView {
    record: Option<PreferenceRecord>,
    /// Defaults shown after a failed cold read. Never persisted.
    showing_defaults: bool,
    applied_theme: Option<Theme>,
    applier: Box<dyn ThemeApplier>,
    store: Option<FallbackStore>,
}

impl PreferenceView {
    fn displayed(&self) -> Option<PreferenceRecord> {
        self.record
            .or_else(|| self.showing_defaults.then(PreferenceRecord::default))
    }

    fn apply_displayed_theme(&mut self) {
        let theme = self.displayed().map(|r| r.theme).unwrap_or_default();
        if self.applied_theme != Some(theme) {
            debug!(theme = %theme, "Applying theme");
            self.applier.apply_theme(theme);
            self.applied_theme = Some(theme);
        }
    }
}

impl MutationTarget<(), Option<PreferenceRecord>> for PreferenceView {
    fn current(&self, _key: &()) -> Option<PreferenceRecord> {
        self.record
    }

    fn install(&mut self, _key: &(), state: &Option<PreferenceRecord>) {
        self.record = *state;
        self.apply_displayed_theme();
        let Some(ref store) = self.store else {
            return;
        };
        let saved = match state {
            Some(record) => store.save_preferences(record),
            None => store.clear_preferences(),
        };
        if let Err(e) = saved {
            warn!(error = %e, "Failed to update cached preferences");
        }
    }
}

// ============================================================================
// Writes
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreferenceMutation(PreferencePatch);

impl Mutation for PreferenceMutation {
    type Key = ();
    type State = Option<PreferenceRecord>;
    type Response = PreferenceRecord;
    type Remote = dyn PreferenceRemote;

    fn key(&self) {}

    /// A patch over nothing lands on the defaults, as the server does.
    fn apply(&self, state: &Option<PreferenceRecord>) -> Option<Option<PreferenceRecord>> {
        Some(Some(self.0.apply_to(&state.unwrap_or_default())))
    }

    fn send(
        &self,
        remote: Arc<dyn PreferenceRemote>,
        _attempted: &Option<PreferenceRecord>,
    ) -> BoxFuture<'static, Result<PreferenceRecord, ApiError>> {
        let patch = self.0;
        async move { remote.patch_preferences(&patch).await }.boxed()
    }

    fn reconcile(
        &self,
        _attempted: &Option<PreferenceRecord>,
        response: PreferenceRecord,
    ) -> Option<PreferenceRecord> {
        Some(response)
    }

    fn label(&self) -> String {
        "save preferences".to_string()
    }
}

// ============================================================================
// Agent
// ============================================================================

pub enum PreferenceEvent {
    Fetched {
        stamp: u64,
        result: Result<PreferenceRecord, ApiError>,
    },
    Settled(Settlement<PreferenceMutation>),
}

pub struct PreferenceSyncAgent {
    remote: Arc<dyn PreferenceRemote>,
    view: PreferenceView,
    mutations: OptimisticMutationController<PreferenceMutation>,
    notifier: Notifier,
    latest_read: u64,
    reads_in_flight: usize,
    tx: mpsc::Sender<(u64, Result<PreferenceRecord, ApiError>)>,
    rx: mpsc::Receiver<(u64, Result<PreferenceRecord, ApiError>)>,
}

impl PreferenceSyncAgent {
    pub fn new(
        remote: Arc<dyn PreferenceRemote>,
        store: Option<FallbackStore>,
        applier: Box<dyn ThemeApplier>,
        notifier: Notifier,
        mutation_timeout: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::channel(4);
        let mutations = OptimisticMutationController::new(
            Arc::clone(&remote),
            notifier.clone(),
            mutation_timeout,
        );
        Self {
            remote,
            view: PreferenceView {
                record: None,
                showing_defaults: false,
                applied_theme: None,
                applier,
                store,
            },
            mutations,
            notifier,
            latest_read: 0,
            reads_in_flight: 0,
            tx,
            rx,
        }
    }

    /// Displayed preferences. `None` until something has been painted.
    pub fn current(&self) -> Option<PreferenceRecord> {
        self.view.displayed()
    }

    pub fn theme(&self) -> Theme {
        self.current().map(|r| r.theme).unwrap_or_default()
    }

    pub fn is_loading(&self) -> bool {
        self.reads_in_flight > 0
    }

    pub fn has_pending_writes(&self) -> bool {
        self.mutations.has_pending()
    }

    /// Paints from the fallback store, then starts the remote read.
    pub fn open(&mut self) {
        self.paint_from_fallback();
        self.refresh();
    }

    pub fn paint_from_fallback(&mut self) -> bool {
        let cached = match self.view.store.as_ref().map(|s| s.load_preferences()) {
            Some(Ok(Some(record))) => record,
            Some(Ok(None)) | None => return false,
            Some(Err(e)) => {
                warn!(error = %e, "Failed to load cached preferences");
                return false;
            }
        };
        debug!("Painting cached preferences");
        self.view.install(&(), &Some(cached));
        true
    }

    pub fn refresh(&mut self) {
        self.latest_read += 1;
        let stamp = self.latest_read;
        self.reads_in_flight += 1;

        let remote = Arc::clone(&self.remote);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = remote.get_preferences().await;
            if let Err(e) = tx.send((stamp, result)).await {
                error!(error = %e, "Failed to send preference result - channel closed");
            }
        });
    }

    fn process_read(&mut self, stamp: u64, result: Result<PreferenceRecord, ApiError>) {
        self.reads_in_flight = self.reads_in_flight.saturating_sub(1);
        if stamp != self.latest_read {
            debug!(stamp, "Discarding stale preference read");
            return;
        }
        match result {
            Ok(record) => {
                info!("Preferences fetched");
                if let Some(ref store) = self.view.store {
                    if let Err(e) = store.save_preferences(&record) {
                        warn!(error = %e, "Failed to cache preferences");
                    }
                }
                if !self.mutations.rebase(&(), &mut self.view, |base| *base = Some(record)) {
                    self.view.install(&(), &Some(record));
                }
            }
            Err(e) => {
                error!(error = %e, "Preference fetch failed");
                self.notifier.api_failure("Could not load preferences", &e);
                if self.view.record.is_none() {
                    self.view.showing_defaults = true;
                    self.view.apply_displayed_theme();
                }
            }
        }
    }

    /// Applies `patch` at once and sends it. Returns false when it changes nothing.
    pub fn update(&mut self, patch: PreferencePatch) -> bool {
        if patch.is_empty() {
            return false;
        }
        if let Some(shown) = self.view.current(&()) {
            if patch.apply_to(&shown) == shown {
                debug!("Preference patch changes nothing, skipping");
                return false;
            }
        }
        self.mutations.submit(PreferenceMutation(patch), &mut self.view)
    }

    pub fn set_notifications(&mut self, enabled: bool) -> bool {
        self.update(PreferencePatch::notifications(enabled))
    }

    pub fn set_sound(&mut self, enabled: bool) -> bool {
        self.update(PreferencePatch::sound(enabled))
    }

    pub fn set_theme(&mut self, theme: Theme) -> bool {
        self.update(PreferencePatch::theme(theme))
    }

    pub fn toggle_theme(&mut self) -> bool {
        let next = self.theme().toggled();
        self.set_theme(next)
    }

    // ===== Event loop =====

    pub async fn next_event(&mut self) -> Option<PreferenceEvent> {
        let reading = self.reads_in_flight > 0;
        let writing = self.mutations.has_pending();
        if !reading && !writing {
            return None;
        }
        tokio::select! {
            Some((stamp, result)) = self.rx.recv(), if reading => {
                Some(PreferenceEvent::Fetched { stamp, result })
            }
            Some(settlement) = self.mutations.next_settlement(), if writing => {
                Some(PreferenceEvent::Settled(settlement))
            }
            else => None,
        }
    }

    pub fn process_event(&mut self, event: PreferenceEvent) {
        match event {
            PreferenceEvent::Fetched { stamp, result } => self.process_read(stamp, result),
            PreferenceEvent::Settled(settlement) => {
                self.mutations.settle(settlement, &mut self.view);
            }
        }
    }

    pub fn check_background_tasks(&mut self) -> usize {
        let mut processed = 0;
        while let Ok((stamp, result)) = self.rx.try_recv() {
            self.process_read(stamp, result);
            processed += 1;
        }
        while let Some(settlement) = self.mutations.try_next_settlement() {
            self.mutations.settle(settlement, &mut self.view);
            processed += 1;
        }
        processed
    }

    pub async fn run_until_idle(&mut self) {
        while let Some(event) = self.next_event().await {
            self.process_event(event);
        }
    }

    /// Forgets displayed values and pending writes. Late results are ignored.
    pub fn close(&mut self) {
        self.mutations.reset();
        self.latest_read += 1;
        self.view.record = None;
        self.view.showing_defaults = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::fakes::FakePreferences;
    use crate::sync::mutation::MUTATION_TIMEOUT_SECS;
    use crate::sync::notice::Notice;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct RecordingTheme(Arc<Mutex<Vec<Theme>>>);

    impl ThemeApplier for RecordingTheme {
        fn apply_theme(&mut self, theme: Theme) {
            self.0.lock().unwrap().push(theme);
        }
    }

    fn agent(
        remote: &Arc<FakePreferences>,
        store: Option<FallbackStore>,
        theme: &RecordingTheme,
    ) -> (PreferenceSyncAgent, mpsc::Receiver<Notice>) {
        let (notifier, rx) = Notifier::channel();
        let remote: Arc<dyn PreferenceRemote> = Arc::clone(remote) as Arc<dyn PreferenceRemote>;
        let agent = PreferenceSyncAgent::new(
            remote,
            store,
            Box::new(theme.clone()),
            notifier,
            Duration::from_secs(MUTATION_TIMEOUT_SECS),
        );
        (agent, rx)
    }

    fn store() -> (tempfile::TempDir, FallbackStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FallbackStore::new(dir.path().to_path_buf()).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_failed_sound_toggle_restores_ui_and_fallback() {
        let (_dir, store) = store();
        let quiet = PreferenceRecord {
            sound: false,
            ..PreferenceRecord::default()
        };
        store.save_preferences(&quiet).unwrap();
        let remote = Arc::new(FakePreferences::new(quiet));
        let theme = RecordingTheme::default();
        let (mut agent, mut notices) = agent(&remote, Some(store.clone()), &theme);
        agent.open();
        agent.run_until_idle().await;
        let file_before = std::fs::read(store.path("preferences")).unwrap();

        *remote.fail_writes.lock().unwrap() = Some(ApiError::NetworkError("offline".into()));
        assert!(agent.set_sound(true));
        assert_eq!(agent.current().map(|p| p.sound), Some(true));
        assert_eq!(store.load_preferences().unwrap().map(|p| p.sound), Some(true));

        agent.run_until_idle().await;
        assert_eq!(agent.current(), Some(quiet));
        assert_eq!(store.load_preferences().unwrap(), Some(quiet));
        assert_eq!(std::fs::read(store.path("preferences")).unwrap(), file_before);
        assert!(notices.try_recv().unwrap().is_error());
    }

    #[tokio::test]
    async fn test_theme_side_effect_reverted_on_rollback() {
        let remote = Arc::new(FakePreferences::new(PreferenceRecord::default()));
        let theme = RecordingTheme::default();
        let (mut agent, _notices) = agent(&remote, None, &theme);
        agent.open();
        agent.run_until_idle().await;

        let gate = remote.gate_write();
        *remote.fail_writes.lock().unwrap() = Some(ApiError::Conflict("stale".into()));
        assert!(agent.toggle_theme());
        assert_eq!(agent.theme(), Theme::Dark);

        gate.send(()).unwrap();
        agent.run_until_idle().await;
        assert_eq!(agent.theme(), Theme::Light);
        assert_eq!(*theme.0.lock().unwrap(), vec![Theme::Light, Theme::Dark, Theme::Light]);
    }

    #[tokio::test]
    async fn test_cold_start_paints_cache_then_server_wins() {
        let (_dir, store) = store();
        let cached = PreferenceRecord {
            theme: Theme::Dark,
            ..PreferenceRecord::default()
        };
        store.save_preferences(&cached).unwrap();
        let server = PreferenceRecord {
            notifications: false,
            ..PreferenceRecord::default()
        };
        let remote = Arc::new(FakePreferences::new(server));
        let read = remote.gate_read();
        let theme = RecordingTheme::default();
        let (mut agent, _notices) = agent(&remote, Some(store.clone()), &theme);

        agent.open();
        assert_eq!(agent.current(), Some(cached));
        assert!(agent.is_loading());

        read.send(()).unwrap();
        agent.run_until_idle().await;
        assert_eq!(agent.current(), Some(server));
        assert_eq!(store.load_preferences().unwrap(), Some(server));
        assert_eq!(*theme.0.lock().unwrap(), vec![Theme::Dark, Theme::Light]);
    }

    #[tokio::test]
    async fn test_failed_read_with_nothing_shown_uses_defaults() {
        let (_dir, store) = store();
        let remote = Arc::new(FakePreferences::new(PreferenceRecord::default()));
        *remote.fail_reads.lock().unwrap() = Some(ApiError::ServerError("down".into()));
        let theme = RecordingTheme::default();
        let (mut agent, mut notices) = agent(&remote, Some(store.clone()), &theme);

        agent.open();
        agent.run_until_idle().await;
        assert_eq!(agent.current(), Some(PreferenceRecord::default()));
        assert_eq!(*theme.0.lock().unwrap(), vec![Theme::Light]);
        assert!(!store.path("preferences").exists());
        assert!(notices.try_recv().unwrap().is_error());
    }

    #[tokio::test]
    async fn test_rollback_to_nothing_shown_removes_fallback_file() {
        let (_dir, store) = store();
        let remote = Arc::new(FakePreferences::new(PreferenceRecord::default()));
        let read = remote.gate_read();
        *remote.fail_writes.lock().unwrap() = Some(ApiError::NetworkError("offline".into()));
        let theme = RecordingTheme::default();
        let (mut agent, mut notices) = agent(&remote, Some(store.clone()), &theme);

        agent.open();
        assert_eq!(agent.current(), None);
        assert!(agent.set_sound(false));
        assert_eq!(agent.current().map(|p| p.sound), Some(false));
        assert!(store.path("preferences").exists());

        let event = agent.next_event().await.unwrap();
        assert!(matches!(event, PreferenceEvent::Settled(_)));
        agent.process_event(event);
        assert_eq!(agent.current(), None);
        assert!(!store.path("preferences").exists());
        assert!(notices.try_recv().unwrap().is_error());

        read.send(()).unwrap();
        agent.run_until_idle().await;
        assert_eq!(agent.current(), Some(PreferenceRecord::default()));
        assert_eq!(store.load_preferences().unwrap(), Some(PreferenceRecord::default()));
    }

    #[tokio::test]
    async fn test_read_during_pending_write_keeps_optimistic_value() {
        let remote = Arc::new(FakePreferences::new(PreferenceRecord::default()));
        let theme = RecordingTheme::default();
        let (mut agent, _notices) = agent(&remote, None, &theme);
        agent.open();
        agent.run_until_idle().await;

        let gate = remote.gate_write();
        agent.set_notifications(false);
        agent.refresh();
        let event = agent.next_event().await.unwrap();
        assert!(matches!(event, PreferenceEvent::Fetched { .. }));
        agent.process_event(event);
        assert_eq!(agent.current().map(|p| p.notifications), Some(false));

        gate.send(()).unwrap();
        agent.run_until_idle().await;
        assert!(!remote.record().notifications);
        assert_eq!(remote.patches(), vec![PreferencePatch::notifications(false)]);
    }

    #[tokio::test]
    async fn test_no_op_patch_is_not_sent() {
        let remote = Arc::new(FakePreferences::new(PreferenceRecord::default()));
        let theme = RecordingTheme::default();
        let (mut agent, _notices) = agent(&remote, None, &theme);
        agent.open();
        agent.run_until_idle().await;

        assert!(!agent.set_sound(true));
        assert!(!agent.update(PreferencePatch::default()));
        assert!(remote.patches().is_empty());
    }
}
