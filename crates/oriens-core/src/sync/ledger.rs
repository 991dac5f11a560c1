//! Ledger read pipelines and optimistic ledger writes.
//!
//! Two read views share one invalidation signal:
//!
//! - the aggregate view: every entry of the trailing chart window, one large page
//! - the table view: one page of the filtered listing at a time
//!
//! Both are fetched by spawned tasks whose results come back over a channel
//! and are applied by [`LedgerSyncCoordinator::process_fetch_result`]. Each
//! pipeline stamps its requests and only the newest response is applied.
//!
//! Writes go through the optimistic controller with a single lane for the
//! whole collection. A confirmed write clears the query cache and re-runs both
//! pipelines with their current parameters.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDate};
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::api::{ApiError, LedgerRemote};
use crate::cache::{CacheEntry, CacheKey, FallbackStore, Generation, QueryCache, ViewKind};
use crate::filter::{DateRange, FilterStateMachine};
use crate::models::{EntryId, EntryQuery, LedgerRecord, Page, TagId, TagRecord};
use crate::summary::{self, Distribution, MonthCursor, PeriodOverview, TagExpenseChart};

use super::mutation::{
    Mutation, MutationTarget, OptimisticMutationController, Settled, Settlement,
    MUTATION_TIMEOUT_SECS,
};
use super::notice::{Notice, Notifier};
use super::requests::{RequestStamps, Stamp};
use super::validate::{validate_entry, validate_tag, SyncError};

// ============================================================================
// Constants
// ============================================================================

/// Rows per table page.
pub const TABLE_PAGE_SIZE: u32 = 20;

/// Page size for the aggregate fetch.
/// Large enough to hold six months of a household ledger in one request.
pub const AGGREGATE_PAGE_SIZE: u32 = 500;

/// Length of the chart window, in calendar months before today.
pub const AGGREGATE_MONTHS: u32 = 6;

/// Buffer size for fetch results.
const CHANNEL_BUFFER_SIZE: usize = 32;

// ============================================================================
// Settings and state
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerSettings {
    pub table_page_size: u32,
    pub aggregate_page_size: u32,
    pub aggregate_months: u32,
    pub mutation_timeout: Duration,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            table_page_size: TABLE_PAGE_SIZE,
            aggregate_page_size: AGGREGATE_PAGE_SIZE,
            aggregate_months: AGGREGATE_MONTHS,
            mutation_timeout: Duration::from_secs(MUTATION_TIMEOUT_SECS),
        }
    }
}

/// Independent request streams. Each has its own stamps and loading flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pipeline {
    Aggregate,
    Table,
    Tags,
}

impl Pipeline {
    fn view(&self) -> Option<ViewKind> {
        match self {
            Pipeline::Aggregate => Some(ViewKind::Aggregate),
            Pipeline::Table => Some(ViewKind::Table),
            Pipeline::Tags => None,
        }
    }
}

/// Everything a ledger write can change on screen.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerSnapshot {
    pub table: Page<LedgerRecord>,
    /// Query the displayed table page was fetched for. `None` until a page is shown.
    pub table_query: Option<EntryQuery>,
    pub aggregate: Vec<LedgerRecord>,
}

impl Default for LedgerSnapshot {
    fn default() -> Self {
        Self {
            table: Page::empty(TABLE_PAGE_SIZE),
            table_query: None,
            aggregate: Vec::new(),
        }
    }
}

/// Displayed ledger state. The only writer of the table and aggregate views.
#[derive(Debug, Default)]
pub struct LedgerViews {
    snapshot: LedgerSnapshot,
    tags: Vec<TagRecord>,
    store: Option<FallbackStore>,
}

impl LedgerViews {
    fn persist_aggregate(&self) {
        if let Some(ref store) = self.store {
            if let Err(e) = store.save_aggregate(&self.snapshot.aggregate) {
                warn!(error = %e, "Failed to cache ledger aggregate");
            }
        }
    }
}

impl MutationTarget<(), LedgerSnapshot> for LedgerViews {
    fn current(&self, _key: &()) -> LedgerSnapshot {
        self.snapshot.clone()
    }

    fn install(&mut self, _key: &(), state: &LedgerSnapshot) {
        let aggregate_changed = self.snapshot.aggregate != state.aggregate;
        self.snapshot = state.clone();
        if aggregate_changed {
            self.persist_aggregate();
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Loading {
    aggregate: bool,
    table: bool,
    tags: bool,
}

impl Loading {
    fn set(&mut self, pipeline: Pipeline, value: bool) {
        match pipeline {
            Pipeline::Aggregate => self.aggregate = value,
            Pipeline::Table => self.table = value,
            Pipeline::Tags => self.tags = value,
        }
    }

    fn get(&self, pipeline: Pipeline) -> bool {
        match pipeline {
            Pipeline::Aggregate => self.aggregate,
            Pipeline::Table => self.table,
            Pipeline::Tags => self.tags,
        }
    }
}

// ============================================================================
// Ledger writes
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum LedgerChange {
    Create(LedgerRecord),
    Update(LedgerRecord),
    Delete(EntryId),
}

/// A ledger write plus the chart window needed to place it optimistically.
/// Table placement follows the query stored in the state it is applied to.
#[derive(Debug, Clone)]
pub struct LedgerMutation {
    change: LedgerChange,
    window: DateRange,
}

/// Inserts keeping newest-first order. Among equal dates the new record goes first.
fn insert_by_date(records: &mut Vec<LedgerRecord>, record: LedgerRecord) {
    let pos = records
        .iter()
        .position(|r| r.date <= record.date)
        .unwrap_or(records.len());
    records.insert(pos, record);
}

impl Mutation for LedgerMutation {
    type Key = ();
    type State = LedgerSnapshot;
    type Response = Option<LedgerRecord>;
    type Remote = dyn LedgerRemote;

    fn key(&self) {}

    fn apply(&self, state: &LedgerSnapshot) -> Option<LedgerSnapshot> {
        let mut next = state.clone();
        match self.change {
            LedgerChange::Create(ref record) => {
                if let Some(query) = state.table_query.as_ref().filter(|q| q.matches(record)) {
                    next.table.total_elements += 1;
                    if next.table.page_index == 0 {
                        next.table.items.insert(0, record.clone());
                        next.table.items.truncate(query.size.max(1) as usize);
                    }
                }
                if self.window.contains(record.date) {
                    insert_by_date(&mut next.aggregate, record.clone());
                }
            }
            LedgerChange::Update(ref record) => {
                if let Some(slot) = next.table.items.iter_mut().find(|r| r.same_entry(record)) {
                    *slot = record.clone();
                }
                next.aggregate.retain(|r| !r.same_entry(record));
                if self.window.contains(record.date) {
                    insert_by_date(&mut next.aggregate, record.clone());
                }
            }
            LedgerChange::Delete(id) => {
                let before = next.table.items.len();
                next.table.items.retain(|r| r.id != Some(id));
                if next.table.items.len() < before {
                    next.table.total_elements = next.table.total_elements.saturating_sub(1);
                }
                next.aggregate.retain(|r| r.id != Some(id));
            }
        }
        Some(next)
    }

    fn send(
        &self,
        remote: Arc<dyn LedgerRemote>,
        _attempted: &LedgerSnapshot,
    ) -> BoxFuture<'static, Result<Option<LedgerRecord>, ApiError>> {
        let change = self.change.clone();
        async move {
            match change {
                LedgerChange::Create(record) => remote.create_entry(&record).await.map(Some),
                LedgerChange::Update(record) => {
                    let id = record
                        .id
                        .ok_or_else(|| ApiError::Validation("entry has no id".to_string()))?;
                    remote.update_entry(id, &record).await.map(Some)
                }
                LedgerChange::Delete(id) => remote.delete_entry(id).await.map(|_| None),
            }
        }
        .boxed()
    }

    fn reconcile(
        &self,
        attempted: &LedgerSnapshot,
        response: Option<LedgerRecord>,
    ) -> LedgerSnapshot {
        let mut next = attempted.clone();
        let local = match self.change {
            LedgerChange::Create(ref record) | LedgerChange::Update(ref record) => record,
            LedgerChange::Delete(_) => return next,
        };
        if let Some(saved) = response {
            for slot in next.table.items.iter_mut().chain(next.aggregate.iter_mut()) {
                if slot.same_entry(local) {
                    *slot = saved.clone();
                }
            }
        }
        next
    }

    fn label(&self) -> String {
        match self.change {
            LedgerChange::Create(_) => "create entry",
            LedgerChange::Update(_) => "update entry",
            LedgerChange::Delete(_) => "delete entry",
        }
        .to_string()
    }
}

// ============================================================================
// Coordinator
// ============================================================================

/// Result of a background fetch.
#[derive(Debug)]
pub enum FetchResult {
    Page {
        pipeline: Pipeline,
        stamp: Stamp,
        generation: Generation,
        key: CacheKey,
        query: EntryQuery,
        result: Result<Page<LedgerRecord>, ApiError>,
    },
    Tags {
        stamp: Stamp,
        result: Result<Vec<TagRecord>, ApiError>,
    },
}

pub enum LedgerEvent {
    Fetched(FetchResult),
    Settled(Settlement<LedgerMutation>),
}

pub struct LedgerSyncCoordinator {
    remote: Arc<dyn LedgerRemote>,
    settings: LedgerSettings,
    filters: FilterStateMachine,
    cache: QueryCache<Page<LedgerRecord>>,
    stamps: RequestStamps<Pipeline>,
    views: LedgerViews,
    mutations: OptimisticMutationController<LedgerMutation>,
    notifier: Notifier,
    loading: Loading,
    in_flight: usize,
    tx: mpsc::Sender<FetchResult>,
    rx: mpsc::Receiver<FetchResult>,
    today: Option<NaiveDate>,
}

impl LedgerSyncCoordinator {
    pub fn new(
        remote: Arc<dyn LedgerRemote>,
        store: Option<FallbackStore>,
        notifier: Notifier,
        settings: LedgerSettings,
    ) -> Self {
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        let mutations = OptimisticMutationController::new(
            Arc::clone(&remote),
            notifier.clone(),
            settings.mutation_timeout,
        );
        let views = LedgerViews {
            snapshot: LedgerSnapshot {
                table: Page::empty(settings.table_page_size),
                table_query: None,
                aggregate: Vec::new(),
            },
            tags: Vec::new(),
            store,
        };
        Self {
            remote,
            settings,
            filters: FilterStateMachine::new(),
            cache: QueryCache::new(),
            stamps: RequestStamps::new(),
            views,
            mutations,
            notifier,
            loading: Loading::default(),
            in_flight: 0,
            tx,
            rx,
            today: None,
        }
    }

    /// Pins "today" instead of reading the local clock.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Local::now().date_naive())
    }

    // ===== Accessors =====

    pub fn filters(&self) -> &FilterStateMachine {
        &self.filters
    }

    pub fn table(&self) -> &Page<LedgerRecord> {
        &self.views.snapshot.table
    }

    pub fn aggregate(&self) -> &[LedgerRecord] {
        &self.views.snapshot.aggregate
    }

    pub fn snapshot(&self) -> &LedgerSnapshot {
        &self.views.snapshot
    }

    pub fn tags(&self) -> &[TagRecord] {
        &self.views.tags
    }

    pub fn tag(&self, id: TagId) -> Option<&TagRecord> {
        self.views.tags.iter().find(|t| t.id == Some(id))
    }

    pub fn cache(&self) -> &QueryCache<Page<LedgerRecord>> {
        &self.cache
    }

    pub fn is_loading(&self) -> bool {
        self.loading.aggregate || self.loading.table || self.loading.tags
    }

    pub fn is_pipeline_loading(&self, pipeline: Pipeline) -> bool {
        self.loading.get(pipeline)
    }

    pub fn has_pending_writes(&self) -> bool {
        self.mutations.has_pending()
    }

    /// Cache entry behind the current table parameters, if cached.
    pub fn table_entry(&self) -> Option<Arc<CacheEntry<Page<LedgerRecord>>>> {
        self.cache.get(&self.table_key())
    }

    // ===== Derived views =====

    pub fn aggregate_window(&self) -> DateRange {
        let today = self.today();
        DateRange::new(summary::window_start(today, self.settings.aggregate_months), today)
    }

    pub fn chart(&self) -> TagExpenseChart {
        summary::tag_expenses_by_month(
            &self.views.snapshot.aggregate,
            &self.views.tags,
            self.today(),
            self.settings.aggregate_months as usize,
        )
    }

    pub fn overview(&self, month: MonthCursor) -> PeriodOverview {
        summary::period_overview(&self.views.snapshot.aggregate, month)
    }

    pub fn distribution(&self, month: MonthCursor) -> Distribution {
        summary::distribution(&self.views.snapshot.aggregate, &self.views.tags, month)
    }

    // ===== Cold start =====

    /// Paints the last known aggregate and tags before any fetch completes.
    pub fn paint_from_fallback(&mut self) -> bool {
        let Some(store) = self.views.store.as_ref() else {
            return false;
        };
        let mut painted = false;
        match store.load_aggregate() {
            Ok(Some(records)) => {
                self.views.snapshot.aggregate = records;
                painted = true;
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Failed to load cached ledger aggregate"),
        }
        match store.load_tags() {
            Ok(Some(cached)) => {
                debug!(age = %cached.age_display(), "Painting cached tags");
                self.views.tags = cached.data;
                painted = true;
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Failed to load cached tags"),
        }
        painted
    }

    // ===== Filters =====

    /// Applies a filter change and fetches the table if the change calls for it.
    pub fn update_filters<F>(&mut self, change: F) -> bool
    where
        F: FnOnce(&mut FilterStateMachine) -> bool,
    {
        let fetch = change(&mut self.filters);
        if fetch {
            self.refresh_table();
        }
        fetch
    }

    pub fn set_page(&mut self, page: u32) -> bool {
        self.update_filters(|f| f.set_page(page))
    }

    pub fn clear_filters(&mut self) -> bool {
        self.update_filters(|f| f.clear())
    }

    // ===== Read pipelines =====

    fn table_query(&self) -> Option<EntryQuery> {
        self.filters.query(self.settings.table_page_size, self.today())
    }

    fn table_key(&self) -> CacheKey {
        CacheKey::new(ViewKind::Table, self.filters.page(), self.filters.cache_digest(self.today()))
    }

    fn aggregate_query(&self) -> (EntryQuery, CacheKey) {
        let window = self.aggregate_window();
        let mut query = EntryQuery::newest_first(0, self.settings.aggregate_page_size);
        query.start_date = Some(window.start);
        query.end_date = Some(window.end);
        let digest = format!("{}..{}", window.start, window.end);
        let key = CacheKey::new(ViewKind::Aggregate, 0, digest);
        (query, key)
    }

    pub fn refresh_all(&mut self) {
        self.load_tags();
        self.refresh_aggregate();
        self.refresh_table();
    }

    pub fn refresh_aggregate(&mut self) {
        let (query, key) = self.aggregate_query();
        self.fetch_page(Pipeline::Aggregate, query, key);
    }

    /// Fetches the current table page. Returns false while the filters are incomplete.
    pub fn refresh_table(&mut self) -> bool {
        let Some(query) = self.table_query() else {
            debug!("Table filters incomplete, not fetching");
            return false;
        };
        let key = self.table_key();
        self.fetch_page(Pipeline::Table, query, key);
        true
    }

    fn fetch_page(&mut self, pipeline: Pipeline, query: EntryQuery, key: CacheKey) {
        let stamp = self.stamps.issue(pipeline);

        if let Some(entry) = self.cache.get(&key) {
            self.loading.set(pipeline, false);
            self.show(pipeline, entry.value.clone(), query);
            return;
        }

        info!(pipeline = ?pipeline, key = %key, stamp, "Fetching ledger page");
        self.loading.set(pipeline, true);
        self.in_flight += 1;

        let generation = self.cache.generation();
        let remote = Arc::clone(&self.remote);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = remote.list_entries(&query).await;
            Self::send_result(
                &tx,
                FetchResult::Page {
                    pipeline,
                    stamp,
                    generation,
                    key,
                    query,
                    result,
                },
            )
            .await;
        });
    }

    pub fn load_tags(&mut self) {
        let stamp = self.stamps.issue(Pipeline::Tags);
        self.loading.tags = true;
        self.in_flight += 1;

        let remote = Arc::clone(&self.remote);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = remote.list_tags().await;
            Self::send_result(&tx, FetchResult::Tags { stamp, result }).await;
        });
    }

    async fn send_result(tx: &mpsc::Sender<FetchResult>, result: FetchResult) {
        if let Err(e) = tx.send(result).await {
            error!(error = %e, "Failed to send fetch result - channel closed");
        }
    }

    /// Displays a page. Pending writes are re-applied on top, placed by `query`.
    fn show(&mut self, pipeline: Pipeline, page: Page<LedgerRecord>, query: EntryQuery) {
        match pipeline {
            Pipeline::Table => {
                let rebased = self.mutations.rebase(&(), &mut self.views, |base| {
                    base.table = page.clone();
                    base.table_query = Some(query.clone());
                });
                if !rebased {
                    self.views.snapshot.table = page;
                    self.views.snapshot.table_query = Some(query);
                }
            }
            Pipeline::Aggregate => {
                let items = page.items;
                let rebased = self
                    .mutations
                    .rebase(&(), &mut self.views, |base| base.aggregate = items.clone());
                if !rebased {
                    let mut next = self.views.snapshot.clone();
                    next.aggregate = items;
                    self.views.install(&(), &next);
                }
            }
            Pipeline::Tags => {}
        }
    }

    /// Applies one fetch result. Responses superseded by a newer request are dropped.
    pub fn process_fetch_result(&mut self, result: FetchResult) {
        self.in_flight = self.in_flight.saturating_sub(1);

        match result {
            FetchResult::Page {
                pipeline,
                stamp,
                generation,
                key,
                query,
                result,
            } => {
                if !self.stamps.is_latest(pipeline, stamp) {
                    debug!(pipeline = ?pipeline, key = %key, stamp, "Discarding stale response");
                    return;
                }
                self.loading.set(pipeline, false);
                match result {
                    Ok(page) => {
                        debug!(
                            pipeline = ?pipeline,
                            view = ?pipeline.view(),
                            count = page.items.len(),
                            "Ledger page fetched"
                        );
                        self.cache.set_if_current(generation, key, page.clone());
                        self.show(pipeline, page, query);
                    }
                    Err(e) => {
                        error!(pipeline = ?pipeline, error = %e, "Ledger fetch failed");
                        let title = match pipeline {
                            Pipeline::Aggregate => "Could not load chart data",
                            _ => "Could not load entries",
                        };
                        self.notifier.api_failure(title, &e);
                    }
                }
            }
            FetchResult::Tags { stamp, result } => {
                if !self.stamps.is_latest(Pipeline::Tags, stamp) {
                    debug!(stamp, "Discarding stale tag list");
                    return;
                }
                self.loading.tags = false;
                match result {
                    Ok(tags) => {
                        info!(count = tags.len(), "Tags fetched");
                        if let Some(ref store) = self.views.store {
                            if let Err(e) = store.save_tags(&tags) {
                                warn!(error = %e, "Failed to cache tags");
                            }
                        }
                        self.views.tags = tags;
                    }
                    Err(e) => {
                        error!(error = %e, "Tag fetch failed");
                        self.notifier.api_failure("Could not load tags", &e);
                    }
                }
            }
        }
    }

    fn process_settlement(&mut self, settlement: Settlement<LedgerMutation>) {
        let Some(outcome) = self.mutations.settle(settlement, &mut self.views) else {
            return;
        };
        if let Settled::Confirmed(ref mutation) = outcome {
            let title = match mutation.change {
                LedgerChange::Create(_) => "Entry created",
                LedgerChange::Update(_) => "Entry updated",
                LedgerChange::Delete(_) => "Entry deleted",
            };
            self.notifier.send(Notice::success(title, "The ledger was updated."));
            self.invalidate_and_refresh();
        }
    }

    fn invalidate_and_refresh(&mut self) {
        let removed = self.cache.invalidate_all();
        debug!(removed, "Ledger changed, refetching both views");
        self.refresh_aggregate();
        self.refresh_table();
    }

    pub fn process_event(&mut self, event: LedgerEvent) {
        match event {
            LedgerEvent::Fetched(result) => self.process_fetch_result(result),
            LedgerEvent::Settled(settlement) => self.process_settlement(settlement),
        }
    }

    /// Waits for the next fetch or write to finish. `None` when nothing is outstanding.
    pub async fn next_event(&mut self) -> Option<LedgerEvent> {
        let fetching = self.in_flight > 0;
        let writing = self.mutations.has_pending();
        if !fetching && !writing {
            return None;
        }
        tokio::select! {
            Some(result) = self.rx.recv(), if fetching => Some(LedgerEvent::Fetched(result)),
            Some(settlement) = self.mutations.next_settlement(), if writing => {
                Some(LedgerEvent::Settled(settlement))
            }
            else => None,
        }
    }

    /// Applies everything that has already finished, without waiting.
    pub fn check_background_tasks(&mut self) -> usize {
        let mut processed = 0;
        while let Ok(result) = self.rx.try_recv() {
            self.process_fetch_result(result);
            processed += 1;
        }
        while let Some(settlement) = self.mutations.try_next_settlement() {
            self.process_settlement(settlement);
            processed += 1;
        }
        processed
    }

    /// Drives fetches and writes until nothing is outstanding.
    pub async fn run_until_idle(&mut self) {
        while let Some(event) = self.next_event().await {
            self.process_event(event);
        }
    }

    // ===== Ledger writes =====

    fn mutation(&self, change: LedgerChange) -> LedgerMutation {
        LedgerMutation {
            change,
            window: self.aggregate_window(),
        }
    }

    /// Validates and optimistically inserts a new entry. Returns its provisional handle.
    pub fn create_entry(&mut self, mut record: LedgerRecord) -> Result<Uuid, SyncError> {
        validate_entry(&record, &self.views.tags)?;
        let handle = Uuid::new_v4();
        record.id = None;
        record.local_id = Some(handle);
        let mutation = self.mutation(LedgerChange::Create(record));
        self.mutations.submit(mutation, &mut self.views);
        Ok(handle)
    }

    pub fn update_entry(&mut self, record: LedgerRecord) -> Result<(), SyncError> {
        if record.id.is_none() {
            return Err(SyncError::Unsaved);
        }
        validate_entry(&record, &self.views.tags)?;
        let mutation = self.mutation(LedgerChange::Update(record));
        self.mutations.submit(mutation, &mut self.views);
        Ok(())
    }

    pub fn delete_entry(&mut self, id: EntryId) -> Result<(), SyncError> {
        let mutation = self.mutation(LedgerChange::Delete(id));
        self.mutations.submit(mutation, &mut self.views);
        Ok(())
    }

    pub async fn entry_count(&self) -> Result<u64, SyncError> {
        Ok(self.remote.count_entries().await?)
    }

    pub async fn recurring_entries(&self) -> Result<Vec<LedgerRecord>, SyncError> {
        Ok(self.remote.recurring_entries().await?)
    }

    // ===== Tag writes (confirmed, not optimistic) =====

    pub async fn create_tag(&mut self, tag: TagRecord) -> Result<TagRecord, SyncError> {
        validate_tag(&tag)?;
        match self.remote.create_tag(&tag).await {
            Ok(saved) => {
                info!(name = %saved.name, "Tag created");
                self.notifier.send(Notice::success("Tag created", saved.name.clone()));
                self.load_tags();
                Ok(saved)
            }
            Err(e) => {
                error!(error = %e, "Tag create failed");
                self.notifier.api_failure("Could not create tag", &e);
                Err(e.into())
            }
        }
    }

    pub async fn update_tag(&mut self, id: TagId, tag: TagRecord) -> Result<TagRecord, SyncError> {
        validate_tag(&tag)?;
        match self.remote.update_tag(id, &tag).await {
            Ok(saved) => {
                info!(id, "Tag updated");
                self.notifier.send(Notice::success("Tag updated", saved.name.clone()));
                self.load_tags();
                self.invalidate_and_refresh();
                Ok(saved)
            }
            Err(e) => {
                error!(id, error = %e, "Tag update failed");
                self.notifier.api_failure("Could not update tag", &e);
                Err(e.into())
            }
        }
    }

    pub async fn delete_tag(&mut self, id: TagId) -> Result<(), SyncError> {
        if self.tag(id).is_none() {
            return Err(SyncError::UnknownTag(id));
        }
        match self.remote.delete_tag(id).await {
            Ok(()) => {
                info!(id, "Tag deleted");
                self.notifier.send(Notice::success("Tag deleted", id.to_string()));
                self.load_tags();
                self.invalidate_and_refresh();
                Ok(())
            }
            Err(e) => {
                error!(id, error = %e, "Tag delete failed");
                self.notifier.api_failure("Could not delete tag", &e);
                Err(e.into())
            }
        }
    }

    // ===== Teardown =====

    /// Drops cached pages, pending writes and displayed data. Late results are ignored.
    pub fn close(&mut self) {
        self.cache.invalidate_all();
        self.mutations.reset();
        self.stamps.reset();
        self.loading = Loading::default();
        self.filters = FilterStateMachine::new();
        self.views.snapshot = LedgerSnapshot {
            table: Page::empty(self.settings.table_page_size),
            table_query: None,
            aggregate: Vec::new(),
        };
        self.views.tags.clear();
    }
}
