//! In-memory remotes for sync tests.
//!
//! Responses can be held back with oneshot gates to force completion order,
//! and writes can be made to fail with a chosen error.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use tokio::sync::oneshot;

use crate::api::{ApiError, LedgerRemote, PreferenceRemote, ProjectRemote};
use crate::models::{
    EntryId, EntryQuery, LedgerRecord, Objective, ObjectiveId, Page, PreferencePatch,
    PreferenceRecord, Project, ProjectId, TagId, TagRecord,
};

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn tag(id: TagId, name: &str, allow_negative: bool) -> TagRecord {
    let mut tag = TagRecord::new(name, "#336699");
    tag.id = Some(id);
    tag.allow_negative = allow_negative;
    tag
}

pub fn saved(id: EntryId, amount: Decimal, on: NaiveDate, tag_id: TagId) -> LedgerRecord {
    let mut record = LedgerRecord::new(amount, on, tag_id);
    record.id = Some(id);
    record
}

async fn wait(gate: Option<oneshot::Receiver<()>>) {
    if let Some(rx) = gate {
        let _ = rx.await;
    }
}

fn check(failure: &Mutex<Option<ApiError>>) -> Result<(), ApiError> {
    match failure.lock().unwrap().clone() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

// ============================================================================
// Ledger
// ============================================================================

pub struct FakeLedger {
    entries: Mutex<Vec<LedgerRecord>>,
    tags: Mutex<Vec<TagRecord>>,
    next_id: AtomicI64,
    list_calls: AtomicUsize,
    write_calls: AtomicUsize,
    /// Keyed by (page size, page index).
    list_gates: Mutex<HashMap<(u32, u32), oneshot::Receiver<()>>>,
    write_gates: Mutex<VecDeque<oneshot::Receiver<()>>>,
    pub fail_writes: Mutex<Option<ApiError>>,
    pub fail_reads: Mutex<Option<ApiError>>,
}

impl FakeLedger {
    pub fn new(entries: Vec<LedgerRecord>, tags: Vec<TagRecord>) -> Self {
        let max_id = entries.iter().filter_map(|e| e.id).max().unwrap_or(0);
        Self {
            entries: Mutex::new(entries),
            tags: Mutex::new(tags),
            next_id: AtomicI64::new(max_id + 1),
            list_calls: AtomicUsize::new(0),
            write_calls: AtomicUsize::new(0),
            list_gates: Mutex::new(HashMap::new()),
            write_gates: Mutex::new(VecDeque::new()),
            fail_writes: Mutex::new(None),
            fail_reads: Mutex::new(None),
        }
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    pub fn entries(&self) -> Vec<LedgerRecord> {
        self.entries.lock().unwrap().clone()
    }

    /// Holds back the next listing of `(size, page)` until the sender fires.
    pub fn gate_list(&self, size: u32, page: u32) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.list_gates.lock().unwrap().insert((size, page), rx);
        tx
    }

    pub fn gate_write(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.write_gates.lock().unwrap().push_back(rx);
        tx
    }

    pub fn fail_writes_with(&self, error: ApiError) {
        *self.fail_writes.lock().unwrap() = Some(error);
    }

    async fn before_write(&self) -> Result<(), ApiError> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.write_gates.lock().unwrap().pop_front();
        wait(gate).await;
        check(&self.fail_writes)
    }
}

#[async_trait]
impl LedgerRemote for FakeLedger {
    async fn list_entries(&self, query: &EntryQuery) -> Result<Page<LedgerRecord>, ApiError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.list_gates.lock().unwrap().remove(&(query.size, query.page));
        wait(gate).await;
        check(&self.fail_reads)?;

        let mut matching: Vec<LedgerRecord> = self
            .entries
            .lock()
            .unwrap()
            .iter()
            .filter(|r| query.matches(r))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.date.cmp(&a.date).then(b.id.cmp(&a.id)));

        let size = query.size.max(1) as usize;
        let total = matching.len();
        let items = matching
            .into_iter()
            .skip(query.page as usize * size)
            .take(size)
            .collect();
        Ok(Page {
            items,
            page_index: query.page,
            total_pages: total.div_ceil(size) as u32,
            total_elements: total as u64,
            size: query.size,
        })
    }

    async fn create_entry(&self, record: &LedgerRecord) -> Result<LedgerRecord, ApiError> {
        self.before_write().await?;
        let mut saved = record.clone();
        saved.id = Some(self.next_id.fetch_add(1, Ordering::SeqCst));
        saved.local_id = None;
        self.entries.lock().unwrap().push(saved.clone());
        Ok(saved)
    }

    async fn update_entry(
        &self,
        id: EntryId,
        record: &LedgerRecord,
    ) -> Result<LedgerRecord, ApiError> {
        self.before_write().await?;
        let mut entries = self.entries.lock().unwrap();
        let slot = entries
            .iter_mut()
            .find(|e| e.id == Some(id))
            .ok_or_else(|| ApiError::NotFound(id.to_string()))?;
        *slot = record.clone();
        slot.local_id = None;
        Ok(slot.clone())
    }

    async fn delete_entry(&self, id: EntryId) -> Result<(), ApiError> {
        self.before_write().await?;
        self.entries.lock().unwrap().retain(|e| e.id != Some(id));
        Ok(())
    }

    async fn count_entries(&self) -> Result<u64, ApiError> {
        Ok(self.entries.lock().unwrap().len() as u64)
    }

    async fn recurring_entries(&self) -> Result<Vec<LedgerRecord>, ApiError> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.is_recurring)
            .cloned()
            .collect())
    }

    async fn list_tags(&self) -> Result<Vec<TagRecord>, ApiError> {
        check(&self.fail_reads)?;
        Ok(self.tags.lock().unwrap().clone())
    }

    async fn create_tag(&self, tag: &TagRecord) -> Result<TagRecord, ApiError> {
        self.before_write().await?;
        let mut saved = tag.clone();
        saved.id = Some(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.tags.lock().unwrap().push(saved.clone());
        Ok(saved)
    }

    async fn update_tag(&self, id: TagId, tag: &TagRecord) -> Result<TagRecord, ApiError> {
        self.before_write().await?;
        let mut tags = self.tags.lock().unwrap();
        let slot = tags
            .iter_mut()
            .find(|t| t.id == Some(id))
            .ok_or_else(|| ApiError::NotFound(id.to_string()))?;
        *slot = tag.clone();
        slot.id = Some(id);
        Ok(slot.clone())
    }

    async fn delete_tag(&self, id: TagId) -> Result<(), ApiError> {
        self.before_write().await?;
        self.tags.lock().unwrap().retain(|t| t.id != Some(id));
        Ok(())
    }
}

// ============================================================================
// Preferences
// ============================================================================

pub struct FakePreferences {
    record: Mutex<PreferenceRecord>,
    read_gate: Mutex<Option<oneshot::Receiver<()>>>,
    write_gates: Mutex<VecDeque<oneshot::Receiver<()>>>,
    pub fail_reads: Mutex<Option<ApiError>>,
    pub fail_writes: Mutex<Option<ApiError>>,
    patches: Mutex<Vec<PreferencePatch>>,
}

impl FakePreferences {
    pub fn new(record: PreferenceRecord) -> Self {
        Self {
            record: Mutex::new(record),
            read_gate: Mutex::new(None),
            write_gates: Mutex::new(VecDeque::new()),
            fail_reads: Mutex::new(None),
            fail_writes: Mutex::new(None),
            patches: Mutex::new(Vec::new()),
        }
    }

    pub fn record(&self) -> PreferenceRecord {
        *self.record.lock().unwrap()
    }

    pub fn patches(&self) -> Vec<PreferencePatch> {
        self.patches.lock().unwrap().clone()
    }

    pub fn gate_read(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.read_gate.lock().unwrap() = Some(rx);
        tx
    }

    pub fn gate_write(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.write_gates.lock().unwrap().push_back(rx);
        tx
    }
}

#[async_trait]
impl PreferenceRemote for FakePreferences {
    async fn get_preferences(&self) -> Result<PreferenceRecord, ApiError> {
        let gate = self.read_gate.lock().unwrap().take();
        wait(gate).await;
        check(&self.fail_reads)?;
        Ok(self.record())
    }

    async fn patch_preferences(
        &self,
        patch: &PreferencePatch,
    ) -> Result<PreferenceRecord, ApiError> {
        self.patches.lock().unwrap().push(*patch);
        let gate = self.write_gates.lock().unwrap().pop_front();
        wait(gate).await;
        check(&self.fail_writes)?;
        let mut record = self.record.lock().unwrap();
        let updated = patch.apply_to(&record);
        *record = updated;
        Ok(updated)
    }
}

// ============================================================================
// Projects
// ============================================================================

pub struct FakeProjects {
    project: Mutex<Project>,
    write_gates: Mutex<VecDeque<oneshot::Receiver<()>>>,
    pub fail_writes: Mutex<Option<ApiError>>,
}

impl FakeProjects {
    pub fn new(project: Project) -> Self {
        Self {
            project: Mutex::new(project),
            write_gates: Mutex::new(VecDeque::new()),
            fail_writes: Mutex::new(None),
        }
    }

    pub fn project(&self) -> Project {
        self.project.lock().unwrap().clone()
    }

    pub fn gate_write(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.write_gates.lock().unwrap().push_back(rx);
        tx
    }

    async fn before_write(&self) -> Result<(), ApiError> {
        let gate = self.write_gates.lock().unwrap().pop_front();
        wait(gate).await;
        check(&self.fail_writes)
    }
}

#[async_trait]
impl ProjectRemote for FakeProjects {
    async fn get_project(&self, id: ProjectId) -> Result<Project, ApiError> {
        let project = self.project();
        if project.id == id {
            Ok(project)
        } else {
            Err(ApiError::NotFound(id.to_string()))
        }
    }

    async fn add_objective(
        &self,
        _project: ProjectId,
        objective: &Objective,
    ) -> Result<Project, ApiError> {
        self.before_write().await?;
        let mut project = self.project.lock().unwrap();
        project.objectives.push(objective.clone());
        Ok(project.clone())
    }

    async fn update_objective(
        &self,
        _project: ProjectId,
        objective: &Objective,
    ) -> Result<Project, ApiError> {
        self.before_write().await?;
        let mut project = self.project.lock().unwrap();
        let slot = project
            .objectives
            .iter_mut()
            .find(|o| o.id == objective.id)
            .ok_or_else(|| ApiError::NotFound(objective.id.to_string()))?;
        *slot = objective.clone();
        Ok(project.clone())
    }

    async fn delete_objective(
        &self,
        _project: ProjectId,
        objective: ObjectiveId,
    ) -> Result<Project, ApiError> {
        self.before_write().await?;
        let mut project = self.project.lock().unwrap();
        project.objectives.retain(|o| o.id != objective);
        Ok(project.clone())
    }
}
