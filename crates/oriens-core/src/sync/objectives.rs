//! Project objectives, addressed by stable id.
//!
//! Every objective has its own write lane, so a slow toggle on one objective
//! never waits on a delete of another, and a write aimed at an objective that
//! has since disappeared is dropped instead of landing on its neighbour.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, info, warn};

use crate::api::{ApiError, ProjectRemote};
use crate::cache::FallbackStore;
use crate::models::{Objective, ObjectiveId, ObjectiveStatus, Project, ProjectId};

use super::mutation::{Mutation, MutationTarget, OptimisticMutationController, Settlement};
use super::notice::Notifier;
use super::validate::SyncError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectiveChange {
    Add(Objective),
    Toggle,
    Rename {
        title: String,
        due_date: Option<NaiveDate>,
    },
    Remove,
}

#[derive(Debug, Clone)]
pub struct ObjectiveMutation {
    project: ProjectId,
    id: ObjectiveId,
    change: ObjectiveChange,
}

impl Mutation for ObjectiveMutation {
    type Key = ObjectiveId;
    type State = Option<Objective>;
    type Response = Project;
    type Remote = dyn ProjectRemote;

    fn key(&self) -> ObjectiveId {
        self.id
    }

    fn apply(&self, state: &Option<Objective>) -> Option<Option<Objective>> {
        match self.change {
            ObjectiveChange::Add(ref objective) => Some(Some(objective.clone())),
            ObjectiveChange::Toggle => state.as_ref().map(|o| {
                let mut next = o.clone();
                next.status = o.status.toggled();
                Some(next)
            }),
            ObjectiveChange::Rename { ref title, due_date } => state.as_ref().map(|o| {
                let mut next = o.clone();
                next.title = title.clone();
                next.due_date = due_date;
                Some(next)
            }),
            ObjectiveChange::Remove => state.as_ref().map(|_| None),
        }
    }

    fn send(
        &self,
        remote: Arc<dyn ProjectRemote>,
        attempted: &Option<Objective>,
    ) -> BoxFuture<'static, Result<Project, ApiError>> {
        let project = self.project;
        let id = self.id;
        let change = self.change.clone();
        let attempted = attempted.clone();
        async move {
            match (change, attempted) {
                (ObjectiveChange::Remove, _) => remote.delete_objective(project, id).await,
                (ObjectiveChange::Add(_), Some(objective)) => {
                    remote.add_objective(project, &objective).await
                }
                (_, Some(objective)) => remote.update_objective(project, &objective).await,
                (_, None) => Err(ApiError::NotFound(id.to_string())),
            }
        }
        .boxed()
    }

    fn reconcile(&self, _attempted: &Option<Objective>, response: Project) -> Option<Objective> {
        response.objectives.into_iter().find(|o| o.id == self.id)
    }

    fn label(&self) -> String {
        match self.change {
            ObjectiveChange::Add(_) => "add objective",
            ObjectiveChange::Toggle => "update objective",
            ObjectiveChange::Rename { .. } => "rename objective",
            ObjectiveChange::Remove => "remove objective",
        }
        .to_string()
    }
}

struct BoardView {
    project: Option<Project>,
    store: Option<FallbackStore>,
}

impl BoardView {
    fn persist(&self) {
        if let (Some(store), Some(project)) = (self.store.as_ref(), self.project.as_ref()) {
            if let Err(e) = store.save_project(project) {
                warn!(error = %e, "Failed to cache project");
            }
        }
    }
}

impl MutationTarget<ObjectiveId, Option<Objective>> for BoardView {
    fn current(&self, key: &ObjectiveId) -> Option<Objective> {
        self.project
            .as_ref()?
            .objectives
            .iter()
            .find(|o| o.id == *key)
            .cloned()
    }

    fn install(&mut self, key: &ObjectiveId, state: &Option<Objective>) {
        let Some(project) = self.project.as_mut() else {
            return;
        };
        let slot = project.objectives.iter().position(|o| o.id == *key);
        match (slot, state) {
            (Some(i), Some(objective)) => project.objectives[i] = objective.clone(),
            (None, Some(objective)) => project.objectives.push(objective.clone()),
            (Some(i), None) => {
                project.objectives.remove(i);
            }
            (None, None) => {}
        }
        self.persist();
    }
}

pub struct ObjectiveBoard {
    remote: Arc<dyn ProjectRemote>,
    view: BoardView,
    mutations: OptimisticMutationController<ObjectiveMutation>,
    notifier: Notifier,
}

impl ObjectiveBoard {
    pub fn new(
        remote: Arc<dyn ProjectRemote>,
        store: Option<FallbackStore>,
        notifier: Notifier,
        mutation_timeout: Duration,
    ) -> Self {
        let mutations = OptimisticMutationController::new(
            Arc::clone(&remote),
            notifier.clone(),
            mutation_timeout,
        );
        Self {
            remote,
            view: BoardView { project: None, store },
            mutations,
            notifier,
        }
    }

    pub fn project(&self) -> Option<&Project> {
        self.view.project.as_ref()
    }

    pub fn objectives(&self) -> &[Objective] {
        self.view
            .project
            .as_ref()
            .map(|p| p.objectives.as_slice())
            .unwrap_or_default()
    }

    pub fn objective(&self, id: ObjectiveId) -> Option<&Objective> {
        self.objectives().iter().find(|o| o.id == id)
    }

    pub fn pending_count(&self) -> usize {
        self.objectives().iter().filter(|o| !o.is_concluded()).count()
    }

    pub fn concluded_count(&self) -> usize {
        self.objectives().iter().filter(|o| o.is_concluded()).count()
    }

    /// Share of concluded objectives, 0 to 100.
    pub fn progress(&self) -> u8 {
        let total = self.objectives().len();
        if total == 0 {
            return 0;
        }
        ((self.concluded_count() * 100 + total / 2) / total) as u8
    }

    pub fn has_pending_writes(&self) -> bool {
        self.mutations.has_pending()
    }

    /// Loads a project, painting the cached copy first.
    /// Pending writes are re-applied on the fresh copy.
    pub async fn load(&mut self, id: ProjectId) -> Result<(), SyncError> {
        if self.view.project.as_ref().map(|p| p.id) != Some(id) {
            self.mutations.reset();
            self.view.project = None;
            if let Some(ref store) = self.view.store {
                match store.load_project(id) {
                    Ok(cached) => self.view.project = cached,
                    Err(e) => warn!(error = %e, "Failed to load cached project"),
                }
            }
        }

        let fresh = match self.remote.get_project(id).await {
            Ok(project) => project,
            Err(e) => {
                self.notifier.api_failure("Could not load project", &e);
                return Err(e.into());
            }
        };
        info!(project = id, objectives = fresh.objectives.len(), "Project loaded");

        let pending: Vec<ObjectiveId> = self
            .objectives()
            .iter()
            .map(|o| o.id)
            .chain(fresh.objectives.iter().map(|o| o.id))
            .filter(|id| self.mutations.is_pending(id))
            .collect();

        self.view.project = Some(fresh.clone());
        for key in pending {
            let base = fresh.objectives.iter().find(|o| o.id == key).cloned();
            self.mutations.rebase(&key, &mut self.view, |b| *b = base);
        }
        self.view.persist();
        Ok(())
    }

    fn submit(&mut self, id: ObjectiveId, change: ObjectiveChange) -> bool {
        let Some(project) = self.view.project.as_ref().map(|p| p.id) else {
            debug!("No project loaded, ignoring objective change");
            return false;
        };
        let mutation = ObjectiveMutation { project, id, change };
        self.mutations.submit(mutation, &mut self.view)
    }

    /// Adds an objective with a client-generated id. `None` when no project is loaded.
    pub fn add(
        &mut self,
        title: &str,
        due_date: Option<NaiveDate>,
    ) -> Result<Option<ObjectiveId>, SyncError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(SyncError::Invalid("objective title is empty".to_string()));
        }
        let mut objective = Objective::new(title);
        objective.due_date = due_date;
        let id = objective.id;
        Ok(self.submit(id, ObjectiveChange::Add(objective)).then_some(id))
    }

    /// Flips pending/concluded. False when the objective no longer exists.
    pub fn toggle(&mut self, id: ObjectiveId) -> bool {
        self.submit(id, ObjectiveChange::Toggle)
    }

    pub fn rename(
        &mut self,
        id: ObjectiveId,
        title: &str,
        due_date: Option<NaiveDate>,
    ) -> Result<bool, SyncError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(SyncError::Invalid("objective title is empty".to_string()));
        }
        Ok(self.submit(
            id,
            ObjectiveChange::Rename {
                title: title.to_string(),
                due_date,
            },
        ))
    }

    pub fn remove(&mut self, id: ObjectiveId) -> bool {
        self.submit(id, ObjectiveChange::Remove)
    }

    pub fn status(&self, id: ObjectiveId) -> Option<ObjectiveStatus> {
        self.objective(id).map(|o| o.status)
    }

    // ===== Event loop =====

    pub async fn next_settlement(&mut self) -> Option<Settlement<ObjectiveMutation>> {
        if !self.mutations.has_pending() {
            return None;
        }
        self.mutations.next_settlement().await
    }

    pub fn process_settlement(&mut self, settlement: Settlement<ObjectiveMutation>) {
        self.mutations.settle(settlement, &mut self.view);
    }

    pub async fn run_until_idle(&mut self) {
        while let Some(settlement) = self.next_settlement().await {
            self.process_settlement(settlement);
        }
    }

    pub fn close(&mut self) {
        self.mutations.reset();
        self.view.project = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::fakes::FakeProjects;
    use crate::sync::mutation::MUTATION_TIMEOUT_SECS;

    fn project() -> Project {
        let mut first = Objective::new("Draft budget");
        first.status = ObjectiveStatus::Concluded;
        Project {
            id: 12,
            title: "Move house".to_string(),
            description: None,
            color: Some("#FFAA00".to_string()),
            favorite: false,
            archived: false,
            objectives: vec![first, Objective::new("Book truck"), Objective::new("Pack kitchen")],
        }
    }

    async fn board(remote: &Arc<FakeProjects>) -> ObjectiveBoard {
        let (notifier, _rx) = Notifier::channel();
        let remote: Arc<dyn ProjectRemote> = Arc::clone(remote) as Arc<dyn ProjectRemote>;
        let timeout = Duration::from_secs(MUTATION_TIMEOUT_SECS);
        let mut board = ObjectiveBoard::new(remote, None, notifier, timeout);
        board.load(12).await.unwrap();
        board
    }

    #[tokio::test]
    async fn test_counters_and_progress() {
        let remote = Arc::new(FakeProjects::new(project()));
        let board = board(&remote).await;
        assert_eq!(board.pending_count(), 2);
        assert_eq!(board.concluded_count(), 1);
        assert_eq!(board.progress(), 33);
    }

    #[tokio::test]
    async fn test_toggle_survives_concurrent_removal_of_neighbour() {
        let remote = Arc::new(FakeProjects::new(project()));
        let mut board = board(&remote).await;
        let ids: Vec<ObjectiveId> = board.objectives().iter().map(|o| o.id).collect();

        let remove_gate = remote.gate_write();
        let toggle_gate = remote.gate_write();
        assert!(board.remove(ids[1]));
        assert!(board.toggle(ids[2]));
        assert_eq!(board.objectives().len(), 2);
        assert_eq!(board.status(ids[2]), Some(ObjectiveStatus::Concluded));

        // A later change to the removed objective has nothing to land on
        assert!(!board.toggle(ids[1]));

        toggle_gate.send(()).unwrap();
        remove_gate.send(()).unwrap();
        board.run_until_idle().await;

        let server = remote.project();
        assert_eq!(server.objectives.len(), 2);
        assert!(server.objectives.iter().find(|o| o.id == ids[2]).unwrap().is_concluded());
        assert_eq!(board.objectives(), server.objectives.as_slice());
    }

    #[tokio::test]
    async fn test_failed_toggle_restores_status_in_place() {
        let remote = Arc::new(FakeProjects::new(project()));
        let mut board = board(&remote).await;
        let before = board.objectives().to_vec();
        let id = before[1].id;

        *remote.fail_writes.lock().unwrap() = Some(ApiError::ServerError("boom".into()));
        board.toggle(id);
        assert_eq!(board.status(id), Some(ObjectiveStatus::Concluded));
        board.run_until_idle().await;

        assert_eq!(board.objectives(), before.as_slice());
    }

    #[tokio::test]
    async fn test_add_then_toggle_queue_on_the_new_id() {
        let remote = Arc::new(FakeProjects::new(project()));
        let mut board = board(&remote).await;

        let id = board.add("Cancel internet", None).unwrap().unwrap();
        assert!(board.toggle(id));
        assert_eq!(board.objectives().last().unwrap().id, id);
        assert_eq!(board.status(id), Some(ObjectiveStatus::Concluded));
        board.run_until_idle().await;

        let saved = remote.project();
        let objective = saved.objectives.iter().find(|o| o.id == id).unwrap();
        assert!(objective.is_concluded());
        assert_eq!(board.progress(), 50);
    }

    #[tokio::test]
    async fn test_failed_add_is_removed() {
        let remote = Arc::new(FakeProjects::new(project()));
        let mut board = board(&remote).await;
        *remote.fail_writes.lock().unwrap() = Some(ApiError::Validation("title".into()));

        let id = board.add("Sell couch", None).unwrap().unwrap();
        assert!(board.objective(id).is_some());
        board.run_until_idle().await;
        assert!(board.objective(id).is_none());
        assert_eq!(board.objectives().len(), 3);
        assert!(board.add("   ", None).is_err());
    }
}
