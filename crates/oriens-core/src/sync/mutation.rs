//! Optimistic writes with automatic rollback.
//!
//! A write is applied to the displayed state (and the fallback store) at once,
//! then sent to the server from a spawned task. The task's outcome comes back
//! as a [`Settlement`] on the controller's channel; the owner feeds it to
//! [`OptimisticMutationController::settle`], which either adopts the server's
//! canonical value or restores the pre-write state.
//!
//! Writes are serialized per entity. Each key has a lane holding the last
//! confirmed base, the single in-flight write and a queue of later writes.
//! The displayed state is always the base with every pending write applied.

use std::collections::{HashMap, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::api::ApiError;

use super::notice::Notifier;

// ============================================================================
// Constants
// ============================================================================

/// Upper bound for a single remote write, in seconds.
/// Shorter than the HTTP timeout so a stuck write rolls back while the user is still looking.
pub const MUTATION_TIMEOUT_SECS: u64 = 15;

/// Buffer size for the settlement channel.
/// Settlements are drained on every tick, so a small buffer is enough.
const SETTLEMENT_BUFFER_SIZE: usize = 16;

// ============================================================================
// Traits
// ============================================================================

/// One logical write against one entity.
pub trait Mutation: Send + 'static {
    /// Entity the write is addressed to. Writes with equal keys never overlap in flight.
    type Key: Clone + Eq + Hash + Debug + Send + 'static;
    type State: Clone + Send + 'static;
    type Response: Send + 'static;
    type Remote: ?Sized + Send + Sync + 'static;

    fn key(&self) -> Self::Key;

    /// Local effect. `None` means the target no longer exists and the write is dropped.
    fn apply(&self, state: &Self::State) -> Option<Self::State>;

    fn send(
        &self,
        remote: Arc<Self::Remote>,
        attempted: &Self::State,
    ) -> BoxFuture<'static, Result<Self::Response, ApiError>>;

    /// Folds the server's canonical response into the attempted state.
    fn reconcile(&self, attempted: &Self::State, response: Self::Response) -> Self::State;

    /// Short description used in logs and failure notices, e.g. "save entry".
    fn label(&self) -> String;
}

/// Owner of the displayed state for some set of keys.
///
/// `install` is the only way the controller touches that state, for the
/// optimistic apply and the rollback alike. Side effects (fallback store,
/// theme) belong in it.
pub trait MutationTarget<K, S> {
    fn current(&self, key: &K) -> S;

    fn install(&mut self, key: &K, state: &S);
}

// ============================================================================
// Types
// ============================================================================

/// State around one in-flight write.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationSnapshot<S> {
    pub previous: S,
    pub attempted: S,
}

/// Result of a remote write, delivered back to the owner.
pub struct Settlement<M: Mutation> {
    key: M::Key,
    seq: u64,
    result: Result<M::Response, ApiError>,
}

impl<M: Mutation> Settlement<M> {
    pub fn key(&self) -> &M::Key {
        &self.key
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// What happened to a write once its settlement was applied.
pub enum Settled<M: Mutation> {
    Confirmed(M),
    RolledBack { mutation: M, error: ApiError },
}

impl<M: Mutation> Settled<M> {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Settled::Confirmed(_))
    }

    pub fn mutation(&self) -> &M {
        match self {
            Settled::Confirmed(m) => m,
            Settled::RolledBack { mutation, .. } => mutation,
        }
    }
}

struct InFlight<M: Mutation> {
    seq: u64,
    mutation: M,
    snapshot: MutationSnapshot<M::State>,
}

struct Lane<M: Mutation> {
    base: M::State,
    head: Option<InFlight<M>>,
    queued: VecDeque<M>,
}

impl<M: Mutation> Lane<M> {
    fn new(base: M::State) -> Self {
        Self {
            base,
            head: None,
            queued: VecDeque::new(),
        }
    }

    fn is_idle(&self) -> bool {
        self.head.is_none() && self.queued.is_empty()
    }

    fn displayed(&self) -> M::State {
        let pending = self.head.iter().map(|h| &h.mutation).chain(self.queued.iter());
        let mut state = self.base.clone();
        for mutation in pending {
            if let Some(next) = mutation.apply(&state) {
                state = next;
            }
        }
        state
    }
}

// ============================================================================
// Controller
// ============================================================================

pub struct OptimisticMutationController<M: Mutation> {
    remote: Arc<M::Remote>,
    notifier: Notifier,
    timeout: Duration,
    lanes: HashMap<M::Key, Lane<M>>,
    next_seq: u64,
    tx: mpsc::Sender<Settlement<M>>,
    rx: mpsc::Receiver<Settlement<M>>,
}

impl<M: Mutation> OptimisticMutationController<M> {
    pub fn new(remote: Arc<M::Remote>, notifier: Notifier, timeout: Duration) -> Self {
        let (tx, rx) = mpsc::channel(SETTLEMENT_BUFFER_SIZE);
        Self {
            remote,
            notifier,
            timeout,
            lanes: HashMap::new(),
            next_seq: 0,
            tx,
            rx,
        }
    }

    /// True while any write is in flight or queued.
    pub fn has_pending(&self) -> bool {
        !self.lanes.is_empty()
    }

    pub fn is_pending(&self, key: &M::Key) -> bool {
        self.lanes.contains_key(key)
    }

    /// Snapshot of the in-flight write for `key`, if any.
    pub fn in_flight(&self, key: &M::Key) -> Option<&MutationSnapshot<M::State>> {
        self.lanes.get(key)?.head.as_ref().map(|h| &h.snapshot)
    }

    pub fn queued_len(&self, key: &M::Key) -> usize {
        self.lanes.get(key).map(|l| l.queued.len()).unwrap_or(0)
    }

    /// Applies `mutation` locally and schedules its remote write.
    /// Returns false when the target entity no longer exists.
    pub fn submit<T>(&mut self, mutation: M, target: &mut T) -> bool
    where
        T: MutationTarget<M::Key, M::State>,
    {
        let key = mutation.key();
        let lane = self
            .lanes
            .entry(key.clone())
            .or_insert_with(|| Lane::new(target.current(&key)));

        let Some(attempted) = mutation.apply(&lane.displayed()) else {
            debug!(key = ?key, write = %mutation.label(), "Write target is gone, dropping");
            if lane.is_idle() {
                self.lanes.remove(&key);
            }
            return false;
        };

        target.install(&key, &attempted);
        lane.queued.push_back(mutation);
        self.dispatch_next(&key);
        true
    }

    /// Replaces the base of a busy lane with fresh remote data and re-applies pending writes.
    /// Returns false when nothing is pending for `key`; the caller then installs the data itself.
    pub fn rebase<T, F>(&mut self, key: &M::Key, target: &mut T, update: F) -> bool
    where
        T: MutationTarget<M::Key, M::State>,
        F: FnOnce(&mut M::State),
    {
        let Some(lane) = self.lanes.get_mut(key) else {
            return false;
        };
        update(&mut lane.base);
        if let Some(head) = lane.head.as_mut() {
            head.snapshot.previous = lane.base.clone();
            head.snapshot.attempted = head
                .mutation
                .apply(&lane.base)
                .unwrap_or_else(|| lane.base.clone());
        }
        debug!(key = ?key, "Rebased pending writes on fresh data");
        target.install(key, &lane.displayed());
        true
    }

    fn dispatch_next(&mut self, key: &M::Key) {
        let Some(lane) = self.lanes.get_mut(key) else {
            return;
        };

        while lane.head.is_none() {
            let Some(mutation) = lane.queued.pop_front() else {
                break;
            };
            let Some(attempted) = mutation.apply(&lane.base) else {
                debug!(
                    key = ?key,
                    write = %mutation.label(),
                    "Queued write target is gone, dropping"
                );
                continue;
            };

            self.next_seq += 1;
            let seq = self.next_seq;
            let request = mutation.send(Arc::clone(&self.remote), &attempted);
            let tx = self.tx.clone();
            let timeout = self.timeout;
            let task_key = key.clone();
            info!(key = ?key, seq, write = %mutation.label(), "Dispatching write");

            tokio::spawn(async move {
                let result = match tokio::time::timeout(timeout, request).await {
                    Ok(result) => result,
                    Err(_) => Err(ApiError::Timeout(timeout.as_secs())),
                };
                let _ = tx
                    .send(Settlement {
                        key: task_key,
                        seq,
                        result,
                    })
                    .await;
            });

            lane.head = Some(InFlight {
                seq,
                mutation,
                snapshot: MutationSnapshot {
                    previous: lane.base.clone(),
                    attempted,
                },
            });
        }

        if lane.is_idle() {
            self.lanes.remove(key);
        }
    }

    /// Waits for the next remote write to finish.
    /// Only call while [`has_pending`](Self::has_pending).
    pub async fn next_settlement(&mut self) -> Option<Settlement<M>> {
        self.rx.recv().await
    }

    pub fn try_next_settlement(&mut self) -> Option<Settlement<M>> {
        self.rx.try_recv().ok()
    }

    /// Applies a finished write: adopt the canonical value or roll back,
    /// then dispatch the next queued write.
    /// Returns `None` for settlements of writes that were dropped by [`reset`](Self::reset).
    pub fn settle<T>(&mut self, settlement: Settlement<M>, target: &mut T) -> Option<Settled<M>>
    where
        T: MutationTarget<M::Key, M::State>,
    {
        let Settlement { key, seq, result } = settlement;
        let Some(lane) = self.lanes.get_mut(&key) else {
            debug!(key = ?key, seq, "Settlement for a dropped lane, ignoring");
            return None;
        };
        if lane.head.as_ref().map(|h| h.seq) != Some(seq) {
            debug!(key = ?key, seq, "Settlement does not match the in-flight write, ignoring");
            return None;
        }
        let head = lane.head.take()?;

        let outcome = match result {
            Ok(response) => {
                lane.base = head.mutation.reconcile(&head.snapshot.attempted, response);
                info!(key = ?key, seq, write = %head.mutation.label(), "Write confirmed");
                Settled::Confirmed(head.mutation)
            }
            Err(e) => {
                // lane.base is still the pre-write state
                error!(
                    key = ?key,
                    seq,
                    write = %head.mutation.label(),
                    error = %e,
                    "Write failed, rolling back"
                );
                let title = format!("Could not {}", head.mutation.label());
                self.notifier.api_failure(&title, &e);
                Settled::RolledBack {
                    mutation: head.mutation,
                    error: e,
                }
            }
        };

        target.install(&key, &lane.displayed());
        self.dispatch_next(&key);
        Some(outcome)
    }

    /// Forgets every pending write. Their settlements will be ignored.
    pub fn reset(&mut self) {
        if !self.lanes.is_empty() {
            debug!(lanes = self.lanes.len(), "Dropping pending writes");
        }
        self.lanes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::notice::Notice;
    use futures::FutureExt;
    use std::sync::Mutex;
    use tokio::sync::oneshot;

    /// Fake server: each write waits for the next queued gate.
    #[derive(Default)]
    struct GatedRemote {
        gates: Mutex<VecDeque<oneshot::Receiver<Result<i32, ApiError>>>>,
        sent: Mutex<Vec<i32>>,
    }

    impl GatedRemote {
        fn gate(&self) -> oneshot::Sender<Result<i32, ApiError>> {
            let (tx, rx) = oneshot::channel();
            self.gates.lock().unwrap().push_back(rx);
            tx
        }
    }

    struct Add(i32);

    impl Mutation for Add {
        type Key = &'static str;
        type State = i32;
        type Response = i32;
        type Remote = GatedRemote;

        fn key(&self) -> &'static str {
            "counter"
        }

        fn apply(&self, state: &i32) -> Option<i32> {
            Some(state + self.0)
        }

        fn send(
            &self,
            remote: Arc<GatedRemote>,
            attempted: &i32,
        ) -> BoxFuture<'static, Result<i32, ApiError>> {
            remote.sent.lock().unwrap().push(*attempted);
            let gate = remote.gates.lock().unwrap().pop_front();
            async move {
                match gate {
                    Some(rx) => rx.await.unwrap_or(Err(ApiError::NetworkError("dropped".into()))),
                    None => futures::future::pending().await,
                }
            }
            .boxed()
        }

        fn reconcile(&self, _attempted: &i32, response: i32) -> i32 {
            response
        }

        fn label(&self) -> String {
            "update counter".to_string()
        }
    }

    #[derive(Default)]
    struct Shown {
        value: i32,
        installs: Vec<i32>,
    }

    impl MutationTarget<&'static str, i32> for Shown {
        fn current(&self, _key: &&'static str) -> i32 {
            self.value
        }

        fn install(&mut self, _key: &&'static str, state: &i32) {
            self.value = *state;
            self.installs.push(*state);
        }
    }

    fn controller(
        remote: &Arc<GatedRemote>,
    ) -> (OptimisticMutationController<Add>, mpsc::Receiver<Notice>) {
        let (notifier, rx) = Notifier::channel();
        let timeout = Duration::from_secs(MUTATION_TIMEOUT_SECS);
        let ctrl = OptimisticMutationController::new(Arc::clone(remote), notifier, timeout);
        (ctrl, rx)
    }

    async fn settle_one(
        ctrl: &mut OptimisticMutationController<Add>,
        shown: &mut Shown,
    ) -> Settled<Add> {
        let settlement = ctrl.next_settlement().await.unwrap();
        ctrl.settle(settlement, shown).unwrap()
    }

    #[tokio::test]
    async fn test_success_adopts_canonical_value() {
        let remote = Arc::new(GatedRemote::default());
        let (mut ctrl, _notices) = controller(&remote);
        let mut shown = Shown { value: 10, ..Default::default() };

        let gate = remote.gate();
        assert!(ctrl.submit(Add(5), &mut shown));
        assert_eq!(shown.value, 15);
        assert_eq!(ctrl.in_flight(&"counter").unwrap().previous, 10);

        gate.send(Ok(16)).unwrap();
        assert!(settle_one(&mut ctrl, &mut shown).await.is_confirmed());
        assert_eq!(shown.value, 16);
        assert!(!ctrl.has_pending());
    }

    #[tokio::test]
    async fn test_failure_restores_previous_and_notifies() {
        let remote = Arc::new(GatedRemote::default());
        let (mut ctrl, mut notices) = controller(&remote);
        let mut shown = Shown { value: 10, ..Default::default() };

        let gate = remote.gate();
        ctrl.submit(Add(5), &mut shown);
        gate.send(Err(ApiError::Conflict("stale".into()))).unwrap();

        let settled = settle_one(&mut ctrl, &mut shown).await;
        assert!(!settled.is_confirmed());
        assert_eq!(shown.value, 10);
        assert_eq!(shown.installs, vec![15, 10]);
        assert!(notices.try_recv().unwrap().is_error());
        assert!(notices.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_queued_writes_dispatch_in_order_one_at_a_time() {
        let remote = Arc::new(GatedRemote::default());
        let (mut ctrl, _notices) = controller(&remote);
        let mut shown = Shown { value: 10, ..Default::default() };

        let first = remote.gate();
        let second = remote.gate();
        ctrl.submit(Add(1), &mut shown);
        ctrl.submit(Add(2), &mut shown);
        assert_eq!(shown.value, 13);
        assert_eq!(*remote.sent.lock().unwrap(), vec![11]);
        assert_eq!(ctrl.queued_len(&"counter"), 1);

        // Head fails: the queued change stays applied on the restored base
        first.send(Err(ApiError::ServerError("boom".into()))).unwrap();
        settle_one(&mut ctrl, &mut shown).await;
        assert_eq!(shown.value, 12);
        assert_eq!(*remote.sent.lock().unwrap(), vec![11, 12]);

        second.send(Ok(12)).unwrap();
        assert!(settle_one(&mut ctrl, &mut shown).await.is_confirmed());
        assert_eq!(shown.value, 12);
        assert!(!ctrl.has_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_rolls_back() {
        let remote = Arc::new(GatedRemote::default());
        let (mut ctrl, _notices) = controller(&remote);
        let mut shown = Shown { value: 1, ..Default::default() };

        // No gate: the write never answers
        ctrl.submit(Add(1), &mut shown);
        match settle_one(&mut ctrl, &mut shown).await {
            Settled::RolledBack { error, .. } => {
                assert_eq!(error, ApiError::Timeout(MUTATION_TIMEOUT_SECS))
            }
            Settled::Confirmed(_) => panic!("write should have timed out"),
        }
        assert_eq!(shown.value, 1);
    }

    #[tokio::test]
    async fn test_rebase_moves_rollback_point() {
        let remote = Arc::new(GatedRemote::default());
        let (mut ctrl, _notices) = controller(&remote);
        let mut shown = Shown { value: 10, ..Default::default() };

        let gate = remote.gate();
        ctrl.submit(Add(5), &mut shown);
        assert!(ctrl.rebase(&"counter", &mut shown, |base| *base = 100));
        assert_eq!(shown.value, 105);

        gate.send(Err(ApiError::NetworkError("down".into()))).unwrap();
        settle_one(&mut ctrl, &mut shown).await;
        assert_eq!(shown.value, 100);

        assert!(!ctrl.rebase(&"counter", &mut shown, |base| *base = 0));
        assert_eq!(shown.value, 100);
    }

    #[tokio::test]
    async fn test_auth_failure_requests_reauth() {
        let remote = Arc::new(GatedRemote::default());
        let (mut ctrl, mut notices) = controller(&remote);
        let mut shown = Shown::default();

        let gate = remote.gate();
        ctrl.submit(Add(1), &mut shown);
        gate.send(Err(ApiError::Unauthorized)).unwrap();
        settle_one(&mut ctrl, &mut shown).await;

        assert_eq!(shown.value, 0);
        assert!(notices.try_recv().unwrap().is_error());
        assert_eq!(notices.try_recv().unwrap(), Notice::ReauthRequired);
    }

    #[tokio::test]
    async fn test_reset_ignores_late_settlements() {
        let remote = Arc::new(GatedRemote::default());
        let (mut ctrl, _notices) = controller(&remote);
        let mut shown = Shown::default();

        let gate = remote.gate();
        ctrl.submit(Add(1), &mut shown);
        ctrl.reset();
        gate.send(Ok(1)).unwrap();

        let settlement = ctrl.next_settlement().await.unwrap();
        assert!(ctrl.settle(settlement, &mut shown).is_none());
        assert_eq!(shown.installs, vec![1]);
    }
}
