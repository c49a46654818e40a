//! Background operations, at most one in flight per resource.

use crate::error::RemoteError;
use smbdoc_types::ResourceKey;
use std::collections::HashMap;
use std::io;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::sync::{Semaphore, watch};
use tokio_util::sync::CancellationToken;

/// Progress of a background operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Waiting for a worker.
    Pending,

    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed | TaskState::Cancelled
        )
    }
}

/// Final status reported by a [Completion].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Succeeded,
    Failed,
    Cancelled,
}

/// Reported once to the requester of a background operation.
#[derive(Debug)]
pub struct Completion<T> {
    pub status: TaskStatus,
    pub item: Option<T>,
    pub error: Option<RemoteError>,
}

/// Completion callback. Called from a worker thread.
pub type Callback<T> = Box<dyn FnOnce(Completion<T>) + Send>;

/// What running an [Operation] produced.
#[derive(Debug)]
pub enum Outcome<T> {
    Succeeded(T),
    Failed(RemoteError),

    /// Cancelled, possibly with a result obtained before the
    /// cancellation was noticed.
    Cancelled(Option<T>),
}

impl<T> Outcome<T> {
    /// Turn the outcome into a cancellation, keeping any result.
    fn into_cancelled(self) -> Self {
        match self {
            Outcome::Succeeded(v) => Outcome::Cancelled(Some(v)),
            Outcome::Failed(_) => Outcome::Cancelled(None),
            cancelled => cancelled,
        }
    }

    fn state(&self) -> TaskState {
        match self {
            Outcome::Succeeded(_) => TaskState::Succeeded,
            Outcome::Failed(_) => TaskState::Failed,
            Outcome::Cancelled(_) => TaskState::Cancelled,
        }
    }

    /// Build the completion that reports this outcome, with `item`
    /// as payload.
    pub fn completion<I>(&self, item: I) -> Completion<I> {
        let (status, error) = match self {
            Outcome::Succeeded(_) => (TaskStatus::Succeeded, None),
            Outcome::Failed(err) => (TaskStatus::Failed, Some(err.clone())),
            Outcome::Cancelled(_) => (TaskStatus::Cancelled, None),
        };

        Completion {
            status,
            item: Some(item),
            error,
        }
    }

    /// Build the completion that reports this outcome, with the
    /// result, if any, as payload.
    pub fn into_completion(self) -> Completion<T> {
        match self {
            Outcome::Succeeded(v) => Completion {
                status: TaskStatus::Succeeded,
                item: Some(v),
                error: None,
            },
            Outcome::Failed(err) => Completion {
                status: TaskStatus::Failed,
                item: None,
                error: Some(err),
            },
            Outcome::Cancelled(v) => Completion {
                status: TaskStatus::Cancelled,
                item: v,
                error: None,
            },
        }
    }
}

/// A blocking background operation.
///
/// All three steps execute on a worker thread, in order:
/// [Operation::run] does the work and may block on remote calls,
/// [Operation::merge] stores the outcome where others can see it,
/// and [Operation::finish] tells the requester. The task is marked
/// finished between merge and finish, so a requester reacting to
/// finish can submit a new operation for the same key.
pub trait Operation: Send + 'static {
    type Output: Send + 'static;

    /// Do the work. Cancellation is cooperative: check `cancel`
    /// between steps.
    fn run(&mut self, cancel: &CancellationToken) -> Outcome<Self::Output>;

    fn merge(&mut self, _outcome: &Outcome<Self::Output>) {}

    /// Report the outcome. Always called, even if [Operation::run]
    /// panicked or never ran.
    fn finish(self, outcome: Outcome<Self::Output>);
}

/// Follow and cancel a submitted operation.
#[derive(Clone, Debug)]
pub struct TaskHandle {
    cancel: CancellationToken,
    state: watch::Receiver<TaskState>,
}

impl TaskHandle {
    /// Ask the operation to stop. Calls in progress complete anyway.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn state(&self) -> TaskState {
        *self.state.borrow()
    }

    /// True once the operation has run and its outcome was merged.
    pub fn is_finished(&self) -> bool {
        self.state().is_finished()
    }

    /// Wait for the operation to finish and return its final state.
    ///
    /// This may return before the requester was told, by
    /// [Operation::finish], but never before the outcome was merged.
    pub async fn finished(&self) -> TaskState {
        let mut state = self.state.clone();
        match state.wait_for(TaskState::is_finished).await {
            Ok(s) => *s,
            // The task is gone, most likely with its runtime.
            Err(_) => self.state(),
        }
    }
}

/// Result of [TaskCoordinator::run_task].
#[derive(Clone, Debug)]
pub enum Submission {
    Started(TaskHandle),

    /// An operation for the same key was already in flight. The
    /// request was dropped; this is the handle of the one in flight.
    Coalesced(TaskHandle),
}

impl Submission {
    pub fn is_started(&self) -> bool {
        matches!(self, Submission::Started(_))
    }

    pub fn handle(&self) -> &TaskHandle {
        match self {
            Submission::Started(h) | Submission::Coalesced(h) => h,
        }
    }

    pub fn into_handle(self) -> TaskHandle {
        match self {
            Submission::Started(h) | Submission::Coalesced(h) => h,
        }
    }
}

type Slots = Arc<Mutex<HashMap<ResourceKey, TaskHandle>>>;

/// Runs operations on a runtime's blocking pool, coalescing requests
/// for the same resource.
pub struct TaskCoordinator {
    rt: Handle,
    workers: Option<Arc<Semaphore>>,

    /// Operations in flight, by key. Entries are removed once
    /// finished.
    tasks: Slots,
}

impl TaskCoordinator {
    /// Create a coordinator that runs at most `max_workers`
    /// operations at a time on `rt`. Others wait for their turn.
    ///
    /// A `max_workers` of 0 means no limit.
    pub fn new(rt: Handle, max_workers: usize) -> Self {
        let workers = if max_workers > 0 {
            Some(Arc::new(Semaphore::new(max_workers)))
        } else {
            None
        };

        Self {
            rt,
            workers,
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Run `op` for `key`, unless an operation for `key` is already
    /// in flight.
    ///
    /// A dropped request is reported as [Submission::Coalesced]; the
    /// operation in flight reports through its own callback.
    pub fn run_task<O: Operation>(&self, key: &ResourceKey, op: O) -> Submission {
        let mut tasks = self.tasks.lock().unwrap();
        if let Some(task) = tasks.get(key).filter(|t| !t.is_finished()) {
            log::info!("{key}: already being loaded, request dropped");
            return Submission::Coalesced(task.clone());
        }
        let task = self.spawn(op, Some((Arc::clone(&self.tasks), key.clone())));
        tasks.insert(key.clone(), task.clone());

        Submission::Started(task)
    }

    /// Run `op`, whatever else is in flight.
    pub fn run_detached<O: Operation>(&self, op: O) -> TaskHandle {
        self.spawn(op, None)
    }

    /// Check whether an operation for `key` is in flight.
    pub fn is_busy(&self, key: &ResourceKey) -> bool {
        self.tasks
            .lock()
            .unwrap()
            .get(key)
            .is_some_and(|t| !t.is_finished())
    }

    /// Cancel the operation in flight for `key`, if any.
    pub fn cancel(&self, key: &ResourceKey) {
        if let Some(task) = self.tasks.lock().unwrap().get(key) {
            task.cancel();
        }
    }

    fn spawn<O: Operation>(&self, mut op: O, slot: Option<(Slots, ResourceKey)>) -> TaskHandle {
        let cancel = CancellationToken::new();
        let (tx, rx) = watch::channel(TaskState::Pending);
        let tx = Arc::new(tx);
        let workers = self.workers.clone();
        let rt = self.rt.clone();
        self.rt.spawn({
            let cancel = cancel.clone();
            async move {
                let _permit = match workers {
                    Some(workers) => workers.acquire_owned().await.ok(),
                    None => None,
                };
                let result = rt
                    .spawn_blocking({
                        let tx = Arc::clone(&tx);
                        move || {
                            let outcome = if cancel.is_cancelled() {
                                Outcome::Cancelled(None)
                            } else {
                                tx.send_replace(TaskState::Running);
                                let outcome = run_guarded(&mut op, &cancel);
                                if cancel.is_cancelled() {
                                    outcome.into_cancelled()
                                } else {
                                    outcome
                                }
                            };
                            op.merge(&outcome);
                            let state = outcome.state();
                            log::debug!("background operation {state:?}");
                            tx.send_replace(state);
                            if let Some((tasks, key)) = slot {
                                release_slot(&tasks, &key);
                            }
                            op.finish(outcome);
                        }
                    })
                    .await;
                if let Err(err) = result {
                    log::warn!("background operation failed: {err}");
                    if !tx.borrow().is_finished() {
                        tx.send_replace(TaskState::Failed);
                    }
                }
            }
        });

        TaskHandle { cancel, state: rx }
    }
}

/// Run `op`, turning a panic into a failure.
fn run_guarded<O: Operation>(op: &mut O, cancel: &CancellationToken) -> Outcome<O::Output> {
    match std::panic::catch_unwind(AssertUnwindSafe(|| op.run(cancel))) {
        Ok(outcome) => outcome,
        Err(_) => {
            log::warn!("background operation panicked");
            Outcome::Failed(RemoteError::io(
                io::ErrorKind::Other,
                "background operation panicked",
            ))
        }
    }
}

/// Forget the finished operation of `key`, if it is still recorded.
fn release_slot(tasks: &Slots, key: &ResourceKey) {
    let mut tasks = tasks.lock().unwrap();
    if tasks.get(key).is_some_and(|t| t.is_finished()) {
        tasks.remove(key);
    }
}
