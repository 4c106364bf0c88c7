//! Bounded-concurrency task queue with grouped completion tracking.
//!
//! The Scheduler owns one FIFO of pending tasks drawn from every admitted
//! group. Dispatch pops the oldest task while fewer than `concurrency` tasks
//! are in flight. Tasks settle through their `SettleHook`, possibly
//! synchronously from inside `invoke` or later from another thread.
//!
//! No user callback is ever invoked while the state lock is held. The
//! dispatch loop is not reentrant: a settle that arrives while another frame
//! is dispatching only updates counters, and the active dispatcher picks up
//! the freed slot and performs the idle check when it exits.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::scheduler::group::{Group, OnComplete};
use crate::scheduler::task::{Dispatch, GroupId, SettleHook, SettleTarget, TaskKey};

/// Called when the scheduler becomes idle during a run
pub type AllSettled = Arc<dyn Fn() + Send + Sync>;

struct SchedulerState<T> {
    pending: VecDeque<TaskKey>,
    groups: HashMap<GroupId, Group<T>>,
    in_flight: HashSet<TaskKey>,
    next_group: u64,
    running: bool,
    paused: bool,
    dispatching: bool,
    completing: usize,
    on_all_settled: Option<AllSettled>,
}

impl<T> SchedulerState<T> {
    fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.in_flight.is_empty() && self.groups.is_empty()
    }

    /// Pop the next dispatchable task, if capacity and run state allow
    fn next_dispatch(&mut self, concurrency: usize) -> Option<Dispatch> {
        if !self.running || self.paused || self.in_flight.len() >= concurrency {
            return None;
        }
        while let Some(key) = self.pending.pop_front() {
            let Some(task) = self.groups.get_mut(&key.group).and_then(|g| g.task_mut(key.index)) else {
                continue;
            };
            if let Some(dispatch) = task.take_dispatch(key) {
                self.in_flight.insert(key);
                return Some(dispatch);
            }
        }
        None
    }

    /// The idle callback, if this is the idle transition of an active run
    fn take_idle_callback(&mut self) -> Option<AllSettled> {
        if !self.running || self.paused || self.completing > 0 || !self.is_idle() {
            return None;
        }
        self.running = false;
        self.on_all_settled.clone()
    }
}

struct Shared<T> {
    concurrency: usize,
    state: Mutex<SchedulerState<T>>,
    this: Weak<Shared<T>>,
}

impl<T: Send + Sync + 'static> Shared<T> {
    fn drain(&self) {
        {
            let mut state = self.state.lock();
            if state.dispatching {
                return;
            }
            state.dispatching = true;
        }

        loop {
            let next = {
                let mut state = self.state.lock();
                let next = state.next_dispatch(self.concurrency);
                if next.is_none() {
                    state.dispatching = false;
                    let idle = state.take_idle_callback();
                    drop(state);
                    if let Some(on_all_settled) = idle {
                        tracing::debug!("scheduler idle, run complete");
                        on_all_settled();
                    }
                    return;
                }
                next
            };

            if let Some(dispatch) = next {
                self.start(dispatch);
            }
        }
    }

    fn start(&self, dispatch: Dispatch) {
        let Dispatch {
            key,
            invoke,
            register_completion,
            args,
        } = dispatch;
        tracing::trace!(group = %key.group, index = key.index, "dispatching task");

        let target: Weak<dyn SettleTarget> = self.this.clone();
        register_completion(SettleHook::new(target, key));
        invoke(args);
    }

    fn settle(&self, key: TaskKey) {
        let completion: Option<(OnComplete<T>, Vec<Arc<T>>)> = {
            let mut state = self.state.lock();
            if !state.in_flight.remove(&key) {
                tracing::debug!(group = %key.group, index = key.index, "ignoring settle for task not in flight");
                return;
            }

            match state.groups.get_mut(&key.group) {
                Some(group) => {
                    if let Some(task) = group.task_mut(key.index) {
                        task.mark_settled();
                    }
                    let completion = group.notify_task_settled();
                    if completion.is_some() {
                        state.groups.remove(&key.group);
                        state.completing += 1;
                    }
                    completion
                }
                None => {
                    tracing::debug!(group = %key.group, index = key.index, "late settle for canceled group absorbed");
                    None
                }
            }
        };

        if let Some((on_complete, results)) = completion {
            tracing::debug!(group = %key.group, tasks = results.len(), "group complete");
            on_complete(results);
            self.state.lock().completing -= 1;
        }

        self.drain();
    }
}

impl<T: Send + Sync + 'static> SettleTarget for Shared<T> {
    fn task_settled(&self, key: TaskKey) {
        self.settle(key);
    }
}

/// Bounded-concurrency scheduler over groups of tasks
///
/// Cloning yields another handle to the same scheduler.
pub struct Scheduler<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Scheduler<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> Scheduler<T> {
    /// Create a scheduler admitting at most `concurrency` tasks at once
    ///
    /// A concurrency of zero is raised to one.
    pub fn new(concurrency: usize) -> Self {
        if concurrency == 0 {
            tracing::warn!("scheduler concurrency of 0 raised to 1");
        }
        let concurrency = concurrency.max(1);
        let shared = Arc::new_cyclic(|this| Shared {
            concurrency,
            state: Mutex::new(SchedulerState {
                pending: VecDeque::new(),
                groups: HashMap::new(),
                in_flight: HashSet::new(),
                next_group: 1,
                running: false,
                paused: false,
                dispatching: false,
                completing: 0,
                on_all_settled: None,
            }),
            this: this.clone(),
        });
        Self { shared }
    }

    /// Admit a group. Its tasks join the back of the pending queue in order.
    ///
    /// Nothing is dispatched until `run` (or `resume`), or until a slot
    /// frees up during an active run.
    pub fn enqueue(&self, group: Group<T>) -> GroupId {
        let mut state = self.shared.state.lock();
        let id = GroupId(state.next_group);
        state.next_group += 1;

        for index in 0..group.len() {
            state.pending.push_back(TaskKey { group: id, index });
        }
        tracing::debug!(group = %id, tasks = group.len(), pending = state.pending.len(), "group enqueued");
        state.groups.insert(id, group);
        id
    }

    /// Start dispatching; `on_all_settled` fires on the next idle transition
    ///
    /// Replaces any previously stored callback. If the scheduler is already
    /// idle and not paused, the callback fires immediately.
    pub fn run(&self, on_all_settled: impl Fn() + Send + Sync + 'static) {
        {
            let mut state = self.shared.state.lock();
            state.on_all_settled = Some(Arc::new(on_all_settled));
            state.running = true;
        }
        self.shared.drain();
    }

    /// Remove groups that have not finished
    ///
    /// Undispatched members are dropped from the queue; in-flight members
    /// keep running, and their settles release their slots without ever
    /// firing the group's callback. Returns how many groups were removed.
    pub fn cancel(&self, groups: &[GroupId]) -> usize {
        let canceled = {
            let mut state = self.shared.state.lock();
            let mut canceled = 0;
            for id in groups {
                if state.groups.remove(id).is_some() {
                    state.pending.retain(|key| key.group != *id);
                    canceled += 1;
                    tracing::debug!(group = %id, "group canceled");
                }
            }
            canceled
        };

        if canceled > 0 {
            self.shared.drain();
        }
        canceled
    }

    /// Stop dispatching new tasks. In-flight tasks are unaffected.
    pub fn pause(&self) {
        self.shared.state.lock().paused = true;
    }

    /// Resume dispatching with the stored idle callback. No-op unless paused.
    pub fn resume(&self) {
        {
            let mut state = self.shared.state.lock();
            if !state.paused {
                return;
            }
            state.paused = false;
            state.running = true;
        }
        self.shared.drain();
    }

    /// Number of tasks waiting to be dispatched
    pub fn len(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of tasks dispatched but not yet settled
    pub fn in_flight(&self) -> usize {
        self.shared.state.lock().in_flight.len()
    }

    /// Number of groups with unsettled members
    pub fn active_groups(&self) -> usize {
        self.shared.state.lock().groups.len()
    }

    /// Whether the group is still active
    pub fn contains(&self, group: GroupId) -> bool {
        self.shared.state.lock().groups.contains_key(&group)
    }

    /// No pending tasks, nothing in flight, no active groups
    pub fn is_idle(&self) -> bool {
        self.shared.state.lock().is_idle()
    }

    /// Whether a run is active (started and not yet settled)
    pub fn is_running(&self) -> bool {
        self.shared.state.lock().running
    }

    pub fn is_paused(&self) -> bool {
        self.shared.state.lock().paused
    }

    /// Maximum number of tasks in flight at once
    pub fn concurrency(&self) -> usize {
        self.shared.concurrency
    }
}

impl<T> fmt::Debug for Scheduler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Scheduler")
            .field("concurrency", &self.shared.concurrency)
            .field("pending", &state.pending.len())
            .field("in_flight", &state.in_flight.len())
            .field("active_groups", &state.groups.len())
            .field("running", &state.running)
            .field("paused", &state.paused)
            .finish()
    }
}
