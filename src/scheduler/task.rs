//! Tasks: one unit of schedulable work plus its completion hook.

use std::fmt;
use std::sync::{Arc, Weak};

use serde_json::Value;

/// Starts the underlying work with the task's arguments. Must return immediately.
pub type Invoke = Box<dyn FnOnce(Vec<Value>) + Send>;

/// Arranges for the given hook to be settled when the work finishes.
pub type RegisterCompletion = Box<dyn FnOnce(SettleHook) + Send>;

/// Identifies a group admitted to a scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(pub(crate) u64);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group-{}", self.0)
    }
}

/// Position of a task: its group and its index within that group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskKey {
    pub group: GroupId,
    pub index: usize,
}

/// Lifecycle of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Waiting in the pending queue
    Pending,
    /// Invoked, not yet settled
    Dispatched,
    /// Completion signalled; terminal
    Settled,
}

/// Receiver of settle notifications
pub(crate) trait SettleTarget: Send + Sync {
    fn task_settled(&self, key: TaskKey);
}

/// Handle passed to `register_completion`; settling it marks the task done
///
/// Cloning is cheap. Settling more than once, or after the scheduler is
/// gone, has no effect.
#[derive(Clone)]
pub struct SettleHook {
    target: Weak<dyn SettleTarget>,
    key: TaskKey,
}

impl SettleHook {
    pub(crate) fn new(target: Weak<dyn SettleTarget>, key: TaskKey) -> Self {
        Self { target, key }
    }

    /// Key of the task this hook settles
    pub fn key(&self) -> TaskKey {
        self.key
    }

    /// Report that the task's work has finished
    pub fn settle(&self) {
        match self.target.upgrade() {
            Some(target) => target.task_settled(self.key),
            None => tracing::debug!(group = %self.key.group, index = self.key.index, "settle after scheduler dropped"),
        }
    }
}

impl fmt::Debug for SettleHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettleHook").field("key", &self.key).finish()
    }
}

/// Everything needed to start a task, taken out of it at dispatch
pub(crate) struct Dispatch {
    pub key: TaskKey,
    pub invoke: Invoke,
    pub register_completion: RegisterCompletion,
    pub args: Vec<Value>,
}

/// One schedulable unit of work
pub struct Task<T> {
    item: Arc<T>,
    args: Vec<Value>,
    invoke: Option<Invoke>,
    register_completion: Option<RegisterCompletion>,
    state: TaskState,
}

impl<T> Task<T> {
    /// Create a task for `item`
    ///
    /// `invoke` receives `args` when the task is dispatched. `register_completion`
    /// is called just before `invoke` with the hook to settle.
    pub fn new(
        item: Arc<T>,
        args: Vec<Value>,
        invoke: impl FnOnce(Vec<Value>) + Send + 'static,
        register_completion: impl FnOnce(SettleHook) + Send + 'static,
    ) -> Self {
        Self {
            item,
            args,
            invoke: Some(Box::new(invoke)),
            register_completion: Some(Box::new(register_completion)),
            state: TaskState::Pending,
        }
    }

    /// The item reported in the group result
    pub fn item(&self) -> &Arc<T> {
        &self.item
    }

    /// Arguments passed to `invoke`
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn is_completed(&self) -> bool {
        self.state == TaskState::Settled
    }

    /// Take the closures out for dispatch. None if already dispatched.
    pub(crate) fn take_dispatch(&mut self, key: TaskKey) -> Option<Dispatch> {
        if self.state != TaskState::Pending {
            return None;
        }
        let invoke = self.invoke.take()?;
        let register_completion = self.register_completion.take()?;
        self.state = TaskState::Dispatched;
        Some(Dispatch {
            key,
            invoke,
            register_completion,
            args: self.args.clone(),
        })
    }

    /// Mark the task settled. False if it was not in flight.
    pub(crate) fn mark_settled(&mut self) -> bool {
        if self.state != TaskState::Dispatched {
            return false;
        }
        self.state = TaskState::Settled;
        true
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("args", &self.args)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop_task(args: Vec<Value>) -> Task<&'static str> {
        Task::new(Arc::new("item"), args, |_| {}, |_| {})
    }

    fn key() -> TaskKey {
        TaskKey {
            group: GroupId(1),
            index: 0,
        }
    }

    #[test]
    fn test_task_new_is_pending() {
        let task = noop_task(vec![json!("http://localhost/a")]);
        assert_eq!(task.state(), TaskState::Pending);
        assert!(!task.is_completed());
        assert_eq!(task.args(), &[json!("http://localhost/a")]);
        assert_eq!(**task.item(), "item");
    }

    #[test]
    fn test_take_dispatch_once() {
        let mut task = noop_task(vec![json!(1)]);

        let dispatch = task.take_dispatch(key()).unwrap();
        assert_eq!(dispatch.args, vec![json!(1)]);
        assert_eq!(task.state(), TaskState::Dispatched);

        assert!(task.take_dispatch(key()).is_none());
    }

    #[test]
    fn test_mark_settled_requires_dispatch() {
        let mut task = noop_task(vec![]);
        assert!(!task.mark_settled());

        task.take_dispatch(key()).unwrap();
        assert!(task.mark_settled());
        assert!(task.is_completed());
        assert!(!task.mark_settled());
    }

    #[test]
    fn test_settle_hook_without_scheduler_is_harmless() {
        let target: Weak<dyn SettleTarget> = Weak::<Noop>::new();
        let hook = SettleHook::new(target, key());
        hook.settle();
        assert_eq!(hook.key(), key());
    }

    struct Noop;

    impl SettleTarget for Noop {
        fn task_settled(&self, _key: TaskKey) {}
    }

    #[test]
    fn test_group_id_display() {
        assert_eq!(GroupId(7).to_string(), "group-7");
    }
}
