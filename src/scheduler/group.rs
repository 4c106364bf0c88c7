//! Groups: tasks sharing one completion callback.
//!
//! The callback fires once, when every member has settled, with the member
//! items in the order the tasks were added (never completion order).

use std::fmt;
use std::sync::Arc;

use crate::error::{LoaderError, Result};
use crate::scheduler::task::Task;

/// Called with the group's items in construction order
pub type OnComplete<T> = Box<dyn FnOnce(Vec<Arc<T>>) + Send>;

/// A fixed set of tasks with a shared completion callback
pub struct Group<T> {
    tasks: Vec<Task<T>>,
    done: usize,
    on_complete: Option<OnComplete<T>>,
}

impl<T> Group<T> {
    /// Create a group. Fails with `InvalidGroup` when `tasks` is empty.
    pub fn new(tasks: Vec<Task<T>>, on_complete: impl FnOnce(Vec<Arc<T>>) + Send + 'static) -> Result<Self> {
        if tasks.is_empty() {
            return Err(LoaderError::InvalidGroup("group needs at least one task".to_string()));
        }
        Ok(Self {
            tasks,
            done: 0,
            on_complete: Some(Box::new(on_complete)),
        })
    }

    /// Number of member tasks
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Always false; empty groups cannot be constructed
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Number of members settled so far
    pub fn done_count(&self) -> usize {
        self.done
    }

    pub fn is_complete(&self) -> bool {
        self.done == self.tasks.len()
    }

    pub fn tasks(&self) -> &[Task<T>] {
        &self.tasks
    }

    pub(crate) fn task_mut(&mut self, index: usize) -> Option<&mut Task<T>> {
        self.tasks.get_mut(index)
    }

    /// Count one settled member
    ///
    /// Returns the callback and ordered results when this settle completes
    /// the group. The callback is handed out at most once.
    pub(crate) fn notify_task_settled(&mut self) -> Option<(OnComplete<T>, Vec<Arc<T>>)> {
        if self.done < self.tasks.len() {
            self.done += 1;
        }
        if !self.is_complete() {
            return None;
        }
        let on_complete = self.on_complete.take()?;
        let results = self.tasks.iter().map(|t| t.item().clone()).collect();
        Some((on_complete, results))
    }
}

impl<T> fmt::Debug for Group<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Group")
            .field("tasks", &self.tasks.len())
            .field("done", &self.done)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(name: &'static str) -> Task<&'static str> {
        Task::new(Arc::new(name), vec![], |_| {}, |_| {})
    }

    #[test]
    fn test_empty_group_rejected() {
        let result = Group::<&'static str>::new(vec![], |_| {});
        assert!(matches!(result, Err(LoaderError::InvalidGroup(_))));
    }

    #[test]
    fn test_group_completes_after_all_members() {
        let mut group = Group::new(vec![task("a"), task("b")], |_| {}).unwrap();
        assert_eq!(group.len(), 2);
        assert!(!group.is_empty());

        assert!(group.notify_task_settled().is_none());
        assert_eq!(group.done_count(), 1);

        let (_, results) = group.notify_task_settled().unwrap();
        assert!(group.is_complete());
        let names: Vec<&str> = results.iter().map(|r| **r).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_callback_handed_out_once() {
        let mut group = Group::new(vec![task("only")], |_| {}).unwrap();
        assert!(group.notify_task_settled().is_some());
        assert!(group.notify_task_settled().is_none());
        assert_eq!(group.done_count(), 1);
    }
}
