use crate::task::Task;
use crossbeam_skiplist::SkipMap;
use nts_shared::{NtsError, Options, TaskId};
use std::cell::RefCell;
use std::path::PathBuf;
use std::sync::Arc;

thread_local! {
    /// The task a request handler is currently operating against. A thread-local, not a
    /// process-wide static: each worker thread threads its own current task through request
    /// handling, per Design Note §9 ("no process-wide singletons").
    static CURRENT_TASK_ID: RefCell<Option<TaskId>> = const { RefCell::new(None) };
}

/// Thread-safe `taskId → Task` map. Creates a task lazily on first reference; reactivates a
/// persistent task's Journal Store from disk on first reference after process start.
pub struct TaskContextRegistry {
    tasks: SkipMap<TaskId, Arc<Task>>,
    options: Arc<Options>,
}

impl TaskContextRegistry {
    pub fn new(options: Arc<Options>) -> TaskContextRegistry {
        TaskContextRegistry { tasks: SkipMap::new(), options }
    }

    pub fn set_current(&self, task_id: TaskId) {
        CURRENT_TASK_ID.with(|cell| *cell.borrow_mut() = Some(task_id));
    }

    /// Resolves the calling thread's current task, defaulting to the ephemeral `"default"` task
    /// and creating it if this is the first reference.
    pub fn current(&self) -> Result<Arc<Task>, NtsError> {
        let task_id = CURRENT_TASK_ID.with(|cell| cell.borrow().clone()).unwrap_or_else(TaskId::default_task);
        self.get_or_create(task_id)
    }

    pub fn get_or_create(&self, task_id: TaskId) -> Result<Arc<Task>, NtsError> {
        if let Some(entry) = self.tasks.get(&task_id) {
            entry.value().touch_activity();
            return Ok(entry.value().clone());
        }

        let working_directory = self.working_directory_for(&task_id);
        let task = Arc::new(if task_id.is_default() {
            Task::create_ephemeral(task_id.clone(), working_directory, self.options.clone())?
        } else {
            Task::open_persistent(task_id.clone(), working_directory, self.options.clone())?
        });

        self.tasks.insert(task_id, task.clone());
        Ok(task)
    }

    /// Destroys the in-memory task. `delete_on_disk` additionally removes its journal directory;
    /// `false` leaves it reactivatable on next reference.
    pub fn reset(&self, task_id: &TaskId, delete_on_disk: bool) -> Result<(), NtsError> {
        self.tasks.remove(task_id);
        if delete_on_disk && !task_id.is_default() {
            let task_dir = self.options.state_root.join("tasks").join(task_id.as_str());
            if task_dir.exists() {
                std::fs::remove_dir_all(&task_dir)?;
            }
        }
        Ok(())
    }

    fn working_directory_for(&self, task_id: &TaskId) -> PathBuf {
        if task_id.is_default() {
            std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
        } else {
            self.options.state_root.join("tasks").join(task_id.as_str()).join("workdir")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn options_in(dir: &std::path::Path) -> Arc<Options> {
        Arc::new(nts_shared::start_options_builder().state_root(dir.to_path_buf()).build())
    }

    #[test]
    fn current_defaults_to_ephemeral_default_task() {
        let dir = tempdir().unwrap();
        let registry = TaskContextRegistry::new(options_in(dir.path()));
        let task = registry.current().unwrap();
        assert_eq!(task.id.as_str(), "default");
    }

    #[test]
    fn get_or_create_reuses_same_task_instance() {
        let dir = tempdir().unwrap();
        let registry = TaskContextRegistry::new(options_in(dir.path()));
        let first = registry.get_or_create(TaskId::new("alpha")).unwrap();
        let second = registry.get_or_create(TaskId::new("alpha")).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn reset_removes_task_from_registry() {
        let dir = tempdir().unwrap();
        let registry = TaskContextRegistry::new(options_in(dir.path()));
        let task_id = TaskId::new("beta");
        registry.get_or_create(task_id.clone()).unwrap();
        registry.reset(&task_id, false).unwrap();

        let recreated = registry.get_or_create(task_id).unwrap();
        assert_eq!(Arc::strong_count(&recreated), 1);
    }
}
