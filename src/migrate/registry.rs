/// Queue of tasks waiting for a scheduler
///
/// The synchronous CLI path never goes through here; it exists so a
/// long-running service can accept tasks and hand them to the orchestrator
/// one at a time.
use std::collections::VecDeque;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{MigrateError, MigrateResult};
use crate::models::{MigrationTask, TaskStatus};

#[derive(Debug, Default)]
pub struct PendingTaskRegistry {
    tasks: RwLock<VecDeque<MigrationTask>>,
}

impl PendingTaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pending task; ids must be unique within the registry
    pub async fn enqueue(&self, task: MigrationTask) -> MigrateResult<()> {
        if task.status != TaskStatus::Pending {
            return Err(MigrateError::invalid_task(format!(
                "task {} is {}, only pending tasks can be queued",
                task.id, task.status
            )));
        }

        let mut tasks = self.tasks.write().await;
        if tasks.iter().any(|t| t.id == task.id) {
            return Err(MigrateError::invalid_task(format!(
                "task {} is already queued",
                task.id
            )));
        }
        debug!(task = %task.id, from = task.from_slot, to = task.to_slot, "Queued migration task");
        tasks.push_back(task);
        Ok(())
    }

    pub async fn find(&self, id: &str) -> Option<MigrationTask> {
        self.tasks.read().await.iter().find(|t| t.id == id).cloned()
    }

    /// Remove a task only while it is still pending
    pub async fn remove_if_pending(&self, id: &str) -> bool {
        let mut tasks = self.tasks.write().await;
        match tasks
            .iter()
            .position(|t| t.id == id && t.status == TaskStatus::Pending)
        {
            Some(pos) => {
                tasks.remove(pos);
                debug!(task = id, "Removed pending task");
                true
            }
            None => false,
        }
    }

    /// Take the oldest pending task
    pub async fn pop_pending(&self) -> Option<MigrationTask> {
        let mut tasks = self.tasks.write().await;
        let pos = tasks.iter().position(|t| t.status == TaskStatus::Pending)?;
        tasks.remove(pos)
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }

    /// Copy of the queue in order
    pub async fn snapshot(&self) -> Vec<MigrationTask> {
        self.tasks.read().await.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_fifo_order() {
        let registry = PendingTaskRegistry::new();
        let first = MigrationTask::new(0, 3, 1, 0).unwrap();
        let second = MigrationTask::new(4, 7, 2, 0).unwrap();
        let (first_id, second_id) = (first.id.clone(), second.id.clone());

        registry.enqueue(first).await.unwrap();
        registry.enqueue(second).await.unwrap();
        assert_eq!(registry.len().await, 2);

        let ids: Vec<_> = registry.snapshot().await.into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![first_id.clone(), second_id.clone()]);

        assert_eq!(registry.pop_pending().await.unwrap().id, first_id);
        assert_eq!(registry.pop_pending().await.unwrap().id, second_id);
        assert!(registry.pop_pending().await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_find_and_remove() {
        let registry = PendingTaskRegistry::new();
        let task = MigrationTask::new(0, 0, 1, 0).unwrap();
        let id = task.id.clone();
        registry.enqueue(task).await.unwrap();

        assert_eq!(registry.find(&id).await.unwrap().to_slot, 0);
        assert!(registry.find("missing").await.is_none());

        assert!(registry.remove_if_pending(&id).await);
        assert!(!registry.remove_if_pending(&id).await);
    }

    #[tokio::test]
    async fn test_only_pending_tasks_accepted() {
        let registry = PendingTaskRegistry::new();
        let mut task = MigrationTask::new(0, 0, 1, 0).unwrap();
        assert_ok!(registry.enqueue(task.clone()).await);
        assert_err!(registry.enqueue(task.clone()).await);

        task.id = "other".to_string();
        task.status = TaskStatus::Finished;
        assert_err!(registry.enqueue(task).await);
        assert_eq!(registry.len().await, 1);
    }
}
