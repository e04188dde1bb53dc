//! Task management for async service lifecycle.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{error, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Time each task gets to finish after cancellation.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Tracks the daemon's background tasks under one root cancellation token.
pub struct TaskManager {
    tasks: HashMap<String, JoinHandle<Result<()>>>,
    global_token: CancellationToken,
    shutdown_timeout: Duration,
}

impl TaskManager {
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
            global_token: CancellationToken::new(),
            shutdown_timeout: SHUTDOWN_TIMEOUT,
        }
    }

    /// Spawns and registers a task with the given name.
    ///
    /// The task receives a child of the root token and is expected to return
    /// once it is cancelled.
    pub async fn spawn_task<F, Fut>(&mut self, name: String, task_fn: F) -> Result<()>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        if self.tasks.contains_key(&name) {
            anyhow::bail!("Task '{name}' is already running");
        }

        let task_token = self.global_token.child_token();
        let task_name = name.clone();

        let handle = tokio::spawn(async move {
            info!("Starting task: {task_name}");
            let result = task_fn(task_token).await;
            match &result {
                Ok(()) => info!("Task '{task_name}' completed successfully"),
                Err(e) => error!("Task '{task_name}' failed: {e:#}"),
            }
            result
        });

        self.tasks.insert(name.clone(), handle);
        info!("Task '{name}' spawned");
        Ok(())
    }

    /// Cancels every task and waits for them to finish.
    ///
    /// Returns the first error encountered, if any.
    pub async fn shutdown_all(&mut self) -> Result<()> {
        info!("Stopping all {} tasks", self.tasks.len());

        self.global_token.cancel();

        let mut first_error = None;
        for (name, handle) in self.tasks.drain() {
            let error = match tokio::time::timeout(self.shutdown_timeout, handle).await {
                Ok(Ok(Ok(()))) => continue,
                Ok(Ok(Err(e))) => {
                    warn!("Task '{name}' failed during shutdown: {e}");
                    e
                }
                Ok(Err(e)) => anyhow::anyhow!("Task '{name}' panicked: {e}"),
                Err(_) => anyhow::anyhow!("Task '{name}' shutdown timeout exceeded"),
            };
            error!("{error}");
            first_error.get_or_insert(error);
        }

        if let Some(error) = first_error {
            Err(error).context("One or more tasks failed during shutdown")
        } else {
            info!("All tasks stopped");
            Ok(())
        }
    }

    pub fn active_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.tasks
            .get(name)
            .is_some_and(|handle| !handle.is_finished())
    }

    #[cfg(test)]
    fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[tokio::test]
    async fn spawned_tasks_stop_on_shutdown() {
        let mut manager = TaskManager::new();
        for name in ["a", "b"] {
            manager
                .spawn_task(name.to_string(), |token| async move {
                    token.cancelled().await;
                    Ok(())
                })
                .await
                .unwrap();
        }

        assert_eq!(manager.active_count(), 2);
        assert!(manager.is_running("a"));

        manager.shutdown_all().await.unwrap();
        assert_eq!(manager.active_count(), 0);
    }

    #[tokio::test]
    async fn duplicate_names_are_rejected() {
        let mut manager = TaskManager::new();
        let idle = |token: CancellationToken| async move {
            token.cancelled().await;
            Ok(())
        };

        manager.spawn_task("svc".into(), idle).await.unwrap();
        assert!(manager.spawn_task("svc".into(), idle).await.is_err());
        manager.shutdown_all().await.unwrap();
    }

    #[tokio::test]
    async fn task_errors_surface_at_shutdown() {
        let mut manager = TaskManager::new();
        manager
            .spawn_task("failing".into(), |_| async { Err(anyhow!("broken")) })
            .await
            .unwrap();

        let err = manager.shutdown_all().await.unwrap_err();
        assert!(format!("{err:#}").contains("broken"));
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_task_times_out() {
        let mut manager = TaskManager::new().with_shutdown_timeout(Duration::from_millis(50));
        manager
            .spawn_task("stuck".into(), |_| async {
                std::future::pending::<()>().await;
                Ok(())
            })
            .await
            .unwrap();

        let err = manager.shutdown_all().await.unwrap_err();
        assert!(format!("{err:#}").contains("timeout"));
    }
}
