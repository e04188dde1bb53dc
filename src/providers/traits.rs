use anyhow::Result;
use async_trait::async_trait;

use crate::task_manager::TaskManager;

/// Builds a component that needs async initialization.
///
/// # Example
///
/// ```no_run
/// use gpio_monitord::providers::traits::AsyncProvider;
///
/// struct FlagNameProvider;
///
/// #[async_trait::async_trait]
/// impl AsyncProvider<String> for FlagNameProvider {
///     async fn provide(&self) -> anyhow::Result<String> {
///         Ok("gpio_reload".to_string())
///     }
/// }
/// ```
#[async_trait]
pub trait AsyncProvider<T> {
    async fn provide(&self) -> Result<T>;
}

/// A daemon service started through the [`TaskManager`].
///
/// Services start in descending priority. A critical service failing to start
/// aborts startup; others are logged and skipped.
///
/// # Example
///
/// ```no_run
/// use gpio_monitord::providers::traits::ServiceProvider;
/// use gpio_monitord::task_manager::TaskManager;
/// use anyhow::Result;
///
/// struct IdleService;
///
/// #[async_trait::async_trait]
/// impl ServiceProvider for IdleService {
///     async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
///         task_manager.spawn_task("idle".to_string(), |token| async move {
///             token.cancelled().await;
///             Ok(())
///         }).await
///     }
///
///     fn name(&self) -> &'static str { "IdleService" }
/// }
/// ```
#[async_trait]
pub trait ServiceProvider: Send + Sync {
    /// Starts the service in TaskManager.
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()>;

    /// Returns service name for logging and management.
    fn name(&self) -> &'static str;

    /// Returns startup priority (higher numbers start first).
    fn priority(&self) -> i32 {
        0
    }

    /// Indicates if service is critical for system operation.
    fn is_critical(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    };

    struct CountingProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AsyncProvider<usize> for CountingProvider {
        async fn provide(&self) -> Result<usize> {
            Ok(self.calls.fetch_add(1, Ordering::SeqCst) + 1)
        }
    }

    struct WaitingService {
        ran: Arc<AtomicBool>,
    }

    #[async_trait]
    impl ServiceProvider for WaitingService {
        async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
            let ran = self.ran.clone();
            task_manager
                .spawn_task(self.name().to_string(), |token| async move {
                    token.cancelled().await;
                    ran.store(true, Ordering::SeqCst);
                    Ok(())
                })
                .await
        }

        fn name(&self) -> &'static str {
            "WaitingService"
        }
    }

    struct BrokenService;

    #[async_trait]
    impl ServiceProvider for BrokenService {
        async fn start(&self, _task_manager: &mut TaskManager) -> Result<()> {
            Err(anyhow!("cannot start"))
        }

        fn name(&self) -> &'static str {
            "BrokenService"
        }

        fn priority(&self) -> i32 {
            7
        }

        fn is_critical(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn provider_is_called_each_time() {
        let provider = CountingProvider {
            calls: AtomicUsize::new(0),
        };

        assert_eq!(provider.provide().await.unwrap(), 1);
        assert_eq!(provider.provide().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn service_defaults() {
        let service = WaitingService {
            ran: Arc::default(),
        };
        assert_eq!(service.priority(), 0);
        assert!(!service.is_critical());
    }

    #[tokio::test]
    async fn started_service_runs_until_shutdown() {
        let mut task_manager = TaskManager::new();
        let ran = Arc::new(AtomicBool::new(false));
        let service = WaitingService { ran: ran.clone() };

        service.start(&mut task_manager).await.unwrap();
        assert!(task_manager.is_running("WaitingService"));
        assert!(!ran.load(Ordering::SeqCst));

        task_manager.shutdown_all().await.unwrap();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn failing_start_is_reported() {
        let mut task_manager = TaskManager::new();
        let services: Vec<Box<dyn ServiceProvider>> = vec![Box::new(BrokenService)];

        for service in &services {
            let err = service.start(&mut task_manager).await.unwrap_err();
            assert_eq!(err.to_string(), "cannot start");
            assert!(service.is_critical());
        }
        assert_eq!(task_manager.active_count(), 0);
    }
}
