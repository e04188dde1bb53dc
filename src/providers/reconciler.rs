use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::{
    app_context::AppState,
    dispatch::EventDispatcher,
    event::EventBus,
    providers::traits::ServiceProvider,
    reconcile::Reconciler,
    task_manager::TaskManager,
};

/// Runs the reconciliation loop.
///
/// - **Priority**: 10 (highest)
/// - **Critical**: Yes, the daemon has nothing to do without it
pub struct ReconcilerServiceProvider {
    state: Arc<AppState>,
    event_bus: EventBus,
}

impl ReconcilerServiceProvider {
    pub fn new(state: Arc<AppState>, event_bus: EventBus) -> Self {
        Self { state, event_bus }
    }

    async fn build(&self) -> Reconciler {
        let settings = self.state.config().await.reconciler_settings();
        let dispatcher = EventDispatcher::new(self.state.executor.clone())
            .with_event_bus(self.event_bus.clone());

        Reconciler::new(
            self.state.store.clone(),
            self.state.flags.clone(),
            self.state.factory.clone(),
            dispatcher,
            settings,
        )
        .with_event_bus(self.event_bus.clone())
    }
}

#[async_trait]
impl ServiceProvider for ReconcilerServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let mut reconciler = self.build().await;

        task_manager
            .spawn_task(self.name().to_string(), |cancel_token| async move {
                reconciler.run(&cancel_token).await;
                Ok(())
            })
            .await
    }

    fn name(&self) -> &'static str {
        "ReconcilerService"
    }

    fn priority(&self) -> i32 {
        10
    }

    fn is_critical(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        binding::{ActionSet, ButtonBinding, Status},
        config::{Config, ConfigManager},
        dispatch::LogExecutor,
        event::Event,
        gpio::MockFactory,
        signal::MemoryFlagStore,
        store::{ConfigurationStore, MemoryStore},
    };
    use std::time::Duration;

    #[tokio::test]
    async fn service_binds_rows_and_releases_on_shutdown() {
        let row = ButtonBinding {
            enabled: true,
            actions: ActionSet {
                on_press: vec!["play".into()],
                ..ActionSet::default()
            },
            ..ButtonBinding::new(17)
        };
        let store = Arc::new(MemoryStore::with_rows([row]));
        let factory = MockFactory::new();
        let state = Arc::new(AppState::from_parts(
            ConfigManager::new(Config::default(), None),
            store.clone(),
            Arc::new(MemoryFlagStore::new()),
            Arc::new(factory.clone()),
            Arc::new(LogExecutor),
        ));
        let bus = EventBus::new();
        let mut events = bus.subscribe();
        let provider = ReconcilerServiceProvider::new(state, bus);
        let mut task_manager = TaskManager::new();

        provider.start(&mut task_manager).await.unwrap();
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, Event::PassCompleted(ref report) if report.active == 1));
        assert_eq!(store.get(1).await.unwrap().unwrap().status, Status::Active);

        task_manager.shutdown_all().await.unwrap();
        assert!(factory.bound_pins().is_empty());
        assert!(factory.is_closed());
    }

    #[test]
    fn metadata() {
        let state = Arc::new(AppState::from_parts(
            ConfigManager::new(Config::default(), None),
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryFlagStore::new()),
            Arc::new(MockFactory::new()),
            Arc::new(LogExecutor),
        ));
        let provider = ReconcilerServiceProvider::new(state, EventBus::new());

        assert_eq!(provider.name(), "ReconcilerService");
        assert_eq!(provider.priority(), 10);
        assert!(provider.is_critical());
    }
}
