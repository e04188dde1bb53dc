//! System coordinator for managing service lifecycle and dependency injection.

use std::sync::Arc;

use anyhow::{Context, Result};
use log::{debug, info, warn};
use tokio::signal::unix::{SignalKind, signal};

use crate::{
    app_context::AppState,
    config::ConfigManager,
    event::{Event, EventBus},
    providers::{
        AppStateProvider, AsyncProvider, HangupServiceProvider, ReconcilerServiceProvider,
        ServiceProvider,
    },
    task_manager::TaskManager,
};

/// Owns the daemon's services from startup to shutdown.
///
/// Critical services must start; the rest degrade gracefully. The main loop
/// waits for Ctrl+C, `SIGTERM` or a [`Event::SystemShutdown`] and then
/// cancels every task, which makes the reconciler release its pins.
pub struct SystemCoordinator {
    task_manager: TaskManager,
    event_bus: EventBus,
    shared_state: Option<Arc<AppState>>,
    service_providers: Vec<Box<dyn ServiceProvider>>,
}

impl Default for SystemCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemCoordinator {
    pub fn new() -> Self {
        Self {
            task_manager: TaskManager::new(),
            event_bus: EventBus::new(),
            shared_state: None,
            service_providers: Vec::new(),
        }
    }

    /// Opens hardware and stores, then registers the services.
    pub async fn initialize(&mut self, config_manager: ConfigManager) -> Result<()> {
        info!("Initializing SystemCoordinator...");

        let state = AppStateProvider::new(config_manager)
            .provide()
            .await
            .context("Failed to initialize application state")?;

        self.initialize_with_state(state);
        Ok(())
    }

    /// Registers the services over already built state.
    pub fn initialize_with_state(&mut self, state: Arc<AppState>) {
        let mut providers: Vec<Box<dyn ServiceProvider>> = vec![
            Box::new(ReconcilerServiceProvider::new(
                state.clone(),
                self.event_bus.clone(),
            )),
            Box::new(HangupServiceProvider::new(
                state.clone(),
                self.event_bus.clone(),
            )),
        ];
        providers.sort_by_key(|b| std::cmp::Reverse(b.priority()));

        self.service_providers = providers;
        self.shared_state = Some(state);

        info!(
            "Registered {} service providers in priority order",
            self.service_providers.len()
        );
    }

    /// Starts all registered services in priority order.
    pub async fn start_all_services(&mut self) -> Result<()> {
        info!(
            "Starting {} services in priority order...",
            self.service_providers.len()
        );

        for provider in &self.service_providers {
            let is_critical = provider.is_critical();

            match provider.start(&mut self.task_manager).await {
                Ok(()) => {
                    info!(
                        "Service '{}' started (priority: {}, critical: {})",
                        provider.name(),
                        provider.priority(),
                        is_critical
                    );
                }
                Err(e) if is_critical => {
                    return Err(e).with_context(|| {
                        format!("Critical service '{}' failed to start", provider.name())
                    });
                }
                Err(e) => {
                    warn!(
                        "Non-critical service '{}' failed to start: {e}",
                        provider.name()
                    );
                }
            }
        }

        info!("All critical services started successfully");
        Ok(())
    }

    /// Waits for a shutdown request, then stops every service.
    pub async fn run_main_loop(&mut self) -> Result<()> {
        let mut event_rx = self.event_bus.subscribe();
        let mut terminate =
            signal(SignalKind::terminate()).context("Failed to listen for SIGTERM")?;
        info!("Starting main event loop");

        loop {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    result.context("Failed to listen for shutdown signal")?;
                    info!("Received Ctrl+C, initiating graceful shutdown...");
                    break;
                }

                _ = terminate.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown...");
                    break;
                }

                event = event_rx.recv() => {
                    if !self.handle_event(event) {
                        break;
                    }
                }
            }
        }

        self.shutdown().await;
        info!("Main event loop terminated");
        Ok(())
    }

    /// Returns false once the loop should stop.
    fn handle_event(
        &self,
        event_result: Result<Event, tokio::sync::broadcast::error::RecvError>,
    ) -> bool {
        match event_result {
            Ok(Event::PassCompleted(report)) => {
                debug!("Reconciliation pass {} finished", report.pass);
            }
            Ok(Event::ButtonTriggered { id, pin, edge }) => {
                debug!("Button #{id} on GPIO {pin}: {edge}");
            }
            Ok(Event::ReloadRequested) => {
                info!("Local reload requested");
            }
            Ok(Event::SystemShutdown) => {
                info!("Processing SystemShutdown event");
                return false;
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                warn!("Event bus channel closed unexpectedly");
                return false;
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                warn!("Event bus lagged by {n} messages");
            }
        }
        true
    }

    async fn shutdown(&mut self) {
        info!("Initiating graceful shutdown...");

        if let Err(e) = self.task_manager.shutdown_all().await {
            log::error!("Error during task shutdown: {e:#}");
        }

        info!("Shutdown complete");
    }

    pub const fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn running_services(&self) -> Vec<&'static str> {
        self.service_providers.iter().map(|p| p.name()).collect()
    }
}
