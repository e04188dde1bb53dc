use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use signal_hook::{consts::SIGHUP, iterator::Signals};
use std::{sync::Arc, thread};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    app_context::AppState,
    event::{Event, EventBus},
    providers::traits::ServiceProvider,
    signal::{ChangeSignalStore, request_reconfiguration},
    task_manager::TaskManager,
};

/// Turns `SIGHUP` into a reconfiguration request.
///
/// The request goes through the same change flag a control process would
/// set, so a hang-up and `gpio_monitord reload` behave identically.
///
/// - **Priority**: 5
/// - **Critical**: No, reloads still work through the flag
pub struct HangupServiceProvider {
    state: Arc<AppState>,
    event_bus: EventBus,
}

impl HangupServiceProvider {
    pub fn new(state: Arc<AppState>, event_bus: EventBus) -> Self {
        Self { state, event_bus }
    }
}

#[async_trait]
impl ServiceProvider for HangupServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let signals = Signals::new([SIGHUP]).context("Failed to register SIGHUP handler")?;
        let flags = self.state.flags.clone();
        let flag_name = self.state.config().await.flag_name.clone();
        let event_bus = self.event_bus.clone();

        task_manager
            .spawn_task(self.name().to_string(), |cancel_token| async move {
                run_hangup_service(signals, flags, flag_name, event_bus, cancel_token).await
            })
            .await
    }

    fn name(&self) -> &'static str {
        "HangupService"
    }

    fn priority(&self) -> i32 {
        5
    }
}

async fn run_hangup_service(
    mut signals: Signals,
    flags: Arc<dyn ChangeSignalStore>,
    flag_name: String,
    event_bus: EventBus,
    cancel_token: CancellationToken,
) -> Result<()> {
    let handle = signals.handle();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let listener = thread::Builder::new()
        .name("sighup".into())
        .spawn(move || {
            for signal in signals.forever() {
                if tx.send(signal).is_err() {
                    break;
                }
            }
        })
        .context("Failed to spawn signal listener thread")?;

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                debug!("Hang-up service cancelled");
                break;
            }
            Some(_) = rx.recv() => {
                info!("SIGHUP received, requesting reconfiguration");
                match request_reconfiguration(flags.as_ref(), &flag_name).await {
                    Ok(()) => event_bus.notify(Event::ReloadRequested),
                    Err(e) => warn!("Failed to request reconfiguration: {e}"),
                }
            }
        }
    }

    handle.close();
    if listener.join().is_err() {
        warn!("Signal listener thread panicked");
    }
    Ok(())
}
