//! Reconciliation loop keeping live pin bindings in line with the store.
//!
//! Each pass is a full rebuild: statuses are reset in bulk, every live binding
//! is released, and every enabled row with actions is bound again in id
//! order. A row that cannot be bound is marked `Error` and the pass moves on.
//! Between passes the loop polls the change flag until it is set or the
//! daemon shuts down.

use std::{io, sync::Arc, time::Duration};

use log::{debug, error, info, warn};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_stream::{StreamExt, wrappers::IntervalStream};
use tokio_util::sync::CancellationToken;

use crate::{
    binding::{ButtonBinding, Status},
    dispatch::EventDispatcher,
    error::{BindError, StoreError},
    event::{Event, EventBus},
    gpio::{Edge, HardwareBinding, InputSpec, PinFactory},
    signal::{ChangeSignalStore, DEFAULT_FLAG},
    store::ConfigurationStore,
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Lifecycle of the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Reconciling,
    Watching,
    Draining,
    Stopped,
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// 1-based pass counter.
    pub pass: u64,
    pub active: usize,
    pub errored: usize,
    /// Enabled rows left inactive because they have no actions.
    pub skipped: usize,
    pub disabled: usize,
    /// Rows deleted while the pass was running.
    pub vanished: usize,
}

#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    pub poll_interval: Duration,
    pub flag_name: String,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            flag_name: DEFAULT_FLAG.to_string(),
        }
    }
}

enum WatchOutcome {
    Signalled,
    Shutdown,
}

struct LiveBinding {
    id: u32,
    handle: Box<dyn HardwareBinding>,
}

/// Owns the live binding set and drives passes.
pub struct Reconciler {
    store: Arc<dyn ConfigurationStore>,
    signals: Arc<dyn ChangeSignalStore>,
    factory: Arc<dyn PinFactory>,
    dispatcher: EventDispatcher,
    event_bus: EventBus,
    settings: ReconcilerSettings,
    live: Vec<LiveBinding>,
    state: LoopState,
    passes: u64,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn ConfigurationStore>,
        signals: Arc<dyn ChangeSignalStore>,
        factory: Arc<dyn PinFactory>,
        dispatcher: EventDispatcher,
        settings: ReconcilerSettings,
    ) -> Self {
        Self {
            store,
            signals,
            factory,
            dispatcher,
            event_bus: EventBus::new(),
            settings,
            live: Vec::new(),
            state: LoopState::Idle,
            passes: 0,
        }
    }

    /// Publishes pass results on `event_bus`.
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = event_bus;
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Pins with a live binding, in bind order.
    pub fn live_pins(&self) -> Vec<u32> {
        self.live.iter().map(|live| live.handle.pin()).collect()
    }

    /// Row ids with a live binding, in bind order.
    pub fn live_ids(&self) -> Vec<u32> {
        self.live.iter().map(|live| live.id).collect()
    }

    /// Runs passes until `cancel` fires, then releases everything.
    pub async fn run(&mut self, cancel: &CancellationToken) {
        info!(
            "Reconciler started (factory: {}, poll: {:?})",
            self.factory.name(),
            self.settings.poll_interval
        );

        loop {
            match self.run_pass().await {
                Ok(report) => {
                    info!(
                        "Pass {} complete: {} active, {} error, {} skipped, {} disabled",
                        report.pass, report.active, report.errored, report.skipped, report.disabled
                    );
                    self.event_bus.notify(Event::PassCompleted(report));
                }
                Err(e) => error!("Reconciliation pass failed: {e}"),
            }

            self.state = LoopState::Watching;
            let outcome = watch(
                self.signals.as_ref(),
                &self.settings.flag_name,
                self.settings.poll_interval,
                cancel,
            )
            .await;
            match outcome {
                WatchOutcome::Signalled => continue,
                WatchOutcome::Shutdown => break,
            }
        }

        self.drain().await;
    }

    /// One full pass over the store.
    ///
    /// Only store failures end a pass early; per-row bind failures are
    /// recorded on the row.
    pub async fn run_pass(&mut self) -> Result<PassReport, StoreError> {
        self.state = LoopState::Reconciling;
        self.passes += 1;
        let mut report = PassReport {
            pass: self.passes,
            ..PassReport::default()
        };

        if let Err(e) = self.signals.clear(&self.settings.flag_name).await {
            warn!("Failed to clear change flag: {e}");
        }

        let reset = reset_statuses(self.store.as_ref()).await;
        self.release_all().await;
        report.disabled = reset?;

        let rows = self.store.list_enabled().await?;
        debug!("Pass {}: {} enabled row(s)", report.pass, rows.len());

        for mut row in rows {
            if !row.has_actions() {
                debug!("Button #{} has no actions, skipping", row.id);
                report.skipped += 1;
                continue;
            }

            let live = match self.bind(&row).await {
                Ok(live) => {
                    row.status = Status::Active;
                    row.last_error = None;
                    Some(live)
                }
                Err(e) => {
                    warn!("Button #{} ({}): {e}", row.id, row.pin_label());
                    row.status = Status::Error;
                    row.last_error = Some(e.to_string());
                    None
                }
            };

            let still_exists = match self.store.save_status(&row).await {
                Ok(exists) => exists,
                Err(e) => {
                    warn!("Failed to persist status of button #{}: {e}", row.id);
                    true
                }
            };

            match live {
                Some(live) if !still_exists => {
                    debug!("Button #{} was deleted during the pass", row.id);
                    report.vanished += 1;
                    close_lines(vec![live]).await;
                }
                Some(live) => {
                    report.active += 1;
                    self.live.push(live);
                }
                None if !still_exists => report.vanished += 1,
                None => report.errored += 1,
            }
        }

        Ok(report)
    }

    async fn bind(&mut self, row: &ButtonBinding) -> Result<LiveBinding, BindError> {
        let spec = row.input_spec()?;
        let mut handle = open_line(self.factory.clone(), spec.clone()).await?;

        let actions = Arc::new(row.actions.normalized());
        for edge in Edge::ALL {
            if let Some(handler) = self.dispatcher.handler(row.id, spec.pin, edge, &actions) {
                handle.set_handler(edge, handler);
            }
        }

        debug!("Button #{} bound to GPIO {}", row.id, spec.pin);
        Ok(LiveBinding { id: row.id, handle })
    }

    async fn release_all(&mut self) {
        close_lines(std::mem::take(&mut self.live)).await;
    }

    async fn drain(&mut self) {
        self.state = LoopState::Draining;
        info!("Releasing {} binding(s)", self.live.len());
        self.release_all().await;

        if let Err(e) = self.factory.close() {
            error!("Failed to close pin factory: {e}");
        }
        self.state = LoopState::Stopped;
        info!("Reconciler stopped");
    }
}

/// Binds a line on the blocking pool; drivers may sleep while the kernel
/// exports the line.
async fn open_line(
    factory: Arc<dyn PinFactory>,
    spec: InputSpec,
) -> Result<Box<dyn HardwareBinding>, BindError> {
    let pin = spec.pin;
    tokio::task::spawn_blocking(move || factory.bind_input(&spec))
        .await
        .map_err(|e| BindError::Driver {
            pin,
            source: io::Error::other(e),
        })?
}

/// Closes lines on the blocking pool; drivers join their sampling threads.
async fn close_lines(lines: Vec<LiveBinding>) {
    if lines.is_empty() {
        return;
    }

    let closing = tokio::task::spawn_blocking(move || {
        for mut live in lines {
            if let Err(e) = live.handle.close() {
                warn!("Failed to release GPIO {}: {e}", live.handle.pin());
            }
        }
    });
    if let Err(e) = closing.await {
        error!("Releasing GPIO lines failed: {e}");
    }
}

/// Marks enabled rows `Inactive` and disabled rows `Disabled`, clearing
/// errors. Returns the number of disabled rows.
async fn reset_statuses(store: &dyn ConfigurationStore) -> Result<usize, StoreError> {
    store.bulk_set_status(true, Status::Inactive, true).await?;
    store.bulk_set_status(false, Status::Disabled, true).await
}

/// Polls the change flag until it is set or `cancel` fires.
async fn watch(
    signals: &dyn ChangeSignalStore,
    flag_name: &str,
    period: Duration,
    cancel: &CancellationToken,
) -> WatchOutcome {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut ticks = IntervalStream::new(interval);

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => return WatchOutcome::Shutdown,

            Some(_) = ticks.next() => {
                match signals.get_flag(flag_name).await {
                    Ok(true) => {
                        info!("Change signal received, reconfiguring");
                        return WatchOutcome::Signalled;
                    }
                    Ok(false) => {}
                    Err(e) => warn!("Failed to read change flag: {e}"),
                }
            }
        }
    }
}
