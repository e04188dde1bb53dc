//! Pin factory abstraction.
//!
//! A [`PinFactory`] turns a logical BCM pin number into a live
//! [`HardwareBinding`] that reports press, release and hold events through
//! handlers. Handlers run on the factory's own threads, never on the
//! reconciliation task.

use std::{
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};

use crate::error::{BindError, FactoryError};

pub mod mock;
pub mod sysfs;
pub mod tracker;

pub use mock::MockFactory;
pub use sysfs::SysfsFactory;
pub use tracker::EdgeTracker;

/// Highest BCM pin exposed on the 40-pin header.
pub const MAX_BCM_PIN: u32 = 27;

/// Hardware event reported by a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Edge {
    Press,
    Release,
    Hold,
}

impl Edge {
    pub const ALL: [Edge; 3] = [Edge::Press, Edge::Release, Edge::Hold];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Edge::Press => "press",
            Edge::Release => "release",
            Edge::Hold => "hold",
        }
    }
}

impl std::fmt::Display for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters for binding one input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSpec {
    pub pin: u32,
    /// Pressed means the line reads low.
    pub pull_up: bool,
    pub debounce: Option<Duration>,
    pub hold: Duration,
    pub hold_repeat: bool,
}

/// Callback invoked for one hardware event.
pub type EdgeHandler = Arc<dyn Fn() + Send + Sync>;

/// Handlers registered on a binding, shared with the thread that fires them.
#[derive(Clone, Default)]
pub struct EdgeHandlers {
    press: Option<EdgeHandler>,
    release: Option<EdgeHandler>,
    hold: Option<EdgeHandler>,
}

impl EdgeHandlers {
    pub fn set(&mut self, edge: Edge, handler: EdgeHandler) {
        let slot = match edge {
            Edge::Press => &mut self.press,
            Edge::Release => &mut self.release,
            Edge::Hold => &mut self.hold,
        };
        *slot = Some(handler);
    }

    pub fn get(&self, edge: Edge) -> Option<EdgeHandler> {
        match edge {
            Edge::Press => self.press.clone(),
            Edge::Release => self.release.clone(),
            Edge::Hold => self.hold.clone(),
        }
    }
}

/// Handler table behind a lock, fired without holding it.
pub(crate) type SharedHandlers = Arc<RwLock<EdgeHandlers>>;

pub(crate) fn fire(handlers: &SharedHandlers, edge: Edge) -> bool {
    let handler = handlers
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(edge);

    match handler {
        Some(handler) => {
            handler();
            true
        }
        None => false,
    }
}

pub(crate) fn register(handlers: &SharedHandlers, edge: Edge, handler: EdgeHandler) {
    handlers
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .set(edge, handler);
}

/// Rejects pins outside `0..=max_pin`.
pub fn validate_pin(pin: u32, max_pin: u32) -> Result<(), BindError> {
    if pin > max_pin {
        Err(BindError::InvalidPin { pin })
    } else {
        Ok(())
    }
}

/// A live input line wired to event handlers.
pub trait HardwareBinding: Send {
    fn pin(&self) -> u32;

    fn set_handler(&mut self, edge: Edge, handler: EdgeHandler);

    fn on_press(&mut self, handler: EdgeHandler) {
        self.set_handler(Edge::Press, handler);
    }

    fn on_release(&mut self, handler: EdgeHandler) {
        self.set_handler(Edge::Release, handler);
    }

    fn on_hold(&mut self, handler: EdgeHandler) {
        self.set_handler(Edge::Hold, handler);
    }

    /// Releases the line. Calling it twice is a no-op.
    fn close(&mut self) -> Result<(), BindError>;
}

/// Hardware/driver abstraction producing input bindings.
///
/// Calls may block while the driver waits on the kernel; async callers run
/// them on the blocking pool.
pub trait PinFactory: Send + Sync {
    fn name(&self) -> &'static str;

    fn bind_input(&self, spec: &InputSpec) -> Result<Box<dyn HardwareBinding>, BindError>;

    /// Releases driver resources. Bindings must be closed first.
    fn close(&self) -> Result<(), FactoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn validate_pin_bounds() {
        assert!(validate_pin(0, MAX_BCM_PIN).is_ok());
        assert!(validate_pin(27, MAX_BCM_PIN).is_ok());
        assert!(matches!(
            validate_pin(99999, MAX_BCM_PIN),
            Err(BindError::InvalidPin { pin: 99999 })
        ));
    }

    #[test]
    fn fire_runs_only_registered_handler() {
        let handlers: SharedHandlers = Arc::default();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();

        register(
            &handlers,
            Edge::Hold,
            Arc::new(move || {
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert!(!fire(&handlers, Edge::Press));
        assert!(fire(&handlers, Edge::Hold));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
