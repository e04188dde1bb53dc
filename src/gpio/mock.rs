//! In-memory pin factory for unsupported hosts and tests.

use std::{
    collections::{HashMap, HashSet},
    io,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use log::debug;

use super::{
    Edge, EdgeHandler, HardwareBinding, InputSpec, MAX_BCM_PIN, PinFactory, SharedHandlers, fire,
    register, validate_pin,
};
use crate::error::{BindError, FactoryError};

#[derive(Default)]
struct MockState {
    lines: HashMap<u32, MockLine>,
    failing: HashSet<u32>,
    closed: bool,
    next_line: u64,
}

struct MockLine {
    id: u64,
    spec: InputSpec,
    handlers: SharedHandlers,
}

/// Simulated pin factory.
///
/// Edges are injected with [`MockFactory::press`], [`MockFactory::release`]
/// and [`MockFactory::hold`]. Clones share the same simulated header.
#[derive(Clone)]
pub struct MockFactory {
    state: Arc<Mutex<MockState>>,
    max_pin: u32,
}

impl Default for MockFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl MockFactory {
    pub fn new() -> Self {
        Self::with_max_pin(MAX_BCM_PIN)
    }

    pub fn with_max_pin(max_pin: u32) -> Self {
        Self {
            state: Arc::default(),
            max_pin,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes future binds of `pin` fail with a driver error.
    pub fn fail_pin(&self, pin: u32) {
        self.lock().failing.insert(pin);
    }

    /// Pins currently held by a live binding, ascending.
    pub fn bound_pins(&self) -> Vec<u32> {
        let mut pins: Vec<u32> = self.lock().lines.keys().copied().collect();
        pins.sort_unstable();
        pins
    }

    /// Parameters the live binding on `pin` was created with.
    pub fn spec(&self, pin: u32) -> Option<InputSpec> {
        self.lock().lines.get(&pin).map(|line| line.spec.clone())
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Fires `edge` on `pin`. Returns false if nothing handled it.
    pub fn trigger(&self, pin: u32, edge: Edge) -> bool {
        let handlers = match self.lock().lines.get(&pin) {
            Some(line) => line.handlers.clone(),
            None => return false,
        };
        fire(&handlers, edge)
    }

    pub fn press(&self, pin: u32) -> bool {
        self.trigger(pin, Edge::Press)
    }

    pub fn release(&self, pin: u32) -> bool {
        self.trigger(pin, Edge::Release)
    }

    pub fn hold(&self, pin: u32) -> bool {
        self.trigger(pin, Edge::Hold)
    }
}

impl PinFactory for MockFactory {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn bind_input(&self, spec: &InputSpec) -> Result<Box<dyn HardwareBinding>, BindError> {
        validate_pin(spec.pin, self.max_pin)?;

        let mut state = self.lock();
        if state.closed {
            return Err(BindError::FactoryClosed);
        }
        if state.failing.contains(&spec.pin) {
            return Err(BindError::Driver {
                pin: spec.pin,
                source: io::Error::other("simulated driver failure"),
            });
        }
        if state.lines.contains_key(&spec.pin) {
            return Err(BindError::PinClaimed { pin: spec.pin });
        }

        state.next_line += 1;
        let id = state.next_line;
        let handlers = SharedHandlers::default();
        state.lines.insert(
            spec.pin,
            MockLine {
                id,
                spec: spec.clone(),
                handlers: handlers.clone(),
            },
        );
        debug!("mock: bound GPIO {}", spec.pin);

        Ok(Box::new(MockBinding {
            pin: spec.pin,
            id,
            handlers,
            state: self.state.clone(),
            closed: false,
        }))
    }

    fn close(&self) -> Result<(), FactoryError> {
        let mut state = self.lock();
        state.closed = true;
        state.lines.clear();
        Ok(())
    }
}

struct MockBinding {
    pin: u32,
    id: u64,
    handlers: SharedHandlers,
    state: Arc<Mutex<MockState>>,
    closed: bool,
}

impl HardwareBinding for MockBinding {
    fn pin(&self) -> u32 {
        self.pin
    }

    fn set_handler(&mut self, edge: Edge, handler: EdgeHandler) {
        register(&self.handlers, edge, handler);
    }

    fn close(&mut self) -> Result<(), BindError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.lines.get(&self.pin).is_some_and(|line| line.id == self.id) {
            state.lines.remove(&self.pin);
            debug!("mock: released GPIO {}", self.pin);
        }
        Ok(())
    }
}

impl Drop for MockBinding {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
