//! Pin factory backed by the Linux sysfs GPIO interface.
//!
//! Each binding exports its line, configures it as an input and samples the
//! `value` file on a dedicated thread, feeding an [`EdgeTracker`]. Pull-up
//! resistors cannot be configured through sysfs; `pull_up` only selects
//! `active_low`, the resistor itself comes from the board or device tree.

use std::{
    collections::HashSet,
    fs, io,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use log::{debug, warn};

use super::{
    EdgeHandler, EdgeTracker, HardwareBinding, InputSpec, MAX_BCM_PIN, PinFactory, SharedHandlers,
    fire, register, validate_pin,
};
use crate::{
    error::{BindError, FactoryError},
    gpio::Edge,
};

pub const DEFAULT_ROOT: &str = "/sys/class/gpio";

const EXPORT_WAIT: Duration = Duration::from_millis(500);

type Claims = Arc<Mutex<HashSet<u32>>>;

/// Pin factory over `/sys/class/gpio`.
pub struct SysfsFactory {
    root: PathBuf,
    sample_interval: Duration,
    claimed: Claims,
    closed: AtomicBool,
}

impl SysfsFactory {
    /// Opens the GPIO class directory. Fails if the export file is missing or
    /// not writable by this process.
    pub fn open(root: impl Into<PathBuf>, sample_interval: Duration) -> Result<Self, FactoryError> {
        let root = root.into();
        let export = root.join("export");

        fs::OpenOptions::new()
            .write(true)
            .open(&export)
            .map_err(|source| FactoryError::Unavailable {
                path: export.clone(),
                source,
            })?;

        debug!("sysfs GPIO available at {}", root.display());
        Ok(Self {
            root,
            sample_interval,
            claimed: Claims::default(),
            closed: AtomicBool::new(false),
        })
    }

    fn line_dir(&self, pin: u32) -> PathBuf {
        self.root.join(format!("gpio{pin}"))
    }

    fn export(&self, pin: u32) -> io::Result<PathBuf> {
        let dir = self.line_dir(pin);
        if !dir.exists() {
            fs::write(self.root.join("export"), pin.to_string())?;

            let deadline = Instant::now() + EXPORT_WAIT;
            while !dir.join("value").exists() {
                if Instant::now() >= deadline {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("{} did not appear after export", dir.display()),
                    ));
                }
                thread::sleep(Duration::from_millis(10));
            }
        }
        Ok(dir)
    }

    fn configure(&self, spec: &InputSpec) -> io::Result<(PathBuf, bool)> {
        let dir = self.export(spec.pin)?;
        fs::write(dir.join("direction"), "in")?;
        fs::write(dir.join("active_low"), if spec.pull_up { "1" } else { "0" })?;

        let value = dir.join("value");
        let initial = read_level(&value)?;
        Ok((value, initial))
    }
}

fn read_level(path: &Path) -> io::Result<bool> {
    let raw = fs::read_to_string(path)?;
    match raw.trim() {
        "1" => Ok(true),
        "0" => Ok(false),
        other => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unexpected GPIO value {other:?}"),
        )),
    }
}

fn release_claim(claimed: &Claims, pin: u32) {
    claimed
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&pin);
}

impl PinFactory for SysfsFactory {
    fn name(&self) -> &'static str {
        "sysfs"
    }

    fn bind_input(&self, spec: &InputSpec) -> Result<Box<dyn HardwareBinding>, BindError> {
        validate_pin(spec.pin, MAX_BCM_PIN)?;
        if self.closed.load(Ordering::SeqCst) {
            return Err(BindError::FactoryClosed);
        }

        if !self
            .claimed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(spec.pin)
        {
            return Err(BindError::PinClaimed { pin: spec.pin });
        }

        let (value, initial) = self.configure(spec).map_err(|source| {
            release_claim(&self.claimed, spec.pin);
            BindError::Driver {
                pin: spec.pin,
                source,
            }
        })?;

        let handlers = SharedHandlers::default();
        let stop = Arc::new(AtomicBool::new(false));
        let poller = Poller {
            pin: spec.pin,
            value,
            interval: self.sample_interval,
            tracker: EdgeTracker::new(spec, initial, Instant::now()),
            handlers: handlers.clone(),
            stop: stop.clone(),
        };

        let worker = thread::Builder::new()
            .name(format!("gpio{}", spec.pin))
            .spawn(move || poller.run())
            .map_err(|source| {
                release_claim(&self.claimed, spec.pin);
                BindError::Driver {
                    pin: spec.pin,
                    source,
                }
            })?;

        debug!("sysfs: bound GPIO {} (initial {})", spec.pin, initial);
        Ok(Box::new(SysfsBinding {
            pin: spec.pin,
            root: self.root.clone(),
            handlers,
            stop,
            worker: Some(worker),
            claimed: self.claimed.clone(),
            closed: false,
        }))
    }

    fn close(&self) -> Result<(), FactoryError> {
        self.closed.store(true, Ordering::SeqCst);
        let leftover = self
            .claimed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        if leftover > 0 {
            return Err(FactoryError::Close(format!(
                "{leftover} line(s) still bound"
            )));
        }
        Ok(())
    }
}

struct Poller {
    pin: u32,
    value: PathBuf,
    interval: Duration,
    tracker: EdgeTracker,
    handlers: SharedHandlers,
    stop: Arc<AtomicBool>,
}

impl Poller {
    fn run(mut self) {
        let mut failing = false;

        while !self.stop.load(Ordering::SeqCst) {
            match read_level(&self.value) {
                Ok(level) => {
                    failing = false;
                    if let Some(edge) = self.tracker.sample(level, Instant::now()) {
                        debug!("GPIO {} {}", self.pin, edge);
                        fire(&self.handlers, edge);
                    }
                }
                Err(e) if !failing => {
                    warn!("GPIO {}: failed to read value: {e}", self.pin);
                    failing = true;
                }
                Err(_) => {}
            }
            thread::sleep(self.interval);
        }
    }
}

struct SysfsBinding {
    pin: u32,
    root: PathBuf,
    handlers: SharedHandlers,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    claimed: Claims,
    closed: bool,
}

impl HardwareBinding for SysfsBinding {
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

        self.stop.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("GPIO {} poller panicked", self.pin);
            }
        }
        release_claim(&self.claimed, self.pin);

        fs::write(self.root.join("unexport"), self.pin.to_string()).map_err(|source| {
            BindError::Driver {
                pin: self.pin,
                source,
            }
        })
    }
}

impl Drop for SysfsBinding {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            debug!("GPIO {} release on drop: {e}", self.pin);
        }
    }
}
