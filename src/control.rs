//! Operations of the short-lived control process.
//!
//! The control process never touches pins. It reads and edits the binding
//! store, raises the change flag and reports what the daemon persisted.
//! Edits never write `status` or `last_error`; those belong to the daemon.

use std::{fmt, time::Duration};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::{
    binding::{ButtonBinding, Status, parse_actions},
    config::Config,
    dispatch::EventDispatcher,
    error::StoreError,
    gpio::Edge,
    install::Installer,
    platform::Platform,
    signal::{ChangeSignalStore, ReloadWait, request_and_wait, request_reconfiguration},
    store::ConfigurationStore,
};

/// One binding as shown by `status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusLine {
    pub id: u32,
    pub pin: Option<u32>,
    pub name: Option<String>,
    pub enabled: bool,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub label: String,
    pub description: String,
}

impl From<&ButtonBinding> for StatusLine {
    fn from(binding: &ButtonBinding) -> Self {
        Self {
            id: binding.id,
            pin: binding.pin,
            name: binding.name.clone(),
            enabled: binding.enabled,
            status: binding.status,
            last_error: binding.last_error.clone(),
            label: binding.label(),
            description: binding.status_description(),
        }
    }
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:<3} {}: {}", self.id, self.label, self.description)
    }
}

/// Every binding with its persisted status, in id order.
pub async fn status(store: &dyn ConfigurationStore) -> Result<Vec<StatusLine>, StoreError> {
    Ok(store.list_all().await?.iter().map(StatusLine::from).collect())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// Flag set, no wait requested.
    Requested,
    /// The daemon cleared the flag.
    Acknowledged,
    /// The daemon did not clear the flag in time; it stays set.
    Pending,
}

impl fmt::Display for ReloadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReloadOutcome::Requested => "Reload requested",
            ReloadOutcome::Acknowledged => "Reload picked up by the service",
            ReloadOutcome::Pending => "Reload requested, service has not picked it up yet",
        })
    }
}

/// Raises the change flag, optionally waiting for the daemon.
pub async fn reload(
    flags: &dyn ChangeSignalStore,
    flag_name: &str,
    wait: Option<ReloadWait>,
) -> Result<ReloadOutcome, StoreError> {
    let Some(wait) = wait else {
        request_reconfiguration(flags, flag_name).await?;
        return Ok(ReloadOutcome::Requested);
    };

    Ok(if request_and_wait(flags, flag_name, wait).await? {
        ReloadOutcome::Acknowledged
    } else {
        ReloadOutcome::Pending
    })
}

/// Host platform and install state, as printed by `detect`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetectReport {
    pub platform: Platform,
    pub needs_install: bool,
    pub installed: bool,
    pub restart_required: bool,
}

impl fmt::Display for DetectReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "platform: {}", self.platform)?;
        if !self.platform.is_supported() {
            return write!(f, " (GPIO simulated)");
        }
        if self.needs_install {
            let state = if self.installed { "installed" } else { "not installed" };
            write!(f, ", GPIO access {state}")?;
        }
        Ok(())
    }
}

pub fn detect(installer: &Installer, platform: Platform) -> DetectReport {
    DetectReport {
        platform,
        needs_install: platform.needs_install(),
        installed: installer.is_installed(platform),
        restart_required: platform.restart_required(),
    }
}

/// Result of running a binding's actions by hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestOutcome {
    pub ran: usize,
    pub failures: usize,
}

/// Runs the actions binding `id` has for `edge`, as the daemon would.
pub async fn test_button(
    store: &dyn ConfigurationStore,
    dispatcher: &EventDispatcher,
    id: u32,
    edge: Edge,
) -> Result<TestOutcome> {
    let binding = store
        .get(id)
        .await
        .context("Failed to read binding store")?
        .with_context(|| format!("No button with id {id}"))?;

    let actions = binding.actions.normalized();
    let actions = actions.for_edge(edge);
    let failures = dispatcher.run_actions(actions);

    Ok(TestOutcome {
        ran: actions.len(),
        failures,
    })
}

/// Field changes for `add` and `edit`. Unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ButtonChanges {
    pub pin: Option<u32>,
    /// Empty clears the name.
    pub name: Option<String>,
    pub pull_up: Option<bool>,
    /// Zero turns debouncing off.
    pub debounce: Option<Duration>,
    pub hold: Option<Duration>,
    pub hold_repeat: Option<bool>,
    /// Delimited action strings; empty clears the list.
    pub on_press: Option<String>,
    pub on_release: Option<String>,
    pub on_hold: Option<String>,
}

impl ButtonChanges {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    fn apply(self, binding: &mut ButtonBinding) {
        if let Some(pin) = self.pin {
            binding.set_pin(pin);
        }
        if let Some(name) = self.name {
            binding.name = Some(name.trim().to_string()).filter(|name| !name.is_empty());
        }
        if let Some(pull_up) = self.pull_up {
            binding.pull_up = pull_up;
        }
        if let Some(debounce) = self.debounce {
            binding.set_debounce(Some(debounce).filter(|d| !d.is_zero()));
        }
        if let Some(hold) = self.hold {
            binding.set_hold(hold);
        }
        if let Some(hold_repeat) = self.hold_repeat {
            binding.hold_repeat = hold_repeat;
        }
        if let Some(raw) = self.on_press {
            binding.actions.on_press = parse_actions(&raw);
        }
        if let Some(raw) = self.on_release {
            binding.actions.on_release = parse_actions(&raw);
        }
        if let Some(raw) = self.on_hold {
            binding.actions.on_hold = parse_actions(&raw);
        }
    }
}

/// A row written by the control process.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub binding: ButtonBinding,
    /// Rows disabled because they were enabled on the same pin.
    pub displaced: Vec<u32>,
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}", self.binding.id, self.binding.label())?;
        for id in &self.displaced {
            write!(f, "\nDisabled #{id}, it was enabled on the same pin")?;
        }
        Ok(())
    }
}

async fn existing(store: &dyn ConfigurationStore, id: u32) -> Result<ButtonBinding> {
    store
        .get(id)
        .await
        .context("Failed to read binding store")?
        .with_context(|| format!("No button with id {id}"))
}

async fn save(store: &dyn ConfigurationStore, binding: &ButtonBinding) -> Result<()> {
    if !store
        .save_settings(binding)
        .await
        .context("Failed to write binding store")?
    {
        anyhow::bail!("No button with id {}", binding.id);
    }
    Ok(())
}

/// Disables every other enabled row on `binding`'s pin, so only one row
/// per pin is enabled.
async fn displace_others(
    store: &dyn ConfigurationStore,
    binding: &ButtonBinding,
) -> Result<Vec<u32>> {
    let Some(pin) = binding.pin else {
        return Ok(Vec::new());
    };

    let mut displaced = Vec::new();
    for mut other in store.list_enabled().await? {
        if other.id == binding.id || other.pin != Some(pin) {
            continue;
        }
        other.enabled = false;
        save(store, &other).await?;
        displaced.push(other.id);
    }
    Ok(displaced)
}

/// Adds a row on `pin`. An enabled row takes the pin over from any other
/// enabled row.
pub async fn add_button(
    store: &dyn ConfigurationStore,
    pin: u32,
    changes: ButtonChanges,
    enabled: bool,
) -> Result<Change> {
    let mut binding = ButtonBinding::new(pin);
    changes.apply(&mut binding);
    binding.enabled = enabled;

    let displaced = if enabled {
        displace_others(store, &binding).await?
    } else {
        Vec::new()
    };
    let binding = store
        .insert(binding)
        .await
        .context("Failed to write binding store")?;

    Ok(Change { binding, displaced })
}

/// Applies `changes` to row `id`. Moving an enabled row to a new pin takes
/// that pin over.
pub async fn edit_button(
    store: &dyn ConfigurationStore,
    id: u32,
    changes: ButtonChanges,
) -> Result<Change> {
    if changes.is_empty() {
        anyhow::bail!("Nothing to change");
    }

    let mut binding = existing(store, id).await?;
    let moved = changes.pin.is_some_and(|pin| binding.pin != Some(pin));
    changes.apply(&mut binding);

    let displaced = if binding.enabled && moved {
        displace_others(store, &binding).await?
    } else {
        Vec::new()
    };
    save(store, &binding).await?;

    Ok(Change { binding, displaced })
}

pub async fn set_enabled(store: &dyn ConfigurationStore, id: u32, enabled: bool) -> Result<Change> {
    let mut binding = existing(store, id).await?;
    binding.enabled = enabled;

    let displaced = if enabled {
        displace_others(store, &binding).await?
    } else {
        Vec::new()
    };
    save(store, &binding).await?;

    Ok(Change { binding, displaced })
}

/// Removes row `id`, returning what it held.
pub async fn delete_button(store: &dyn ConfigurationStore, id: u32) -> Result<ButtonBinding> {
    let binding = existing(store, id).await?;
    if !store
        .delete(id)
        .await
        .context("Failed to write binding store")?
    {
        anyhow::bail!("No button with id {id}");
    }
    Ok(binding)
}

/// Requests a reload after an edit when `auto_reload` is on.
pub async fn after_change(
    flags: &dyn ChangeSignalStore,
    config: &Config,
) -> Result<Option<ReloadOutcome>, StoreError> {
    if !config.auto_reload {
        return Ok(None);
    }
    reload(flags, &config.flag_name, Some(config.reload_wait()))
        .await
        .map(Some)
}
