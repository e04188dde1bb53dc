//! Persisted button bindings.
//!
//! A [`ButtonBinding`] is one row of the configuration store: which pin to
//! watch, how to interpret its transitions and which actions to run. Rows are
//! written by the control process; only the reconciliation loop touches
//! [`ButtonBinding::status`] and [`ButtonBinding::last_error`].

use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::{
    error::BindError,
    gpio::{Edge, InputSpec},
};

/// Separator accepted when several actions are written as one string.
pub const ACTION_DELIMITER: char = ';';

/// Hold threshold used when a row does not specify one.
pub const DEFAULT_HOLD: Duration = Duration::from_secs(1);

/// Resolved state of a binding after the last reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Enabled, waiting for (or skipped by) a pass.
    #[default]
    Inactive,
    /// Bound to its pin and firing actions.
    Active,
    /// Enabled but the pin could not be bound; see `last_error`.
    Error,
    /// Not enabled.
    Disabled,
}

impl Status {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Status::Inactive => "Inactive",
            Status::Active => "Active",
            Status::Error => "Error",
            Status::Disabled => "Disabled",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered action lists for each hardware event of one binding.
///
/// Bindings hand the dispatcher a frozen copy of this set when they are
/// bound, so later edits or deletion of the row never reach a live callback.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSet {
    #[serde(default, with = "action_list", skip_serializing_if = "Vec::is_empty")]
    pub on_press: Vec<String>,
    #[serde(default, with = "action_list", skip_serializing_if = "Vec::is_empty")]
    pub on_release: Vec<String>,
    #[serde(default, with = "action_list", skip_serializing_if = "Vec::is_empty")]
    pub on_hold: Vec<String>,
}

impl ActionSet {
    /// Actions configured for the given event.
    pub fn for_edge(&self, edge: Edge) -> &[String] {
        match edge {
            Edge::Press => &self.on_press,
            Edge::Release => &self.on_release,
            Edge::Hold => &self.on_hold,
        }
    }

    /// Copy with blank actions removed and the rest trimmed.
    pub fn normalized(&self) -> Self {
        let clean = |list: &[String]| -> Vec<String> {
            list.iter()
                .map(|action| action.trim())
                .filter(|action| !action.is_empty())
                .map(str::to_owned)
                .collect()
        };

        Self {
            on_press: clean(&self.on_press),
            on_release: clean(&self.on_release),
            on_hold: clean(&self.on_hold),
        }
    }

    /// True when no event has a non-blank action.
    pub fn is_empty(&self) -> bool {
        [&self.on_press, &self.on_release, &self.on_hold]
            .iter()
            .all(|list| list.iter().all(|action| action.trim().is_empty()))
    }
}

/// Splits a delimited action string into individual actions.
pub fn parse_actions(raw: &str) -> Vec<String> {
    raw.split(ACTION_DELIMITER)
        .map(str::trim)
        .filter(|action| !action.is_empty())
        .map(str::to_owned)
        .collect()
}

/// A stored pin or timing value that could not be used as written.
///
/// The raw value is written back unchanged, so saving the row never loses
/// what the user typed. Binding the row fails until the value is replaced.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedField {
    pub field: &'static str,
    pub raw: Value,
    pub reason: String,
}

/// One configured digital input and the actions it triggers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "stored::StoredBinding", into = "stored::StoredBinding")]
pub struct ButtonBinding {
    /// Row key assigned by the store.
    pub id: u32,

    /// BCM pin number; `None` until the user picks one.
    pub pin: Option<u32>,

    pub name: Option<String>,

    pub enabled: bool,

    pub pull_up: bool,

    /// Minimum stable time before a transition counts as an edge.
    pub debounce: Option<Duration>,

    /// Minimum asserted time before a hold fires.
    pub hold: Duration,

    pub hold_repeat: bool,

    pub actions: ActionSet,

    pub status: Status,

    pub last_error: Option<String>,

    pub rejected: Vec<RejectedField>,
}

impl Default for ButtonBinding {
    fn default() -> Self {
        Self {
            id: 0,
            pin: None,
            name: None,
            enabled: false,
            pull_up: defaults::pull_up(),
            debounce: None,
            hold: DEFAULT_HOLD,
            hold_repeat: false,
            actions: ActionSet::default(),
            status: Status::Inactive,
            last_error: None,
            rejected: Vec::new(),
        }
    }
}

impl ButtonBinding {
    /// A disabled binding on `pin` with no actions.
    pub fn new(pin: u32) -> Self {
        Self {
            pin: Some(pin),
            ..Self::default()
        }
    }

    /// True when at least one event has something to run.
    pub fn has_actions(&self) -> bool {
        !self.actions.is_empty()
    }

    pub fn set_pin(&mut self, pin: u32) {
        self.pin = Some(pin);
        self.accept("pin");
    }

    pub fn set_debounce(&mut self, debounce: Option<Duration>) {
        self.debounce = debounce;
        self.accept("debounce");
    }

    pub fn set_hold(&mut self, hold: Duration) {
        self.hold = hold;
        self.accept("hold");
    }

    fn accept(&mut self, field: &str) {
        self.rejected.retain(|bad| bad.field != field);
    }

    /// Hardware parameters for this row.
    ///
    /// Fails for rows that cannot be bound no matter which pins are free.
    pub fn input_spec(&self) -> Result<InputSpec, BindError> {
        if let Some(bad) = self.rejected.iter().find(|bad| bad.field == "pin") {
            return Err(BindError::UnreadablePin {
                value: stored::describe(&bad.raw),
            });
        }
        let pin = self.pin.ok_or(BindError::MissingPin)?;

        if let Some(bad) = self.rejected.first() {
            return Err(BindError::InvalidTiming {
                pin,
                reason: format!("{} {}: {}", bad.field, stored::describe(&bad.raw), bad.reason),
            });
        }

        if self.hold.is_zero() {
            return Err(BindError::InvalidTiming {
                pin,
                reason: "hold duration must be greater than zero".into(),
            });
        }

        Ok(InputSpec {
            pin,
            pull_up: self.pull_up,
            debounce: self.debounce.filter(|d| !d.is_zero()),
            hold: self.hold,
            hold_repeat: self.hold_repeat,
        })
    }

    /// "GPIO 17", or "No pin" for rows that have none yet.
    pub fn pin_label(&self) -> String {
        match self.pin {
            Some(pin) => format!("GPIO {pin}"),
            None => "No pin".to_string(),
        }
    }

    /// One-line summary used by `status`.
    pub fn label(&self) -> String {
        match self.name.as_deref().filter(|name| !name.is_empty()) {
            Some(name) => format!("{name} ({}) - {}", self.pin_label(), self.status),
            None => format!("{} - {}", self.pin_label(), self.status),
        }
    }

    /// Human explanation of the current status.
    pub fn status_description(&self) -> String {
        match self.status {
            Status::Inactive if self.enabled && !self.has_actions() => {
                "Enabled but has no actions configured".to_string()
            }
            Status::Inactive => "Waiting for the service to pick up this button".to_string(),
            Status::Active => "Button is being monitored".to_string(),
            Status::Error => format!(
                "Button failed to start: {}",
                self.last_error.as_deref().unwrap_or("unknown error")
            ),
            Status::Disabled => "Button is disabled".to_string(),
        }
    }
}

mod defaults {
    pub fn pull_up() -> bool {
        true
    }
}

/// On-disk shape of a row.
///
/// Pin and timing fields are read as plain YAML values and checked one by
/// one, so a bad value in one row never makes the whole document unreadable.
mod stored {
    use std::time::Duration;

    use serde::{Deserialize, Serialize};
    use serde_yaml::Value;

    use super::{ActionSet, ButtonBinding, DEFAULT_HOLD, RejectedField, Status};

    #[derive(Serialize, Deserialize)]
    pub struct StoredBinding {
        #[serde(default)]
        id: u32,
        #[serde(default, skip_serializing_if = "Value::is_null")]
        pin: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default)]
        enabled: bool,
        #[serde(default = "super::defaults::pull_up")]
        pull_up: bool,
        /// Fractional seconds.
        #[serde(default, skip_serializing_if = "Value::is_null")]
        debounce: Value,
        /// Fractional seconds.
        #[serde(default)]
        hold: Value,
        #[serde(default)]
        hold_repeat: bool,
        #[serde(flatten)]
        actions: ActionSet,
        #[serde(default)]
        status: Status,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_error: Option<String>,
    }

    impl From<StoredBinding> for ButtonBinding {
        fn from(row: StoredBinding) -> Self {
            let mut rejected = Vec::new();
            let pin = read(&mut rejected, "pin", row.pin, pin_number);
            let debounce = read(&mut rejected, "debounce", row.debounce, seconds);
            let hold = read(&mut rejected, "hold", row.hold, seconds).unwrap_or(DEFAULT_HOLD);

            Self {
                id: row.id,
                pin,
                name: row.name,
                enabled: row.enabled,
                pull_up: row.pull_up,
                debounce,
                hold,
                hold_repeat: row.hold_repeat,
                actions: row.actions,
                status: row.status,
                last_error: row.last_error,
                rejected,
            }
        }
    }

    impl From<ButtonBinding> for StoredBinding {
        fn from(binding: ButtonBinding) -> Self {
            let raw = |field: &str| {
                binding
                    .rejected
                    .iter()
                    .find(|bad| bad.field == field)
                    .map(|bad| bad.raw.clone())
            };
            let pin = raw("pin").unwrap_or_else(|| binding.pin.map_or(Value::Null, Value::from));
            let debounce = raw("debounce").unwrap_or_else(|| {
                binding
                    .debounce
                    .map_or(Value::Null, |d| Value::from(d.as_secs_f64()))
            });
            let hold = raw("hold").unwrap_or_else(|| Value::from(binding.hold.as_secs_f64()));

            Self {
                id: binding.id,
                pin,
                name: binding.name,
                enabled: binding.enabled,
                pull_up: binding.pull_up,
                debounce,
                hold,
                hold_repeat: binding.hold_repeat,
                actions: binding.actions,
                status: binding.status,
                last_error: binding.last_error,
            }
        }
    }

    fn read<T>(
        rejected: &mut Vec<RejectedField>,
        field: &'static str,
        raw: Value,
        parse: fn(&Value) -> Result<T, String>,
    ) -> Option<T> {
        if raw.is_null() {
            return None;
        }
        match parse(&raw) {
            Ok(value) => Some(value),
            Err(reason) => {
                rejected.push(RejectedField { field, raw, reason });
                None
            }
        }
    }

    fn pin_number(raw: &Value) -> Result<u32, String> {
        match raw {
            Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
        .ok_or_else(|| "not a pin number".to_string())
    }

    fn seconds(raw: &Value) -> Result<Duration, String> {
        let secs = match raw {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
        .ok_or_else(|| "not a number of seconds".to_string())?;

        Duration::try_from_secs_f64(secs).map_err(|e| e.to_string())
    }

    /// Short rendering of a raw value for error messages.
    pub fn describe(raw: &Value) -> String {
        match raw {
            Value::Number(n) => n.to_string(),
            Value::String(s) => format!("{s:?}"),
            other => serde_yaml::to_string(other)
                .map(|yaml| yaml.trim_end().to_string())
                .unwrap_or_default(),
        }
    }
}

/// Action lists accept either a YAML sequence or one delimited string.
mod action_list {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        One(String),
        Many(Vec<String>),
    }

    pub fn serialize<S: Serializer>(value: &[String], serializer: S) -> Result<S::Ok, S::Error> {
        value.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
        Ok(match Option::<Raw>::deserialize(deserializer)? {
            None => Vec::new(),
            Some(Raw::One(raw)) => super::parse_actions(&raw),
            Some(Raw::Many(list)) => list,
        })
    }
}
