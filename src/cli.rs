use clap::{Args, Parser, Subcommand, ValueEnum};
use std::{path::PathBuf, time::Duration};

use crate::{control::ButtonChanges, gpio::Edge};

/// gpio_monitord: runs actions when GPIO buttons are pressed, released or held
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// YAML settings file (default: standard locations, then built-in defaults)
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Log at debug level regardless of the settings file
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Run the monitoring daemon
    Run {
        /// Detach from the terminal
        #[arg(short = 'd', long = "daemonize")]
        daemonize: bool,
    },
    /// Ask the running daemon to re-read the button bindings
    Reload {
        /// Return right after setting the flag
        #[arg(long)]
        no_wait: bool,
    },
    /// Show every button and its status
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Show the detected platform and whether GPIO access is installed
    Detect,
    /// Grant the media-center user GPIO access (needs sudo)
    Install {
        /// Read the sudo password from the first line of stdin
        #[arg(long)]
        password_stdin: bool,
    },
    /// Add a button on a BCM pin
    Add {
        pin: u32,
        #[command(flatten)]
        settings: ButtonArgs,
        /// Store the button without enabling it
        #[arg(long)]
        disabled: bool,
    },
    /// Change a button's settings
    Edit {
        id: u32,
        /// Move the button to another BCM pin
        #[arg(long)]
        pin: Option<u32>,
        #[command(flatten)]
        settings: ButtonArgs,
    },
    /// Enable a button, disabling any other enabled button on its pin
    Enable { id: u32 },
    /// Disable a button
    Disable { id: u32 },
    /// Remove a button
    Delete { id: u32 },
    /// Run a button's actions once, without touching the pin
    Test {
        id: u32,
        #[arg(value_enum)]
        edge: EdgeArg,
    },
}

/// Button settings shared by `add` and `edit`.
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct ButtonArgs {
    /// Display name (empty clears it)
    #[arg(long)]
    pub name: Option<String>,
    /// Expect a pull-up, so pressed reads low
    #[arg(long)]
    pub pull_up: Option<bool>,
    /// Debounce time in seconds (0 turns it off)
    #[arg(long, value_parser = parse_seconds)]
    pub debounce: Option<Duration>,
    /// Seconds the button must stay pressed before a hold fires
    #[arg(long, value_parser = parse_seconds)]
    pub hold: Option<Duration>,
    /// Repeat the hold actions while the button stays pressed
    #[arg(long)]
    pub hold_repeat: Option<bool>,
    /// Actions when pressed, separated by `;` (empty clears them)
    #[arg(long)]
    pub on_press: Option<String>,
    /// Actions when released, separated by `;`
    #[arg(long)]
    pub on_release: Option<String>,
    /// Actions when held, separated by `;`
    #[arg(long)]
    pub on_hold: Option<String>,
}

impl ButtonArgs {
    pub fn into_changes(self, pin: Option<u32>) -> ButtonChanges {
        ButtonChanges {
            pin,
            name: self.name,
            pull_up: self.pull_up,
            debounce: self.debounce,
            hold: self.hold,
            hold_repeat: self.hold_repeat,
            on_press: self.on_press,
            on_release: self.on_release,
            on_hold: self.on_hold,
        }
    }
}

fn parse_seconds(raw: &str) -> Result<Duration, String> {
    let secs: f64 = raw
        .trim()
        .parse()
        .map_err(|_| format!("{raw:?} is not a number of seconds"))?;
    Duration::try_from_secs_f64(secs).map_err(|e| e.to_string())
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeArg {
    Press,
    Release,
    Hold,
}

impl From<EdgeArg> for Edge {
    fn from(arg: EdgeArg) -> Self {
        match arg {
            EdgeArg::Press => Edge::Press,
            EdgeArg::Release => Edge::Release,
            EdgeArg::Hold => Edge::Hold,
        }
    }
}
