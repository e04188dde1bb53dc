//! Log initialisation.

use anyhow::{Result, anyhow};
use log::LevelFilter;
use syslog::{BasicLogger, Facility, Formatter3164};

pub const PROCESS_NAME: &str = "gpio_monitord";

/// Routes the `log` facade to the local syslog daemon.
///
/// Without a reachable syslog socket, logging stays off and a one-line notice
/// goes to stderr; the program keeps running.
pub fn init(level: LevelFilter) -> Result<()> {
    let formatter = Formatter3164 {
        facility: Facility::LOG_DAEMON,
        hostname: None,
        process: PROCESS_NAME.into(),
        pid: std::process::id(),
    };

    match syslog::unix(formatter) {
        Ok(logger) => log::set_boxed_logger(Box::new(BasicLogger::new(logger)))
            .map(|()| log::set_max_level(level))
            .map_err(|e| anyhow!("{e}")),
        Err(e) => {
            eprintln!("{PROCESS_NAME}: syslog unavailable ({e}), logging disabled");
            Ok(())
        }
    }
}

/// Serves task diagnostics to `tokio-console`.
#[cfg(feature = "tokio-console")]
pub fn init_console() {
    console_subscriber::init();
}
