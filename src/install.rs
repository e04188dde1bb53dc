//! One-time privileged setup granting the daemon's user GPIO access.
//!
//! Distributions that do not expose GPIO to unprivileged users get a `gpio`
//! group, group membership for the media-center user and root, and a udev
//! rule handing the GPIO device nodes to that group. Every step is an
//! enumerated command turned into an argv vector; nothing is passed through a
//! shell.

use std::{
    fmt,
    io::Write,
    path::{Component, Path, PathBuf},
    process::{Command, Stdio},
    sync::Arc,
};

use log::{debug, info, warn};

use crate::{error::InstallError, platform::Platform};

pub const GPIO_GROUP: &str = "gpio";
pub const DEFAULT_RULES_SOURCE: &str = "/usr/share/gpio_monitord/99-gpio.rules";
pub const DEFAULT_RULES_PATH: &str = "/etc/udev/rules.d/99-gpio_monitord.GPIO.rules";

const MAX_NAME_LEN: usize = 32;

/// A privileged operation of the install sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElevatedCommand {
    /// Create the group unless it exists.
    EnsureGroup { name: String, system: bool },
    AddUserToGroup { user: String, group: String },
    /// Remove a file, succeeding if it is already gone.
    RemoveFile { path: PathBuf },
    CopyFile { src: PathBuf, dst: PathBuf },
}

impl ElevatedCommand {
    /// Program and arguments, after validating every user-controlled value.
    pub fn argv(&self) -> Result<Vec<String>, InstallError> {
        let argv = match self {
            ElevatedCommand::EnsureGroup { name, system } => {
                let mut argv = vec!["groupadd".to_string(), "-f".to_string()];
                if *system {
                    argv.push("-r".to_string());
                }
                argv.push(checked_name("group", name)?);
                argv
            }
            ElevatedCommand::AddUserToGroup { user, group } => vec![
                "adduser".to_string(),
                checked_name("user", user)?,
                checked_name("group", group)?,
            ],
            ElevatedCommand::RemoveFile { path } => vec![
                "rm".to_string(),
                "-f".to_string(),
                "--".to_string(),
                checked_path(path)?,
            ],
            ElevatedCommand::CopyFile { src, dst } => vec![
                "cp".to_string(),
                "--".to_string(),
                checked_path(src)?,
                checked_path(dst)?,
            ],
        };
        Ok(argv)
    }
}

impl fmt::Display for ElevatedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.argv() {
            Ok(argv) => write!(f, "{}", argv.join(" ")),
            Err(_) => write!(f, "{self:?}"),
        }
    }
}

/// Accepts POSIX-style account names: `[a-z_][a-z0-9_-]*`, at most 32 bytes.
fn checked_name(kind: &'static str, value: &str) -> Result<String, InstallError> {
    let mut chars = value.chars();
    let valid = value.len() <= MAX_NAME_LEN
        && chars
            .next()
            .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');

    if valid {
        Ok(value.to_string())
    } else {
        Err(InstallError::InvalidArgument {
            kind,
            value: value.to_string(),
        })
    }
}

/// Accepts absolute, normalised UTF-8 paths without control characters.
fn checked_path(path: &Path) -> Result<String, InstallError> {
    let invalid = || InstallError::InvalidArgument {
        kind: "path",
        value: path.display().to_string(),
    };

    let text = path.to_str().ok_or_else(invalid)?;
    let normalised = path.is_absolute()
        && path
            .components()
            .all(|c| matches!(c, Component::RootDir | Component::Normal(_)));

    if !normalised || text.chars().any(char::is_control) {
        return Err(invalid());
    }
    Ok(text.to_string())
}

/// Runs commands with elevated privileges. Returns captured stdout.
#[cfg_attr(test, mockall::automock)]
pub trait ElevatedExecutor: Send + Sync {
    fn run(&self, command: &ElevatedCommand) -> Result<String, InstallError>;
}

/// Elevates through `sudo`.
///
/// Without a password sudo runs non-interactively (`-n`) and fails instead
/// of prompting. With one, the password is written to sudo's stdin (`-S`).
#[derive(Default)]
pub struct SudoExecutor {
    password: Option<String>,
}

impl fmt::Debug for SudoExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SudoExecutor")
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

impl SudoExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_password(password: impl Into<String>) -> Self {
        Self {
            password: Some(password.into()),
        }
    }

    fn sudo_argv(&self, command: &ElevatedCommand) -> Result<Vec<String>, InstallError> {
        let mut argv = match self.password {
            Some(_) => vec!["-S".to_string(), "-p".to_string(), String::new()],
            None => vec!["-n".to_string()],
        };
        argv.push("--".to_string());
        argv.extend(command.argv()?);
        Ok(argv)
    }
}

impl ElevatedExecutor for SudoExecutor {
    fn run(&self, command: &ElevatedCommand) -> Result<String, InstallError> {
        let argv = self.sudo_argv(command)?;
        let launch = |source| InstallError::Launch {
            program: "sudo".to_string(),
            source,
        };

        let mut child = Command::new("sudo")
            .args(&argv)
            .stdin(if self.password.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(launch)?;

        if let (Some(password), Some(mut stdin)) = (&self.password, child.stdin.take()) {
            writeln!(stdin, "{password}").map_err(launch)?;
        }

        let output = child.wait_with_output().map_err(launch)?;
        if !output.status.success() {
            return Err(InstallError::CommandFailed {
                command: command.to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Performs the one-time GPIO access setup for a platform.
pub struct Installer {
    executor: Arc<dyn ElevatedExecutor>,
    rules_source: PathBuf,
    rules_path: PathBuf,
}

impl Installer {
    pub fn new(executor: Arc<dyn ElevatedExecutor>) -> Self {
        Self {
            executor,
            rules_source: PathBuf::from(DEFAULT_RULES_SOURCE),
            rules_path: PathBuf::from(DEFAULT_RULES_PATH),
        }
    }

    /// Overrides the udev rule shipped with the package and its install location.
    pub fn with_rules(mut self, source: impl Into<PathBuf>, path: impl Into<PathBuf>) -> Self {
        self.rules_source = source.into();
        self.rules_path = path.into();
        self
    }

    /// The elevated sequence for `platform`, empty when none is needed.
    pub fn commands(&self, platform: Platform) -> Vec<ElevatedCommand> {
        let Some(user) = platform.install_user() else {
            return Vec::new();
        };

        vec![
            ElevatedCommand::EnsureGroup {
                name: GPIO_GROUP.to_string(),
                system: true,
            },
            ElevatedCommand::AddUserToGroup {
                user: user.to_string(),
                group: GPIO_GROUP.to_string(),
            },
            ElevatedCommand::AddUserToGroup {
                user: "root".to_string(),
                group: GPIO_GROUP.to_string(),
            },
            ElevatedCommand::RemoveFile {
                path: self.rules_path.clone(),
            },
            ElevatedCommand::CopyFile {
                src: self.rules_source.clone(),
                dst: self.rules_path.clone(),
            },
        ]
    }

    /// Runs the setup. Returns whether a restart is needed for it to apply.
    ///
    /// Safe to repeat. The first failing command aborts the sequence and is
    /// returned as is.
    pub fn install(&self, platform: Platform) -> Result<bool, InstallError> {
        match platform {
            Platform::Unsupported => {
                warn!("Unsupported system, GPIO is simulated and nothing is installed");
                return Ok(false);
            }
            Platform::LibreElec | Platform::Raspbian => {
                info!("{platform} grants GPIO access natively, nothing to install");
                return Ok(false);
            }
            Platform::Osmc | Platform::Xbian => {}
        }

        let commands = self.commands(platform);
        for command in &commands {
            command.argv()?;
        }

        for command in &commands {
            info!("Running elevated: {command}");
            let output = self.executor.run(command)?;
            if !output.is_empty() {
                debug!("{output}");
            }
        }

        info!("GPIO access installed for {platform}, restart required");
        Ok(platform.restart_required())
    }

    /// True when the platform needs no install or its udev rule is in place.
    pub fn is_installed(&self, platform: Platform) -> bool {
        !platform.needs_install() || self.rules_path.exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::Sequence;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use std::sync::Mutex;

    fn installer(executor: impl ElevatedExecutor + 'static) -> Installer {
        Installer::new(Arc::new(executor)).with_rules("/opt/gpio/99-gpio.rules", "/etc/udev/rules.d/99-test.GPIO.rules")
    }

    #[derive(Default)]
    struct RecordingExecutor {
        ran: Mutex<Vec<Vec<String>>>,
    }

    impl ElevatedExecutor for Arc<RecordingExecutor> {
        fn run(&self, command: &ElevatedCommand) -> Result<String, InstallError> {
            self.ran.lock().unwrap().push(command.argv()?);
            Ok(String::new())
        }
    }

    #[test]
    fn osmc_runs_the_full_sequence_in_order() {
        let recorder = Arc::new(RecordingExecutor::default());
        let restart = installer(recorder.clone()).install(Platform::Osmc).unwrap();

        assert!(restart);
        let ran = recorder.ran.lock().unwrap().clone();
        let expected: Vec<Vec<String>> = [
            vec!["groupadd", "-f", "-r", "gpio"],
            vec!["adduser", "osmc", "gpio"],
            vec!["adduser", "root", "gpio"],
            vec!["rm", "-f", "--", "/etc/udev/rules.d/99-test.GPIO.rules"],
            vec![
                "cp",
                "--",
                "/opt/gpio/99-gpio.rules",
                "/etc/udev/rules.d/99-test.GPIO.rules",
            ],
        ]
        .into_iter()
        .map(|argv| argv.into_iter().map(String::from).collect())
        .collect();
        assert_eq!(ran, expected);
    }

    #[test]
    fn repeated_install_issues_the_same_commands() {
        let recorder = Arc::new(RecordingExecutor::default());
        let installer = installer(recorder.clone());

        assert!(installer.install(Platform::Xbian).unwrap());
        assert!(installer.install(Platform::Xbian).unwrap());

        let ran = recorder.ran.lock().unwrap().clone();
        assert_eq!(ran.len(), 10);
        assert_eq!(ran[..5], ran[5..]);
        assert_eq!(ran[1][1], "xbian");
    }

    #[test]
    fn native_and_unsupported_platforms_touch_nothing() {
        let mut executor = MockElevatedExecutor::new();
        executor.expect_run().never();
        let installer = installer(executor);

        for platform in [Platform::LibreElec, Platform::Raspbian, Platform::Unsupported] {
            assert!(!installer.install(platform).unwrap(), "{platform}");
        }
    }

    #[test]
    fn first_failure_aborts_and_surfaces() {
        let mut seq = Sequence::new();
        let mut executor = MockElevatedExecutor::new();
        executor
            .expect_run()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(String::new()));
        executor
            .expect_run()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|command| {
                Err(InstallError::CommandFailed {
                    command: command.to_string(),
                    status: "exit status: 1".into(),
                    stderr: "adduser: The user `osmc' does not exist.".into(),
                })
            });

        let err = installer(executor).install(Platform::Osmc).unwrap_err();
        assert!(matches!(err, InstallError::CommandFailed { ref command, .. } if command == "adduser osmc gpio"));
    }

    #[test]
    fn invalid_rule_path_is_rejected_before_anything_runs() {
        let mut executor = MockElevatedExecutor::new();
        executor.expect_run().never();
        let installer = Installer::new(Arc::new(executor))
            .with_rules("/opt/gpio/99-gpio.rules", "/etc/udev/rules.d/../../passwd");

        let err = installer.install(Platform::Osmc).unwrap_err();
        assert!(matches!(err, InstallError::InvalidArgument { kind: "path", .. }));
    }

    #[test]
    fn argument_validation() {
        assert!(checked_name("user", "osmc").is_ok());
        assert!(checked_name("user", "_svc-1").is_ok());
        for bad in ["", "Root", "-rf", "a b", "x;reboot", "$(id)"] {
            assert!(checked_name("user", bad).is_err(), "{bad:?}");
        }

        assert!(checked_path(Path::new("/etc/udev/rules.d/99.rules")).is_ok());
        for bad in ["relative/file", "/etc/../shadow", "/tmp/a\nb"] {
            assert!(checked_path(Path::new(bad)).is_err(), "{bad:?}");
        }
    }

    #[test]
    fn sudo_argv_depends_on_password() {
        let command = ElevatedCommand::AddUserToGroup {
            user: "xbian".into(),
            group: "gpio".into(),
        };

        assert_eq!(
            SudoExecutor::new().sudo_argv(&command).unwrap(),
            vec!["-n", "--", "adduser", "xbian", "gpio"]
        );
        assert_eq!(
            SudoExecutor::with_password("raspberry").sudo_argv(&command).unwrap(),
            vec!["-S", "-p", "", "--", "adduser", "xbian", "gpio"]
        );
        assert!(!format!("{:?}", SudoExecutor::with_password("raspberry")).contains("raspberry"));
    }

    #[test]
    fn is_installed_checks_the_rule_file() {
        let dir = tempfile::tempdir().unwrap();
        let rule = dir.path().join("99-test.GPIO.rules");
        let installer = Installer::new(Arc::new(MockElevatedExecutor::new())).with_rules("/opt/src.rules", &rule);

        assert!(installer.is_installed(Platform::Raspbian));
        assert!(!installer.is_installed(Platform::Osmc));
        std::fs::write(&rule, "rule").unwrap();
        assert!(installer.is_installed(Platform::Osmc));
    }

    proptest! {
        #[test]
        fn accepted_names_are_shell_inert(name in "\\PC{0,40}") {
            if let Ok(name) = checked_name("user", &name) {
                prop_assert!(name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'));
                prop_assert!(!name.starts_with('-'));
            }
        }
    }
}
