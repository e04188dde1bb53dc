use std::{fs::File, io, sync::Arc};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use daemonize::Daemonize;
use log::{LevelFilter, warn};

use gpio_monitord::{
    app_context::{build_executor, open_flags, open_store},
    application::Application,
    cli::{Cli, Command},
    config::{Config, ConfigManager},
    control,
    dispatch::EventDispatcher,
    install::{Installer, SudoExecutor},
    logging,
    platform::Platform,
};

const DAEMON_OUTPUT: &str = "/var/tmp/gpio_monitord.log";

fn into_daemon() -> Result<()> {
    File::create(DAEMON_OUTPUT)
        .and_then(|out| Ok((out.try_clone()?, out)))
        .map_err(|e| anyhow!("{e}"))
        .and_then(|(stderr, stdout)| {
            Daemonize::new()
                .stdout(stdout)
                .stderr(stderr)
                .start()
                .map_err(|e| anyhow!("{e}"))
        })
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Fork before the runtime starts its worker threads.
    if let Command::Run { daemonize: true } = cli.command {
        into_daemon().context("Failed to daemonize")?;
    }

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build async runtime")?
        .block_on(run(cli))
}

async fn run(cli: Cli) -> Result<()> {
    #[cfg(feature = "tokio-console")]
    logging::init_console();

    let config_manager = ConfigManager::load(cli.config.clone()).await?;
    let config = config_manager.clone_config().await;
    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        config.level_filter()?
    };
    logging::init(level)?;

    match cli.command {
        Command::Run { .. } => {
            Application::builder()
                .with_config_manager(config_manager)
                .build()?
                .run()
                .await
        }
        Command::Reload { no_wait } => {
            let flags = open_flags(&config);
            let wait = (!no_wait).then(|| config.reload_wait());
            let outcome = control::reload(flags.as_ref(), &config.flag_name, wait).await?;
            println!("{outcome}");
            Ok(())
        }
        Command::Status { json } => {
            let lines = control::status(open_store(&config).as_ref()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&lines)?);
            } else if lines.is_empty() {
                println!("No buttons configured");
            } else {
                lines.iter().for_each(|line| println!("{line}"));
            }
            Ok(())
        }
        Command::Detect => {
            let installer = installer(&config, SudoExecutor::new());
            println!("{}", control::detect(&installer, Platform::detect()));
            Ok(())
        }
        Command::Install { password_stdin } => install(&config, password_stdin),
        Command::Add {
            pin,
            settings,
            disabled,
        } => {
            let store = open_store(&config);
            let changes = settings.into_changes(Some(pin));
            let change = control::add_button(store.as_ref(), pin, changes, !disabled).await?;
            println!("Added {change}");
            apply_change(&config).await
        }
        Command::Edit { id, pin, settings } => {
            let store = open_store(&config);
            let changes = settings.into_changes(pin);
            let change = control::edit_button(store.as_ref(), id, changes).await?;
            println!("Updated {change}");
            apply_change(&config).await
        }
        Command::Enable { id } => set_enabled(&config, id, true).await,
        Command::Disable { id } => set_enabled(&config, id, false).await,
        Command::Delete { id } => {
            let store = open_store(&config);
            let removed = control::delete_button(store.as_ref(), id).await?;
            println!("Deleted #{id} {}", removed.label());
            apply_change(&config).await
        }
        Command::Test { id, edge } => {
            let dispatcher = EventDispatcher::new(build_executor(config.executor));
            let store = open_store(&config);
            let outcome = control::test_button(store.as_ref(), &dispatcher, id, edge.into()).await?;
            println!(
                "Ran {} action(s), {} failed",
                outcome.ran, outcome.failures
            );
            if outcome.failures > 0 {
                anyhow::bail!("{} action(s) failed", outcome.failures);
            }
            Ok(())
        }
    }
}

async fn set_enabled(config: &Config, id: u32, enabled: bool) -> Result<()> {
    let store = open_store(config);
    let change = control::set_enabled(store.as_ref(), id, enabled).await?;
    println!("Updated {change}");
    apply_change(config).await
}

async fn apply_change(config: &Config) -> Result<()> {
    let flags = open_flags(config);
    match control::after_change(flags.as_ref(), config).await? {
        Some(outcome) => println!("{outcome}"),
        None => println!("Run `gpio_monitord reload` to apply the change"),
    }
    Ok(())
}

fn installer(config: &Config, executor: SudoExecutor) -> Installer {
    Installer::new(Arc::new(executor)).with_rules(&config.rules_source, &config.rules_path)
}

fn install(config: &Config, password_stdin: bool) -> Result<()> {
    let platform = Platform::detect();

    let executor = if password_stdin {
        let mut password = String::new();
        io::stdin()
            .read_line(&mut password)
            .context("Failed to read password from stdin")?;
        SudoExecutor::with_password(password.trim_end_matches(['\r', '\n']))
    } else {
        if platform.sudo_needs_password() {
            warn!("sudo on {platform} usually asks for a password, consider --password-stdin");
        }
        SudoExecutor::new()
    };

    let restart = installer(config, executor)
        .install(platform)
        .with_context(|| format!("GPIO install failed on {platform}"))?;

    if restart {
        println!("GPIO access installed on {platform}. Restart the system to apply it.");
    } else if platform.is_supported() {
        println!("{platform} needs no install");
    } else {
        println!("System not supported, GPIO is simulated");
    }
    Ok(())
}
