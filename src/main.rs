mod api;
mod diagnostics;
mod installer;
mod manager;
mod runtime;
mod schedule;

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use anyhow::{Context, Result, anyhow};
use chrono::Local;
use clap::{ArgAction, Parser, ValueEnum};
use simplelog::{ConfigBuilder, LevelFilter, WriteLogger};

use crate::api::{ApiServer, ApiServerConfig, Registration};
use crate::installer::catalog::{CatalogInstaller, load_repository};
use crate::manager::ExtensionManager;
use crate::manager::settings::SettingsStore;
use crate::runtime::{Event, run_event_loop};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliLogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<CliLogLevel> for LevelFilter {
    fn from(value: CliLogLevel) -> Self {
        match value {
            CliLogLevel::Error => LevelFilter::Error,
            CliLogLevel::Warn => LevelFilter::Warn,
            CliLogLevel::Info => LevelFilter::Info,
            CliLogLevel::Debug => LevelFilter::Debug,
            CliLogLevel::Trace => LevelFilter::Trace,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "extension-manager",
    version,
    about = "Settings and daily update scheduling for media-control extensions"
)]
struct Cli {
    /// Config document holding the persisted settings.
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    /// Repository file listing extension categories.
    #[arg(long, default_value = "repository.json")]
    repository: PathBuf,

    #[arg(long, default_value = "0.0.0.0")]
    api_bind: String,

    #[arg(long, default_value_t = 8199)]
    api_port: u16,

    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    mdns_enabled: bool,

    #[arg(long, default_value = "extension-manager")]
    mdns_instance: String,

    /// Print the resolved configuration and next update check, then exit.
    #[arg(long)]
    check: bool,

    #[arg(long, value_enum, default_value_t = CliLogLevel::Info)]
    log_level: CliLogLevel,

    /// Write logs to this file instead of stderr.
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level.into(), cli.log_file.as_deref())?;

    let registration = Registration::for_host(&api::detect_hostname());
    let store = SettingsStore::new(&cli.config);
    let settings = store
        .load()
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    let repository = load_repository(&cli.repository)
        .with_context(|| format!("failed to load {}", cli.repository.display()))?;

    if cli.check {
        diagnostics::run_diagnostics(&registration, &store, &settings, &repository, Local::now());
        return Ok(());
    }

    log::info!(
        "{} v{} starting",
        registration.display_name,
        registration.display_version
    );

    let (events_tx, events_rx) = mpsc::channel::<Event>();
    let api_server = ApiServer::start(
        ApiServerConfig {
            bind_addr: cli.api_bind.clone(),
            port: cli.api_port,
            mdns_enabled: cli.mdns_enabled,
            mdns_instance: cli.mdns_instance,
            registration,
        },
        events_tx.clone(),
    )
    .with_context(|| {
        format!(
            "failed to start settings API at {}:{}",
            cli.api_bind, cli.api_port
        )
    })?;

    let installer = CatalogInstaller::new(
        repository,
        Box::new(move |event| {
            let _ = events_tx.send(Event::from(event));
        }),
    );
    installer.announce();

    let mut manager = ExtensionManager::new(installer, api_server.status_sink(), store, settings);
    run_event_loop(&mut manager, &events_rx);

    drop(api_server);
    Ok(())
}

fn init_logging(level: LevelFilter, log_file: Option<&Path>) -> Result<()> {
    let config = ConfigBuilder::new().set_time_format_rfc3339().build();
    let result = match log_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("unable to create log file {}", path.display()))?;
            WriteLogger::init(level, config, file)
        }
        None => WriteLogger::init(level, config, std::io::stderr()),
    };
    result.map_err(|err| anyhow!("failed to initialize logging: {err}"))
}
