mod actuator;
mod buffer;
mod config;
mod controller;
mod gpio;
mod journal;
mod mode;
mod model;
mod party;
mod remote;
mod sensors;
mod sync;
mod transport;

use std::io;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::thread;

use clap::Parser;
use log::{info, warn};

use crate::actuator::ActuatorRegistry;
use crate::buffer::SqliteBuffer;
use crate::config::Config;
use crate::controller::{Collaborators, Controller};
use crate::journal::DailyJournal;
use crate::mode::{Mode, ModeState};
use crate::party::{PartyFrame, PartyMode};
use crate::remote::{RemoteStore, SqliteRemote};
use crate::sensors::{SimulatedEnvironment, SimulatedSecurity};
use crate::sync::SyncEngine;
use crate::transport::NullTransport;

/// Home security and automation controller.
#[derive(Parser)]
#[command(name = "warden")]
struct Args {
    /// Config file path. Default: `~/.warden/config.toml`.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the configured data directory.
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let Some(config_path) = args.config.or_else(Config::default_path) else {
        eprintln!("Could not determine home directory.");
        process::exit(1);
    };
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            process::exit(1);
        }
    };

    let Some(data_dir) = args.data_dir.or_else(|| config.data_dir()) else {
        eprintln!("Could not determine data directory.");
        process::exit(1);
    };
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        eprintln!("Failed to create data directory {}: {e}", data_dir.display());
        process::exit(1);
    }

    // Every required device must resolve to an output — fatal otherwise.
    let registry = match ActuatorRegistry::new(&config) {
        Ok(registry) => Arc::new(registry),
        Err(e) => {
            eprintln!("Failed to initialise actuators: {e}");
            process::exit(1);
        }
    };

    let buffer = match SqliteBuffer::open(&data_dir.join("warden_local.db")) {
        Ok(buffer) => Arc::new(buffer),
        Err(e) => {
            eprintln!("Failed to open local buffer: {e}");
            process::exit(1);
        }
    };

    // A broken or missing remote disables sync; it never aborts startup.
    let remote: Option<Box<dyn RemoteStore>> = match &config.sync.remote_path {
        Some(path) => match SqliteRemote::open(path) {
            Ok(remote) => Some(Box::new(remote)),
            Err(e) => {
                warn!("remote row store unavailable; cloud sync disabled: {e}");
                None
            }
        },
        None => {
            warn!("no remote row store configured; cloud sync disabled");
            None
        }
    };

    let journal = match DailyJournal::new(data_dir.join("logs")) {
        Ok(journal) => Arc::new(journal),
        Err(e) => {
            eprintln!("Failed to initialise daily log: {e}");
            process::exit(1);
        }
    };

    let modes = Arc::new(ModeState::new(Mode::Home));
    let frames: Vec<PartyFrame> = config.party.frames.iter().map(PartyFrame::from).collect();
    let party = Arc::new(PartyMode::new(Arc::clone(&registry), frames));
    let sync = Arc::new(SyncEngine::start(Arc::clone(&buffer), remote, &config.sync));

    // The wire-level pub/sub client is an external collaborator; without
    // one wired in, telemetry publishes are dropped and no remote
    // commands arrive.
    let transport = Arc::new(NullTransport);
    info!("no transport adapter wired; running with local telemetry only");

    let environment = Box::new(SimulatedEnvironment::new());
    let security = Box::new(SimulatedSecurity::new(
        Arc::clone(&modes),
        Arc::clone(&registry),
        None,
    ));

    let controller = Controller::new(
        &config,
        Collaborators {
            modes,
            registry,
            party,
            sync,
            journal,
            transport,
            environment,
            security,
        },
    );

    // Drain cleanly when stdin closes (Ctrl-D, or service teardown).
    let watcher = Arc::clone(&controller);
    thread::spawn(move || {
        let _ = io::copy(&mut io::stdin().lock(), &mut io::sink());
        info!("stdin closed; shutting down");
        watcher.shutdown();
    });

    controller.run();
}
