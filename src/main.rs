//! Remote emulator
//!
//! Runs both bus personalities against a simulated master and accepts
//! commands either from an interactive terminal console or, with
//! `--headless`, line by line from stdin.
//!
//! ```bash
//! # Interactive console, logs go to rusty_remote.log
//! rusty_remote --config configs/milight.json
//!
//! # Scripted
//! echo "general_on" | rusty_remote --headless
//! ```

use std::fs::File;
use std::io::BufRead;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use rusty_remote::console::run_console;
use rusty_remote::system_config::EmulatorConfig;
use rusty_remote::systems::simulated_remote::SimulatedRemote;

#[derive(Parser)]
#[command(name = "rusty_remote")]
#[command(version)]
#[command(about = "Two-personality I2C remote control emulator")]
struct Cli {
    /// JSON configuration; the stock two-bus layout is used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Read commands from stdin instead of opening the console
    #[arg(long)]
    headless: bool,

    /// Where log output goes while the console owns the terminal
    #[arg(long, default_value = "rusty_remote.log")]
    log_file: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(cli: &Cli) -> Result<()> {
    let default_level = if cli.verbose { "debug" } else { "info" };
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level));

    if !cli.headless {
        let file = File::create(&cli.log_file)
            .with_context(|| format!("creating log file {}", cli.log_file.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

fn load_config(cli: &Cli) -> Result<EmulatorConfig> {
    match &cli.config {
        Some(path) => {
            let path = path.to_string_lossy();
            EmulatorConfig::from_json_file(&path)
                .with_context(|| format!("loading configuration {}", path))
        }
        None => Ok(EmulatorConfig::default()),
    }
}

fn run_headless(remote: &SimulatedRemote, runtime: &tokio::runtime::Runtime) -> Result<()> {
    let dispatcher = remote.dispatcher();
    let stdin = std::io::stdin();

    for line in stdin.lock().lines() {
        let line = line.context("reading stdin")?;
        let command = line.trim();
        match command {
            "" => continue,
            "quit" | "exit" => break,
            _ => runtime.block_on(dispatcher.dispatch_and_log(command)),
        }
    }

    for event in remote.latched_events() {
        info!("{}", rusty_remote::console::describe_event(remote, &event));
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    let config = load_config(&cli)?;
    let console_config = config.console;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting async runtime")?;

    let mut remote = SimulatedRemote::new(config).context("building emulator")?;
    remote.start();

    let result = if cli.headless {
        run_headless(&remote, &runtime)
    } else {
        run_console(&remote, runtime.handle().clone(), console_config)
    };

    remote.stop();
    result
}
