//! CLI entry point for scandaq.
//!
//! Drives the scanning rig from the command line:
//! - `sequence` runs the configured acquisition sequence to completion
//! - `dump` performs a one-shot 128x16 dump collection
//! - `params` sweeps all motor parameters once
//! - `upload` sends a stored-program file to the motor controller
//! - `send` fires a single command at either instrument
//!
//! Ports, polling and the sequence definition come from
//! `config/default.toml` (or `--config <name>` for `config/<name>.toml`).

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use scandaq::config::Settings;
use scandaq::engine::{Engine, EngineEvent};
use scandaq::sequence::SequenceOutcome;
use std::path::PathBuf;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "scandaq")]
#[command(about = "Scanning-rig protocol engine", long_about = None)]
struct Cli {
    /// Configuration name (loads config/<name>.toml)
    #[arg(long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the configured acquisition sequence
    Sequence,
    /// One-shot dump collection (128 records of 16 words)
    Dump,
    /// Sweep all motor parameters once and print them
    Params,
    /// Upload a stored-program file to the motor controller
    Upload {
        /// Path to the program .txt file
        file: PathBuf,
        /// Program name on the controller (max 8 characters)
        #[arg(long)]
        name: String,
    },
    /// Send a single command to one instrument
    Send {
        /// Which instrument to address
        #[arg(value_enum)]
        target: Target,
        /// Command text, without framing
        command: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Target {
    Motor,
    Acq,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::new(cli.config.as_deref())?;

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(&settings.log_level),
    )
    .init();

    let (engine, events) = build_engine(&settings).await?;

    match cli.command {
        Commands::Sequence => run_sequence(&engine, events, &settings).await,
        Commands::Dump => {
            let records = engine.collect_dump_once().await?;
            println!("Dump complete: {records} records persisted");
            Ok(())
        }
        Commands::Params => {
            let sweep = engine.poll_parameters().await?;
            for update in sweep {
                println!("P{:02}  X: {}  Y: {}", update.index, update.x, update.y);
            }
            Ok(())
        }
        Commands::Upload { file, name } => run_upload(&engine, events, &file, &name).await,
        Commands::Send { target, command } => {
            match target {
                Target::Motor => {
                    let response = engine.send_motor_command(&command).await?;
                    println!("{response}");
                }
                Target::Acq => {
                    let line = engine.transact_acq_command(&command).await?;
                    println!("{line}");
                }
            }
            Ok(())
        }
    }
}

#[cfg(all(feature = "instrument_serial", feature = "storage_csv"))]
async fn build_engine(
    settings: &Settings,
) -> Result<(Engine, mpsc::UnboundedReceiver<EngineEvent>)> {
    use scandaq::instrument::{AcqClient, MotorClient};
    use scandaq::link::Link;
    use scandaq::storage::{CsvSink, PersistenceSink};
    use scandaq::transport::{ByteTransport, SerialTransport};
    use std::sync::Arc;

    let motor_transport = SerialTransport::new(&settings.links.motor_port, settings.links.baud_rate)
        .with_timeout(settings.read_timeout());
    let acq_transport = SerialTransport::new(&settings.links.acq_port, settings.links.baud_rate)
        .with_timeout(settings.read_timeout());
    motor_transport.open().await?;
    acq_transport.open().await?;

    let motor = Arc::new(
        MotorClient::new(Arc::new(motor_transport), Link::new("motor"))
            .with_address(settings.links.motor_address),
    );
    let acq = Arc::new(AcqClient::new(Arc::new(acq_transport), Link::new("acq")));
    let sink: Arc<dyn PersistenceSink> = Arc::new(CsvSink::new(&settings.storage.output_dir));

    Ok(Engine::new(motor, acq, sink, settings.poll.clone()))
}

#[cfg(not(all(feature = "instrument_serial", feature = "storage_csv")))]
async fn build_engine(
    _settings: &Settings,
) -> Result<(Engine, mpsc::UnboundedReceiver<EngineEvent>)> {
    anyhow::bail!(
        "the scandaq binary needs the 'instrument_serial' and 'storage_csv' features"
    )
}

async fn run_sequence(
    engine: &Engine,
    mut events: mpsc::UnboundedReceiver<EngineEvent>,
    settings: &Settings,
) -> Result<()> {
    engine.start_sequence(settings.sequence_config())?;
    println!("Sequence started; Ctrl+C stops it gracefully");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("Stop requested, finishing current step...");
                engine.stop_sequence();
            }
            event = events.recv() => match event {
                Some(EngineEvent::SequenceFinished(SequenceOutcome::Finished)) => {
                    println!("Sequence finished");
                    return Ok(());
                }
                Some(EngineEvent::SequenceFinished(SequenceOutcome::Cancelled)) => {
                    println!("Sequence cancelled");
                    return Ok(());
                }
                Some(EngineEvent::SequenceError(message)) => {
                    anyhow::bail!("sequence failed: {message}");
                }
                Some(_) => {}
                None => return Ok(()),
            },
        }
    }
}

async fn run_upload(
    engine: &Engine,
    mut events: mpsc::UnboundedReceiver<EngineEvent>,
    file: &std::path::Path,
    name: &str,
) -> Result<()> {
    use scandaq::upload::UploadProgress;

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let EngineEvent::UploadProgress(progress) = event {
                match progress {
                    UploadProgress::FileRead { bytes } => println!("File read: {bytes} bytes"),
                    UploadProgress::HeaderAccepted { code } => {
                        println!("Header accepted (code {code})")
                    }
                    UploadProgress::BlockSent { number, total } => {
                        println!("Block {number}/{total} transmitted")
                    }
                    UploadProgress::Completed => println!("Upload complete"),
                }
            }
        }
    });

    let result = engine.upload_program(file, name).await;
    printer.abort();
    result?;
    Ok(())
}
