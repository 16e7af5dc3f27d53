//! Thrustlog - serial telemetry logger for motor/propeller test rigs
//!
//! Opens the rig's serial port, forwards operator throttle commands, and
//! records the raw line log and the structured sample table until the rig
//! reports that the test is complete.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use thrustlog_core::cli::{print_exit_codes, to_json, CliResult, ExitCodes, OutputFormat, StdinIntents};
use thrustlog_core::config::{config_file, AppConfig, Deployment, LoggingConfig};
use thrustlog_core::core::dispatcher::{NoIntents, PreReadyPolicy};
use thrustlog_core::core::protocol::SampleLayout;
use thrustlog_core::core::replay::{replay_file, ReplayError, ReplayReport};
use thrustlog_core::core::session::{MalformedPolicy, Session, SessionEvent, SessionReport};
use thrustlog_core::core::sink::{CsvSampleFile, Sinks};
use thrustlog_core::core::summary::{summarize_file, SummaryError};
use thrustlog_core::core::transport::{list_ports, CloseReason, SerialTransport};
use tokio::sync::broadcast::error::RecvError;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

/// Thrustlog CLI
#[derive(Parser, Debug)]
#[command(
    name = "thrustlog",
    version,
    about = "Serial telemetry logger and throttle console for motor/propeller test rigs",
    long_about = None
)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long, global = true, env = "THRUSTLOG_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Verbose diagnostics
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode (errors only)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Also write diagnostics to daily files in this directory
    #[arg(long, global = true)]
    trace_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one test session
    Run {
        /// Serial port name (e.g., COM3, /dev/ttyUSB0)
        #[arg(short, long)]
        port: Option<String>,

        /// Baud rate
        #[arg(short, long)]
        baud: Option<u32>,

        /// Rig deployment preset
        #[arg(short, long, value_enum)]
        deployment: Option<Deployment>,

        /// Raw log path
        #[arg(long)]
        raw_log: Option<PathBuf>,

        /// Sample table path
        #[arg(long)]
        samples: Option<PathBuf>,

        /// Commands typed before the rig is ready
        #[arg(long, value_enum)]
        pre_ready: Option<PreReadyPolicy>,

        /// Malformed telemetry reporting
        #[arg(long, value_enum)]
        malformed: Option<MalformedPolicy>,

        /// Do not read operator commands from stdin
        #[arg(long)]
        no_input: bool,
    },

    /// Regenerate a sample table from a raw log
    Replay {
        /// Raw log to replay
        raw_log: PathBuf,

        /// Output sample table
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Telemetry layout
        #[arg(short, long, value_enum)]
        layout: Option<SampleLayout>,

        /// Rig deployment preset
        #[arg(short, long, value_enum)]
        deployment: Option<Deployment>,
    },

    /// Summarize a sample table
    Summary {
        /// Sample table (defaults to the configured one)
        table: Option<PathBuf>,
    },

    /// List available serial ports
    ListPorts {
        /// Show detailed info
        #[arg(short, long)]
        detailed: bool,
    },

    /// Show the effective configuration
    Config {
        /// Write it to the config file
        #[arg(long)]
        save: bool,
    },

    /// Print the exit code table
    ExitCodes,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match AppConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => return finish(CliResult::from(&e)),
    };
    let _guard = init_tracing(&cli, &config.logging);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => return finish(CliResult::error(ExitCodes::INTERNAL_ERROR, e.to_string())),
    };

    let result = match &cli.command {
        Commands::Run { .. } => runtime.block_on(run(&cli, config)),
        Commands::Replay { .. } => runtime.block_on(replay(&cli, config)),
        Commands::Summary { table } => summary(&cli, table.clone().unwrap_or(config.files.samples)),
        Commands::ListPorts { detailed } => ports(&cli, *detailed),
        Commands::Config { save } => show_config(&cli, &config, *save),
        Commands::ExitCodes => {
            print_exit_codes();
            CliResult::success()
        }
    };

    finish(result)
}

fn finish(result: CliResult) -> ExitCode {
    if !result.is_success() {
        if let Some(msg) = result.message() {
            eprintln!("Error: {msg}");
        }
    }
    result.to_exit_code()
}

fn init_tracing(cli: &Cli, logging: &LoggingConfig) -> Option<WorkerGuard> {
    let level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        logging.level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let (file_layer, guard) = match cli.trace_dir.clone().or_else(|| logging.trace_dir.clone()) {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "thrustlog.trace");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer: Box<dyn Layer<Registry> + Send + Sync> = if logging.json {
                fmt::layer().json().with_writer(writer).boxed()
            } else {
                fmt::layer().with_ansi(false).with_writer(writer).boxed()
            };
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(file_layer)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .init();

    guard
}

async fn run(cli: &Cli, mut config: AppConfig) -> CliResult {
    let Commands::Run {
        port,
        baud,
        deployment,
        raw_log,
        samples,
        pre_ready,
        malformed,
        no_input,
    } = &cli.command
    else {
        return CliResult::error(ExitCodes::INTERNAL_ERROR, "not a run command");
    };

    if let Some(port) = port {
        config.serial.port.clone_from(port);
    }
    if let Some(baud) = baud {
        config.serial.baud_rate = *baud;
    }
    if let Some(deployment) = deployment {
        config.deployment = *deployment;
    }
    if let Some(path) = raw_log {
        config.files.raw_log.clone_from(path);
    }
    if let Some(path) = samples {
        config.files.samples.clone_from(path);
    }
    if let Some(policy) = pre_ready {
        config.protocol.pre_ready = *policy;
    }
    if let Some(policy) = malformed {
        config.protocol.malformed = *policy;
    }

    let session_config = config.session_config();
    tracing::info!(
        deployment = ?config.deployment,
        mode = ?session_config.mode,
        layout = ?session_config.layout,
        "starting {} v{}",
        thrustlog_core::NAME,
        thrustlog_core::VERSION
    );

    let layout = session_config.layout;
    let files = &config.files;
    let mut transport = SerialTransport::new(config.serial.clone());
    let (session, dispatcher) = match Session::connect(&mut transport, session_config, || {
        Sinks::create_files(&files.raw_log, &files.samples, layout)
    })
    .await
    {
        Ok(pair) => pair,
        Err(e) => return CliResult::from(&e),
    };

    let close = session.close_handle();
    if let Err(e) = ctrlc::set_handler(move || {
        close.close(CloseReason::Cancelled);
    }) {
        tracing::warn!(error = %e, "failed to install Ctrl-C handler");
    }

    let mut events = session.subscribe();
    let quiet = cli.quiet;
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SessionEvent::Malformed { line, error }) => {
                    eprintln!("malformed telemetry: {line} ({error})");
                }
                Ok(SessionEvent::StateChanged(state)) if !quiet => eprintln!("[{state}]"),
                Ok(SessionEvent::StateChanged(_)) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    });

    let (report, dispatch) = if config.deployment.operator_input() && !*no_input {
        match StdinIntents::spawn() {
            Ok(mut source) => session.run_with(dispatcher, &mut source).await,
            Err(e) => {
                tracing::warn!(error = %e, "operator input unavailable");
                session.run_with(dispatcher, &mut NoIntents).await
            }
        }
    } else {
        session.run_with(dispatcher, &mut NoIntents).await
    };

    match dispatch {
        Ok(summary) => tracing::debug!(
            sent = summary.sent.len(),
            rejected = summary.rejected,
            dropped = summary.dropped,
            end = ?summary.end,
            "dispatcher finished"
        ),
        Err(e) => tracing::warn!(error = %e, "dispatcher stopped"),
    }

    match report {
        Ok(report) => {
            if let Err(e) = print_session_report(cli.format, &report, &config) {
                return CliResult::error(ExitCodes::ERROR, e.to_string());
            }
            CliResult::from_report(&report)
        }
        Err(e) => CliResult::from(&e),
    }
}

fn print_session_report(
    format: OutputFormat,
    report: &SessionReport,
    config: &AppConfig,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", to_json(report)?),
        OutputFormat::Text => {
            let result = if report.completed { "complete" } else { "incomplete" };
            let elapsed = report.elapsed().num_milliseconds() as f64 / 1000.0;
            println!("Session {} on {}", report.id, report.link);
            println!("  result:    {result}");
            if let Some(reason) = &report.close_reason {
                println!("  closed:    {reason}");
            }
            println!("  duration:  {elapsed:.1} s");
            println!(
                "  lines:     {} (samples {}, malformed {}, non-monotonic {}, dropped {})",
                report.lines.lines,
                report.lines.samples,
                report.lines.malformed,
                report.lines.non_monotonic,
                report.lines.dropped
            );
            println!(
                "  bytes:     rx {} / tx {}",
                report.transport.bytes_received, report.transport.bytes_sent
            );
            println!("  raw log:   {}", config.files.raw_log.display());
            println!("  samples:   {}", config.files.samples.display());
        }
    }
    Ok(())
}

async fn replay(cli: &Cli, mut config: AppConfig) -> CliResult {
    let Commands::Replay {
        raw_log,
        output,
        layout,
        deployment,
    } = &cli.command
    else {
        return CliResult::error(ExitCodes::INTERNAL_ERROR, "not a replay command");
    };

    if let Some(deployment) = deployment {
        config.deployment = *deployment;
    }
    if let Some(layout) = layout {
        config.protocol.layout = Some(*layout);
    }
    let session_config = config.session_config();
    let output = output.clone().unwrap_or(config.files.samples);

    let mut table = match CsvSampleFile::create(&output, session_config.layout) {
        Ok(table) => table,
        Err(e) => return CliResult::error(ExitCodes::ERROR, e.to_string()),
    };

    match replay_file(raw_log, &session_config, &mut table).await {
        Ok(report) => match print_replay_report(cli.format, &report, &output) {
            Ok(()) => CliResult::success(),
            Err(e) => CliResult::error(ExitCodes::ERROR, e.to_string()),
        },
        Err(e) => {
            let code = match &e {
                ReplayError::Open { .. } => ExitCodes::FILE_NOT_FOUND,
                ReplayError::Framing(_) => ExitCodes::PROTOCOL_ERROR,
                ReplayError::Sink(_) => ExitCodes::ERROR,
            };
            CliResult::error(code, e.to_string())
        }
    }
}

fn print_replay_report(
    format: OutputFormat,
    report: &ReplayReport,
    output: &std::path::Path,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", to_json(report)?),
        OutputFormat::Text => {
            println!("Replayed {}", report.source.display());
            println!("  ready:     {}", report.ready);
            println!("  complete:  {}", report.completed);
            println!(
                "  lines:     {} (samples {}, malformed {})",
                report.lines.lines, report.lines.samples, report.lines.malformed
            );
            println!("  samples:   {}", output.display());
        }
    }
    Ok(())
}

fn summary(cli: &Cli, table: PathBuf) -> CliResult {
    let summary = match summarize_file(&table) {
        Ok(summary) => summary,
        Err(SummaryError::Io(e)) => return CliResult::from(e),
        Err(e) => {
            return CliResult::error(
                ExitCodes::PROTOCOL_ERROR,
                format!("{}: {e}", table.display()),
            )
        }
    };

    match cli.format {
        OutputFormat::Json => match to_json(&summary) {
            Ok(json) => println!("{json}"),
            Err(e) => return CliResult::error(ExitCodes::ERROR, e.to_string()),
        },
        OutputFormat::Text => {
            println!("{}", table.display());
            println!("{summary}");
        }
    }
    CliResult::success()
}

fn ports(cli: &Cli, detailed: bool) -> CliResult {
    let ports = match list_ports() {
        Ok(ports) => ports,
        Err(e) => return CliResult::from(&e),
    };

    if ports.is_empty() {
        if !cli.quiet {
            println!("No serial ports found.");
        }
        return CliResult::success();
    }

    match cli.format {
        OutputFormat::Json => {
            let json: Vec<serde_json::Value> = ports
                .iter()
                .map(|p| {
                    serde_json::json!({
                        "name": p.port_name,
                        "type": format!("{:?}", p.port_type)
                    })
                })
                .collect();
            match to_json(&json) {
                Ok(json) => println!("{json}"),
                Err(e) => return CliResult::error(ExitCodes::ERROR, e.to_string()),
            }
        }
        OutputFormat::Text => {
            if detailed {
                println!("Available Serial Ports:");
                println!("{:-<60}", "");
                for port in &ports {
                    println!("  {} [{:?}]", port.port_name, port.port_type);
                }
            } else {
                for port in &ports {
                    println!("{}", port.port_name);
                }
            }
        }
    }
    CliResult::success()
}

fn show_config(cli: &Cli, config: &AppConfig, save: bool) -> CliResult {
    if save {
        let Some(path) = cli.config.clone().or_else(config_file) else {
            return CliResult::error(ExitCodes::CONFIG_ERROR, "could not determine config directory");
        };
        if let Err(e) = config.save(&path) {
            return CliResult::from(&e);
        }
        if !cli.quiet {
            println!("Saved {}", path.display());
        }
        return CliResult::success();
    }

    let rendered = match cli.format {
        OutputFormat::Json => to_json(config).map_err(|e| e.to_string()),
        OutputFormat::Text => toml::to_string_pretty(config).map_err(|e| e.to_string()),
    };
    match rendered {
        Ok(text) => {
            println!("{text}");
            CliResult::success()
        }
        Err(e) => CliResult::error(ExitCodes::CONFIG_ERROR, e),
    }
}
