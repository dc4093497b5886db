// SPDX-License-Identifier: Apache-2.0

use clap::{Parser, ValueEnum};
use std::error::Error;
use std::io;
use std::process::ExitCode;
use std::time::Duration;
use tokio::select;
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::metadata::LevelFilter;
use tracing::{error, info, warn};
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_log::LogTracer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

use logsql::init::agent::{Agent, run_ingest, run_reset};
use logsql::init::args::{IngestArgs, ResetArgs, StartArgs};
use logsql::init::wait;

type BoxError = Box<dyn Error + Send + Sync>;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, clap::Subcommand)]
enum Commands {
    /// Tail every container on the host
    Start(Box<StartArgs>),

    /// Tail one container in the foreground
    Ingest(Box<IngestArgs>),

    /// Delete the offset files of all containers
    Reset(ResetArgs),

    /// Return version
    Version,
}

#[derive(Debug, Parser)]
#[command(name = "logsql")]
#[command(bin_name = "logsql")]
#[command(version, about, long_about = None)]
#[command(subcommand_required = true)]
struct Arguments {
    #[arg(
        value_enum,
        long,
        global = true,
        env = "LOGSQL_LOG_FORMAT",
        default_value = "text"
    )]
    /// Log format
    log_format: LogFormatArg,

    #[arg(long, global = true, env = "LOGSQL_DEBUG", default_value = "false")]
    /// Log at debug level unless RUST_LOG says otherwise
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, ValueEnum)]
pub enum LogFormatArg {
    Text,
    Json,
}

fn main() -> ExitCode {
    let opt = Arguments::parse();

    if let Some(Commands::Version) = opt.command {
        println!("{}", get_version());
        return ExitCode::SUCCESS;
    }

    let _guard = match setup_logging(&opt.log_format, opt.debug) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("ERROR: failed to setup logging: {}", e);
            return ExitCode::from(1);
        }
    };

    match opt.command {
        Some(Commands::Start(args)) => match run_supervisor(args) {
            Ok(Some(signo)) => ExitCode::from((128 + signo) as u8),
            Ok(None) => ExitCode::SUCCESS,
            Err(e) => {
                error!(error = e, "Failed to run supervisor.");
                ExitCode::from(1)
            }
        },
        Some(Commands::Ingest(args)) => match run_ingest(&args) {
            Ok(stats) => {
                info!(
                    batches = stats.batches,
                    records = stats.records,
                    lines = stats.lines,
                    "Ingestion finished"
                );
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!(container = %args.container_id, error = e, "Ingestion failed.");
                ExitCode::from(1)
            }
        },
        Some(Commands::Reset(args)) => match run_reset(&args) {
            Ok(removed) => {
                info!(removed = removed.len(), "Offset files reset");
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!(error = e, "Failed to reset offset files.");
                ExitCode::from(1)
            }
        },
        _ => {
            // unreachable with a required subcommand
            error!("Must specify a command");
            ExitCode::from(2)
        }
    }
}

/// Run until a termination signal arrives. Returns the signal number, or
/// `None` if the supervisor stopped by itself.
#[tokio::main]
async fn run_supervisor(args: Box<StartArgs>) -> Result<Option<i32>, BoxError> {
    let mut join_set = JoinSet::new();

    let cancel_token = CancellationToken::new();
    {
        let token = cancel_token.clone();
        join_set.spawn(async move { Agent::new(args).run(token).await });
    }

    let signo = select! {
        signo = signal_wait() => {
            let signo = signo?;
            info!(signal = signo, "Shutdown signal received.");
            cancel_token.cancel();
            Some(signo)
        },
        e = wait::wait_for_any_task(&mut join_set) => {
            match e {
                Ok(()) => warn!("Unexpected early exit of supervisor."),
                Err(e) => return Err(e),
            }
            None
        },
    };

    // Workers run on their own threads and are not waited for.
    wait::wait_for_tasks_with_timeout(&mut join_set, SHUTDOWN_TIMEOUT).await?;

    Ok(signo)
}

type LoggerGuard = tracing_appender::non_blocking::WorkerGuard;

fn setup_logging(log_format: &LogFormatArg, debug: bool) -> Result<LoggerGuard, BoxError> {
    LogTracer::init()?;

    let (non_blocking_writer, guard) = tracing_appender::non_blocking(std::io::stdout());

    let level = if debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env()?
        .add_directive("notify=warn".parse()?);

    if *log_format == LogFormatArg::Json {
        let app_name = format!("{}-{}", env!("CARGO_PKG_NAME"), get_version());
        let bunyan_formatting_layer = BunyanFormattingLayer::new(app_name, non_blocking_writer);

        let subscriber = Registry::default()
            .with(filter)
            .with(JsonStorageLayer)
            .with(bunyan_formatting_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        use std::io::IsTerminal;

        let use_ansi = io::stdout().is_terminal();

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_target(false)
            .with_thread_names(true)
            .with_level(true)
            .with_ansi(use_ansi)
            .compact();

        let subscriber = Registry::default().with(filter).with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(guard)
}

async fn signal_wait() -> io::Result<i32> {
    let mut sig_term = signal(SignalKind::terminate())?;
    let mut sig_int = signal(SignalKind::interrupt())?;

    let signo = select! {
        _ = sig_term.recv() => libc::SIGTERM,
        _ = sig_int.recv() => libc::SIGINT,
    };
    Ok(signo)
}

fn get_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
