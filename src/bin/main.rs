use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use workbridge::config::{WorkbridgeSettings, load_config, load_user_config};
use workbridge::pool::WORKER_ID_ENV;
use workbridge::{
    FramedTransport, HandlerError, Progress, ProcessLauncher, ResponderConnection, WithHandshake,
    WorkerPool,
};

/// Request/response messaging between an orchestrator and its workers
#[derive(Parser)]
#[command(name = "workbridge")]
#[command(version)]
#[command(about = "Request/response messaging between an orchestrator and its workers")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve requests on stdin/stdout as a pool worker (echo handler)
    Worker,
    /// Spawn workers, broadcast one JSON request and print every worker's replies
    Broadcast {
        /// Number of workers (overrides the config file)
        #[arg(long)]
        workers: Option<usize>,

        /// Config file (default: the user config, if any)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Request payload as JSON
        request: String,
    },
}

fn init_logging() {
    // stderr only: stdout carries the framed transport in worker mode
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .target(env_logger::Target::Stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Worker => run_worker().await,
        Commands::Broadcast {
            workers,
            config,
            request,
        } => match run_broadcast(workers, config, &request).await {
            Ok(true) => ExitCode::SUCCESS,
            Ok(false) => ExitCode::FAILURE,
            Err(e) => {
                eprintln!("Error: {}", e);
                ExitCode::FAILURE
            }
        },
    }
}

/// Echo handler served by `workbridge worker`.
///
/// - `{"fail": "<message>"}` fails with that message
/// - `{"progress": n}` streams `{"progress": 1..=n}` before the echo
/// - anything else is echoed back
async fn echo(request: Value, progress: Progress) -> Result<Value, HandlerError> {
    log::debug!(
        target: "workbridge::worker",
        "Serving request {}",
        progress.correlation_id()
    );
    if let Some(message) = request.get("fail").and_then(Value::as_str) {
        return Err(HandlerError::new("WorkerError", message));
    }
    if let Some(steps) = request.get("progress").and_then(Value::as_u64) {
        for step in 1..=steps {
            progress.emit(json!({ "progress": step })).await;
        }
    }
    Ok(request)
}

async fn run_worker() -> ExitCode {
    let worker = std::env::var(WORKER_ID_ENV).unwrap_or_else(|_| "standalone".to_string());
    let responder = ResponderConnection::new(FramedTransport::stdio(), WithHandshake::new(echo));
    log::info!(target: "workbridge::worker", "Worker {} serving on stdio", worker);

    let reason = responder.closed().await;
    responder.close().await;
    log::info!(target: "workbridge::worker", "Worker {} stopped: {}", worker, reason);
    ExitCode::SUCCESS
}

/// Returns whether every worker answered successfully.
async fn run_broadcast(
    workers: Option<usize>,
    config: Option<PathBuf>,
    request: &str,
) -> Result<bool, Box<dyn std::error::Error>> {
    let settings = match config {
        Some(path) => load_config(&path)?,
        None => load_user_config()?.unwrap_or_else(WorkbridgeSettings::default),
    };
    let count = workers.unwrap_or(settings.pool.workers);
    if count == 0 {
        return Err("--workers must be at least 1".into());
    }
    let payload: Value = serde_json::from_str(request)?;

    let command = match settings.pool.worker_command.clone() {
        Some(command) => command,
        None => vec![
            std::env::current_exe()?.to_string_lossy().into_owned(),
            "worker".to_string(),
        ],
    };
    let pool = WorkerPool::with_settings(ProcessLauncher::new(command), settings.pool.to_settings()?);

    for _ in 0..count {
        if let Err(e) = pool.spawn().await {
            pool.shutdown_all().await;
            return Err(e.into());
        }
    }

    let results = pool.broadcast(payload).await;
    pool.shutdown_all().await;

    let all_succeeded = results.values().all(Result::is_ok);
    let report: BTreeMap<String, Value> = results
        .into_iter()
        .map(|(worker, result)| {
            let entry = match result {
                Ok(payloads) => json!({ "ok": payloads }),
                Err(e) => json!({ "error": e.to_string() }),
            };
            (worker.to_string(), entry)
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(all_succeeded)
}
