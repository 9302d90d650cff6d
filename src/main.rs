//! wasm-sandbox CLI entry point.
//!
//! Runs one exported function of a WebAssembly module inside the sandbox and
//! prints its results as JSON on stdout. Logs go to stderr.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use wasm_sandbox_common::{ConfigFile, ErrorClass, LogFormat, LoggingConfig, SandboxError, Word};
use wasm_sandbox_runtime::{InvocationFailure, InvocationRequest, RuntimeService};

#[derive(Debug, Parser)]
#[command(name = "wasm-sandbox", version, about = "Run WebAssembly modules in a sandbox")]
struct Cli {
    /// TOML configuration file.
    #[arg(long, short, env = "WASM_SANDBOX_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Fuel budget per invocation; enables fuel metering.
    #[arg(long, global = true)]
    fuel: Option<u64>,

    /// Linear memory cap per instance, in MiB.
    #[arg(long, global = true)]
    max_memory_mb: Option<u32>,

    /// Let the module read the real clocks.
    #[arg(long, global = true)]
    allow_clock: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Invoke an exported function.
    Run {
        /// Path to the `.wasm` module.
        module: PathBuf,
        /// Exported function name.
        function: String,
        /// Arguments: decimal, negative decimal or `0x` hex.
        #[arg(allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Compile a module and list its exported functions.
    Check {
        /// Path to the `.wasm` module.
        module: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let mut config_file = match &cli.config {
        Some(path) => ConfigFile::from_file(path)?,
        None => ConfigFile::default(),
    };
    apply_overrides(&cli, &mut config_file);

    init_tracing(&config_file.logging);

    let service = RuntimeService::from_config(&config_file.runtime)?;
    service.start()?;

    let outcome = match cli.command {
        Command::Run {
            module,
            function,
            args,
        } => run(&service, &module, function, &args).await,
        Command::Check { module } => check(&service, &module),
    };

    service.stop().await;

    let Err(e) = outcome else {
        return Ok(ExitCode::SUCCESS);
    };

    if let Some(failure) = e.downcast_ref::<InvocationFailure>() {
        for entry in &failure.logs {
            eprintln!("[{} {}] {}", entry.source.as_str(), entry.level, entry.message);
        }
        return Ok(report_failure(&failure.error));
    }
    match e.downcast_ref::<SandboxError>() {
        Some(sandbox_error) => Ok(report_failure(sandbox_error)),
        None => Err(e),
    }
}

fn report_failure(sandbox_error: &SandboxError) -> ExitCode {
    error!(error = %sandbox_error, class = ?sandbox_error.class(), "Invocation failed");
    eprintln!("error: {sandbox_error}");
    exit_code(sandbox_error.class())
}

/// Apply command-line flags over the configuration file.
fn apply_overrides(cli: &Cli, config_file: &mut ConfigFile) {
    let runtime = &mut config_file.runtime;

    if let Some(fuel) = cli.fuel {
        runtime.engine.fuel_metering = true;
        runtime.execution.max_fuel = fuel;
    }
    if let Some(mb) = cli.max_memory_mb {
        runtime.execution.max_memory_mb = mb;
    }
    if cli.allow_clock {
        runtime.capabilities.clock = true;
    }
    if cli.json_logs {
        config_file.logging.format = LogFormat::Json;
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.filter));
    let registry = tracing_subscriber::registry().with(filter);

    match logging.format {
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}

async fn run(
    service: &RuntimeService,
    module: &Path,
    function: String,
    args: &[String],
) -> anyhow::Result<()> {
    let bytecode = read_module(module)?;
    let args = args
        .iter()
        .map(|arg| parse_word(arg))
        .collect::<anyhow::Result<Vec<_>>>()?;

    info!(module = %module.display(), %function, ?args, "Running module");

    let outcome = service
        .execute(InvocationRequest::new(bytecode, function).with_args(args))
        .await?;

    let logs: Vec<serde_json::Value> = outcome
        .logs
        .iter()
        .map(|entry| {
            serde_json::json!({
                "level": entry.level.to_string(),
                "stream": entry.source.as_str(),
                "message": entry.message,
            })
        })
        .collect();

    let output = serde_json::json!({
        "request_id": outcome.request_id,
        "results": outcome.results,
        "logs": logs,
        "fuel_consumed": outcome.metrics.fuel_consumed,
        "memory_used_bytes": outcome.metrics.memory_used_bytes,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}

fn check(service: &RuntimeService, module: &Path) -> anyhow::Result<()> {
    let bytecode = read_module(module)?;
    let compiled = service.runtime().compile(&bytecode)?;

    println!("{}  {}", compiled.content_hash(), module.display());
    for name in compiled.exports().names() {
        if let Some(signature) = compiled.exports().get(name) {
            let params: Vec<String> = signature.params.iter().map(ToString::to_string).collect();
            let results: Vec<String> = signature.results.iter().map(ToString::to_string).collect();
            println!("  {name}({}) -> ({})", params.join(", "), results.join(", "));
        }
    }

    Ok(())
}

fn read_module(path: &Path) -> anyhow::Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to read module '{}'", path.display()))
}

/// Parse a word: `42`, `-1` (two's complement) or `0x2a`.
#[allow(clippy::cast_sign_loss)]
fn parse_word(arg: &str) -> anyhow::Result<Word> {
    if let Some(hex) = arg.strip_prefix("0x").or_else(|| arg.strip_prefix("0X")) {
        return Word::from_str_radix(hex, 16).with_context(|| format!("Invalid hex word '{arg}'"));
    }
    if arg.starts_with('-') {
        let value: i64 = arg
            .parse()
            .with_context(|| format!("Invalid negative word '{arg}'"))?;
        return Ok(value as Word);
    }
    if arg.is_empty() {
        bail!("Empty argument");
    }
    arg.parse()
        .with_context(|| format!("Invalid word '{arg}'"))
}

/// Process exit code for a failed invocation.
fn exit_code(class: ErrorClass) -> ExitCode {
    match class {
        ErrorClass::BadInput => ExitCode::from(2),
        ErrorClass::RuntimeFault => ExitCode::from(3),
        ErrorClass::System => ExitCode::from(1),
    }
}
