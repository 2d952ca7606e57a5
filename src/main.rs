//! Toolsmith - Entry Point
//!
//! Modes:
//! - --tasks <manifest> --task <id> | --all: run the self-improving pipeline
//! - --list-tools: list the capability library

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use toolsmith::pipeline::PipelineStatus;
use toolsmith::{
    CapabilityLibrary, CommandRunner, Config, EventLog, Generator, HostCommandRunner, OpenAiClient, Pipeline,
    PipelineConfig, TaskHarness, TaskManifest,
};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

fn flag_value(args: &[String], name: &str) -> Option<String> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn print_help() {
    println!("Toolsmith v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Usage: toolsmith --tasks <manifest.toml> (--task <id> | --all) [OPTIONS]");
    println!("       toolsmith --list-tools");
    println!();
    println!("Options:");
    println!("  --tasks <path>               Task manifest (TOML)");
    println!("  --task <id>                  Run one task");
    println!("  --all                        Run every task in the manifest");
    println!("  --list-tools                 List the capability library");
    println!("  --cheap-model <model>        Agent model");
    println!("  --strong-model <model>       Generator model");
    println!("  --max-attempts <n>           Generation attempts per failed task");
    println!("  --allow-verifier-feedback    Show raw verification messages to the generator");
    println!("  --benchmark-log <path>       Append pipeline events as JSONL");
    println!("  --output <path>              Write the batch report as JSON");
    println!("  --json                       Log as JSON to stderr");
    println!("  --quiet, -q                  Only log warnings");
    println!("  --help, -h                   Show this help");
    println!();
    println!("Environment variables:");
    println!("  OPENAI_API_KEY                     Inference API key");
    println!("  TOOLSMITH_BASE_URL                 Endpoint (default: https://api.openai.com)");
    println!("  TOOLSMITH_CHEAP_MODEL              Default: gpt-4o-mini");
    println!("  TOOLSMITH_STRONG_MODEL             Default: gpt-4o");
    println!("  TOOLSMITH_LIBRARY_DIR              Capability library root");
    println!("  TOOLSMITH_MAX_TURNS                Agent turn budget (default: 20)");
    println!("  TOOLSMITH_MAX_ATTEMPTS             Default: 3");
    println!("  TOOLSMITH_ALLOW_VERIFIER_FEEDBACK  true/1 to enable");
    println!("  TOOLSMITH_REQUEST_TIMEOUT          Seconds (default: 120)");
    println!("  TOOLSMITH_SHELL_TIMEOUT            Seconds (default: 30)");
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Parse args
    let args: Vec<String> = std::env::args().collect();
    let help_mode = args.iter().any(|a| a == "--help" || a == "-h");
    let list_mode = args.iter().any(|a| a == "--list-tools");
    let all_mode = args.iter().any(|a| a == "--all");
    let quiet = args.iter().any(|a| a == "--quiet" || a == "-q");
    let json_logs = args.iter().any(|a| a == "--json");

    if help_mode {
        print_help();
        return Ok(());
    }

    // Setup logging
    let log_level = std::env::var("RUST_LOG")
        .map(|s| match s.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        })
        .unwrap_or(if quiet { Level::WARN } else { Level::INFO });

    if json_logs {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_writer(std::io::stderr)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    let mut config = Config::from_env()?;
    if let Some(model) = flag_value(&args, "--cheap-model") {
        config.cheap_model = model;
    }
    if let Some(model) = flag_value(&args, "--strong-model") {
        config.strong_model = model;
    }
    if let Some(n) = flag_value(&args, "--max-attempts") {
        config.max_attempts = n.parse().context("--max-attempts expects a number")?;
    }
    if args.iter().any(|a| a == "--allow-verifier-feedback") {
        config.allow_verifier_feedback = true;
    }

    let library = CapabilityLibrary::open(&config.library_dir)?;

    if list_mode {
        let entries = library.list()?;
        if entries.is_empty() {
            println!("Library at {} is empty", library.root().display());
        }
        for entry in entries {
            println!(
                "{:<32} {:<10} from {:<24} by {:<14} {}",
                entry.name,
                if entry.verified { "verified" } else { "unverified" },
                entry.generated_from_task,
                entry.generated_by_model,
                entry.created_at.format("%Y-%m-%d %H:%M")
            );
        }
        return Ok(());
    }

    let Some(manifest_path) = flag_value(&args, "--tasks") else {
        print_help();
        bail!("--tasks <manifest.toml> is required");
    };
    let manifest = TaskManifest::load(&PathBuf::from(&manifest_path)).await?;

    let selected = if all_mode {
        None
    } else {
        let Some(id) = flag_value(&args, "--task") else {
            bail!("pass --task <id> or --all");
        };
        if manifest.get(&id).is_none() {
            bail!(
                "No task '{}' in {} (available: {})",
                id,
                manifest_path,
                manifest.ids().join(", ")
            );
        }
        Some(id)
    };

    let runner: Arc<dyn CommandRunner> = Arc::new(HostCommandRunner::default());
    let mut tasks = manifest.into_tasks(Arc::clone(&runner));
    if let Some(id) = &selected {
        tasks.retain(|t| t.id() == id.as_str());
    }

    info!("Toolsmith v{}", env!("CARGO_PKG_VERSION"));

    let cheap = Arc::new(OpenAiClient::from_config(&config, &config.cheap_model)?);
    let strong = Arc::new(OpenAiClient::from_config(&config, &config.strong_model)?);
    if !cheap.is_available() {
        bail!("OPENAI_API_KEY not set");
    }

    let harness = TaskHarness::new(cheap, runner)
        .with_max_turns(config.max_turns)
        .with_shell_timeout(Duration::from_secs(config.shell_timeout_secs));
    let mut pipeline = Pipeline::new(
        library,
        harness,
        Generator::new(strong),
        PipelineConfig {
            max_attempts: config.max_attempts,
            allow_verifier_feedback: config.allow_verifier_feedback,
        },
    );
    if let Some(path) = flag_value(&args, "--benchmark-log") {
        let log = EventLog::open(&path)
            .with_context(|| format!("Failed to open benchmark log {}", path))?;
        info!("Logging pipeline events to {}", log.path().display());
        pipeline = pipeline.with_event_log(log);
    }

    let batch = pipeline.run_batch(&tasks).await?;

    if let Some(path) = flag_value(&args, "--output") {
        let json = serde_json::to_string_pretty(&batch)?;
        tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write {}", path))?;
        info!("Wrote results to {}", path);
    }

    println!();
    for report in &batch.reports {
        println!("{}", report.summary_line());
    }
    for record in &batch.reuse {
        println!(
            "reuse: {} (from {}) in {} -> {}",
            record.tool,
            record.source_task,
            record.task,
            if record.passed { "PASS" } else { "FAIL" }
        );
    }
    println!(
        "\n{} already passing, {} tool generated, {} failed",
        batch.count(PipelineStatus::AlreadyPassing),
        batch.count(PipelineStatus::ToolGenerated),
        batch.count(PipelineStatus::GenerationFailed)
    );

    Ok(())
}
