//! # Rulecraft CLI
//!
//! Command-line interface for refining consistency rules from a cell library.
//!
//! Usage:
//!   rulecraft <file.lib>
//!   rulecraft refine <file.lib> -n 3
//!   rulecraft prompt <file.lib> --stage evaluate --rules rules.txt
//!   rulecraft runs --tree
//!
//! Rules go to stdout; logs go to stderr (`RULECRAFT_LOG` overrides the level).

mod config;

use clap::{Parser, Subcommand, ValueEnum};
use config::Config;
use rulecraft_error::{Error, Result};
use rulecraft_llm::{
    Gateway, InternalChatProvider, OpenAIProvider, ProviderGateway, ProviderType, Retrying,
};
use rulecraft_refine::{LibraryDocument, PromptSet, Refinement, Refiner};
use rulecraft_trace::{FileArtifacts, MemoryArtifacts, TraceLog, TraceSnapshot};
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "rulecraft", args_conflicts_with_subcommands = true)]
#[command(author, version, about = "Rulecraft - iterative consistency rules for cell libraries")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Library file to refine (when not using subcommands)
    file: Option<PathBuf>,

    #[command(flatten)]
    refine: RefineArgs,

    /// Configuration file (default: ./rulecraft.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
}

#[derive(clap::Args, Clone, Default)]
struct RefineArgs {
    /// Maximum evaluate/reformat passes
    #[arg(short = 'n', long)]
    max_iterations: Option<usize>,

    /// Gateway backend: internal, openai or ollama
    #[arg(long)]
    provider: Option<ProviderType>,

    /// Model name sent to the gateway
    #[arg(short, long)]
    model: Option<String>,

    /// Gateway base URL
    #[arg(long)]
    api_url: Option<String>,

    /// Extra instruction for the initial prompt
    #[arg(long)]
    focus: Option<String>,

    /// Focus the rules on power-domain isolation
    #[arg(long, conflicts_with = "focus")]
    isolation: bool,

    /// Directory for runs, artifacts and trace.json
    #[arg(long)]
    trace_dir: Option<PathBuf>,

    /// Do not record a trace
    #[arg(long)]
    no_trace: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Refine rules for a library file
    Refine {
        file: PathBuf,

        #[command(flatten)]
        args: RefineArgs,
    },
    /// Print a stage prompt without calling the gateway
    Prompt {
        file: PathBuf,

        #[arg(short, long, value_enum, default_value = "initial")]
        stage: PromptStage,

        /// Rules (evaluate) or evaluation text (reformat) to embed
        #[arg(short, long)]
        rules: Option<PathBuf>,

        #[arg(long)]
        focus: Option<String>,
    },
    /// List recorded runs
    Runs {
        /// Show the span tree of each run
        #[arg(long)]
        tree: bool,

        #[arg(long)]
        trace_dir: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum PromptStage {
    Initial,
    Evaluate,
    Reformat,
}

fn init_logging(verbose: bool, quiet: bool) {
    let default = if verbose {
        "rulecraft=debug"
    } else if quiet {
        "rulecraft=warn"
    } else {
        "rulecraft=info"
    };
    let filter = EnvFilter::try_from_env("RULECRAFT_LOG").unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .with(filter)
        .init();
}

/// Fold command-line overrides into the file configuration
fn apply_overrides(config: &mut Config, args: &RefineArgs) {
    if let Some(n) = args.max_iterations {
        config.refine.max_iterations = n;
    }
    if let Some(provider) = args.provider {
        config.gateway.provider = provider;
    }
    if let Some(model) = &args.model {
        config.gateway.model = Some(model.clone());
    }
    if let Some(url) = &args.api_url {
        config.gateway.api_url = Some(url.clone());
    }
    if let Some(focus) = &args.focus {
        config.refine.focus = Some(focus.clone());
    }
    if args.isolation {
        config.refine.focus = Some(rulecraft_refine::ISOLATION_FOCUS.to_string());
    }
    if let Some(dir) = &args.trace_dir {
        config.trace.dir = dir.clone();
    }
    if args.no_trace {
        config.trace.enabled = false;
    }
}

fn prompts_for(focus: Option<&str>) -> PromptSet {
    match focus {
        Some(focus) => PromptSet::new().with_focus(focus),
        None => PromptSet::new(),
    }
}

fn read_document(file: &Path) -> Result<LibraryDocument> {
    let raw = std::fs::read_to_string(file).map_err(|e| {
        Error::invalid_input(format!("cannot read library document: {}", e))
            .with_operation("cli::read_document")
            .with_context("path", file.display().to_string())
            .set_source(e)
    })?;
    LibraryDocument::parse(&raw).map_err(|e| e.with_context("path", file.display().to_string()))
}

async fn refine_file(file: &Path, config: &Config) -> Result<Refinement> {
    let document = read_document(file)?;
    let provider_config = config.gateway.provider_config()?;

    match provider_config.provider_type {
        ProviderType::Internal => {
            let provider = InternalChatProvider::new(provider_config)?;
            refine_with(ProviderGateway::new(provider), &document, config).await
        }
        ProviderType::OpenAI | ProviderType::Ollama => {
            let provider = OpenAIProvider::new(provider_config)?;
            refine_with(ProviderGateway::new(provider), &document, config).await
        }
    }
}

async fn refine_with<G: Gateway>(
    gateway: G,
    document: &LibraryDocument,
    config: &Config,
) -> Result<Refinement> {
    let gateway = Retrying::new(gateway, config.retry.policy());
    let prompts = prompts_for(config.refine.focus.as_deref());
    let max_iterations = config.refine.max_iterations;

    if !config.trace.enabled {
        return Refiner::new(gateway)
            .with_prompts(prompts)
            .run(document, max_iterations)
            .await;
    }

    let log = match FileArtifacts::new(&config.trace.dir) {
        Ok(store) => TraceLog::with_store(store),
        Err(e) => {
            tracing::warn!(error = %e, "artifact directory unavailable, keeping artifacts in memory");
            TraceLog::with_store(MemoryArtifacts::new())
        }
    };

    let result = Refiner::new(gateway)
        .with_recorder(&log)
        .with_prompts(prompts)
        .run(document, max_iterations)
        .await;

    save_trace(&log, &config.trace.dir);
    result
}

/// Write `trace.json` next to the outer run's artifacts
fn save_trace(log: &TraceLog, dir: &Path) {
    let snapshot = log.snapshot();
    let Some(outer) = snapshot.root_runs().next() else {
        return;
    };
    let path = dir.join(&outer.key).join("trace.json");
    match log.save(&path) {
        Ok(()) => tracing::info!(path = %path.display(), "trace saved"),
        Err(e) => tracing::warn!(error = %e, "failed to save trace"),
    }
}

fn show_prompt(file: &Path, stage: PromptStage, rules: Option<&Path>, focus: Option<&str>) -> Result<()> {
    let document = read_document(file)?;
    let prompts = prompts_for(focus);

    let embedded = match rules {
        Some(path) => std::fs::read_to_string(path).map_err(|e| {
            Error::from(e)
                .with_operation("cli::show_prompt")
                .with_context("path", path.display().to_string())
        })?,
        None => "<rules>".to_string(),
    };

    let prompt = match stage {
        PromptStage::Initial => prompts.initial_prompt(&document),
        PromptStage::Evaluate => prompts.evaluation_prompt(&embedded, &document),
        PromptStage::Reformat => prompts.reformat_prompt(&embedded),
    };
    println!("{}", prompt);
    Ok(())
}

fn list_runs(dir: &Path, tree: bool) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => {
            println!("No runs directory found at {}.", dir.display());
            return;
        }
    };

    println!("Runs in {}:", dir.display());
    let mut count = 0;
    for entry in entries.flatten() {
        let trace_path = entry.path().join("trace.json");
        let Ok(content) = std::fs::read_to_string(&trace_path) else {
            continue;
        };
        let snapshot: TraceSnapshot = match serde_json::from_str(&content) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(path = %trace_path.display(), error = %e, "unreadable trace");
                continue;
            }
        };
        let Some(outer) = snapshot.root_runs().next() else {
            continue;
        };

        count += 1;
        println!(
            "  - {} [{:?}] {} iterations={} artifacts={}",
            outer.uuid,
            outer.status,
            outer.started_at.format("%Y-%m-%d %H:%M:%S"),
            snapshot.runs.len() - 1,
            snapshot.artifact_count()
        );
        if tree {
            for line in snapshot.render_tree().lines() {
                println!("      {}", line);
            }
        }
    }
    if count == 0 {
        println!("  (no runs found)");
    }
}

fn exit_on_error<T>(result: Result<T>) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let mut config = exit_on_error(Config::discover(cli.config.as_deref()));

    let (file, args) = match cli.command {
        Some(Commands::Prompt { file, stage, rules, focus }) => {
            let focus = focus.or(config.refine.focus);
            exit_on_error(show_prompt(&file, stage, rules.as_deref(), focus.as_deref()));
            return;
        }
        Some(Commands::Runs { tree, trace_dir }) => {
            let dir = trace_dir.unwrap_or(config.trace.dir);
            list_runs(&dir, tree);
            return;
        }
        Some(Commands::Refine { file, args }) => (file, args),
        None => match cli.file {
            Some(file) => (file, cli.refine),
            None => {
                eprintln!("Error: No library file provided.");
                eprintln!("Usage: rulecraft [OPTIONS] <FILE>");
                eprintln!("       rulecraft refine <FILE> [-n <N>]");
                eprintln!("       rulecraft prompt <FILE> [--stage <STAGE>]");
                eprintln!("       rulecraft runs [--tree]");
                std::process::exit(1);
            }
        },
    };

    apply_overrides(&mut config, &args);
    let refinement = exit_on_error(refine_file(&file, &config).await);
    println!("{}", refinement.rules);
}
