use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use console::style;
use tokio::runtime::Runtime;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use reportforge::runner::TaskEvent;
use reportforge::types::{DocumentInput, GenerationSettings, TaskStatus};
use reportforge::{Config, ConfigLoader, DocumentTaskRunner, RetryPolicy, create_adapter};

const DEFAULT_SYSTEM_PROMPT: &str = "You are a forensic documentation specialist. You convert \
     source material into precise, structured report text. Report only what the material \
     supports; never invent findings.";

const DEFAULT_USER_PROMPT: &str = "Convert the following document into structured report \
     text with clear section headings.\n\n{document}";

#[derive(Parser)]
#[command(name = "reportforge")]
#[command(
    version,
    about = "Convert forensic documents into structured report text via LLM backends"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, short, help = "Load configuration from a specific file")]
    config: Option<PathBuf>,

    #[arg(long)]
    verbose: bool,

    #[arg(long, short)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Process plain-text documents into report text
    Run {
        #[arg(required = true, help = "Plain-text document files to process")]
        files: Vec<PathBuf>,
        #[arg(long, help = "Backend to use (anthropic, openai, ollama)")]
        backend: Option<String>,
        #[arg(long, help = "Model to use")]
        model: Option<String>,
        #[arg(long, help = "File containing the system prompt")]
        system_prompt: Option<PathBuf>,
        #[arg(long, help = "File containing the user prompt ({document} is replaced)")]
        prompt: Option<PathBuf>,
        #[arg(long, help = "Extended thinking budget in tokens")]
        thinking_budget: Option<u32>,
        #[arg(long, short, help = "Directory to write reports into; print to stdout if unset")]
        output: Option<PathBuf>,
    },

    /// Show the effective per-model context budget table
    Models {
        #[arg(help = "Model identifiers to show (defaults to common models)")]
        models: Vec<String>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration (merged from all sources)
    Show,
    /// Show configuration file paths
    Path,
}

fn main() -> ExitCode {
    match run_cli() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path)?,
        None => ConfigLoader::load()?,
    };

    match cli.command {
        Commands::Run {
            files,
            backend,
            model,
            system_prompt,
            prompt,
            thinking_budget,
            output,
        } => {
            let mut config = config;
            if let Some(backend) = backend {
                config.llm.backend = backend;
            }
            if let Some(model) = model {
                config.llm.model = Some(model);
            }
            if thinking_budget.is_some() {
                config.llm.thinking_budget = thinking_budget;
            }

            let rt = Runtime::new()?;
            rt.block_on(run_batch(config, files, system_prompt, prompt, output))?;
        }
        Commands::Models { models } => {
            show_models(&config, &models);
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                println!("{}", toml::to_string_pretty(&config)?);
            }
            ConfigAction::Path => {
                if let Some(global) = ConfigLoader::global_config_path() {
                    println!("global:  {}", global.display());
                }
                println!("project: {}", ConfigLoader::project_config_path().display());
            }
        },
    }

    Ok(())
}

async fn run_batch(
    config: Config,
    files: Vec<PathBuf>,
    system_prompt: Option<PathBuf>,
    prompt: Option<PathBuf>,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let system_prompt = read_prompt(system_prompt.as_deref(), DEFAULT_SYSTEM_PROMPT)?;
    let user_prompt = read_prompt(prompt.as_deref(), DEFAULT_USER_PROMPT)?;

    let documents = load_documents(&files)?;

    let model_id = config
        .llm
        .model
        .clone()
        .unwrap_or_else(|| default_model_for(&config.llm.backend).to_string());
    let profile = config.profile_for(&model_id);
    let adapter = create_adapter(&config.llm, &profile)?;

    let settings = GenerationSettings {
        system_prompt,
        user_prompt,
        model_id,
        temperature: config.llm.temperature,
        max_output_tokens: config.llm.max_output_tokens,
        thinking_budget: config.llm.thinking_budget,
    };

    let runner = DocumentTaskRunner::new(adapter, profile, RetryPolicy::from(&config.retry));

    // Ctrl-C requests cooperative cancellation; in-flight work winds down
    let cancel = runner.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n{} finishing in-flight work...", style("Cancelling:").yellow());
            cancel.cancel();
        }
    });

    let mut events = runner.events().subscribe();
    let renderer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            render_event(&event);
            if matches!(event, TaskEvent::BatchFinished { .. }) {
                break;
            }
        }
    });

    let tasks = runner.run_batch(&settings, documents).await;
    let _ = renderer.await;

    let mut failures = 0usize;
    for task in &tasks {
        match task.status {
            TaskStatus::Succeeded => {
                let text = task.final_text.as_deref().unwrap_or_default();
                match &output {
                    Some(dir) => {
                        fs::create_dir_all(dir)?;
                        let name = format!("{}.report.txt", sanitize_stem(task.document_id.as_str()));
                        let path = dir.join(name);
                        fs::write(&path, text)?;
                        println!("{} {}", style("Wrote").green(), path.display());
                    }
                    None => {
                        println!("\n=== {} ===\n{}", task.document_id, text);
                    }
                }
            }
            _ => failures += 1,
        }
    }

    if failures > 0 {
        anyhow::bail!("{} document(s) did not complete successfully", failures);
    }
    Ok(())
}

fn load_documents(files: &[PathBuf]) -> anyhow::Result<Vec<DocumentInput>> {
    let mut documents = Vec::with_capacity(files.len());
    for path in files {
        let text = fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("cannot read {}: {}", path.display(), e))?;
        let id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("document")
            .to_string();
        documents.push(DocumentInput::new(id, path.display().to_string(), text));
    }
    Ok(documents)
}

fn read_prompt(path: Option<&Path>, default: &str) -> anyhow::Result<String> {
    match path {
        Some(path) => fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("cannot read prompt {}: {}", path.display(), e)),
        None => Ok(default.to_string()),
    }
}

fn default_model_for(backend: &str) -> &'static str {
    match backend {
        "openai" => "gpt-4o",
        "ollama" => "llama3:latest",
        _ => "claude-sonnet-4-20250514",
    }
}

fn sanitize_stem(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

fn render_event(event: &TaskEvent) {
    match event {
        TaskEvent::BatchStarted { total_documents, .. } => {
            eprintln!(
                "{} {} document(s)",
                style("Processing").cyan().bold(),
                total_documents
            );
        }
        TaskEvent::DocumentStarted { document_id, index, total } => {
            eprintln!(
                "{} [{}/{}] {}",
                style("Starting").cyan(),
                index + 1,
                total,
                document_id
            );
        }
        TaskEvent::StatusChanged { document_id, status, progress } => {
            if *status == TaskStatus::Chunking || *status == TaskStatus::Retrying {
                eprintln!(
                    "  {} {} ({:.0}%)",
                    style(status.to_string()).yellow(),
                    document_id,
                    progress * 100.0
                );
            }
        }
        TaskEvent::ChunkCompleted { document_id, chunk_index, chunk_count, .. } => {
            eprintln!(
                "  {} {} chunk {}/{}",
                style("done").green(),
                document_id,
                chunk_index + 1,
                chunk_count
            );
        }
        TaskEvent::DocumentFinished { document_id, status, message, usage, .. } => {
            let label = match status {
                TaskStatus::Succeeded => style("Succeeded").green().bold(),
                TaskStatus::Cancelled => style("Cancelled").yellow().bold(),
                _ => style("Failed").red().bold(),
            };
            match message {
                Some(message) => eprintln!("{} {} - {}", label, document_id, message),
                None => eprintln!(
                    "{} {} ({} tokens)",
                    label,
                    document_id,
                    usage.total()
                ),
            }
        }
        TaskEvent::BatchFinished { succeeded, failed, cancelled, usage, duration_secs, .. } => {
            eprintln!(
                "{} {} succeeded, {} failed, {} cancelled in {}s ({} tokens)",
                style("Batch:").cyan().bold(),
                succeeded,
                failed,
                cancelled,
                duration_secs,
                usage.total()
            );
        }
    }
}

fn show_models(config: &Config, requested: &[String]) {
    let defaults = [
        "claude-sonnet-4-20250514",
        "claude-opus-4-20250514",
        "gpt-4o",
        "llama3:latest",
    ];
    let models: Vec<String> = if requested.is_empty() {
        let mut models: Vec<String> = defaults.iter().map(|s| s.to_string()).collect();
        models.extend(config.models.keys().cloned());
        models.dedup();
        models
    } else {
        requested.to_vec()
    };

    println!(
        "{:<32} {:>12} {:>8} {:>12} {:>10}",
        "model", "context", "safety", "usable", "overlap"
    );
    for model in &models {
        let profile = config.profile_for(model);
        println!(
            "{:<32} {:>12} {:>8.2} {:>12} {:>10}",
            model,
            profile.max_context_tokens,
            profile.safety_fraction,
            profile.usable_tokens(),
            profile.overlap_tokens
        );
    }
}
