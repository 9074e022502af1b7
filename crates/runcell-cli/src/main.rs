//! Runcell CLI
//!
//! A command-line tool and HTTP service for compiling and running code
//! snippets in disposable workspaces.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use runcell::{Config, EXAMPLE_CONFIG, Engine, ExecutionRequest, ExecutionResult};
use tracing::{Level, debug, info, warn};
use tracing_subscriber::EnvFilter;

mod server;

/// Exit status used when a phase runs out of time, as timeout(1) does
const TIMEOUT_EXIT_CODE: i32 = 124;

#[derive(Parser)]
#[command(name = "runcell")]
#[command(about = "A tool for compiling and running untrusted code snippets")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, env = "RUNCELL_CONFIG")]
    config: Option<PathBuf>,

    /// Directory for per-request workspaces
    #[arg(long, global = true, env = "RUNCELL_WORKSPACE_ROOT")]
    workspace_root: Option<PathBuf>,

    /// Maximum number of concurrent executions
    #[arg(long, global = true, env = "RUNCELL_MAX_CONCURRENT")]
    max_concurrent: Option<usize>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP service
    Serve {
        /// Address to listen on (default: from config)
        #[arg(short, long, env = "RUNCELL_BIND")]
        bind: Option<String>,
    },

    /// Run a program (compile if needed, then execute)
    Run {
        /// Source file to run
        #[arg(value_name = "FILE")]
        source: PathBuf,

        /// Language ID (e.g., cpp, python)
        #[arg(short, long)]
        language: String,

        /// Input file fed to the program's stdin
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// List available languages
    Languages,

    /// Initialize a new configuration file
    Init {
        /// Output path (default: runcell.toml)
        #[arg(short, long, default_value = "runcell.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Show the effective configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Init { output, force } = &cli.command {
        return init_config(output, *force).await;
    }

    let config = load_config(&cli)?;

    match cli.command {
        Commands::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| config.server.bind.clone());
            server::serve(Engine::new(config), &bind).await
        }
        Commands::Run {
            source,
            language,
            input,
        } => run_execute(config, &source, &language, input.as_deref()).await,
        Commands::Languages => {
            list_languages(&config);
            Ok(())
        }
        Commands::ShowConfig => {
            show_config(&config);
            Ok(())
        }
        Commands::Init { .. } => Ok(()),
    }
}

/// Load the configuration file (or defaults) and apply command-line overrides
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = if let Some(ref path) = cli.config {
        info!(?path, "loading configuration");
        Config::from_file(path).context("failed to load configuration")?
    } else {
        debug!("using default configuration");
        Config::default()
    };

    if let Some(ref root) = cli.workspace_root {
        config.workspace_root = root.clone();
    }
    if let Some(max_concurrent) = cli.max_concurrent {
        config.max_concurrent = max_concurrent;
    }
    config.validate().context("invalid configuration")?;

    Ok(config)
}

async fn run_execute(
    config: Config,
    source: &Path,
    language_id: &str,
    input: Option<&Path>,
) -> Result<()> {
    let source_code = tokio::fs::read_to_string(source)
        .await
        .with_context(|| format!("failed to read source file '{}'", source.display()))?;

    let stdin = if let Some(input_path) = input {
        Some(
            tokio::fs::read_to_string(input_path)
                .await
                .context("failed to read input file")?,
        )
    } else {
        None
    };

    let mut request = ExecutionRequest::new(language_id, source_code);
    request.stdin = stdin;

    let engine = Engine::new(config);
    let result = engine
        .execute(request)
        .await
        .context("request rejected")?;

    // Log the outcome via tracing (stderr), keeping stdout clean for piping
    info!(result = result.kind(), "execution result");

    match result {
        ExecutionResult::Success { stdout, truncated } => {
            println!("{stdout}");
            if truncated {
                warn!("output truncated at the capture limit");
            }
            Ok(())
        }
        ExecutionResult::CompileFailure { diagnostics } => {
            eprintln!("Compilation failed:");
            eprintln!("{diagnostics}");
            std::process::exit(1);
        }
        ExecutionResult::RuntimeFailure {
            diagnostics,
            exit_code,
            signal,
            ..
        } => {
            if !diagnostics.is_empty() {
                eprintln!("{diagnostics}");
            }
            let code = match (exit_code, signal) {
                (Some(code), _) => code,
                (None, Some(signal)) => 128 + signal,
                (None, None) => 1,
            };
            std::process::exit(code);
        }
        ExecutionResult::Timeout { phase } => {
            eprintln!("Time limit exceeded during {phase}");
            std::process::exit(TIMEOUT_EXIT_CODE);
        }
        ExecutionResult::EngineError { message } => {
            anyhow::bail!("execution failed: {message}")
        }
    }
}

fn list_languages(config: &Config) {
    println!("Available languages:\n");

    for id in config.language_ids() {
        let Ok(lang) = config.get_language(id) else {
            continue;
        };
        let lang_type = if lang.is_compiled() {
            "compiled"
        } else {
            "interpreted"
        };
        println!("  {:<15} {} ({})", id, lang.name, lang_type);
    }
}

fn show_config(config: &Config) {
    println!("Workspace root: {}", config.workspace_root.display());
    println!("Max concurrent: {}", config.max_concurrent);
    println!("Execution PATH: {}", config.path);
    println!();
    println!("Limits:");
    println!("  Max source: {} bytes", config.limits.max_source_bytes);
    println!("  Max stdin: {} bytes", config.limits.max_stdin_bytes);
    println!("  Output limit: {} bytes", config.limits.output_limit);
    println!();
    println!("Server bind: {}", config.server.bind);
    println!();
    println!("Languages configured: {}", config.languages.len());
    for id in config.language_ids() {
        let Ok(lang) = config.get_language(id) else {
            continue;
        };
        match lang.compile {
            Some(ref compile) => println!(
                "  {id}: compile {} ms, run {} ms",
                compile.timeout_ms, lang.run.timeout_ms
            ),
            None => println!("  {id}: run {} ms", lang.run.timeout_ms),
        }
    }
}

async fn init_config(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "Configuration file already exists at '{}'. Use --force to overwrite.",
            output.display()
        );
    }

    tokio::fs::write(output, EXAMPLE_CONFIG)
        .await
        .context("failed to write configuration file")?;

    println!("Created configuration file at '{}'", output.display());
    Ok(())
}
