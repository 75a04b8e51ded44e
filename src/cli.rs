//! Recourse CLI
//!
//! Runs the static obligation analysis over manifests and inspects the
//! effective engine configuration. Commands return the process exit code.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

use tracing_subscriber::EnvFilter;

use crate::analysis::{Analyzer, Manifest, Program, Severity};
use crate::config::Config;

#[derive(Parser)]
#[command(name = "recourse")]
#[command(about = "Recourse - structured fault propagation and obligation checking", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default search)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check a manifest for unacknowledged obligations and invalid handlers
    Check {
        /// Manifest file (.json or .toml)
        manifest: PathBuf,

        /// Output format
        #[arg(short = 'f', long = "format", value_enum, default_value = "text")]
        format: OutputFormat,

        /// Treat warnings as errors
        #[arg(long)]
        deny_warnings: bool,
    },

    /// Print the declared and inferred obligation tag of every operation
    Classify {
        /// Manifest file (.json or .toml)
        manifest: PathBuf,

        /// Output format
        #[arg(short = 'f', long = "format", value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// List the analysis rules
    Rules,

    /// Print the effective configuration as TOML
    Config,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Exit code of a successful command
pub const EXIT_OK: u8 = 0;

/// Exit code of a `check` that found errors
pub const EXIT_FINDINGS: u8 = 1;

/// Run the CLI by parsing process arguments
pub fn run_cli() -> Result<u8> {
    let cli = Cli::parse();
    run_cli_with_args(cli)
}

/// Run the CLI with provided arguments
pub fn run_cli_from_args<I, T>(args: I) -> Result<u8>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let cli = Cli::try_parse_from(args)?;
    run_cli_with_args(cli)
}

fn run_cli_with_args(cli: Cli) -> Result<u8> {
    // Load configuration first so errors show up before any command output
    let config = Config::builder()
        .config_path(cli.config.clone())
        .build()
        .context("Failed to load configuration")?;

    init_logging(&config);

    match cli.command {
        Commands::Check {
            manifest,
            format,
            deny_warnings,
        } => {
            let loaded = load_manifest(&manifest)?;
            let diagnostics = Analyzer::new().analyze(&loaded);

            match format {
                OutputFormat::Text => {
                    for diagnostic in &diagnostics {
                        println!("{}", diagnostic);
                    }
                    let errors = diagnostics.iter().filter(|d| d.is_error()).count();
                    println!(
                        "{}: {} error(s), {} warning(s)",
                        manifest.display(),
                        errors,
                        diagnostics.len() - errors
                    );
                }
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&diagnostics)?);
                }
            }

            let failed = diagnostics
                .iter()
                .any(|d| d.severity == Severity::Error || (deny_warnings && d.severity == Severity::Warning));

            Ok(if failed { EXIT_FINDINGS } else { EXIT_OK })
        }

        Commands::Classify { manifest, format } => {
            let loaded = load_manifest(&manifest)?;
            let program = Program::new(&loaded);

            let rows: Vec<serde_json::Value> = program
                .operations()
                .map(|op| {
                    serde_json::json!({
                        "operation": op.name,
                        "declared": program.declared_tag(op),
                        "inferred": program.infer(op),
                    })
                })
                .collect();

            match format {
                OutputFormat::Text => {
                    for op in program.operations() {
                        println!(
                            "{}: declared {}, inferred {}",
                            op.name,
                            program.declared_tag(op),
                            program.infer(op)
                        );
                    }
                }
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&rows)?);
                }
            }

            Ok(EXIT_OK)
        }

        Commands::Rules => {
            for (id, description) in Analyzer::new().rules() {
                println!("{:<30} {}", id, description);
            }
            Ok(EXIT_OK)
        }

        Commands::Config => {
            let rendered = toml::to_string_pretty(&config).context("Failed to render configuration")?;
            print!("{}", rendered);
            Ok(EXIT_OK)
        }
    }
}

fn load_manifest(path: &Path) -> Result<Manifest> {
    Manifest::load(path).with_context(|| format!("Failed to load manifest {}", path.display()))
}

/// Log to stderr; `RUST_LOG` wins over `logging.filter`
fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));

    // A subscriber may already be installed (tests, embedding applications)
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
