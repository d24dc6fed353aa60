use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use mermaid_studio::catalog::{example_ids, find_example, initial_code};
use mermaid_studio::config::StudioSettings;
use mermaid_studio::headless::{FixOutcome, export_text, fix_text, read_diagram_file};
use mermaid_studio::render::{ConfiguredRenderer, RenderAdapter};
use mermaid_studio::repair::RepairService;
use mermaid_studio::studio::run_studio;

const DEFAULT_LOG_FILTER: &str = "info,mermaid_studio=debug";

#[derive(Debug, Parser)]
#[command(
    name = "mermaid_studio",
    about = "Native Mermaid diagram studio with live preview and AI auto-fix"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Open the studio window (default).
    Studio {
        /// Start from a built-in example (flowchart, sequence, mindmap, broken).
        #[arg(long, conflicts_with = "file")]
        example: Option<String>,
        /// Start from the contents of a diagram file.
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Render a diagram file and write it as a PNG.
    Export {
        file: PathBuf,
        /// Output directory; defaults to STUDIO_EXPORT_DIR.
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
    /// Repair a diagram file that fails to render.
    Fix {
        file: PathBuf,
        /// Write the repaired text back to the file instead of printing it.
        #[arg(long)]
        write: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _file_log_guard = init_tracing()?;

    let cli = Cli::parse();
    let settings = StudioSettings::from_env().context("failed to load configuration")?;

    match cli.command.unwrap_or(Commands::Studio {
        example: None,
        file: None,
    }) {
        Commands::Studio { example, file } => {
            let initial_text = match (example, file) {
                (Some(id), _) => find_example(&id)
                    .map(|example| example.code.to_owned())
                    .ok_or_else(|| {
                        anyhow!(
                            "unknown example `{id}`; expected one of: {}",
                            example_ids().join(", ")
                        )
                    })?,
                (None, Some(path)) => read_diagram_file(&path)?,
                (None, None) => initial_code().to_owned(),
            };
            run_studio(&settings, initial_text)?;
        }
        Commands::Export { file, out_dir } => {
            let text = read_diagram_file(&file)?;
            let out_dir = out_dir.unwrap_or_else(|| settings.export_dir.clone());
            let path = export_text(&render_adapter(&settings), &text, &out_dir).await?;
            println!("{}", path.display());
        }
        Commands::Fix { file, write } => {
            let text = read_diagram_file(&file)?;
            let repairer = RepairService::new(settings.clone());
            match fix_text(&render_adapter(&settings), &repairer, &text).await? {
                FixOutcome::AlreadyValid => {
                    eprintln!("{} renders without errors; nothing to fix", file.display());
                }
                FixOutcome::Repaired {
                    text: repaired,
                    original_error,
                    rerender,
                } => {
                    eprintln!("render error: {}", original_error.headline());
                    if write {
                        std::fs::write(&file, format!("{repaired}\n")).with_context(|| {
                            format!("failed to write repaired diagram to `{}`", file.display())
                        })?;
                        eprintln!("wrote repaired diagram to {}", file.display());
                    } else {
                        println!("{repaired}");
                    }
                    if let Err(error) = rerender {
                        bail!("repaired diagram still fails to render: {}", error.headline());
                    }
                }
            }
        }
    }

    Ok(())
}

fn render_adapter(settings: &StudioSettings) -> RenderAdapter<ConfiguredRenderer> {
    RenderAdapter::new(
        ConfiguredRenderer::from_settings(settings),
        Duration::from_millis(settings.render_timeout_ms),
    )
}

/// Console logging from `RUST_LOG`, plus a daily log file under
/// `STUDIO_LOG_DIR` when that is set.
fn init_tracing() -> Result<Option<WorkerGuard>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .compact()
        .with_filter(env_filter);

    let (file_layer, guard) = match std::env::var_os("STUDIO_LOG_DIR") {
        Some(log_dir) if !log_dir.is_empty() => {
            let file_filter = std::env::var("STUDIO_FILE_LOG")
                .ok()
                .filter(|value| !value.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_owned());
            let appender = tracing_appender::rolling::daily(log_dir, "mermaid_studio.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(writer)
                .with_filter(
                    EnvFilter::try_new(&file_filter)
                        .with_context(|| format!("invalid STUDIO_FILE_LOG `{file_filter}`"))?,
                );
            (Some(layer), Some(guard))
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|error| anyhow!("failed to initialize tracing subscriber: {error}"))?;
    Ok(guard)
}
