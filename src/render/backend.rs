use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use merman::render::{HeadlessError, HeadlessRenderer};
use reqwest::StatusCode;
use tokio::process::Command;
use tracing::debug;

use crate::config::{RendererBackend, StudioSettings};

use super::RenderError;
use super::options::{renderer_options, unshift_line_numbers};

/// Root `<svg>` id given to in-process renders.
const MERMAN_DIAGRAM_ID: &str = "mermaid-studio";

static SCRATCH_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Mermaid renderer: text in, SVG out.
pub trait DiagramRenderer: Send + Sync + 'static {
    fn render_svg(&self, source: &str) -> impl Future<Output = Result<String, RenderError>> + Send;
}

/// Renders in process with merman, a headless Rust port of Mermaid.
#[derive(Clone)]
pub struct MermanRenderer {
    renderer: Arc<HeadlessRenderer>,
}

impl MermanRenderer {
    pub fn new() -> Self {
        let site_config = merman::MermaidConfig::from_value(renderer_options().mermaid_config());
        Self {
            renderer: Arc::new(HeadlessRenderer::new().with_site_config(site_config)),
        }
    }
}

impl Default for MermanRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for MermanRenderer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MermanRenderer").finish_non_exhaustive()
    }
}

impl DiagramRenderer for MermanRenderer {
    async fn render_svg(&self, source: &str) -> Result<String, RenderError> {
        let renderer = Arc::clone(&self.renderer);
        let source = source.to_owned();
        debug!(bytes = source.len(), "rendering diagram in process");

        let rendered = tokio::task::spawn_blocking(move || {
            renderer.render_svg_readable_sync_with_diagram_id(&source, MERMAN_DIAGRAM_ID)
        })
        .await
        .map_err(|error| RenderError::Backend(format!("merman render task failed: {error}")))?;

        match rendered {
            Ok(Some(svg)) => Ok(svg),
            Ok(None) => Err(RenderError::Rejected("No diagram type detected".to_owned())),
            Err(HeadlessError::Parse(error)) => Err(RenderError::Rejected(error.to_string())),
            Err(HeadlessError::Render(error)) => Err(RenderError::Backend(format!(
                "merman failed to lay out the diagram: {error}"
            ))),
        }
    }
}

/// Runs the Mermaid CLI (`mmdc`) once per render.
#[derive(Debug, Clone)]
pub struct MermaidCliRenderer {
    program: String,
}

impl MermaidCliRenderer {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl DiagramRenderer for MermaidCliRenderer {
    async fn render_svg(&self, source: &str) -> Result<String, RenderError> {
        let input_path = scratch_path("mmd");
        let config_path = scratch_path("json");
        let output_path = scratch_path("svg");
        let written = async {
            tokio::fs::write(&input_path, source).await?;
            tokio::fs::write(&config_path, renderer_options().mermaid_config().to_string()).await
        }
        .await;
        if let Err(error) = written {
            remove_scratch(&[&input_path, &config_path]).await;
            return Err(RenderError::Backend(format!(
                "failed to write renderer input: {error}"
            )));
        }

        debug!(program = %self.program, input = %input_path.display(), "running mermaid cli");

        let output = Command::new(&self.program)
            .arg("--input")
            .arg(&input_path)
            .arg("--output")
            .arg(&output_path)
            .arg("--configFile")
            .arg(&config_path)
            .arg("--backgroundColor")
            .arg("transparent")
            .arg("--quiet")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await;

        let result = match output {
            Ok(output) if output.status.success() => tokio::fs::read_to_string(&output_path)
                .await
                .map_err(|error| {
                    RenderError::Backend(format!("failed to read renderer output: {error}"))
                }),
            Ok(output) => Err(RenderError::Rejected(clean_cli_error(
                &String::from_utf8_lossy(&output.stderr),
            ))),
            Err(error) => Err(RenderError::Backend(format!(
                "failed to run `{}`: {error}; install @mermaid-js/mermaid-cli or set DIAGRAM_RENDERER=merman",
                self.program
            ))),
        };

        remove_scratch(&[&input_path, &config_path, &output_path]).await;
        result
    }
}

/// Renders through a Kroki server (`POST {base}/mermaid/svg`).
#[derive(Debug, Clone)]
pub struct KrokiRenderer {
    http_client: reqwest::Client,
    base_url: String,
}

impl KrokiRenderer {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        }
    }
}

impl DiagramRenderer for KrokiRenderer {
    async fn render_svg(&self, source: &str) -> Result<String, RenderError> {
        let url = format!("{}/mermaid/svg", self.base_url);
        debug!(url = %url, "sending diagram to kroki");

        let response = self
            .http_client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(renderer_options().apply_to(source))
            .send()
            .await
            .map_err(|error| RenderError::Backend(format!("kroki request failed: {error}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| RenderError::Backend(format!("failed to read kroki body: {error}")))?;

        match status {
            status if status.is_success() => Ok(body),
            StatusCode::BAD_REQUEST => Err(RenderError::Rejected(clean_kroki_error(&body))),
            status => Err(RenderError::Backend(format!(
                "kroki returned HTTP {status}: {}",
                body.trim()
            ))),
        }
    }
}

/// Backend selected by `DIAGRAM_RENDERER`.
#[derive(Debug, Clone)]
pub enum ConfiguredRenderer {
    Merman(MermanRenderer),
    MermaidCli(MermaidCliRenderer),
    Kroki(KrokiRenderer),
}

impl ConfiguredRenderer {
    pub fn from_settings(settings: &StudioSettings) -> Self {
        match settings.renderer {
            RendererBackend::Merman => Self::Merman(MermanRenderer::new()),
            RendererBackend::MermaidCli => {
                Self::MermaidCli(MermaidCliRenderer::new(settings.mmdc_path.clone()))
            }
            RendererBackend::Kroki => Self::Kroki(KrokiRenderer::new(
                settings.kroki_base_url.clone(),
            )),
        }
    }
}

impl DiagramRenderer for ConfiguredRenderer {
    async fn render_svg(&self, source: &str) -> Result<String, RenderError> {
        match self {
            Self::Merman(renderer) => renderer.render_svg(source).await,
            Self::MermaidCli(renderer) => renderer.render_svg(source).await,
            Self::Kroki(renderer) => renderer.render_svg(source).await,
        }
    }
}

fn scratch_path(extension: &str) -> PathBuf {
    let now_ns = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let sequence = SCRATCH_COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!(
        "mermaid_studio_{}_{now_ns}_{sequence}.{extension}",
        std::process::id()
    ))
}

async fn remove_scratch(paths: &[&PathBuf]) {
    for path in paths {
        let _ = tokio::fs::remove_file(path).await;
    }
}

/// Kroki answers `Error 400: <parser message>` for text that carries the init
/// directive; keep the parser message with line numbers of the typed text.
fn clean_kroki_error(body: &str) -> String {
    let message = body.trim();
    let message = message
        .strip_prefix("Error 400:")
        .map(str::trim_start)
        .unwrap_or(message);

    if message.is_empty() {
        "renderer rejected the diagram".to_owned()
    } else {
        unshift_line_numbers(message)
    }
}

/// Keeps the parser message from CLI stderr, dropping the `Error:` prefix
/// and JavaScript stack frames.
fn clean_cli_error(stderr: &str) -> String {
    let message = stderr
        .lines()
        .filter(|line| !line.trim_start().starts_with("at "))
        .collect::<Vec<_>>()
        .join("\n");
    let message = message.trim();
    let message = message.strip_prefix("Error:").unwrap_or(message).trim();

    if message.is_empty() {
        "renderer rejected the diagram".to_owned()
    } else {
        message.to_owned()
    }
}
