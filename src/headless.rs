//! Window-less render, export and repair, used by the `export` and `fix`
//! commands.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use crate::export::{export_png, unix_millis};
use crate::render::{DiagramRenderer, RenderAdapter, RenderError};
use crate::repair::CodeRepairer;

#[derive(Debug, Clone, PartialEq)]
pub enum FixOutcome {
    /// The text rendered as-is; no repair was requested.
    AlreadyValid,
    /// The repair service answered; `rerender` is the result of rendering the
    /// repaired text.
    Repaired {
        text: String,
        original_error: RenderError,
        rerender: Result<(), RenderError>,
    },
}

pub async fn export_text<R: DiagramRenderer>(
    adapter: &RenderAdapter<R>,
    text: &str,
    out_dir: &Path,
) -> Result<PathBuf> {
    let diagram = adapter
        .render(text)
        .await
        .context("diagram failed to render")?;
    let path = export_png(Some(&diagram), out_dir, unix_millis())?;
    Ok(path)
}

/// Renders `text`; on failure asks `repairer` for corrected text once and
/// renders that.
pub async fn fix_text<R, F>(
    adapter: &RenderAdapter<R>,
    repairer: &F,
    text: &str,
) -> Result<FixOutcome>
where
    R: DiagramRenderer,
    F: CodeRepairer,
{
    let original_error = match adapter.render(text).await {
        Ok(_) => return Ok(FixOutcome::AlreadyValid),
        Err(error) => error,
    };
    info!(error = %original_error.headline(), "diagram failed to render; requesting repair");

    let repaired = repairer
        .repair(text, &original_error.to_string())
        .await
        .context("auto-fix failed")?;
    let rerender = adapter.render(&repaired).await.map(|_| ());

    Ok(FixOutcome::Repaired {
        text: repaired,
        original_error,
        rerender,
    })
}

pub fn read_diagram_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("failed to read diagram file `{}`", path.display()))
}
