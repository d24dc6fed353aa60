//! PNG export of the current diagram.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::info;

use crate::raster::{RasterError, parse_tree};
use crate::render::RenderedDiagram;

/// Blank space around the content, per side, in diagram units.
pub const EXPORT_PADDING: f32 = 20.0;
pub const EXPORT_SCALE: f32 = 2.0;

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("nothing to export; render a diagram first")]
    NoContent,

    #[error("diagram markup could not be parsed: {0}")]
    SvgParse(String),

    #[error("diagram has no measurable content")]
    EmptyBounds,

    #[error("failed to allocate a {width}x{height} image")]
    PixmapAlloc { width: u32, height: u32 },

    #[error("failed to encode PNG: {0}")]
    Encode(String),

    #[error("failed to write `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<RasterError> for ExportError {
    fn from(error: RasterError) -> Self {
        match error {
            RasterError::SvgParse(message) => Self::SvgParse(message),
            RasterError::PixmapAlloc { width, height } => Self::PixmapAlloc { width, height },
        }
    }
}

pub fn export_file_name(timestamp_ms: u128) -> String {
    format!("diagram-{timestamp_ms}.png")
}

pub fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

/// Writes `diagram-<timestamp_ms>.png` into `out_dir` and returns its path.
pub fn export_png(
    diagram: Option<&RenderedDiagram>,
    out_dir: &Path,
    timestamp_ms: u128,
) -> Result<PathBuf, ExportError> {
    let diagram = diagram.ok_or(ExportError::NoContent)?;
    let pixmap = rasterize_for_export(&diagram.markup)?;
    let bytes = pixmap
        .encode_png()
        .map_err(|error| ExportError::Encode(error.to_string()))?;

    std::fs::create_dir_all(out_dir).map_err(|source| ExportError::Io {
        path: out_dir.to_path_buf(),
        source,
    })?;
    let path = out_dir.join(export_file_name(timestamp_ms));
    std::fs::write(&path, &bytes).map_err(|source| ExportError::Io {
        path: path.clone(),
        source,
    })?;

    info!(
        path = %path.display(),
        width = pixmap.width(),
        height = pixmap.height(),
        bytes = bytes.len(),
        "exported diagram png"
    );
    Ok(path)
}

/// Rasterizes the content bounds of `markup`, padded and scaled, onto white.
pub fn rasterize_for_export(markup: &str) -> Result<tiny_skia::Pixmap, ExportError> {
    let tree = parse_tree(markup)?;
    if !tree.root().has_children() {
        return Err(ExportError::EmptyBounds);
    }

    let bbox = tree.root().abs_stroke_bounding_box();
    let (min_x, min_y, width, height) = (bbox.x(), bbox.y(), bbox.width(), bbox.height());
    let measurable = [min_x, min_y, width, height]
        .iter()
        .all(|value| value.is_finite())
        && width > 0.0
        && height > 0.0;
    if !measurable {
        return Err(ExportError::EmptyBounds);
    }

    let width_px = ((width + 2.0 * EXPORT_PADDING) * EXPORT_SCALE).ceil() as u32;
    let height_px = ((height + 2.0 * EXPORT_PADDING) * EXPORT_SCALE).ceil() as u32;
    let mut pixmap = tiny_skia::Pixmap::new(width_px, height_px).ok_or(ExportError::PixmapAlloc {
        width: width_px,
        height: height_px,
    })?;
    pixmap.fill(tiny_skia::Color::WHITE);

    let transform = tiny_skia::Transform::from_row(
        EXPORT_SCALE,
        0.0,
        0.0,
        EXPORT_SCALE,
        (EXPORT_PADDING - min_x) * EXPORT_SCALE,
        (EXPORT_PADDING - min_y) * EXPORT_SCALE,
    );
    resvg::render(&tree, transform, &mut pixmap.as_mut());
    Ok(pixmap)
}
