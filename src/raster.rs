//! SVG parsing and rasterization shared by the preview canvas and PNG export.

use std::sync::{Arc, OnceLock};

use tracing::{debug, warn};

static FONTS: OnceLock<Fonts> = OnceLock::new();

struct Fonts {
    db: Arc<usvg::fontdb::Database>,
    sans_serif: Option<String>,
}

/// Families tried, in order, for the generic `sans-serif` family.
const SANS_SERIF_CANDIDATES: [&str; 7] = [
    "Inter",
    "Arial",
    "Helvetica",
    "Liberation Sans",
    "DejaVu Sans",
    "Noto Sans",
    "Roboto",
];

/// Longest pixmap side the preview will allocate.
pub const MAX_PREVIEW_SIDE_PX: f32 = 8_192.0;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RasterError {
    #[error("markup is not valid SVG: {0}")]
    SvgParse(String),

    #[error("failed to allocate a {width}x{height} pixmap")]
    PixmapAlloc { width: u32, height: u32 },
}

fn fonts() -> &'static Fonts {
    FONTS.get_or_init(|| {
        let mut db = usvg::fontdb::Database::new();
        db.load_system_fonts();
        let sans_serif = pick_sans_serif(&db);
        match &sans_serif {
            Some(family) => {
                debug!(family = %family, faces = db.len(), "resolved sans-serif font");
                db.set_sans_serif_family(family.clone());
            }
            None => warn!("no system fonts found; diagram labels will not be drawn"),
        }
        Fonts {
            db: Arc::new(db),
            sans_serif,
        }
    })
}

/// First installed candidate family, or else the first family of any face.
fn pick_sans_serif(db: &usvg::fontdb::Database) -> Option<String> {
    let installed = |name: &str| {
        db.faces()
            .any(|face| face.families.iter().any(|(family, _)| family.eq_ignore_ascii_case(name)))
    };
    SANS_SERIF_CANDIDATES
        .iter()
        .find(|name| installed(**name))
        .map(|name| (*name).to_owned())
        .or_else(|| {
            db.faces()
                .find_map(|face| face.families.first().map(|(family, _)| family.clone()))
        })
}

/// Family that text without an installed font falls back to, if any font
/// is installed at all.
pub fn sans_serif_family() -> Option<&'static str> {
    fonts().sans_serif.as_deref()
}

pub fn svg_options() -> usvg::Options<'static> {
    let fonts = fonts();
    let mut options = usvg::Options::default();
    options.fontdb = Arc::clone(&fonts.db);
    if let Some(family) = &fonts.sans_serif {
        options.font_family = family.clone();
    }
    options
}

pub fn parse_tree(markup: &str) -> Result<usvg::Tree, RasterError> {
    usvg::Tree::from_str(markup, &svg_options())
        .map_err(|error| RasterError::SvgParse(error.to_string()))
}

/// Rasterizes the whole tree at `scale` onto a transparent pixmap.
pub fn rasterize_tree(tree: &usvg::Tree, scale: f32) -> Result<tiny_skia::Pixmap, RasterError> {
    let size = tree.size();
    let width = (size.width() * scale).ceil().max(1.0) as u32;
    let height = (size.height() * scale).ceil().max(1.0) as u32;

    let mut pixmap =
        tiny_skia::Pixmap::new(width, height).ok_or(RasterError::PixmapAlloc { width, height })?;
    resvg::render(
        tree,
        tiny_skia::Transform::from_scale(scale, scale),
        &mut pixmap.as_mut(),
    );
    Ok(pixmap)
}

/// Supersampling factor for preview textures, reduced for very large diagrams.
pub fn preview_scale(width: f32, height: f32, supersample: f32) -> f32 {
    let longest = width.max(height);
    if !longest.is_finite() || longest <= 0.0 {
        return supersample;
    }
    supersample.min(MAX_PREVIEW_SIDE_PX / longest)
}
