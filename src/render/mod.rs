use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, warn};

use crate::raster::{RasterError, parse_tree};

pub mod backend;
pub mod graph;
pub mod options;

pub use self::backend::{ConfiguredRenderer, DiagramRenderer, KrokiRenderer, MermaidCliRenderer};
pub use self::graph::{Bounds, GraphEdge, GraphNode, RenderedGraph};

/// Attributes on the root `<svg>` that pin its on-screen size.
const SIZING_ATTRIBUTES: [&str; 3] = ["width", "height", "style"];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("diagram text is empty")]
    EmptyInput,

    #[error("{0}")]
    Rejected(String),

    #[error("renderer unavailable: {0}")]
    Backend(String),

    #[error("renderer timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("renderer produced invalid markup: {0}")]
    InvalidMarkup(String),
}

impl RenderError {
    /// First line of the message, as shown in the error banner.
    pub fn headline(&self) -> String {
        first_line(&self.to_string()).to_owned()
    }
}

impl From<RasterError> for RenderError {
    fn from(error: RasterError) -> Self {
        Self::InvalidMarkup(error.to_string())
    }
}

/// Token identifying one render request. Larger is newer.
pub type RenderAttempt = u64;

/// Issues attempt tokens and tells whether a completed attempt is still current.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttemptTracker {
    latest: RenderAttempt,
}

impl AttemptTracker {
    pub fn next(&mut self) -> RenderAttempt {
        self.latest = self.latest.saturating_add(1);
        self.latest
    }

    pub fn latest(&self) -> Option<RenderAttempt> {
        (self.latest > 0).then_some(self.latest)
    }

    pub fn is_current(&self, attempt: RenderAttempt) -> bool {
        attempt != 0 && attempt == self.latest
    }
}

/// Successfully rendered, normalized markup plus what the studio needs to
/// interact with it.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedDiagram {
    pub markup: String,
    pub graph: RenderedGraph,
    pub width: f32,
    pub height: f32,
}

impl RenderedDiagram {
    /// Normalizes raw renderer output and analyses it.
    pub fn from_svg(svg: &str) -> Result<Self, RenderError> {
        let markup = strip_sizing_attributes(svg);
        let tree = parse_tree(&markup)?;
        let graph = RenderedGraph::analyze(&markup, &tree)?;
        let size = tree.size();

        Ok(Self {
            markup,
            graph,
            width: size.width(),
            height: size.height(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct RenderAdapter<R> {
    renderer: R,
    timeout: Duration,
}

impl<R: DiagramRenderer> RenderAdapter<R> {
    pub fn new(renderer: R, timeout: Duration) -> Self {
        Self { renderer, timeout }
    }

    pub async fn render(&self, text: &str) -> Result<RenderedDiagram, RenderError> {
        if text.trim().is_empty() {
            return Err(RenderError::EmptyInput);
        }

        let svg = match timeout(self.timeout, self.renderer.render_svg(text)).await {
            Ok(result) => result?,
            Err(_) => {
                let timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(timeout_ms, "diagram render timed out");
                return Err(RenderError::Timeout { timeout_ms });
            }
        };

        let diagram = RenderedDiagram::from_svg(&svg)?;
        debug!(
            nodes = diagram.graph.nodes.len(),
            edges = diagram.graph.edges.len(),
            width = diagram.width,
            height = diagram.height,
            "diagram rendered"
        );
        Ok(diagram)
    }
}

pub fn first_line(message: &str) -> &str {
    message.trim().lines().next().unwrap_or_default()
}

/// Drops `width`, `height` and inline `style` from the root `<svg>` element
/// so the viewport controls the visual scale. Markup without a `viewBox`
/// keeps its size attributes, since they are then its only size.
pub fn strip_sizing_attributes(svg: &str) -> String {
    let Some(start) = svg.find("<svg") else {
        return svg.to_owned();
    };
    let Some(end) = find_tag_end(svg, start) else {
        return svg.to_owned();
    };
    let tag = &svg[start + "<svg".len()..end];
    let self_closing = tag.ends_with('/');
    let tag = tag.trim_end_matches('/');

    let attributes = parse_attributes(tag);
    if !attributes.iter().any(|(name, _)| *name == "viewBox") {
        return svg.to_owned();
    }

    let mut rebuilt = String::with_capacity(svg.len());
    rebuilt.push_str(&svg[..start]);
    rebuilt.push_str("<svg");
    for (name, raw) in attributes {
        if SIZING_ATTRIBUTES.contains(&name) {
            continue;
        }
        rebuilt.push(' ');
        rebuilt.push_str(raw);
    }
    if self_closing {
        rebuilt.push('/');
    }
    rebuilt.push_str(&svg[end..]);
    rebuilt
}

/// Index of the `>` closing the tag that starts at `start`, skipping quoted values.
fn find_tag_end(markup: &str, start: usize) -> Option<usize> {
    let mut quote = None;
    for (offset, byte) in markup.as_bytes()[start..].iter().enumerate() {
        match (quote, *byte) {
            (None, b'"' | b'\'') => quote = Some(*byte),
            (Some(open), current) if open == current => quote = None,
            (None, b'>') => return Some(start + offset),
            _ => {}
        }
    }
    None
}

/// Splits the inside of a start tag into `(name, raw "name=value" text)` pairs.
fn parse_attributes(tag: &str) -> Vec<(&str, &str)> {
    let mut attributes = Vec::new();
    let bytes = tag.as_bytes();
    let mut index = 0;

    while index < bytes.len() {
        while index < bytes.len() && bytes[index].is_ascii_whitespace() {
            index += 1;
        }
        let name_start = index;
        while index < bytes.len() && !bytes[index].is_ascii_whitespace() && bytes[index] != b'=' {
            index += 1;
        }
        if name_start == index {
            break;
        }
        let name = &tag[name_start..index];

        while index < bytes.len() && bytes[index].is_ascii_whitespace() {
            index += 1;
        }
        if index < bytes.len() && bytes[index] == b'=' {
            index += 1;
            while index < bytes.len() && bytes[index].is_ascii_whitespace() {
                index += 1;
            }
            if index < bytes.len() && (bytes[index] == b'"' || bytes[index] == b'\'') {
                let quote = bytes[index];
                index += 1;
                while index < bytes.len() && bytes[index] != quote {
                    index += 1;
                }
                index = (index + 1).min(bytes.len());
            } else {
                while index < bytes.len() && !bytes[index].is_ascii_whitespace() {
                    index += 1;
                }
            }
        }

        attributes.push((name, &tag[name_start..index]));
    }

    attributes
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::test_support::{FLOWCHART_SVG, ScriptedRenderer};

    use super::{
        AttemptTracker, RenderAdapter, RenderError, RenderedDiagram, first_line,
        strip_sizing_attributes,
    };

    #[test]
    fn strip_sizing_attributes_removes_root_size_and_style() {
        let svg = r#"<svg id="m" width="100%" xmlns="http://www.w3.org/2000/svg" style="max-width: 262px;" viewBox="0 0 262 478" height="478"><rect style="fill:red" width="10" height="10"/></svg>"#;
        let stripped = strip_sizing_attributes(svg);

        assert_eq!(
            stripped,
            r#"<svg id="m" xmlns="http://www.w3.org/2000/svg" viewBox="0 0 262 478"><rect style="fill:red" width="10" height="10"/></svg>"#
        );
    }

    #[test]
    fn strip_sizing_attributes_keeps_size_without_viewbox() {
        let svg = r#"<svg width="40" height="20" xmlns="http://www.w3.org/2000/svg"></svg>"#;
        assert_eq!(strip_sizing_attributes(svg), svg);
    }

    #[test]
    fn strip_sizing_attributes_handles_prolog_and_single_quotes() {
        let svg = "<?xml version=\"1.0\"?>\n<svg width='10' viewBox='0 0 10 10' data-x=\"a>b\"></svg>";
        let stripped = strip_sizing_attributes(svg);
        assert!(stripped.starts_with("<?xml version=\"1.0\"?>\n<svg viewBox='0 0 10 10'"));
        assert!(!stripped.contains("width"));
    }

    #[test]
    fn attempt_tracker_only_accepts_latest() {
        let mut tracker = AttemptTracker::default();
        assert_eq!(tracker.latest(), None);
        assert!(!tracker.is_current(0));

        let first = tracker.next();
        let second = tracker.next();
        assert!(second > first);
        assert!(!tracker.is_current(first));
        assert!(tracker.is_current(second));
        assert_eq!(tracker.latest(), Some(second));
    }

    #[test]
    fn first_line_takes_banner_headline() {
        assert_eq!(
            first_line("\nParse error on line 2:\n...B{Missing\n-----^"),
            "Parse error on line 2:"
        );
        assert_eq!(first_line(""), "");
        assert_eq!(
            RenderError::Rejected("Lexical error\nmore".to_owned()).headline(),
            "Lexical error"
        );
    }

    #[test]
    fn rendered_diagram_uses_viewbox_size() {
        let diagram = RenderedDiagram::from_svg(FLOWCHART_SVG).expect("fixture should render");
        assert_eq!(diagram.width, 262.0);
        assert_eq!(diagram.height, 478.0);
        assert!(!diagram.markup.contains("max-width"));
        assert_eq!(diagram.graph.nodes.len(), 5);
    }

    #[tokio::test]
    async fn adapter_rejects_blank_text_without_calling_backend() {
        let renderer = ScriptedRenderer::new();
        let adapter = RenderAdapter::new(renderer.clone(), Duration::from_secs(1));

        let error = adapter.render("  \n\t").await.expect_err("blank should fail");
        assert_eq!(error, RenderError::EmptyInput);
        assert_eq!(renderer.call_count(), 0);
    }

    #[tokio::test]
    async fn adapter_surfaces_rejection_and_success() {
        let renderer = ScriptedRenderer::new()
            .succeed_on("flowchart TD\n    A --> B", FLOWCHART_SVG)
            .fail_on("flowchart TD\n    A --> B{", "Parse error on line 2:\nExpecting ...");
        let adapter = RenderAdapter::new(renderer, Duration::from_secs(1));

        let diagram = adapter
            .render("flowchart TD\n    A --> B")
            .await
            .expect("valid text should render");
        assert_eq!(diagram.graph.edges.len(), 5);

        let error = adapter
            .render("flowchart TD\n    A --> B{")
            .await
            .expect_err("invalid text should fail");
        assert_eq!(error.headline(), "Parse error on line 2:");
    }

    #[tokio::test]
    async fn adapter_reports_invalid_markup() {
        let renderer = ScriptedRenderer::new().succeed_on("graph", "<html>nope</html>");
        let adapter = RenderAdapter::new(renderer, Duration::from_secs(1));

        let error = adapter.render("graph").await.expect_err("html is not svg");
        assert!(matches!(error, RenderError::InvalidMarkup(_)), "got: {error}");
    }

    #[tokio::test]
    async fn adapter_times_out_slow_backends() {
        let renderer = ScriptedRenderer::new()
            .succeed_on("graph", FLOWCHART_SVG)
            .delay_on("graph", Duration::from_millis(500));
        let adapter = RenderAdapter::new(renderer, Duration::from_millis(20));

        let error = adapter.render("graph").await.expect_err("should time out");
        assert_eq!(error, RenderError::Timeout { timeout_ms: 20 });
    }
}
