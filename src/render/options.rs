use std::sync::OnceLock;

use serde_json::{Value, json};

static RENDERER_OPTIONS: OnceLock<RendererOptions> = OnceLock::new();

/// Renderer configuration shared by every backend, fixed for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RendererOptions {
    pub theme: String,
    pub font_family: String,
    pub flowchart_curve: String,
    /// HTML labels end up in `foreignObject`, which the rasterizer cannot draw.
    pub html_labels: bool,
}

impl Default for RendererOptions {
    fn default() -> Self {
        Self {
            theme: "base".to_owned(),
            font_family: "Inter, Arial, sans-serif".to_owned(),
            flowchart_curve: "basis".to_owned(),
            html_labels: false,
        }
    }
}

impl RendererOptions {
    /// Mermaid site configuration carrying these options.
    pub fn mermaid_config(&self) -> Value {
        json!({
            "theme": self.theme,
            "fontFamily": self.font_family,
            "htmlLabels": self.html_labels,
            "flowchart": {
                "htmlLabels": self.html_labels,
                "curve": self.flowchart_curve,
            },
        })
    }

    /// Mermaid `%%{init: ...}%%` directive carrying these options.
    pub fn init_directive(&self) -> String {
        format!("%%{{init: {}}}%%", self.mermaid_config())
    }

    /// Prefixes `source` with the init directive. Parser messages for the
    /// result count lines from the directive; see [`unshift_line_numbers`].
    pub fn apply_to(&self, source: &str) -> String {
        format!("{}\n{source}", self.init_directive())
    }
}

/// Lines [`RendererOptions::apply_to`] puts in front of the source.
pub const DIRECTIVE_LINES: u64 = 1;

const LINE_MARKER: &str = "line ";

/// Rewrites `line N` references in a parser message for directive-prefixed
/// text so they count lines of the text as typed.
pub fn unshift_line_numbers(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    let mut rest = message;
    while let Some(index) = rest.find(LINE_MARKER) {
        let (head, tail) = rest.split_at(index + LINE_MARKER.len());
        out.push_str(head);
        let digits = tail.bytes().take_while(u8::is_ascii_digit).count();
        let (number, after) = tail.split_at(digits);
        match number.parse::<u64>() {
            Ok(line) if line > DIRECTIVE_LINES => {
                out.push_str(&(line - DIRECTIVE_LINES).to_string());
            }
            _ => out.push_str(number),
        }
        rest = after;
    }
    out.push_str(rest);
    out
}

pub fn renderer_options() -> &'static RendererOptions {
    RENDERER_OPTIONS.get_or_init(RendererOptions::default)
}
