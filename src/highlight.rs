//! Node selection and the highlight projection over a rendered graph.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::render::RenderedGraph;

const IDENTITY_DELIMITER: char = '-';
const ACCENT_COLOR: &str = "#4f46e5";
const DIMMED_OPACITY: f32 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HighlightState {
    #[default]
    Normal,
    Highlighted,
    Dimmed,
}

/// Currently selected node identity.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Selection {
    node_id: Option<String>,
}

impl Selection {
    pub fn node_id(&self) -> Option<&str> {
        self.node_id.as_deref()
    }

    /// Applies a click whose nearest node element is `hit`; a miss clears.
    pub fn click(&mut self, hit: Option<&str>) {
        self.node_id = hit.map(str::to_owned);
    }

    pub fn clear(&mut self) {
        self.node_id = None;
    }

    /// Short name for the overlay, e.g. `A` for `flowchart-A-0`.
    pub fn display_name(&self) -> Option<&str> {
        self.node_id.as_deref().map(raw_token)
    }
}

/// Unprefixed part of a namespaced node identity: the segment after the
/// first `-`. Falls back to the whole identity when that segment is missing
/// or empty.
pub fn raw_token(node_id: &str) -> &str {
    node_id
        .split(IDENTITY_DELIMITER)
        .nth(1)
        .filter(|token| !token.is_empty())
        .unwrap_or(node_id)
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HighlightPlan {
    pub nodes: BTreeMap<String, HighlightState>,
    pub edges: BTreeMap<String, HighlightState>,
}

impl HighlightPlan {
    pub fn node_state(&self, id: &str) -> HighlightState {
        self.nodes.get(id).copied().unwrap_or_default()
    }

    pub fn edge_state(&self, id: &str) -> HighlightState {
        self.edges.get(id).copied().unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.values().all(|state| *state == HighlightState::Normal)
            && self.edges.values().all(|state| *state == HighlightState::Normal)
    }
}

pub fn highlight_plan(graph: &RenderedGraph, selection: &Selection) -> HighlightPlan {
    let mut plan = HighlightPlan {
        nodes: graph
            .nodes
            .iter()
            .map(|node| (node.id.clone(), HighlightState::Normal))
            .collect(),
        edges: graph
            .edges
            .iter()
            .map(|edge| (edge.id.clone(), HighlightState::Normal))
            .collect(),
    };

    let Some(selected) = selection.node_id() else {
        return plan;
    };

    for (id, state) in &mut plan.nodes {
        *state = if id == selected {
            HighlightState::Highlighted
        } else {
            HighlightState::Dimmed
        };
    }

    let token = raw_token(selected);
    for (id, state) in &mut plan.edges {
        *state = if id.contains(token) {
            HighlightState::Highlighted
        } else {
            HighlightState::Dimmed
        };
    }

    plan
}

/// Injects a stylesheet realising `plan` right before the closing `</svg>`.
pub fn apply_highlight_plan(markup: &str, root_id: Option<&str>, plan: &HighlightPlan) -> String {
    if plan.is_empty() {
        return markup.to_owned();
    }

    let scope = root_id.map(id_selector).unwrap_or_else(|| "svg".to_owned());
    let mut css = String::new();

    for (id, state) in &plan.nodes {
        let selector = format!("{scope} {}", id_selector(id));
        match state {
            HighlightState::Normal => {}
            HighlightState::Dimmed => {
                let _ = write!(css, "{selector}{{opacity:{DIMMED_OPACITY};}}");
            }
            HighlightState::Highlighted => {
                let _ = write!(
                    css,
                    "{selector} rect,{selector} polygon,{selector} circle,{selector} ellipse,{selector} path{{stroke:{ACCENT_COLOR};stroke-width:3px;}}"
                );
            }
        }
    }

    for (id, state) in &plan.edges {
        let selector = format!("{scope} {}", id_selector(id));
        match state {
            HighlightState::Normal => {}
            HighlightState::Dimmed => {
                let _ = write!(css, "{selector}{{opacity:{DIMMED_OPACITY};}}");
            }
            HighlightState::Highlighted => {
                let _ = write!(
                    css,
                    "{selector},{selector} path{{stroke:{ACCENT_COLOR};stroke-width:3px;opacity:1;}}"
                );
            }
        }
    }

    let Some(close) = markup.rfind("</svg>") else {
        return markup.to_owned();
    };
    let mut styled = String::with_capacity(markup.len() + css.len() + 32);
    styled.push_str(&markup[..close]);
    let _ = write!(styled, "<style data-studio=\"highlight\">{css}</style>");
    styled.push_str(&markup[close..]);
    styled
}

/// `#id` when the identity is a plain CSS identifier (so it outranks the
/// renderer's own `#root .class` rules), an attribute selector otherwise.
fn id_selector(id: &str) -> String {
    let plain = id
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
        && id
            .chars()
            .next()
            .is_some_and(|first| first.is_ascii_alphabetic() || first == '_');
    if plain {
        format!("#{id}")
    } else {
        format!("[id=\"{}\"]", id.replace('\\', "\\\\").replace('"', "\\\""))
    }
}
