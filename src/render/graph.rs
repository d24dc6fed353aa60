use crate::raster::RasterError;

const NODE_CLASS: &str = "node";
const EDGE_CLASSES: [&str; 2] = ["edgePath", "flowchart-link"];

/// Axis-aligned box in diagram (unscaled SVG) coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Bounds {
    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.x && x <= self.x + self.width && y >= self.y && y <= self.y + self.height
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    pub fn union(&self, other: &Self) -> Self {
        let left = self.x.min(other.x);
        let top = self.y.min(other.y);
        let right = (self.x + self.width).max(other.x + other.width);
        let bottom = (self.y + self.height).max(other.y + other.height);
        Self {
            x: left,
            y: top,
            width: right - left,
            height: bottom - top,
        }
    }

    fn has_area(&self) -> bool {
        self.width > 0.0 && self.height > 0.0 && self.x.is_finite() && self.y.is_finite()
    }
}

impl From<usvg::Rect> for Bounds {
    fn from(rect: usvg::Rect) -> Self {
        Self {
            x: rect.x(),
            y: rect.y(),
            width: rect.width(),
            height: rect.height(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraphNode {
    pub id: String,
    pub label: String,
    pub bounds: Option<Bounds>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphEdge {
    pub id: String,
}

/// Nodes and edges found in rendered markup.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RenderedGraph {
    pub root_id: Option<String>,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl RenderedGraph {
    /// Collects node/edge elements from `markup`, taking node bounds from `tree`.
    pub fn analyze(markup: &str, tree: &usvg::Tree) -> Result<Self, RasterError> {
        let document = roxmltree::Document::parse(markup)
            .map_err(|error| RasterError::SvgParse(error.to_string()))?;
        let root = document.root_element();
        let root_id = root
            .attribute("id")
            .filter(|id| !id.is_empty())
            .map(str::to_owned);

        let mut nodes = Vec::new();
        let mut edges = Vec::new();
        for element in root.descendants().filter(|node| node.is_element()) {
            let Some(id) = element.attribute("id").filter(|id| !id.is_empty()) else {
                continue;
            };

            if has_class(&element, NODE_CLASS) {
                nodes.push(GraphNode {
                    id: id.to_owned(),
                    label: element_text(&element),
                    bounds: tree.node_by_id(id).and_then(drawn_bounds),
                });
            } else if EDGE_CLASSES.iter().any(|class| has_class(&element, class)) {
                edges.push(GraphEdge { id: id.to_owned() });
            }
        }

        Ok(Self {
            root_id,
            nodes,
            edges,
        })
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|node| node.id == id)
    }

    pub fn node_by_label(&self, label: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|node| node.label == label)
    }

    /// Innermost node whose bounds contain the point.
    pub fn node_at(&self, x: f32, y: f32) -> Option<&GraphNode> {
        self.nodes
            .iter()
            .filter(|node| node.bounds.is_some_and(|bounds| bounds.contains(x, y)))
            .min_by(|a, b| {
                let area_a = a.bounds.map(|bounds| bounds.area()).unwrap_or(f32::MAX);
                let area_b = b.bounds.map(|bounds| bounds.area()).unwrap_or(f32::MAX);
                area_a.total_cmp(&area_b)
            })
    }
}

/// Union of the leaves under `node` that actually paint something. Groups
/// left empty (a label whose text found no font, for one) report a zero box at
/// the origin and must not stretch the node's hit area.
fn drawn_bounds(node: &usvg::Node) -> Option<Bounds> {
    let bounds = match node {
        usvg::Node::Group(group) => {
            return group
                .children()
                .iter()
                .filter_map(drawn_bounds)
                .reduce(|acc, next| acc.union(&next));
        }
        usvg::Node::Path(path) => {
            let painted = path.is_visible() && (path.fill().is_some() || path.stroke().is_some());
            if !painted {
                return None;
            }
            Bounds::from(path.abs_bounding_box())
        }
        usvg::Node::Image(image) => {
            if !image.is_visible() {
                return None;
            }
            Bounds::from(image.abs_bounding_box())
        }
        usvg::Node::Text(text) => Bounds::from(text.abs_bounding_box()),
    };
    bounds.has_area().then_some(bounds)
}

fn has_class(element: &roxmltree::Node<'_, '_>, class: &str) -> bool {
    element
        .attribute("class")
        .is_some_and(|classes| classes.split_whitespace().any(|token| token == class))
}

fn element_text(element: &roxmltree::Node<'_, '_>) -> String {
    element
        .descendants()
        .filter(|node| node.is_text())
        .filter_map(|node| node.text())
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use crate::raster::parse_tree;
    use crate::test_support::FLOWCHART_SVG;

    use super::{Bounds, RenderedGraph};

    fn flowchart_graph() -> RenderedGraph {
        let tree = parse_tree(FLOWCHART_SVG).expect("fixture should parse");
        RenderedGraph::analyze(FLOWCHART_SVG, &tree).expect("fixture should analyze")
    }

    #[test]
    fn analyze_collects_nodes_edges_and_labels() {
        let graph = flowchart_graph();

        assert_eq!(graph.root_id.as_deref(), Some("mermaid-1"));
        let node_ids = graph
            .nodes
            .iter()
            .map(|node| node.id.as_str())
            .collect::<Vec<_>>();
        assert_eq!(
            node_ids,
            [
                "flowchart-A-0",
                "flowchart-B-1",
                "flowchart-C-3",
                "flowchart-D-5",
                "flowchart-E-9"
            ]
        );
        let edge_ids = graph
            .edges
            .iter()
            .map(|edge| edge.id.as_str())
            .collect::<Vec<_>>();
        assert_eq!(
            edge_ids,
            ["L_A_B_0", "L_B_C_0", "L_B_D_0", "L_D_B_0", "L_C_E_0"]
        );
        assert_eq!(
            graph.node("flowchart-A-0").map(|node| node.label.as_str()),
            Some("Start")
        );
        assert_eq!(
            graph.node_by_label("Is it working?").map(|node| node.id.as_str()),
            Some("flowchart-B-1")
        );
    }

    #[test]
    fn node_bounds_follow_group_transforms() {
        let graph = flowchart_graph();
        let start = graph
            .node("flowchart-A-0")
            .and_then(|node| node.bounds)
            .expect("start node should have bounds");

        assert!(start.contains(131.0, 31.0));
        assert!(!start.contains(131.0, 140.0));
    }

    #[test]
    fn node_bounds_cover_only_drawn_shapes() {
        let graph = flowchart_graph();
        let start = graph
            .node("flowchart-A-0")
            .and_then(|node| node.bounds)
            .expect("start node should have bounds");

        assert!((start.x - 91.0).abs() < 0.5, "{start:?}");
        assert!((start.y - 11.0).abs() < 0.5, "{start:?}");
        assert!((start.width - 80.0).abs() < 0.5, "{start:?}");
        assert!((start.height - 40.0).abs() < 0.5, "{start:?}");
    }

    #[test]
    fn blank_canvas_hits_no_node() {
        let graph = flowchart_graph();

        assert!(graph.node_at(20.0, 20.0).is_none());
        assert!(graph.node_at(10.0, 200.0).is_none());
    }

    #[test]
    fn empty_label_group_does_not_stretch_node_bounds() {
        let svg = r##"<svg id="m" xmlns="http://www.w3.org/2000/svg" viewBox="0 0 300 200"><g class="node" id="flowchart-A-0" transform="translate(200, 150)"><rect x="-20" y="-10" width="40" height="20" fill="#eee"/><g class="label"><g/></g></g></svg>"##;
        let tree = parse_tree(svg).expect("svg should parse");
        let graph = RenderedGraph::analyze(svg, &tree).expect("svg should analyze");

        let bounds = graph.nodes[0].bounds.expect("rect gives bounds");
        assert_eq!((bounds.x, bounds.y), (180.0, 140.0));
        assert_eq!((bounds.width, bounds.height), (40.0, 20.0));
        assert!(graph.node_at(5.0, 5.0).is_none());
    }

    #[test]
    fn node_at_resolves_clicks_and_misses() {
        let graph = flowchart_graph();

        assert_eq!(
            graph.node_at(131.0, 31.0).map(|node| node.id.as_str()),
            Some("flowchart-A-0")
        );
        assert_eq!(
            graph.node_at(200.0, 290.0).map(|node| node.id.as_str()),
            Some("flowchart-D-5")
        );
        assert!(graph.node_at(5.0, 470.0).is_none());
    }

    #[test]
    fn bounds_contains_is_inclusive() {
        let bounds = Bounds {
            x: 10.0,
            y: 10.0,
            width: 20.0,
            height: 5.0,
        };
        assert!(bounds.contains(10.0, 10.0));
        assert!(bounds.contains(30.0, 15.0));
        assert!(!bounds.contains(30.1, 15.0));
        assert_eq!(bounds.area(), 100.0);

        let merged = bounds.union(&Bounds {
            x: 0.0,
            y: 12.0,
            width: 5.0,
            height: 10.0,
        });
        assert_eq!((merged.x, merged.y, merged.width, merged.height), (0.0, 10.0, 30.0, 12.0));
    }
}
