use std::collections::HashSet;

use petgraph::graph::{DiGraph, NodeIndex};
use tracing::debug;

use crate::flow::build_flows;
use crate::source::HierarchySource;
use crate::types::*;

/// Places a hierarchy as a tidy tree: leaves take consecutive slots on the
/// cross axis and every parent is centred over its children.
#[derive(Debug, Clone, Default)]
pub struct TreeLayoutEngine {
    pub options: LayoutOptions,
    collapsed: HashSet<String>,
}

struct Placement {
    graph: DiGraph<usize, ()>,
    nodes: Vec<LayoutNode>,
    next_slot: usize,
}

impl TreeLayoutEngine {
    pub fn new(options: LayoutOptions) -> Self {
        Self {
            options,
            collapsed: HashSet::new(),
        }
    }

    /// Flip the collapse state of `id`; returns the new state.
    pub fn toggle(&mut self, id: &str) -> bool {
        if self.collapsed.remove(id) {
            false
        } else {
            self.collapsed.insert(id.to_string());
            true
        }
    }

    pub fn collapse(&mut self, id: &str) {
        self.collapsed.insert(id.to_string());
    }

    pub fn expand(&mut self, id: &str) {
        self.collapsed.remove(id);
    }

    pub fn is_collapsed(&self, id: &str) -> bool {
        self.collapsed.contains(id)
    }

    pub fn reset(&mut self) {
        self.collapsed.clear();
    }

    pub fn collapsed(&self) -> impl Iterator<Item = &str> {
        self.collapsed.iter().map(String::as_str)
    }

    pub fn compute_layout<S: HierarchySource>(&self, source: &S) -> Result<TreeLayout, LayoutError> {
        let root = source.root_id().to_string();
        if !source.contains(&root) {
            return Err(LayoutError::UnknownRoot(root));
        }

        // Phase 1: depth-first placement of visible nodes
        let mut placement = Placement {
            graph: DiGraph::new(),
            nodes: Vec::new(),
            next_slot: 0,
        };
        self.place(source, &root, None, 0, &mut placement);

        // Phase 2: flows along parent/child edges
        let flows = build_flows(&placement.nodes, &placement.graph, &self.options);

        // Phase 3: padded bounds
        let bounds = Rect::bounding(placement.nodes.iter().map(LayoutNode::rect))
            .unwrap_or_default()
            .expand(self.options.padding);

        debug!(
            nodes = placement.nodes.len(),
            flows = flows.len(),
            collapsed = self.collapsed.len(),
            "computed tree layout"
        );
        Ok(TreeLayout {
            nodes: placement.nodes,
            flows,
            bounds,
        })
    }

    fn node_size(&self) -> Size {
        Size {
            width: self.options.node_width,
            height: self.options.node_height,
        }
    }

    /// (main-axis extent, cross-axis extent) of one node.
    fn extents(&self) -> (f64, f64) {
        match self.options.orientation {
            Orientation::Horizontal => (self.options.node_width, self.options.node_height),
            Orientation::Vertical => (self.options.node_height, self.options.node_width),
        }
    }

    fn position(&self, depth: usize, cross: f64) -> Position {
        let (main_extent, _) = self.extents();
        let main = depth as f64 * (main_extent + self.options.level_spacing);
        match self.options.orientation {
            Orientation::Horizontal => Position::new(main, cross),
            Orientation::Vertical => Position::new(cross, main),
        }
    }

    /// Places `id` and its visible subtree, returning its cross coordinate.
    fn place<S: HierarchySource>(
        &self,
        source: &S,
        id: &str,
        parent: Option<(NodeIndex, &str)>,
        depth: usize,
        placement: &mut Placement,
    ) -> f64 {
        let index = placement.nodes.len();
        let graph_index = placement.graph.add_node(index);
        if let Some((parent_index, _)) = parent {
            placement.graph.add_edge(parent_index, graph_index, ());
        }

        let children = source.children(id);
        let collapsed = self.is_collapsed(id);
        placement.nodes.push(LayoutNode {
            id: id.to_string(),
            name: source.label(id),
            parent: parent.map(|(_, p)| p.to_string()),
            depth,
            position: Position::default(),
            size: self.node_size(),
            flow_value: source.flow_value(id),
            capacity_label: source.capacity_label(id),
            has_children: !children.is_empty(),
            collapsed,
            is_new: source.is_new(id),
            is_deleted: source.is_deleted(id),
            opacity: 1.0,
        });

        let (_, cross_extent) = self.extents();
        let cross = if children.is_empty() || collapsed {
            let slot = placement.next_slot;
            placement.next_slot += 1;
            slot as f64 * (cross_extent + self.options.sibling_spacing)
        } else {
            let mut first = None;
            let mut last = 0.0;
            for child in &children {
                let c = self.place(source, child, Some((graph_index, id)), depth + 1, placement);
                first.get_or_insert(c);
                last = c;
            }
            (first.unwrap_or(last) + last) / 2.0
        };
        placement.nodes[index].position = self.position(depth, cross);
        cross
    }
}

pub fn get_nodes_at_depth(nodes: &[LayoutNode], depth: usize) -> Vec<&LayoutNode> {
    nodes.iter().filter(|n| n.depth == depth).collect()
}

pub fn get_max_depth(nodes: &[LayoutNode]) -> usize {
    nodes.iter().map(|n| n.depth).max().unwrap_or(0)
}

pub fn find_node<'a>(nodes: &'a [LayoutNode], id: &str) -> Option<&'a LayoutNode> {
    nodes.iter().find(|n| n.id == id)
}

/// Topmost node under a world point; later nodes draw over earlier ones.
pub fn node_at(nodes: &[LayoutNode], point: Position) -> Option<&LayoutNode> {
    nodes.iter().rev().find(|n| n.rect().contains_point(point))
}
