use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::quadtree::QuadTree;
use crate::types::*;

/// The visible world region, already inverse-transformed from screen space.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Viewport {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CullResult<'a, T> {
    pub visible: Vec<&'a T>,
    pub culled: Vec<&'a T>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewportCuller {
    /// World units around the viewport still treated as visible.
    pub padding: f64,
    /// Node count from which culling goes through a quadtree.
    pub spatial_index_threshold: usize,
}

impl Default for ViewportCuller {
    fn default() -> Self {
        Self {
            padding: 50.0,
            spatial_index_threshold: 500,
        }
    }
}

impl ViewportCuller {
    pub fn new(padding: f64) -> Self {
        Self {
            padding,
            ..Default::default()
        }
    }

    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.spatial_index_threshold = threshold;
        self
    }

    fn region(&self, viewport: &Viewport) -> Rect {
        viewport.rect().expand(self.padding)
    }

    pub fn cull_nodes<'a>(
        &self,
        nodes: &'a [LayoutNode],
        viewport: &Viewport,
    ) -> CullResult<'a, LayoutNode> {
        let region = self.region(viewport);
        let (visible, culled): (Vec<&LayoutNode>, Vec<&LayoutNode>) =
            if nodes.len() >= self.spatial_index_threshold {
                let index = create_spatial_index(nodes);
                let hits: HashSet<usize> = index.query(&region).into_iter().copied().collect();
                let mut visible = Vec::new();
                let mut culled = Vec::new();
                for (i, node) in nodes.iter().enumerate() {
                    if hits.contains(&i) {
                        visible.push(node);
                    } else {
                        culled.push(node);
                    }
                }
                (visible, culled)
            } else {
                nodes.iter().partition(|n| n.rect().intersects(&region))
            };
        trace!(visible = visible.len(), culled = culled.len(), "culled nodes");
        CullResult { visible, culled }
    }

    /// A flow is drawn when either end is visible, even if its curve would
    /// cross the viewport with both ends outside.
    pub fn cull_flows<'a>(
        &self,
        flows: &'a [FlowPath],
        visible_nodes: &[&LayoutNode],
    ) -> CullResult<'a, FlowPath> {
        let ids: HashSet<&str> = visible_nodes.iter().map(|n| n.id.as_str()).collect();
        let (visible, culled): (Vec<&FlowPath>, Vec<&FlowPath>) = flows
            .iter()
            .partition(|f| ids.contains(f.source.as_str()) || ids.contains(f.target.as_str()));
        CullResult { visible, culled }
    }

    /// Bounding box of the visible nodes only.
    pub fn get_visible_bounds(&self, nodes: &[LayoutNode], viewport: &Viewport) -> Option<Rect> {
        Rect::bounding(
            self.cull_nodes(nodes, viewport)
                .visible
                .into_iter()
                .map(LayoutNode::rect),
        )
    }
}

/// Quadtree over node rectangles keyed by index into `nodes`.
pub fn create_spatial_index(nodes: &[LayoutNode]) -> QuadTree<usize> {
    let bounds = Rect::bounding(nodes.iter().map(LayoutNode::rect)).unwrap_or_default();
    let mut index = QuadTree::new(bounds);
    for (i, node) in nodes.iter().enumerate() {
        index.insert(node.rect(), i);
    }
    index
}
