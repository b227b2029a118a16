use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::types::*;

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Flow width for a value in 0..=100, monotonic and clamped to the
/// configured range.
pub fn flow_width(value: f64, options: &LayoutOptions) -> f64 {
    let min = options.min_flow_width.min(options.max_flow_width);
    let max = options.max_flow_width.max(options.min_flow_width);
    let share = if value.is_finite() {
        value.clamp(0.0, 100.0) / 100.0
    } else {
        0.0
    };
    (min + (max - min) * share).clamp(min, max)
}

/// Where flows leave a parent and enter a child.
fn anchors(source: &LayoutNode, target: &LayoutNode, orientation: Orientation) -> (Position, Position) {
    let s = source.rect();
    let t = target.rect();
    match orientation {
        Orientation::Horizontal => (
            Position::new(s.right(), s.center().y),
            Position::new(t.x, t.center().y),
        ),
        Orientation::Vertical => (
            Position::new(s.center().x, s.bottom()),
            Position::new(t.center().x, t.y),
        ),
    }
}

/// Control points pulled from the endpoints toward the midpoint of the main
/// axis by `curvature`.
fn control_points(
    start: Position,
    end: Position,
    orientation: Orientation,
    curvature: f64,
) -> (Position, Position) {
    let k = curvature.clamp(0.0, 1.0);
    match orientation {
        Orientation::Horizontal => {
            let mid = (start.x + end.x) / 2.0;
            (
                Position::new(start.x + (mid - start.x) * k, start.y),
                Position::new(end.x + (mid - end.x) * k, end.y),
            )
        }
        Orientation::Vertical => {
            let mid = (start.y + end.y) / 2.0;
            (
                Position::new(start.x, start.y + (mid - start.y) * k),
                Position::new(end.x, end.y + (mid - end.y) * k),
            )
        }
    }
}

/// Cubic bezier from `start` to `end` as SVG path data.
pub fn bezier_path(start: Position, end: Position, orientation: Orientation, curvature: f64) -> String {
    let (c1, c2) = control_points(start, end, orientation, curvature);
    format!(
        "M {} {} C {} {}, {} {}, {} {}",
        round2(start.x),
        round2(start.y),
        round2(c1.x),
        round2(c1.y),
        round2(c2.x),
        round2(c2.y),
        round2(end.x),
        round2(end.y)
    )
}

/// Closed ribbon of constant `width` between two anchor centres.
pub fn ribbon_path(
    start: Position,
    end: Position,
    width: f64,
    orientation: Orientation,
    curvature: f64,
) -> String {
    let half = width / 2.0;
    let offset = |p: Position, d: f64| match orientation {
        Orientation::Horizontal => Position::new(p.x, p.y + d),
        Orientation::Vertical => Position::new(p.x + d, p.y),
    };
    let (s0, e0) = (offset(start, -half), offset(end, -half));
    let (s1, e1) = (offset(start, half), offset(end, half));
    let (a1, a2) = control_points(s0, e0, orientation, curvature);
    let (b1, b2) = control_points(e1, s1, orientation, curvature);
    format!(
        "M {} {} C {} {}, {} {}, {} {} L {} {} C {} {}, {} {}, {} {} Z",
        round2(s0.x),
        round2(s0.y),
        round2(a1.x),
        round2(a1.y),
        round2(a2.x),
        round2(a2.y),
        round2(e0.x),
        round2(e0.y),
        round2(e1.x),
        round2(e1.y),
        round2(b1.x),
        round2(b1.y),
        round2(b2.x),
        round2(b2.y),
        round2(s1.x),
        round2(s1.y)
    )
}

/// One flow per parent/child edge of `graph`, whose weights index `nodes`.
pub(crate) fn build_flows(
    nodes: &[LayoutNode],
    graph: &DiGraph<usize, ()>,
    options: &LayoutOptions,
) -> Vec<FlowPath> {
    let mut flows = Vec::new();
    for parent_index in graph.node_indices() {
        let parent = &nodes[graph[parent_index]];
        let mut children: Vec<NodeIndex> = graph
            .neighbors_directed(parent_index, Direction::Outgoing)
            .collect();
        // petgraph yields neighbours newest first
        children.sort_by_key(|i| graph[*i]);
        if children.is_empty() {
            continue;
        }

        let widths: Vec<f64> = children
            .iter()
            .map(|i| flow_width(nodes[graph[*i]].flow_value, options))
            .collect();
        let total: f64 = widths.iter().sum();
        let mut stacked = -total / 2.0;

        for (child_index, width) in children.iter().zip(widths) {
            let child = &nodes[graph[*child_index]];
            let (mut start, end) = anchors(parent, child, options.orientation);
            let path = match options.flow_style {
                FlowStyle::Bezier => bezier_path(start, end, options.orientation, options.curvature),
                FlowStyle::Ribbon => {
                    // Stack ribbons along the parent edge in child order.
                    let shift = stacked + width / 2.0;
                    stacked += width;
                    match options.orientation {
                        Orientation::Horizontal => start.y += shift,
                        Orientation::Vertical => start.x += shift,
                    }
                    ribbon_path(start, end, width, options.orientation, options.curvature)
                }
            };
            flows.push(FlowPath {
                source: parent.id.clone(),
                target: child.id.clone(),
                width,
                path,
                start,
                end,
            });
        }
    }
    flows
}
