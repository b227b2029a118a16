//! Interpolation frames between two layouts. Only produces data; the host
//! decides when each frame is shown.

use std::collections::HashMap;

use crate::types::*;

pub const FRAME_COUNT: usize = 30;

/// Ease-in-out cubic on `t` in 0..=1.
pub fn ease_in_out_cubic(t: f64) -> f64 {
    let t = t.clamp(0.0, 1.0);
    if t < 0.5 {
        4.0 * t * t * t
    } else {
        1.0 - (-2.0 * t + 2.0).powi(3) / 2.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub index: usize,
    /// Offset from the start of the transition.
    pub time_ms: f64,
    /// Eased progress, 0..=1.
    pub progress: f64,
    pub nodes: Vec<LayoutNode>,
}

/// Frames moving `old_nodes` to `new_layout`: kept nodes slide, added nodes
/// fade in at their target, removed nodes fade out where they were.
pub fn animate_to_new_layout(
    old_nodes: &[LayoutNode],
    new_layout: &TreeLayout,
    duration_ms: f64,
) -> Vec<Frame> {
    let old: HashMap<&str, &LayoutNode> = old_nodes.iter().map(|n| (n.id.as_str(), n)).collect();
    let removed: Vec<&LayoutNode> = old_nodes
        .iter()
        .filter(|n| !new_layout.nodes.iter().any(|m| m.id == n.id))
        .collect();

    let frame_count = if duration_ms > 0.0 { FRAME_COUNT } else { 1 };
    (1..=frame_count)
        .map(|index| {
            let t = index as f64 / frame_count as f64;
            let progress = ease_in_out_cubic(t);
            let mut nodes: Vec<LayoutNode> = new_layout
                .nodes
                .iter()
                .map(|target| {
                    let mut node = target.clone();
                    match old.get(target.id.as_str()) {
                        Some(previous) => {
                            node.position = previous.position.lerp(&target.position, progress);
                            node.opacity =
                                previous.opacity + (target.opacity - previous.opacity) * progress;
                        }
                        None => node.opacity = target.opacity * progress,
                    }
                    node
                })
                .collect();
            nodes.extend(removed.iter().map(|gone| {
                let mut node = (*gone).clone();
                node.opacity = gone.opacity * (1.0 - progress);
                node
            }));
            Frame {
                index,
                time_ms: duration_ms.max(0.0) * t,
                progress,
                nodes,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, x: f64) -> LayoutNode {
        LayoutNode {
            id: id.to_string(),
            name: id.to_string(),
            parent: None,
            depth: 0,
            position: Position::new(x, 0.0),
            size: Size {
                width: 10.0,
                height: 10.0,
            },
            flow_value: 0.0,
            capacity_label: String::new(),
            has_children: false,
            collapsed: false,
            is_new: false,
            is_deleted: false,
            opacity: 1.0,
        }
    }

    #[test]
    fn test_easing_endpoints() {
        assert_eq!(ease_in_out_cubic(0.0), 0.0);
        assert_eq!(ease_in_out_cubic(1.0), 1.0);
        assert!((ease_in_out_cubic(0.5) - 0.5).abs() < 1e-12);
        assert!(ease_in_out_cubic(0.25) < 0.25);
    }

    #[test]
    fn test_frames() {
        let old = vec![node("a", 0.0), node("gone", 50.0)];
        let new_layout = TreeLayout {
            nodes: vec![node("a", 100.0), node("added", 200.0)],
            ..Default::default()
        };
        let frames = animate_to_new_layout(&old, &new_layout, 300.0);
        assert_eq!(frames.len(), FRAME_COUNT);
        let last = frames.last().unwrap();
        assert_eq!(last.time_ms, 300.0);
        assert_eq!(last.nodes[0].position.x, 100.0);
        assert_eq!(last.nodes[1].opacity, 1.0);
        assert_eq!(last.nodes[2].id, "gone");
        assert_eq!(last.nodes[2].opacity, 0.0);

        let first = &frames[0];
        assert!(first.nodes[0].position.x > 0.0 && first.nodes[0].position.x < 100.0);
        assert!(first.nodes[1].opacity < 0.1);
    }

    #[test]
    fn test_zero_duration_jumps() {
        let frames = animate_to_new_layout(&[], &TreeLayout::default(), 0.0);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].progress, 1.0);
    }
}
