//! SVG output for the visible part of a [`QueueGraph`].

use std::path::Path as FsPath;

use queues::RuntimeOverlay;
use queueviz_layout::{FlowPath, FlowStyle, LayoutNode};
use serde::{Deserialize, Serialize};
use svg::Document;
use svg::node::element::{Group, Path, Rectangle, Text};
use tracing::debug;

use crate::graph::QueueGraph;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderStyle {
    pub background: String,
    pub node_fill: String,
    pub node_stroke: String,
    pub new_stroke: String,
    pub deleted_fill: String,
    pub selected_stroke: String,
    pub match_fill: String,
    pub flow_color: String,
    pub usage_fill: String,
    pub text_color: String,
    pub font_size: f64,
    pub corner_radius: f64,
}

impl Default for RenderStyle {
    fn default() -> Self {
        Self {
            background: "#ffffff".into(),
            node_fill: "#f4f6f8".into(),
            node_stroke: "#5b6b7a".into(),
            new_stroke: "#2e9d4f".into(),
            deleted_fill: "#f8d7da".into(),
            selected_stroke: "#1f6feb".into(),
            match_fill: "#fff3bf".into(),
            flow_color: "#9db4cc".into(),
            usage_fill: "#7fb3e0".into(),
            text_color: "#1b1f23".into(),
            font_size: 12.0,
            corner_radius: 4.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SvgRenderer {
    pub style: RenderStyle,
}

fn num(value: f64) -> String {
    let rounded = (value * 100.0).round() / 100.0;
    if rounded == rounded.trunc() {
        format!("{}", rounded as i64)
    } else {
        format!("{rounded}")
    }
}

impl SvgRenderer {
    pub fn new(style: RenderStyle) -> Self {
        Self { style }
    }

    /// Draw the culled node and flow set through the controller transform.
    /// `overlay` adds a used-capacity bar to each queue it knows.
    pub fn render(&self, graph: &QueueGraph, overlay: Option<&RuntimeOverlay>) -> Document {
        let (width, height) = graph.controller.screen_size();
        let state = graph.controller.state();
        let visible = graph.visible();
        let flow_style = graph.layout_options().flow_style;

        let mut flows = Group::new().set("class", "flows");
        for flow in &visible.flows {
            flows = flows.add(self.flow(flow, flow_style));
        }

        let mut nodes = Group::new().set("class", "queues");
        for node in &visible.nodes {
            let selected = graph.view.selected() == Some(node.id.as_str());
            let matched = graph.view.matches_search(&node.name);
            let metrics = overlay.and_then(|o| o.get(&node.id)).map(|m| m.used_capacity);
            nodes = nodes.add(self.node(node, selected, matched, metrics));
        }

        let scene = Group::new()
            .set(
                "transform",
                format!(
                    "translate({} {}) scale({})",
                    num(state.x),
                    num(state.y),
                    num(state.scale)
                ),
            )
            .add(flows)
            .add(nodes);

        debug!(
            nodes = visible.nodes.len(),
            flows = visible.flows.len(),
            "rendered svg"
        );
        Document::new()
            .set("width", num(width))
            .set("height", num(height))
            .set("viewBox", format!("0 0 {} {}", num(width), num(height)))
            .add(
                Rectangle::new()
                    .set("width", "100%")
                    .set("height", "100%")
                    .set("fill", self.style.background.clone()),
            )
            .add(scene)
    }

    pub fn render_to_string(&self, graph: &QueueGraph, overlay: Option<&RuntimeOverlay>) -> String {
        self.render(graph, overlay).to_string()
    }

    pub fn save(
        &self,
        graph: &QueueGraph,
        overlay: Option<&RuntimeOverlay>,
        path: impl AsRef<FsPath>,
    ) -> std::io::Result<()> {
        svg::save(path, &self.render(graph, overlay))
    }

    fn flow(&self, flow: &FlowPath, style: FlowStyle) -> Path {
        let path = Path::new()
            .set("class", "flow")
            .set("data-id", flow.id())
            .set("d", flow.path.clone());
        match style {
            FlowStyle::Bezier => path
                .set("fill", "none")
                .set("stroke", self.style.flow_color.clone())
                .set("stroke-width", num(flow.width))
                .set("stroke-opacity", "0.7"),
            FlowStyle::Ribbon => path
                .set("fill", self.style.flow_color.clone())
                .set("fill-opacity", "0.6"),
        }
    }

    fn node(&self, node: &LayoutNode, selected: bool, matched: bool, used: Option<f64>) -> Group {
        let mut class = String::from("queue");
        let mut fill = &self.style.node_fill;
        let mut stroke = &self.style.node_stroke;
        if node.is_new {
            class.push_str(" is-new");
            stroke = &self.style.new_stroke;
        }
        if node.is_deleted {
            class.push_str(" is-deleted");
            fill = &self.style.deleted_fill;
        }
        if matched {
            class.push_str(" search-match");
            fill = &self.style.match_fill;
        }
        if selected {
            class.push_str(" is-selected");
            stroke = &self.style.selected_stroke;
        }
        if node.collapsed {
            class.push_str(" is-collapsed");
        }

        let mut rect = Rectangle::new()
            .set("x", num(node.position.x))
            .set("y", num(node.position.y))
            .set("width", num(node.size.width))
            .set("height", num(node.size.height))
            .set("rx", num(self.style.corner_radius))
            .set("fill", fill.clone())
            .set("stroke", stroke.clone())
            .set("stroke-width", if selected { "2" } else { "1" });
        if node.is_deleted {
            rect = rect.set("stroke-dasharray", "4 3");
        }

        let text_x = node.position.x + 8.0;
        let name = Text::new(node.name.clone())
            .set("x", num(text_x))
            .set("y", num(node.position.y + self.style.font_size + 6.0))
            .set("font-size", num(self.style.font_size))
            .set("font-weight", "bold")
            .set("fill", self.style.text_color.clone());
        let capacity = Text::new(node.capacity_label.clone())
            .set("x", num(text_x))
            .set("y", num(node.position.y + self.style.font_size * 2.0 + 10.0))
            .set("font-size", num(self.style.font_size * 0.9))
            .set("fill", self.style.text_color.clone());

        let mut group = Group::new()
            .set("class", class)
            .set("data-path", node.id.clone())
            .add(rect)
            .add(name)
            .add(capacity);
        if let Some(used) = used {
            let share = (used / 100.0).clamp(0.0, 1.0);
            group = group.add(
                Rectangle::new()
                    .set("class", "usage")
                    .set("x", num(node.position.x))
                    .set("y", num(node.position.y + node.size.height - 4.0))
                    .set("width", num(node.size.width * share))
                    .set("height", "4")
                    .set("fill", self.style.usage_fill.clone()),
            );
        }
        if node.opacity < 1.0 {
            group = group.set("opacity", num(node.opacity));
        }
        group
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_formatting() {
        assert_eq!(num(12.0), "12");
        assert_eq!(num(-0.5), "-0.5");
        assert_eq!(num(1.23456), "1.23");
    }
}
