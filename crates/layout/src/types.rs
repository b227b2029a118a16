use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn lerp(&self, other: &Position, t: f64) -> Position {
        Position {
            x: self.x + (other.x - self.x) * t,
            y: self.y + (other.y - self.y) * t,
        }
    }
}

/// Axis-aligned rectangle in world coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn from_position_size(position: Position, size: Size) -> Self {
        Self::new(position.x, position.y, size.width, size.height)
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn center(&self) -> Position {
        Position::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Overlap test; touching edges count as intersecting.
    pub fn intersects(&self, other: &Rect) -> bool {
        self.x <= other.right()
            && other.x <= self.right()
            && self.y <= other.bottom()
            && other.y <= self.bottom()
    }

    pub fn contains_point(&self, point: Position) -> bool {
        point.x >= self.x && point.x <= self.right() && point.y >= self.y && point.y <= self.bottom()
    }

    pub fn contains_rect(&self, other: &Rect) -> bool {
        other.x >= self.x
            && other.right() <= self.right()
            && other.y >= self.y
            && other.bottom() <= self.bottom()
    }

    pub fn expand(&self, margin: f64) -> Rect {
        Rect::new(
            self.x - margin,
            self.y - margin,
            self.width + margin * 2.0,
            self.height + margin * 2.0,
        )
    }

    pub fn union(&self, other: &Rect) -> Rect {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        Rect::new(
            x,
            y,
            self.right().max(other.right()) - x,
            self.bottom().max(other.bottom()) - y,
        )
    }

    /// Bounding box of all rectangles, `None` for an empty input.
    pub fn bounding<I>(rects: I) -> Option<Rect>
    where
        I: IntoIterator<Item = Rect>,
    {
        rects.into_iter().reduce(|acc, r| acc.union(&r))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LayoutError {
    UnknownRoot(String),
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayoutError::UnknownRoot(id) => write!(f, "root node {id} is not in the hierarchy"),
        }
    }
}

impl std::error::Error for LayoutError {}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    /// Depth grows along x.
    #[default]
    Horizontal,
    /// Depth grows along y.
    Vertical,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowStyle {
    #[default]
    Bezier,
    /// Sankey ribbons stacked at the parent edge.
    Ribbon,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutOptions {
    pub orientation: Orientation,
    pub node_width: f64,
    pub node_height: f64,
    pub level_spacing: f64,
    pub sibling_spacing: f64,
    /// 0 draws straight flows, 1 fully curved ones.
    pub curvature: f64,
    pub min_flow_width: f64,
    pub max_flow_width: f64,
    pub flow_style: FlowStyle,
    pub padding: f64,
}

impl Default for LayoutOptions {
    fn default() -> Self {
        Self {
            orientation: Orientation::Horizontal,
            node_width: 160.0,
            node_height: 56.0,
            level_spacing: 80.0,
            sibling_spacing: 20.0,
            curvature: 0.5,
            min_flow_width: 2.0,
            max_flow_width: 40.0,
            flow_style: FlowStyle::Bezier,
            padding: 40.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutNode {
    /// Queue path.
    pub id: String,
    pub name: String,
    pub parent: Option<String>,
    /// Number of ancestors.
    pub depth: usize,
    pub position: Position,
    pub size: Size,
    /// Share used for flow widths, 0..=100.
    pub flow_value: f64,
    pub capacity_label: String,
    pub has_children: bool,
    pub collapsed: bool,
    pub is_new: bool,
    pub is_deleted: bool,
    pub opacity: f64,
}

impl LayoutNode {
    pub fn rect(&self) -> Rect {
        Rect::from_position_size(self.position, self.size)
    }

    pub fn center(&self) -> Position {
        self.rect().center()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowPath {
    pub source: String,
    pub target: String,
    pub width: f64,
    /// SVG path data.
    pub path: String,
    pub start: Position,
    pub end: Position,
}

impl FlowPath {
    pub fn id(&self) -> String {
        format!("{}->{}", self.source, self.target)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TreeLayout {
    pub nodes: Vec<LayoutNode>,
    pub flows: Vec<FlowPath>,
    pub bounds: Rect,
}
