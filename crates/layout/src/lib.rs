//! Tree layout for queue hierarchies: positioned nodes, capacity-scaled
//! flows, transition frames and viewport culling.

pub mod animate;
pub mod cull;
pub mod flow;
pub mod quadtree;
pub mod source;
pub mod tree_layout;
pub mod types;

pub use animate::*;
pub use cull::*;
pub use flow::{bezier_path, flow_width, ribbon_path};
pub use quadtree::QuadTree;
pub use source::HierarchySource;
pub use tree_layout::*;
pub use types::*;
