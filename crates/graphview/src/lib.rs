//! Interactive view of a queue tree: pan/zoom control, input translation,
//! selection state and SVG rendering.

pub mod controller;
pub mod graph;
pub mod input;
pub mod render;
pub mod view_state;

pub use controller::{
    ControllerOptions, FrameHandle, FrameScheduler, ListenerId, PanZoomController, PartialState,
    ViewportEvent, ViewportEventKind, ViewportState,
};
pub use graph::{QueueGraph, VisibleSet};
pub use input::{Click, InputEvent, Key};
pub use render::{RenderStyle, SvgRenderer};
pub use view_state::{SubscriptionId, ViewChange, ViewState};
