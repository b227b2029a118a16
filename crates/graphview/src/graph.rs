use std::collections::VecDeque;

use queues::QueueTree;
use queueviz_layout::{
    Frame, LayoutError, LayoutNode, LayoutOptions, TreeLayout, TreeLayoutEngine, ViewportCuller,
    animate_to_new_layout, node_at,
};
use tracing::{debug, info};

use crate::controller::PanZoomController;
use crate::input::{Click, InputEvent};
use crate::view_state::ViewState;

/// Nodes and flows inside the current viewport.
#[derive(Debug, Clone, PartialEq)]
pub struct VisibleSet<'a> {
    pub nodes: Vec<&'a LayoutNode>,
    pub flows: Vec<&'a queueviz_layout::FlowPath>,
}

/// A queue tree on screen: layout, culling, pan/zoom and UI state.
pub struct QueueGraph {
    engine: TreeLayoutEngine,
    pub culler: ViewportCuller,
    pub controller: PanZoomController,
    pub view: ViewState,
    tree: Option<QueueTree>,
    layout: TreeLayout,
    // Pending layout transition, front is shown next
    frames: VecDeque<Frame>,
    current_frame: Option<Frame>,
    /// Screen pixels kept free around the tree by [`QueueGraph::fit`].
    pub fit_padding: f64,
}

impl QueueGraph {
    pub fn new(options: LayoutOptions, culler: ViewportCuller, controller: PanZoomController) -> Self {
        Self {
            engine: TreeLayoutEngine::new(options),
            culler,
            controller,
            view: ViewState::new(),
            tree: None,
            layout: TreeLayout::default(),
            frames: VecDeque::new(),
            current_frame: None,
            fit_padding: 20.0,
        }
    }

    pub fn layout(&self) -> &TreeLayout {
        &self.layout
    }

    pub fn tree(&self) -> Option<&QueueTree> {
        self.tree.as_ref()
    }

    pub fn layout_options(&self) -> &LayoutOptions {
        &self.engine.options
    }

    /// Show a new tree. The first tree is fitted to the screen, later ones
    /// transition from the previous layout.
    pub fn set_tree(&mut self, tree: QueueTree) -> Result<(), LayoutError> {
        self.sync_collapsed();
        let layout = self.engine.compute_layout(&tree)?;
        let first = self.tree.is_none();
        self.tree = Some(tree);
        self.set_layout(layout);
        if first {
            self.fit(false);
        }
        Ok(())
    }

    /// Replace the layout, queueing transition frames from what is on
    /// screen now.
    pub fn set_layout(&mut self, layout: TreeLayout) {
        let previous = self.displayed_nodes().to_vec();
        self.frames.clear();
        self.current_frame = None;
        if !previous.is_empty() {
            let duration = self.controller.options.animation_ms;
            self.frames = animate_to_new_layout(&previous, &layout, duration).into();
        }
        debug!(
            nodes = layout.nodes.len(),
            flows = layout.flows.len(),
            frames = self.frames.len(),
            "layout updated"
        );
        self.layout = layout;
    }

    /// The engine lays out whatever [`ViewState`] has collapsed.
    fn sync_collapsed(&mut self) {
        self.engine.reset();
        for path in self.view.collapsed() {
            self.engine.collapse(path);
        }
    }

    /// Lay the current tree out again, picking up collapse changes made
    /// directly on [`QueueGraph::view`].
    pub fn relayout(&mut self) -> Result<(), LayoutError> {
        self.sync_collapsed();
        let Some(tree) = self.tree.as_ref() else {
            return Ok(());
        };
        let layout = self.engine.compute_layout(tree)?;
        self.set_layout(layout);
        Ok(())
    }

    /// Show the next transition frame. Returns false once the transition is
    /// over.
    pub fn advance_frame(&mut self) -> bool {
        self.current_frame = self.frames.pop_front();
        self.current_frame.is_some()
    }

    pub fn is_transitioning(&self) -> bool {
        !self.frames.is_empty()
    }

    /// Node geometry as currently drawn, mid-transition or settled.
    pub fn displayed_nodes(&self) -> &[LayoutNode] {
        match &self.current_frame {
            Some(frame) => &frame.nodes,
            None => &self.layout.nodes,
        }
    }

    pub fn toggle_collapse(&mut self, path: &str) -> Result<bool, LayoutError> {
        let collapsed = self.view.toggle_collapsed(path);
        self.relayout()?;
        Ok(collapsed)
    }

    pub fn expand_all(&mut self) -> Result<(), LayoutError> {
        let collapsed: Vec<String> = self.view.collapsed().iter().cloned().collect();
        for path in &collapsed {
            self.view.set_collapsed(path, false);
        }
        self.relayout()
    }

    pub fn visible(&self) -> VisibleSet<'_> {
        let viewport = self.controller.world_viewport();
        let nodes = self.culler.cull_nodes(self.displayed_nodes(), &viewport).visible;
        let flows = self.culler.cull_flows(&self.layout.flows, &nodes).visible;
        VisibleSet { nodes, flows }
    }

    /// Feed input to the controller. A click selects the queue under it, or
    /// clears the selection on empty space. Returns the selection after a
    /// click.
    pub fn handle_input(&mut self, event: &mut InputEvent) -> Option<Option<String>> {
        let click = self.controller.handle_input(event)?;
        Some(self.handle_click(click))
    }

    /// Select the queue under a click, if any.
    pub fn handle_click(&mut self, click: Click) -> Option<String> {
        let hit = node_at(self.displayed_nodes(), click.world).map(|n| n.id.clone());
        self.view.select(hit.clone());
        hit
    }

    pub fn select(&mut self, path: Option<&str>) {
        let path = path.filter(|p| self.layout.nodes.iter().any(|n| n.id == *p));
        self.view.select(path.map(str::to_string));
    }

    /// Pan so `path` sits at the centre of the screen.
    pub fn center_on(&mut self, path: &str, animate: bool) -> bool {
        let Some(node) = self.layout.nodes.iter().find(|n| n.id == path) else {
            return false;
        };
        let center = node.center();
        let (width, height) = self.controller.screen_size();
        let scale = self.controller.state().scale;
        self.controller.set_state(
            crate::PartialState {
                x: Some(width / 2.0 - center.x * scale),
                y: Some(height / 2.0 - center.y * scale),
                scale: None,
            },
            animate,
        );
        true
    }

    pub fn fit(&mut self, animate: bool) {
        if self.layout.nodes.is_empty() {
            return;
        }
        info!(bounds = ?self.layout.bounds, "fitting tree to screen");
        let bounds = self.layout.bounds;
        self.controller.zoom_to_fit(&bounds, self.fit_padding, animate);
    }

    /// Ids of laid out queues whose name matches the search filter.
    pub fn search_matches(&self) -> Vec<&str> {
        self.layout
            .nodes
            .iter()
            .filter(|n| self.view.matches_search(&n.name))
            .map(|n| n.id.as_str())
            .collect()
    }
}
