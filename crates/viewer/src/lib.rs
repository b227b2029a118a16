//! Capacity scheduler console: loads a cluster's queue configuration,
//! keeps staged edits, and renders the effective tree.

pub mod api;
pub mod console;
pub mod error;
pub mod settings;

use graphview::{PanZoomController, QueueGraph, SvgRenderer};
use tracing::{info, warn};

pub use api::{RestClient, SchedulerApi};
pub use console::{Console, LoadState, ShutdownHandle};
pub use error::{ConsoleError, Result};
pub use settings::{Settings, SettingsError};

/// An empty graph configured from `settings`.
pub fn build_graph(settings: &Settings) -> QueueGraph {
    QueueGraph::new(
        settings.layout.clone(),
        settings.culler.clone(),
        PanZoomController::new(
            settings.controller.clone(),
            settings.viewport_width,
            settings.viewport_height,
        ),
    )
}

/// Render the effective tree, fitted to the viewport, as an SVG document.
pub fn render_snapshot<A: SchedulerApi>(console: &Console<A>, settings: &Settings) -> Result<String> {
    let mut graph = build_graph(settings);
    graph.set_tree(console.effective_tree()?)?;
    let svg = SvgRenderer::default().render_to_string(&graph, console.scheduler().value());
    Ok(svg)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Summary {
    pub queues: usize,
    pub staged_changes: usize,
    pub conflicts: usize,
    /// Advisory sibling-capacity issues in the selected partition.
    pub capacity_issues: Vec<String>,
    pub failed_sources: Vec<String>,
}

impl Summary {
    pub fn log(&self) {
        info!(
            queues = self.queues,
            staged = self.staged_changes,
            conflicts = self.conflicts,
            "console summary"
        );
        for issue in &self.capacity_issues {
            warn!("{issue}");
        }
        for source in &self.failed_sources {
            warn!("{source}");
        }
    }
}

pub fn summarize<A: SchedulerApi>(console: &Console<A>, settings: &Settings) -> Summary {
    let mut summary = Summary::default();
    let sources = [
        ("configuration", console.configuration().error()),
        ("scheduler", console.scheduler().error()),
        ("node-labels", console.node_labels().error()),
        ("nodes", console.nodes().error()),
    ];
    summary.failed_sources = sources
        .iter()
        .filter_map(|(name, error)| error.map(|e| format!("{name}: {e}")))
        .collect();

    let Ok(staged) = console.staged() else {
        return summary;
    };
    let tree = staged.effective_tree();
    summary.queues = tree.len();
    summary.staged_changes = staged.changes().len();
    summary.conflicts = staged.conflicts().len();
    summary.capacity_issues = tree
        .flatten()
        .into_iter()
        .filter(|n| !n.children.is_empty())
        .flat_map(|n| tree.sibling_report(&n.path, &settings.partition).issues)
        .collect();
    summary
}
