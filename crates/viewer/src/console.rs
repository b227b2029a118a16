//! One operator session against a cluster: loads every data source, keeps
//! the staged edits, and drives apply.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use queues::{ClusterNode, NodeLabelCatalog, QueueTree, RuntimeOverlay, StagedChanges};
use tracing::{debug, info, warn};

use crate::api::SchedulerApi;
use crate::error::{ConsoleError, Result};

/// Loading state of one data source. Sources fail independently.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum LoadState<T> {
    #[default]
    Idle,
    Loading,
    Ready(T),
    Failed(String),
}

impl<T> LoadState<T> {
    pub fn is_loading(&self) -> bool {
        matches!(self, LoadState::Loading)
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, LoadState::Ready(_))
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            LoadState::Ready(value) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            LoadState::Failed(message) => Some(message),
            _ => None,
        }
    }

    fn settle(&mut self, source: &str, result: Result<T>) {
        *self = match result {
            Ok(value) => LoadState::Ready(value),
            Err(error) => {
                warn!(source, error = %error, "load failed");
                LoadState::Failed(error.to_string())
            }
        };
    }
}

/// Stops a console from applying results that arrive after teardown.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_shut_down(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct Console<A> {
    api: A,
    configuration: LoadState<StagedChanges>,
    scheduler: LoadState<RuntimeOverlay>,
    node_labels: LoadState<NodeLabelCatalog>,
    nodes: LoadState<Vec<ClusterNode>>,
    shutdown: ShutdownHandle,
}

impl<A: SchedulerApi> Console<A> {
    pub fn new(api: A) -> Self {
        Self {
            api,
            configuration: LoadState::Idle,
            scheduler: LoadState::Idle,
            node_labels: LoadState::Idle,
            nodes: LoadState::Idle,
            shutdown: ShutdownHandle::default(),
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn shutdown(&self) {
        self.shutdown.shutdown();
    }

    pub fn is_alive(&self) -> bool {
        !self.shutdown.is_shut_down()
    }

    pub fn configuration(&self) -> &LoadState<StagedChanges> {
        &self.configuration
    }

    pub fn scheduler(&self) -> &LoadState<RuntimeOverlay> {
        &self.scheduler
    }

    pub fn node_labels(&self) -> &LoadState<NodeLabelCatalog> {
        &self.node_labels
    }

    pub fn nodes(&self) -> &LoadState<Vec<ClusterNode>> {
        &self.nodes
    }

    /// The tree can be drawn once the configuration is in, whatever
    /// happened to the other sources.
    pub fn is_ready(&self) -> bool {
        self.configuration.is_ready()
    }

    pub fn is_loading(&self) -> bool {
        self.configuration.is_loading()
            || self.scheduler.is_loading()
            || self.node_labels.is_loading()
            || self.nodes.is_loading()
    }

    pub fn staged(&self) -> Result<&StagedChanges> {
        self.configuration.value().ok_or(ConsoleError::NotLoaded)
    }

    pub fn staged_mut(&mut self) -> Result<&mut StagedChanges> {
        match &mut self.configuration {
            LoadState::Ready(staged) => Ok(staged),
            _ => Err(ConsoleError::NotLoaded),
        }
    }

    /// Base tree with the staged edits laid over it.
    pub fn effective_tree(&self) -> Result<QueueTree> {
        Ok(self.staged()?.effective_tree())
    }

    /// Node labels with per-label resources once the node listing is in.
    pub fn label_catalog(&self) -> Option<NodeLabelCatalog> {
        let catalog = self.node_labels.value()?.clone();
        Some(match self.nodes.value() {
            Some(nodes) => catalog.with_nodes(nodes),
            None => catalog,
        })
    }

    /// Fetch all four sources concurrently and wait for every one of them.
    /// Results arriving after shutdown are dropped.
    pub async fn load_all(&mut self) {
        if !self.is_alive() {
            return;
        }
        self.configuration = match std::mem::take(&mut self.configuration) {
            // a reload keeps the staged edits
            LoadState::Ready(staged) => LoadState::Ready(staged),
            _ => LoadState::Loading,
        };
        self.scheduler = LoadState::Loading;
        self.node_labels = LoadState::Loading;
        self.nodes = LoadState::Loading;

        let (configuration, scheduler, node_labels, nodes) = futures::join!(
            self.api.fetch_configuration(),
            self.api.fetch_scheduler_info(),
            self.api.fetch_node_labels(),
            self.api.fetch_nodes(),
        );
        if !self.is_alive() {
            debug!("console shut down during load, dropping results");
            return;
        }

        match (&mut self.configuration, configuration) {
            (LoadState::Ready(staged), Ok(tree)) => staged.replace_base(tree),
            (LoadState::Ready(_), Err(error)) => {
                warn!(error = %error, "configuration reload failed, keeping the previous tree");
            }
            (state, result) => state.settle("configuration", result.map(StagedChanges::new)),
        }
        self.scheduler.settle("scheduler", scheduler);
        self.node_labels.settle("node-labels", node_labels);
        self.nodes.settle("nodes", nodes);

        if let (Some(staged), Some(overlay)) = (self.configuration.value(), self.scheduler.value()) {
            let unknown = overlay.unknown_paths(staged.base());
            if !unknown.is_empty() {
                warn!(queues = ?unknown, "scheduler reports queues missing from the configuration");
            }
        }
        info!(
            configuration = self.configuration.is_ready(),
            scheduler = self.scheduler.is_ready(),
            node_labels = self.node_labels.is_ready(),
            nodes = self.nodes.is_ready(),
            "load finished"
        );
    }

    /// Send the staged changes. On success the staged set is cleared and the
    /// configuration reloaded; if that reload fails the configuration is left
    /// `Failed` until the next [`Console::load_all`]. On failure every edit
    /// stays staged.
    pub async fn apply(&mut self) -> Result<()> {
        if !self.is_alive() {
            return Err(ConsoleError::ShutDown);
        }
        let LoadState::Ready(staged) = &mut self.configuration else {
            return Err(ConsoleError::NotLoaded);
        };
        let request = staged.begin_apply()?;
        let response = self.api.apply(&request).await;
        if self.shutdown.is_shut_down() {
            debug!("console shut down during apply, dropping response");
            return Err(ConsoleError::ShutDown);
        }

        match response {
            Ok(response) => staged.complete_apply(&response)?,
            Err(error) => return Err(staged.abort_apply(&error.to_string()).into()),
        }

        // The staged set is empty now, so a stale base would show the tree
        // from before the apply. Mark the configuration failed instead.
        match self.api.fetch_configuration().await {
            Ok(tree) if !self.shutdown.is_shut_down() => staged.replace_base(tree),
            Ok(_) => {}
            Err(error) => {
                warn!(error = %error, "reload after apply failed");
                self.configuration =
                    LoadState::Failed(format!("changes applied, but reload failed: {error}"));
            }
        }
        Ok(())
    }
}
