use std::path::PathBuf;

use anyhow::{Context, bail};
use tracing::info;
use tracing_subscriber::EnvFilter;
use viewer::{Console, RestClient, Settings, render_snapshot, summarize};

const DEFAULT_SETTINGS: &str = "queueviz.kdl";

async fn run(settings: Settings) -> anyhow::Result<()> {
    let client = RestClient::new(&settings.server, settings.user.clone())
        .context("failed to build the HTTP client")?;
    info!(server = %client.base_url(), "loading cluster state");

    let mut console = Console::new(client);
    console.load_all().await;
    let summary = summarize(&console, &settings);
    summary.log();

    if let Some(error) = console.configuration().error() {
        bail!("could not load the scheduler configuration: {error}");
    }
    if let Some(catalog) = console.label_catalog() {
        info!(labels = ?catalog.partition_choices(), "node labels");
        if let Some(resources) = catalog.resources_for(&settings.partition) {
            info!(
                partition = %settings.partition,
                nodes = resources.nodes,
                memory_mb = resources.available_memory_mb,
                vcores = resources.available_vcores,
                "partition resources"
            );
        }
    }

    let svg = render_snapshot(&console, &settings)?;
    if let Some(parent) = settings.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(&settings.output, svg)
        .with_context(|| format!("failed to write {}", settings.output.display()))?;
    info!(path = %settings.output.display(), "wrote queue snapshot");
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS));
    let settings = Settings::load_or_default(&path)
        .with_context(|| format!("failed to load settings from {}", path.display()))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;
    runtime.block_on(run(settings))
}
