use queues::{ApplyError, StageError};
use queueviz_layout::LayoutError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("request failed: {0}")]
    Transport(String),
    #[error("could not decode {what}: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("the scheduler configuration has not been loaded")]
    NotLoaded,
    #[error("the console has been shut down")]
    ShutDown,
    #[error(transparent)]
    Stage(#[from] StageError),
    #[error(transparent)]
    Apply(#[from] ApplyError),
    #[error(transparent)]
    Layout(#[from] LayoutError),
}

pub type Result<T, E = ConsoleError> = std::result::Result<T, E>;
