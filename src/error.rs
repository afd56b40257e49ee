use std::path::PathBuf;

use thiserror::Error;

/// Failures of the browser session itself.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("browser launch failed: {0}")]
    Launch(String),

    #[error("script evaluation failed: {0}")]
    Evaluate(String),

    #[error("browser session is closed")]
    Closed,
}

/// Fatal for the run: no places can be discovered.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("could not open the saved-places list: {0}")]
    Navigation(String),

    #[error("saved-places list did not appear within {waited_ms}ms")]
    ListUnavailable { waited_ms: u64 },

    #[error("place list returned malformed data: {0}")]
    Malformed(String),

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Recoverable per-place failure; the orchestrator skips the place.
#[derive(Debug, Error)]
pub enum DetailFetchError {
    #[error("no list entry named {0:?}")]
    NotFound(String),

    #[error("detail view for {name:?} did not render within {waited_ms}ms")]
    RenderTimeout { name: String, waited_ms: u64 },

    #[error("malformed data from detail view: {0}")]
    ParseError(String),

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// The output store could not be written. Aborts the run.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize places: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("could not replace {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
