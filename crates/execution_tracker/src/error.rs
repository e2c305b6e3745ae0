use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect execution channel {url}: {reason}")]
    Connect { url: String, reason: String },
    #[error("failed to send frame: {0}")]
    Send(String),
    #[error("failed to receive frame: {0}")]
    Receive(String),
    #[error("invalid execution endpoint: {0}")]
    InvalidEndpoint(String),
}

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("invalid base url '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },
    #[error("failed to start run for workflow {workflow_id}: {source}")]
    RunLaunch {
        workflow_id: String,
        source: anyhow::Error,
    },
}
