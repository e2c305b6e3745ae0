use anyhow::anyhow;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use shared::domain::RunId;
use tracing::info;

use crate::error::TrackerError;

/// Starts a workflow run on the backend and hands back its run id.
#[async_trait]
pub trait RunLauncher: Send + Sync {
    async fn start_run(&self, workflow_id: &str) -> Result<RunId, TrackerError>;
}

#[derive(Debug, Deserialize)]
struct StartRunResponse {
    #[serde(alias = "id")]
    run_id: RunId,
}

pub struct HttpRunLauncher {
    http: Client,
    api_base: String,
}

impl HttpRunLauncher {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn start_url(&self, workflow_id: &str) -> String {
        format!("{}/workflows/{workflow_id}/execute/", self.api_base)
    }
}

#[async_trait]
impl RunLauncher for HttpRunLauncher {
    async fn start_run(&self, workflow_id: &str) -> Result<RunId, TrackerError> {
        let launch_error = |source: anyhow::Error| TrackerError::RunLaunch {
            workflow_id: workflow_id.to_string(),
            source,
        };

        let res = self
            .http
            .post(self.start_url(workflow_id))
            .send()
            .await
            .map_err(|err| launch_error(err.into()))?;
        let status = res.status();
        if !status.is_success() {
            return Err(launch_error(anyhow!("run-start endpoint returned {status}")));
        }
        let body: StartRunResponse = res.json().await.map_err(|err| launch_error(err.into()))?;
        info!(workflow_id, run_id = %body.run_id, "tracker: run started");
        Ok(body.run_id)
    }
}

#[cfg(test)]
#[path = "tests/launcher_tests.rs"]
mod tests;
