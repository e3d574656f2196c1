//! Directory-facing client: registration, heartbeats, unregistration,
//! and best-effort fragment location reports.

use std::time::Duration;

use myst_protocol::{FragmentReport, HeartbeatRequest, RegisterNodeRequest};

const DIRECTORY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct DirectoryClient {
    http: reqwest::Client,
    base_url: String,
}

impl DirectoryClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn register(&self, request: &RegisterNodeRequest) -> anyhow::Result<()> {
        self.http
            .post(format!("{}/register", self.base_url))
            .timeout(DIRECTORY_TIMEOUT)
            .json(request)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Returns the raw status so the caller can spot a 404 and
    /// re-register.
    pub async fn heartbeat(
        &self,
        node_id: &str,
        request: &HeartbeatRequest,
    ) -> anyhow::Result<reqwest::StatusCode> {
        let response = self
            .http
            .post(format!("{}/heartbeat/{node_id}", self.base_url))
            .timeout(DIRECTORY_TIMEOUT)
            .json(request)
            .send()
            .await?;
        Ok(response.status())
    }

    pub async fn unregister(&self, node_id: &str) {
        let result = self
            .http
            .post(format!("{}/unregister/{node_id}", self.base_url))
            .timeout(DIRECTORY_TIMEOUT)
            .send()
            .await;
        if let Err(err) = result {
            tracing::warn!(%err, "unregister failed");
        }
    }

    pub async fn report_fragment(&self, report: &FragmentReport) {
        let result = self
            .http
            .post(format!("{}/fragment/register", self.base_url))
            .timeout(DIRECTORY_TIMEOUT)
            .json(report)
            .send()
            .await;
        if let Err(err) = result {
            tracing::debug!(%err, "fragment report failed");
        }
    }
}
