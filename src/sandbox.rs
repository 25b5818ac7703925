//! Client for the remote sandbox-as-a-service provider.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::SandboxError;

pub const DEFAULT_API_URL: &str = "https://app.daytona.io/api";
pub const DEFAULT_IMAGE: &str = "python:3.9";

/// Seconds the provider lets a sandbox or process live.
pub const PROVIDER_TIMEOUT_SECS: u64 = 30;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(PROVIDER_TIMEOUT_SECS + 30);

/// Output of a remote run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteOutput {
    pub output: String,
    pub error: Option<String>,
}

#[async_trait]
pub trait SandboxClient: Send + Sync {
    /// Provisions a sandbox, runs `code` as Python, and tears the sandbox down.
    async fn run_remote(&self, code: &str) -> Result<RemoteOutput, SandboxError>;
}

#[derive(Debug, Clone)]
pub struct DaytonaConfig {
    pub api_key: String,
    pub api_url: String,
    pub image: String,
}

impl DaytonaConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_url: DEFAULT_API_URL.to_string(),
            image: DEFAULT_IMAGE.to_string(),
        }
    }
}

pub struct DaytonaClient {
    client: Client,
    config: DaytonaConfig,
}

#[derive(Debug, Deserialize)]
struct CreatedSandbox {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ProcessResponse {
    #[serde(rename = "exitCode", default)]
    exit_code: i64,
    #[serde(alias = "result", default)]
    stdout: String,
    #[serde(default)]
    stderr: String,
}

impl ProcessResponse {
    fn into_output(self) -> RemoteOutput {
        if self.exit_code == 0 {
            return RemoteOutput {
                output: self.stdout,
                error: None,
            };
        }
        let error = if self.stderr.is_empty() {
            format!("Process exited with code {}", self.exit_code)
        } else {
            self.stderr
        };
        RemoteOutput {
            output: self.stdout,
            error: Some(error),
        }
    }
}

impl DaytonaClient {
    pub fn new(mut config: DaytonaConfig) -> Result<Self, SandboxError> {
        config.api_url = config.api_url.trim_end_matches('/').to_string();
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { client, config })
    }

    async fn create_sandbox(&self) -> Result<SandboxLease, SandboxError> {
        let name = sandbox_name();
        let response = self
            .client
            .post(format!("{}/sandbox", self.config.api_url))
            .bearer_auth(&self.config.api_key)
            .json(&json!({
                "name": name,
                "image": self.config.image,
                "timeout": PROVIDER_TIMEOUT_SECS,
            }))
            .send()
            .await?;
        let created: CreatedSandbox = ensure_success(response, "create sandbox")
            .await?
            .json()
            .await?;

        info!(sandbox_id = %created.id, %name, "Remote sandbox created");
        Ok(SandboxLease {
            client: self.client.clone(),
            api_url: self.config.api_url.clone(),
            api_key: self.config.api_key.clone(),
            id: created.id,
            released: false,
        })
    }

    async fn execute_in(
        &self,
        lease: &SandboxLease,
        code: &str,
    ) -> Result<ProcessResponse, SandboxError> {
        let response = self
            .client
            .post(format!(
                "{}/toolbox/{}/toolbox/process/execute",
                self.config.api_url, lease.id
            ))
            .bearer_auth(&self.config.api_key)
            .json(&json!({
                "command": python_command(code),
                "timeout": PROVIDER_TIMEOUT_SECS,
            }))
            .send()
            .await?;
        let process: ProcessResponse = ensure_success(response, "execute code")
            .await?
            .json()
            .await?;

        debug!(sandbox_id = %lease.id, exit_code = process.exit_code, "Remote process finished");
        Ok(process)
    }
}

#[async_trait]
impl SandboxClient for DaytonaClient {
    async fn run_remote(&self, code: &str) -> Result<RemoteOutput, SandboxError> {
        let lease = self.create_sandbox().await?;
        let result = self.execute_in(&lease, code).await;
        lease.release().await;
        Ok(result?.into_output())
    }
}

/// A provisioned sandbox that must be deleted.
///
/// Call [`SandboxLease::release`] once done. A lease dropped without release
/// (a cancelled request, a panic) spawns the teardown onto the runtime instead.
pub struct SandboxLease {
    client: Client,
    api_url: String,
    api_key: String,
    id: String,
    released: bool,
}

impl SandboxLease {
    /// Deletes the sandbox. If this future is dropped before the delete
    /// completes, `Drop` still schedules the teardown.
    pub async fn release(mut self) {
        let deleted = delete_sandbox(&self.client, &self.api_url, &self.api_key, &self.id).await;
        self.released = true;
        if let Err(e) = deleted {
            warn!(sandbox_id = %self.id, error = %e, "Failed to delete remote sandbox");
        }
    }
}

impl Drop for SandboxLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(sandbox_id = %self.id, "No runtime to delete remote sandbox; it will expire");
            return;
        };
        let client = self.client.clone();
        let api_url = std::mem::take(&mut self.api_url);
        let api_key = std::mem::take(&mut self.api_key);
        let id = std::mem::take(&mut self.id);
        handle.spawn(async move {
            if let Err(e) = delete_sandbox(&client, &api_url, &api_key, &id).await {
                warn!(sandbox_id = %id, error = %e, "Failed to delete abandoned remote sandbox");
            }
        });
    }
}

async fn delete_sandbox(
    client: &Client,
    api_url: &str,
    api_key: &str,
    id: &str,
) -> Result<(), SandboxError> {
    let response = client
        .delete(format!("{}/sandbox/{}", api_url, id))
        .bearer_auth(api_key)
        .send()
        .await?;
    ensure_success(response, "delete sandbox").await?;
    info!(sandbox_id = %id, "Remote sandbox deleted");
    Ok(())
}

async fn ensure_success(response: Response, operation: &'static str) -> Result<Response, SandboxError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(SandboxError::Status {
        operation,
        status: status.as_u16(),
        body,
    })
}

fn sandbox_name() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("python-execution-{}", &id[..8])
}

/// Shell command running `code` with `python3 -c`, single-quoted.
fn python_command(code: &str) -> String {
    format!("python3 -c '{}'", code.replace('\'', "'\\''"))
}
