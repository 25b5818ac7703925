//! Turns an execution request into a result and exactly one log entry.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::ExecutionError;
use crate::fallback::LocalExecutor;
use crate::language::Language;
use crate::sandbox::SandboxClient;
use crate::store::{ExecutionLogEntry, RecordStore};

pub const SUCCESS_SENTINEL: &str = "Code executed successfully";

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionRequest {
    pub code: String,
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_language() -> String {
    "python".to_string()
}

impl ExecutionRequest {
    pub fn new(code: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            language: language.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub output: String,
    pub error: Option<String>,
    /// Seconds.
    pub execution_time: f64,
}

/// Output and error of whichever path ran the code.
struct Dispatched {
    output: String,
    error: Option<String>,
}

pub struct Orchestrator {
    store: Arc<dyn RecordStore>,
    remote: Option<Arc<dyn SandboxClient>>,
    local: LocalExecutor,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn RecordStore>,
        remote: Option<Arc<dyn SandboxClient>>,
        local: LocalExecutor,
    ) -> Self {
        Self {
            store,
            remote,
            local,
        }
    }

    pub async fn execute(
        &self,
        request: &ExecutionRequest,
    ) -> Result<ExecutionResult, ExecutionError> {
        let started = Instant::now();
        let language = Language::parse(&request.language);

        let dispatched = self.dispatch(&language, request).await;
        let execution_time = started.elapsed().as_secs_f64();

        let entry = ExecutionLogEntry::new(
            request.code.as_str(),
            request.language.as_str(),
            dispatched.output.as_str(),
            dispatched.error.clone(),
            execution_time,
        );
        if let Err(e) = self.store.append_execution_log(&entry).await {
            let err = ExecutionError::Store(e);
            let message = err.to_string();
            error!(%message, "Execution log could not be written");

            let failure = ExecutionLogEntry::new(
                request.code.as_str(),
                request.language.as_str(),
                "",
                Some(message),
                started.elapsed().as_secs_f64(),
            );
            if let Err(e) = self.store.append_execution_log(&failure).await {
                warn!(error = %e, "Failure entry could not be written either");
            }
            return Err(err);
        }

        info!(
            language = %language,
            execution_time,
            has_error = dispatched.error.is_some(),
            "Execution finished"
        );

        let output = if dispatched.output.is_empty() && dispatched.error.is_none() {
            SUCCESS_SENTINEL.to_string()
        } else {
            dispatched.output
        };
        Ok(ExecutionResult {
            output,
            error: dispatched.error,
            execution_time,
        })
    }

    async fn dispatch(&self, language: &Language, request: &ExecutionRequest) -> Dispatched {
        if !language.is_python() {
            return Dispatched {
                output: format!(
                    "Code execution for {} would be handled by the remote sandbox.\nCode to execute:\n{}",
                    request.language, request.code
                ),
                error: None,
            };
        }

        if let Some(remote) = &self.remote {
            match remote.run_remote(&request.code).await {
                Ok(out) => {
                    return Dispatched {
                        output: out.output,
                        error: out.error,
                    }
                }
                Err(e) => warn!(error = %e, "Remote execution failed, falling back to local"),
            }
        } else {
            warn!("Remote sandbox not configured, running locally");
        }

        let outcome = self.local.run(&request.code).await;
        Dispatched {
            output: outcome.output,
            error: outcome.error,
        }
    }
}
