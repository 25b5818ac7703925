//! Local fallback execution in a resource-limited `python3` child process.
//!
//! The snippet is compiled and run by a small harness whose `__builtins__`
//! hold only the names granted by [`Capabilities`]. stdout and stderr are
//! captured separately and reported back as JSON on the child's stdout.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::capabilities::Capabilities;

#[cfg(target_os = "linux")]
use nix::sys::resource::{setrlimit, Resource};

const HARNESS: &str = include_str!("harness.py");

pub const NO_OUTPUT_SENTINEL: &str = "Code executed successfully (no output)";

pub const DEFAULT_PYTHON: &str = "python3";
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_MEMORY_MIB: u64 = 256;
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// Result of a local run. Snippet failures are reported in `error`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocalOutcome {
    pub output: String,
    pub error: Option<String>,
}

impl LocalOutcome {
    fn failed(message: impl Into<String>) -> Self {
        Self {
            output: String::new(),
            error: Some(format!("Execution error: {}", message.into())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalLimits {
    /// Wall clock budget; the child is killed when it runs out.
    pub timeout: Duration,
    /// Address space cap for the child (Linux only).
    pub max_memory_bytes: u64,
    /// Per stream cap on captured output.
    pub max_output_bytes: usize,
}

impl LocalLimits {
    pub fn new(timeout_secs: u64, memory_mib: u64) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_secs),
            max_memory_bytes: memory_mib * 1024 * 1024,
            ..Self::default()
        }
    }
}

impl Default for LocalLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_memory_bytes: DEFAULT_MEMORY_MIB * 1024 * 1024,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }
}

#[derive(Debug, Deserialize)]
struct HarnessReport {
    stdout: String,
    stderr: String,
    failure: Option<Failure>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum Failure {
    Syntax {
        message: String,
        line: Option<u32>,
    },
    Runtime {
        #[serde(rename = "type")]
        exception: String,
        message: String,
    },
}

#[derive(Debug, Clone)]
pub struct LocalExecutor {
    python: PathBuf,
    capabilities: Capabilities,
    limits: LocalLimits,
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self::new(Capabilities::standard(), LocalLimits::default())
    }
}

impl LocalExecutor {
    pub fn new(capabilities: Capabilities, limits: LocalLimits) -> Self {
        Self {
            python: PathBuf::from(DEFAULT_PYTHON),
            capabilities,
            limits,
        }
    }

    pub fn with_python(mut self, python: impl Into<PathBuf>) -> Self {
        self.python = python.into();
        self
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn limits(&self) -> LocalLimits {
        self.limits
    }

    pub async fn run(&self, code: &str) -> LocalOutcome {
        let mut command = Command::new(&self.python);
        command
            .arg("-I")
            .arg("-B")
            .arg("-c")
            .arg(HARNESS)
            .arg(self.capabilities.allow_list())
            .arg(if self.capabilities.allows_stderr() { "1" } else { "0" })
            .arg(self.limits.max_output_bytes.to_string())
            .env("LC_ALL", "C")
            .env("PYTHONUTF8", "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        apply_resource_limits(&mut command, &self.limits);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(python = %self.python.display(), error = %e, "Failed to start local interpreter");
                return LocalOutcome::failed(format!(
                    "cannot start {}: {}",
                    self.python.display(),
                    e
                ));
            }
        };

        let stdin = child.stdin.take();
        let finished = timeout(self.limits.timeout, async move {
            if let Some(mut stdin) = stdin {
                if let Err(e) = stdin.write_all(code.as_bytes()).await {
                    debug!(error = %e, "Interpreter closed stdin early");
                }
            }
            child.wait_with_output().await
        })
        .await;

        let output = match finished {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!(error = %e, "Local interpreter did not complete");
                return LocalOutcome::failed(e.to_string());
            }
            Err(_) => {
                warn!(timeout_secs = self.limits.timeout.as_secs_f64(), "Local execution timed out");
                return LocalOutcome {
                    output: String::new(),
                    error: Some(format!(
                        "Runtime Error: TimeoutError: execution exceeded {} seconds",
                        self.limits.timeout.as_secs_f64()
                    )),
                };
            }
        };

        match serde_json::from_slice::<HarnessReport>(&output.stdout) {
            Ok(report) => classify(report),
            Err(e) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                warn!(status = %output.status, error = %e, stderr = %stderr.trim(), "Local interpreter produced no report");
                LocalOutcome::failed(format!("interpreter exited with {}", output.status))
            }
        }
    }
}

#[cfg(target_os = "linux")]
fn apply_resource_limits(command: &mut Command, limits: &LocalLimits) {
    let memory = limits.max_memory_bytes;
    let cpu_seconds = limits.timeout.as_secs().saturating_add(1);
    // SAFETY: the closure runs between fork and exec and only calls setrlimit.
    unsafe {
        command.pre_exec(move || {
            setrlimit(Resource::RLIMIT_AS, memory, memory)?;
            setrlimit(Resource::RLIMIT_CPU, cpu_seconds, cpu_seconds)?;
            setrlimit(Resource::RLIMIT_CORE, 0, 0)?;
            Ok(())
        });
    }
}

#[cfg(not(target_os = "linux"))]
fn apply_resource_limits(_command: &mut Command, _limits: &LocalLimits) {}

fn classify(report: HarnessReport) -> LocalOutcome {
    let HarnessReport {
        stdout,
        stderr,
        failure,
    } = report;

    let outcome = match failure {
        Some(Failure::Runtime { exception, message }) => LocalOutcome {
            output: stdout,
            error: Some(if message.is_empty() {
                format!("Runtime Error: {}", exception)
            } else {
                format!("Runtime Error: {}: {}", exception, message)
            }),
        },
        Some(Failure::Syntax { message, line }) => LocalOutcome {
            output: String::new(),
            error: Some(match line {
                Some(line) => format!("Syntax Error: {} (line {})", message, line),
                None => format!("Syntax Error: {}", message),
            }),
        },
        None if !stderr.is_empty() => LocalOutcome {
            output: stdout,
            error: Some(stderr),
        },
        None if stdout.is_empty() => LocalOutcome {
            output: NO_OUTPUT_SENTINEL.to_string(),
            error: None,
        },
        None => LocalOutcome {
            output: stdout,
            error: None,
        },
    };
    debug!(has_error = outcome.error.is_some(), "Local execution finished");
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::Builtin;

    async fn run(code: &str) -> LocalOutcome {
        LocalExecutor::default().run(code).await
    }

    #[tokio::test]
    async fn test_print_captured() {
        let outcome = run("print('hi')").await;
        assert_eq!(outcome.output, "hi\n");
        assert_eq!(outcome.error, None);
    }

    #[tokio::test]
    async fn test_division_by_zero() {
        let outcome = run("print(1/0)").await;
        assert_eq!(outcome.output, "");
        assert_eq!(
            outcome.error.as_deref(),
            Some("Runtime Error: ZeroDivisionError: division by zero")
        );
    }

    #[tokio::test]
    async fn test_output_before_failure_is_kept() {
        let outcome = run("print('a')\nd = {'a': 1}\nd['b']").await;
        assert_eq!(outcome.output, "a\n");
        assert_eq!(outcome.error.as_deref(), Some("Runtime Error: KeyError: 'b'"));
    }

    #[tokio::test]
    async fn test_syntax_error_reports_line() {
        let outcome = run("x = 1\nif x\n    pass").await;
        assert_eq!(outcome.output, "");
        let error = outcome.error.unwrap_or_default();
        assert!(error.starts_with("Syntax Error: "), "{}", error);
        assert!(error.ends_with("(line 2)"), "{}", error);
    }

    #[tokio::test]
    async fn test_stderr_becomes_error() {
        let outcome = run("print('out')\nprint('warn', file=stderr)").await;
        assert_eq!(outcome.output, "out\n");
        assert_eq!(outcome.error.as_deref(), Some("warn\n"));
    }

    #[tokio::test]
    async fn test_silent_snippet_gets_sentinel() {
        let outcome = run("x = 40 + 2").await;
        assert_eq!(outcome.output, NO_OUTPUT_SENTINEL);
        assert_eq!(outcome.error, None);
    }

    #[tokio::test]
    async fn test_blank_line_after_block_returns_to_top_level() {
        let outcome = run("def f(n):\n    return n\n\nx = 3\nprint(x)").await;
        assert_eq!(outcome.error, None);
        assert_eq!(outcome.output, "3\n");
    }

    #[tokio::test]
    async fn test_loops_and_functions_with_blank_lines() {
        let source = "def square(n):\n    return n * n\n\n\ntotal = 0\nfor i in range(4):\n    total += square(i)\n\n    # comment inside the loop\nprint(total)\n";
        let outcome = run(source).await;
        assert_eq!(outcome.error, None);
        assert_eq!(outcome.output, "14\n");
    }

    #[tokio::test]
    async fn test_negative_floor_division_and_modulo() {
        let outcome = run("print(-7 // 2, -7 % 2, 7 // -2, [1, 2, 3][-1], 'abcdef'[1:4])").await;
        assert_eq!(outcome.output, "-4 1 -4 3 bcd\n");
    }

    #[tokio::test]
    async fn test_runaway_recursion_is_a_runtime_error() {
        let outcome = run("def f(n):\n    return f(n + 1)\nf(0)").await;
        let error = outcome.error.unwrap_or_default();
        assert!(error.starts_with("Runtime Error: RecursionError"), "{}", error);
    }

    #[tokio::test]
    async fn test_restricted_capabilities() {
        let executor = LocalExecutor::new(
            Capabilities::none().with(Builtin::Print),
            LocalLimits::default(),
        );
        let outcome = executor.run("print(len('abc'))").await;
        assert_eq!(
            outcome.error.as_deref(),
            Some("Runtime Error: NameError: name 'len' is not defined")
        );
    }

    #[tokio::test]
    async fn test_stderr_handle_withheld() {
        let executor = LocalExecutor::new(
            Capabilities::standard().with_stderr(false),
            LocalLimits::default(),
        );
        let outcome = executor.run("print('x', file=stderr)").await;
        assert_eq!(
            outcome.error.as_deref(),
            Some("Runtime Error: NameError: name 'stderr' is not defined")
        );
    }

    #[tokio::test]
    async fn test_import_is_blocked() {
        let outcome = run("import os\nprint(os.getcwd())").await;
        assert_eq!(outcome.output, "");
        let error = outcome.error.unwrap_or_default();
        assert!(error.starts_with("Runtime Error: ImportError"), "{}", error);
    }

    #[tokio::test]
    async fn test_output_is_capped() {
        let limits = LocalLimits {
            max_output_bytes: 10_000,
            ..LocalLimits::default()
        };
        let executor = LocalExecutor::new(Capabilities::standard(), limits);
        let outcome = executor.run("while True:\n    print('x' * 1000)").await;
        assert!(outcome.output.len() <= 10_000);
        let error = outcome.error.unwrap_or_default();
        assert!(error.starts_with("Runtime Error: OutputLimitError"), "{}", error);
    }

    #[tokio::test]
    async fn test_wall_clock_timeout_kills_snippet() {
        let limits = LocalLimits {
            timeout: Duration::from_secs(1),
            ..LocalLimits::default()
        };
        let executor = LocalExecutor::new(Capabilities::standard(), limits);
        let outcome = executor.run("while True:\n    pass").await;
        assert_eq!(outcome.output, "");
        assert_eq!(
            outcome.error.as_deref(),
            Some("Runtime Error: TimeoutError: execution exceeded 1 seconds")
        );
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_doubling_concatenation_hits_memory_limit() {
        let outcome = run("s = 'x' * 1024\nwhile True:\n    s = s + s").await;
        assert_eq!(outcome.output, "");
        assert_eq!(outcome.error.as_deref(), Some("Runtime Error: MemoryError"));
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_execution_error() {
        let outcome = LocalExecutor::default()
            .with_python("/nonexistent/python3")
            .run("print(1)")
            .await;
        assert_eq!(outcome.output, "");
        let error = outcome.error.unwrap_or_default();
        assert!(error.starts_with("Execution error: cannot start"), "{}", error);
    }

    #[test]
    fn test_limits_from_settings() {
        let limits = LocalLimits::new(3, 64);
        assert_eq!(limits.timeout, Duration::from_secs(3));
        assert_eq!(limits.max_memory_bytes, 64 * 1024 * 1024);
        assert_eq!(limits.max_output_bytes, DEFAULT_MAX_OUTPUT_BYTES);
    }
}
