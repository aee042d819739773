//! Async subprocess execution for engine CLI invocations.
//!
//! Every call spawns its own subprocess in its own process group, so
//! cancellation can signal the whole group (the engine CLI itself may fork
//! helpers) rather than just the direct child: a background task polls the
//! executor's [`CancellationToken`] while the child runs and sends `SIGTERM`
//! to the group the moment it fires.

use crate::cancellation::CancellationToken;
use crate::errors::{Error, Result};
use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, trace, warn};

/// How often the cancellation watcher polls the token while a child runs.
const CANCELLATION_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Per-invocation execution configuration.
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Command timeout; `None` disables it (used sparingly, e.g. `compose
    /// watch`-style long-running calls are out of scope for this core).
    pub timeout: Option<Duration>,
    /// Extra environment variables layered onto the child process.
    pub environment: HashMap<String, String>,
    /// Working directory for the child process.
    pub working_dir: Option<std::path::PathBuf>,
    /// Bytes written to the child's stdin, if any.
    pub stdin_data: Option<Vec<u8>>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(30)),
            environment: HashMap::new(),
            working_dir: None,
            stdin_data: None,
        }
    }
}

/// Collected output of a completed subprocess.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Process exit code (-1 if the engine terminated via signal).
    pub exit_code: i32,
    /// Captured, trimmed-of-trailing-newline stdout.
    pub stdout: String,
    /// Captured, trimmed-of-trailing-newline stderr.
    pub stderr: String,
}

impl CommandOutput {
    fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Stdout/stderr of a helper invocation, captured as raw bytes (the helper
/// protocol is binary: tar streams, not line-oriented text).
pub struct HelperStream {
    /// Raw stdout bytes.
    pub stdout: Vec<u8>,
    /// Raw stderr bytes.
    pub stderr: Vec<u8>,
    /// Exit code.
    pub exit_code: i32,
}

/// Executes engine CLI subcommands as subprocesses.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    /// Resolved path to the engine binary (`docker`, or a compatible CLI).
    pub binary_path: std::path::PathBuf,
    default_config: ExecutionConfig,
    cancellation: CancellationToken,
}

impl ProcessExecutor {
    /// Build an executor for the given binary path, signalling `cancellation`
    /// to every subprocess group it spawns.
    #[must_use]
    pub fn new(binary_path: std::path::PathBuf, cancellation: CancellationToken) -> Self {
        Self {
            binary_path,
            default_config: ExecutionConfig::default(),
            cancellation,
        }
    }

    /// Override the default per-call timeout.
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_config.timeout = Some(timeout);
        self
    }

    /// Poll `self.cancellation` in the background while `pid`'s process
    /// group runs; signal the whole group and stop polling the moment it
    /// fires. Returns `None` if the child never reported a pid (already
    /// reaped).
    fn watch_for_cancellation(&self, pid: Option<u32>) -> Option<tokio::task::JoinHandle<()>> {
        let pid = pid?;
        let cancellation = self.cancellation.clone();
        Some(tokio::spawn(async move {
            loop {
                if cancellation.is_cancelled() {
                    warn!(pid, "cancellation requested; signalling process group");
                    terminate_process_group(pid);
                    break;
                }
                tokio::time::sleep(CANCELLATION_POLL_INTERVAL).await;
            }
        }))
    }

    fn spawn_in_own_group(&self, args: &[String], config: &ExecutionConfig) -> Command {
        let mut command = Command::new(&self.binary_path);
        command.args(args);
        command.stdin(if config.stdin_data.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        for (key, value) in &config.environment {
            command.env(key, value);
        }
        if let Some(dir) = &config.working_dir {
            command.current_dir(dir);
        }
        #[cfg(unix)]
        {
            command.process_group(0);
        }
        command
    }

    /// Run a command to completion, returning an error on nonzero exit.
    pub async fn execute(
        &self,
        operation: &str,
        args: &[String],
        config: Option<ExecutionConfig>,
    ) -> Result<CommandOutput> {
        let config = config.unwrap_or_else(|| self.default_config.clone());
        let command_str = format!("{} {}", self.binary_path.display(), args.join(" "));
        debug!(command = %command_str, "executing engine command");

        let mut command = self.spawn_in_own_group(args, &config);

        let mut child = command
            .spawn()
            .map_err(|e| Error::unavailable(operation, format!("failed to spawn: {e}")))?;

        if let Some(data) = config.stdin_data.clone() {
            if let Some(mut stdin) = child.stdin.take() {
                tokio::spawn(async move {
                    if let Err(e) = stdin.write_all(&data).await {
                        warn!("failed writing stdin: {e}");
                    }
                    let _ = stdin.shutdown().await;
                });
            }
        }

        let output = if let Some(duration) = config.timeout {
            match timeout(duration, self.wait_for_output(child)).await {
                Ok(result) => result?,
                Err(_) => return Err(Error::timeout(operation, duration)),
            }
        } else {
            self.wait_for_output(child).await?
        };

        trace!(exit_code = output.exit_code, "engine command completed");

        if !output.success() {
            return Err(Error::external(
                operation,
                format!(
                    "{command_str} exited {}: {}",
                    output.exit_code,
                    if output.stderr.is_empty() {
                        &output.stdout
                    } else {
                        &output.stderr
                    }
                ),
            ));
        }

        Ok(output)
    }

    async fn wait_for_output(&self, mut child: Child) -> Result<CommandOutput> {
        let watcher = self.watch_for_cancellation(child.id());
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let stdout_handle = stdout.map(|out| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(out).lines();
                let mut buf = String::new();
                while let Ok(Some(line)) = lines.next_line().await {
                    if !buf.is_empty() {
                        buf.push('\n');
                    }
                    buf.push_str(&line);
                }
                buf
            })
        });
        let stderr_handle = stderr.map(|err| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(err).lines();
                let mut buf = String::new();
                while let Ok(Some(line)) = lines.next_line().await {
                    if !buf.is_empty() {
                        buf.push('\n');
                    }
                    buf.push_str(&line);
                }
                buf
            })
        });

        let status = child
            .wait()
            .await
            .map_err(|e| Error::internal("wait for subprocess", e.to_string()))?;
        if let Some(handle) = watcher {
            handle.abort();
        }

        let stdout = match stdout_handle {
            Some(h) => h
                .await
                .map_err(|e| Error::internal("collect stdout", e.to_string()))?,
            None => String::new(),
        };
        let stderr = match stderr_handle {
            Some(h) => h
                .await
                .map_err(|e| Error::internal("collect stderr", e.to_string()))?,
            None => String::new(),
        };

        Ok(CommandOutput {
            exit_code: status.code().unwrap_or(-1),
            stdout,
            stderr,
        })
    }

    /// Run a command that is allowed to produce and consume arbitrary binary
    /// data on stdio (used for the helper-exec tar/manifest protocols),
    /// without treating a nonzero exit as an error. Callers inspect
    /// [`HelperStream::exit_code`] themselves.
    pub async fn execute_binary(
        &self,
        operation: &str,
        args: &[String],
        stdin_data: Option<Vec<u8>>,
        timeout_duration: Option<Duration>,
    ) -> Result<HelperStream> {
        let config = ExecutionConfig {
            timeout: None,
            environment: HashMap::new(),
            working_dir: None,
            stdin_data: stdin_data.clone(),
        };
        let mut command = self.spawn_in_own_group(args, &config);
        let mut child = command
            .spawn()
            .map_err(|e| Error::unavailable(operation, format!("failed to spawn: {e}")))?;

        if let Some(data) = stdin_data {
            if let Some(mut stdin) = child.stdin.take() {
                tokio::spawn(async move {
                    if let Err(e) = stdin.write_all(&data).await {
                        warn!("failed writing helper stdin: {e}");
                    }
                    let _ = stdin.shutdown().await;
                });
            }
        }

        let watcher = self.watch_for_cancellation(child.id());
        let wait = async {
            use tokio::io::AsyncReadExt;
            let mut stdout = Vec::new();
            let mut stderr = Vec::new();
            if let Some(mut out) = child.stdout.take() {
                out.read_to_end(&mut stdout).await.ok();
            }
            if let Some(mut err) = child.stderr.take() {
                err.read_to_end(&mut stderr).await.ok();
            }
            let status = child
                .wait()
                .await
                .map_err(|e| Error::internal("wait for helper", e.to_string()))?;
            if let Some(handle) = watcher {
                handle.abort();
            }
            Ok::<_, Error>(HelperStream {
                stdout,
                stderr,
                exit_code: status.code().unwrap_or(-1),
            })
        };

        match timeout_duration {
            Some(duration) => match timeout(duration, wait).await {
                Ok(result) => result,
                Err(_) => Err(Error::timeout(operation, duration)),
            },
            None => wait.await,
        }
    }

    /// Confirm the binary exists and runs.
    pub async fn check_available(&self) -> Result<()> {
        self.execute(
            "check engine binary",
            &["--version".to_string()],
            None,
        )
        .await
        .map(|_| ())
        .map_err(|_| {
            Error::unavailable(
                "check engine binary",
                format!("{} is not executable", self.binary_path.display()),
            )
        })
    }
}

/// Locate the engine CLI binary (`docker` by default) via [`which`].
pub fn find_engine_binary(name: &str) -> Result<std::path::PathBuf> {
    which::which(name)
        .map_err(|_| Error::unavailable("locate engine binary", format!("{name} not found in PATH")))
}

/// Send `SIGTERM` to the process group rooted at `pid` (see
/// `spawn_in_own_group`, which makes every child its own group leader).
#[cfg(unix)]
fn terminate_process_group(pid: u32) {
    unsafe {
        libc::kill(-(pid as i32), libc::SIGTERM);
    }
}

#[cfg(not(unix))]
fn terminate_process_group(_pid: u32) {}
