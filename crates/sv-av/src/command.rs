//! Builder for executing external tool commands.
//!
//! Short invocations (probes, single thumbnails) go through
//! [`ToolCommand::execute`], which captures output under a timeout.
//! Long-running encodes go through [`ToolCommand::spawn`], which starts the
//! tool in its own process group and hands back a [`SupervisedProcess`] that
//! can be waited on, cancelled, or timed out as a unit.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Default timeout for captured executions: 5 minutes.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// How long a terminated process group gets before it is killed outright.
const KILL_GRACE: Duration = Duration::from_secs(5);

/// How long stderr may stay open after the process exits. A grandchild can
/// inherit the pipe and hold it past the exit.
const STDERR_DRAIN: Duration = Duration::from_secs(2);

/// Number of trailing stderr lines kept for diagnostics.
const STDERR_TAIL_LINES: usize = 20;

/// Output captured from a tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Process exit status.
    pub status: ExitStatus,
    /// Captured standard output (lossy UTF-8).
    pub stdout: String,
    /// Captured standard error (lossy UTF-8).
    pub stderr: String,
}

/// How a supervised process ended.
#[derive(Debug)]
pub enum ExitOutcome {
    /// The process exited on its own.
    Exited {
        status: ExitStatus,
        /// Last lines the process wrote to stderr.
        stderr_tail: String,
    },
    /// The cancellation token fired and the process group was terminated.
    Cancelled,
    /// The deadline passed and the process group was terminated.
    TimedOut(Duration),
}

/// A builder for constructing and executing external tool invocations.
///
/// # Example
///
/// ```no_run
/// use sv_av::ToolCommand;
/// use std::path::PathBuf;
///
/// # async fn example() -> sv_core::Result<()> {
/// let output = ToolCommand::new(PathBuf::from("ffprobe"))
///     .args(["-v", "quiet", "-print_format", "json"])
///     .args(["-show_format", "-show_streams"])
///     .arg("/path/to/video.mkv")
///     .execute()
///     .await?;
/// println!("{}", output.stdout);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl ToolCommand {
    /// Create a new command for the given program path.
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Append a single argument.
    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    /// Append multiple arguments.
    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Set the maximum execution time for [`execute`](Self::execute).
    pub fn timeout(&mut self, d: Duration) -> &mut Self {
        self.timeout = d;
        self
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// File name of the program, used in diagnostics.
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    /// Execute the command, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// - [`sv_core::Error::Configuration`] if the program does not exist.
    /// - [`sv_core::Error::BackendExecution`] if spawning fails for another
    ///   reason, the process times out, or it exits non-zero (the message
    ///   includes the tail of stderr).
    pub async fn execute(&self) -> sv_core::Result<ToolOutput> {
        let program_name = self.program_name();

        let mut cmd = self.command();
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let child = cmd.spawn().map_err(|e| spawn_error(&program_name, e))?;

        let result = tokio::time::timeout(self.timeout, child.wait_with_output()).await;

        match result {
            Ok(Ok(output)) => {
                let tool_output = ToolOutput {
                    status: output.status,
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                };

                if !output.status.success() {
                    return Err(sv_core::Error::backend(
                        program_name,
                        format!(
                            "exited with status {}: {}",
                            output.status,
                            tail_lines(&tool_output.stderr, STDERR_TAIL_LINES)
                        ),
                    ));
                }

                Ok(tool_output)
            }
            Ok(Err(e)) => Err(sv_core::Error::backend(
                program_name,
                format!("I/O error waiting for process: {e}"),
            )),
            // The child is dropped with the future and killed by kill_on_drop.
            Err(_elapsed) => Err(sv_core::Error::backend(
                program_name,
                format!("timed out after {:?}", self.timeout),
            )),
        }
    }

    /// Start the command in its own process group without waiting for it.
    ///
    /// Stdout is discarded; the tail of stderr is collected in the background
    /// and returned by [`SupervisedProcess::wait`].
    pub fn spawn(&self) -> sv_core::Result<SupervisedProcess> {
        let program_name = self.program_name();

        let mut cmd = self.command();
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::piped());
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| spawn_error(&program_name, e))?;
        let pid = child.id();

        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
                while let Ok(Some(line)) = lines.next_line().await {
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
                Vec::from(tail).join("\n")
            })
        });

        tracing::debug!(program = %program_name, pid = ?pid, "spawned supervised process");

        Ok(SupervisedProcess {
            program_name,
            child,
            pid,
            stderr_task,
        })
    }
}

/// A running tool process that owns its own process group.
#[derive(Debug)]
pub struct SupervisedProcess {
    program_name: String,
    child: Child,
    pid: Option<u32>,
    stderr_task: Option<JoinHandle<String>>,
}

impl SupervisedProcess {
    /// OS process id (also the process group id on unix).
    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    pub fn program_name(&self) -> &str {
        &self.program_name
    }

    /// Wait for the process to exit, terminating its whole process group if
    /// `cancel` fires or `timeout` elapses first.
    pub async fn wait(
        mut self,
        cancel: &CancellationToken,
        timeout: Option<Duration>,
    ) -> sv_core::Result<ExitOutcome> {
        let deadline = async {
            match timeout {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);

        let outcome = tokio::select! {
            status = self.child.wait() => {
                let status = status.map_err(|e| {
                    sv_core::Error::backend(
                        self.program_name.clone(),
                        format!("I/O error waiting for process: {e}"),
                    )
                })?;
                let stderr_tail = match self.stderr_task.take() {
                    Some(mut task) => match tokio::time::timeout(STDERR_DRAIN, &mut task).await {
                        Ok(tail) => tail.unwrap_or_default(),
                        Err(_) => {
                            tracing::debug!(program = %self.program_name, "stderr still open after exit");
                            task.abort();
                            String::new()
                        }
                    },
                    None => String::new(),
                };
                return Ok(ExitOutcome::Exited { status, stderr_tail });
            }
            _ = cancel.cancelled() => ExitOutcome::Cancelled,
            _ = &mut deadline => ExitOutcome::TimedOut(timeout.unwrap_or_default()),
        };

        self.terminate().await;
        Ok(outcome)
    }

    /// SIGTERM the process group, then SIGKILL it if it outlives the grace
    /// period.
    async fn terminate(&mut self) {
        tracing::debug!(program = %self.program_name, pid = ?self.pid, "terminating process group");
        self.signal_group(false);

        if tokio::time::timeout(KILL_GRACE, self.child.wait()).await.is_err() {
            tracing::warn!(
                program = %self.program_name,
                pid = ?self.pid,
                "process ignored SIGTERM; killing"
            );
            self.signal_group(true);
            let _ = self.child.kill().await;
        }

        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
    }

    #[cfg(unix)]
    fn signal_group(&mut self, force: bool) {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.pid.and_then(|p| i32::try_from(p).ok()) else {
            return;
        };
        let signal = if force { Signal::SIGKILL } else { Signal::SIGTERM };
        if let Err(e) = killpg(Pid::from_raw(pid), signal) {
            tracing::debug!(pid, ?signal, "killpg failed: {e}");
        }
    }

    #[cfg(not(unix))]
    fn signal_group(&mut self, _force: bool) {
        let _ = self.child.start_kill();
    }
}

/// Map a spawn failure. A missing executable is a configuration problem so
/// callers can fall back to another backend.
fn spawn_error(program_name: &str, e: std::io::Error) -> sv_core::Error {
    if e.kind() == std::io::ErrorKind::NotFound {
        sv_core::Error::Configuration(format!("{program_name} could not be started: {e}"))
    } else {
        sv_core::Error::backend(program_name, format!("failed to spawn: {e}"))
    }
}

/// Last `n` non-empty lines of `text`.
pub(crate) fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}
