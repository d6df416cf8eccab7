use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command as TokioCommand;
use tokio::time::timeout;

#[cfg(test)]
use mockall::automock;

use crate::borg::command::BorgInvocation;
use crate::borg::exit::ExitClass;
use crate::core::error::PilotError;

/// How long output is still collected once borg has exited
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Result of running borg once
#[derive(Debug, Clone)]
pub struct BorgOutcome {
    /// Raw exit code, `None` when terminated by a signal or timeout
    pub code: Option<i32>,

    pub class: ExitClass,

    /// Time taken by the run
    pub duration: Duration,

    /// Whether the run was killed after `timeout_seconds`
    pub timed_out: bool,
}

impl BorgOutcome {
    pub fn from_code(code: Option<i32>, duration: Duration) -> Self {
        Self {
            code,
            class: ExitClass::from_code(code),
            duration,
            timed_out: false,
        }
    }
}

/// Runs a borg invocation, appending its output to a log file
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BorgExecutor: Send + Sync {
    async fn execute(&self, invocation: &BorgInvocation, log_path: &Path) -> Result<BorgOutcome>;
}

/// Executor spawning the real borg binary
pub struct ProcessExecutor {
    /// Mirror borg's stderr to our stderr
    mirror_stderr: bool,
}

impl ProcessExecutor {
    pub fn new(mirror_stderr: bool) -> Self {
        Self { mirror_stderr }
    }
}

#[derive(Clone, Copy)]
enum Sink {
    Stdout,
    Stderr,
    LogOnly,
}

/// Copy lines from a child pipe into the log, optionally echoing them
async fn pump_lines<R>(reader: R, log: &Mutex<File>, sink: Sink) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    // Paths in borg's output need not be UTF-8; the log keeps the raw bytes
    let mut lines = BufReader::new(reader).split(b'\n');
    while let Some(line) = lines.next_segment().await? {
        {
            let mut file = log
                .lock()
                .map_err(|_| std::io::Error::other("log file lock poisoned"))?;
            file.write_all(&line)?;
            file.write_all(b"\n")?;
        }
        match sink {
            Sink::Stdout => println!("{}", String::from_utf8_lossy(&line)),
            Sink::Stderr => eprintln!("{}", String::from_utf8_lossy(&line)),
            Sink::LogOnly => {}
        }
    }
    Ok(())
}

#[async_trait]
impl BorgExecutor for ProcessExecutor {
    async fn execute(&self, invocation: &BorgInvocation, log_path: &Path) -> Result<BorgOutcome> {
        info!("Running {}", invocation.render());

        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .with_context(|| format!("Failed to open log file: {:?}", log_path))?;
        let log = Mutex::new(log_file);

        let mut command = TokioCommand::new(&invocation.program);
        command
            .args(&invocation.args)
            .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_os_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let start_time = Instant::now();
        let mut child = command.spawn().map_err(|e| {
            anyhow::anyhow!(PilotError::CommandError(format!(
                "failed to start {}: {}",
                invocation.program, e
            )))
        })?;

        let stdout = child
            .stdout
            .take()
            .context("borg stdout was not captured")?;
        let stderr = child
            .stderr
            .take()
            .context("borg stderr was not captured")?;

        let stdout_sink = if invocation.command.echoes_stdout() {
            Sink::Stdout
        } else {
            Sink::LogOnly
        };
        let stderr_sink = if self.mirror_stderr {
            Sink::Stderr
        } else {
            Sink::LogOnly
        };

        let run = async {
            let pumps = async {
                let (out, err) = tokio::join!(
                    pump_lines(stdout, &log, stdout_sink),
                    pump_lines(stderr, &log, stderr_sink)
                );
                out.context("Failed to copy borg stdout")?;
                err.context("Failed to copy borg stderr")
            };
            tokio::pin!(pumps);

            let mut drained = false;
            let status = loop {
                tokio::select! {
                    status = child.wait() => break status.context("Failed to wait for borg")?,
                    copied = &mut pumps, if !drained => {
                        copied?;
                        drained = true;
                    }
                }
            };

            // A process borg left behind (an ssh master, say) may keep the
            // pipes open long after borg itself exited
            if !drained {
                match timeout(DRAIN_GRACE, &mut pumps).await {
                    Ok(copied) => copied?,
                    Err(_) => warn!(
                        "borg {} exited but its output pipes are still open, not waiting for them",
                        invocation.command
                    ),
                }
            }
            Ok::<_, anyhow::Error>(status)
        };

        let result = match invocation.timeout_seconds {
            Some(seconds) => timeout(Duration::from_secs(seconds), run).await.ok(),
            None => Some(run.await),
        };

        let duration = start_time.elapsed();

        match result {
            Some(status) => {
                let status = status?;
                let outcome = BorgOutcome::from_code(status.code(), duration);
                if outcome.class.is_fatal() {
                    error!(
                        "borg {} failed ({}) in {:?}",
                        invocation.command, outcome.class, duration
                    );
                } else {
                    debug!(
                        "borg {} finished ({}) in {:?}",
                        invocation.command, outcome.class, duration
                    );
                }
                Ok(outcome)
            }
            None => {
                let seconds = invocation.timeout_seconds.unwrap_or_default();
                error!("borg {} timed out after {} seconds", invocation.command, seconds);
                let _ = child.kill().await;
                if let Ok(mut file) = log.lock() {
                    let _ = writeln!(file, "borgpilot: killed after {} seconds", seconds);
                }
                Ok(BorgOutcome {
                    code: None,
                    class: ExitClass::Error(None),
                    duration,
                    timed_out: true,
                })
            }
        }
    }
}
