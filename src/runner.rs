//! Child-process execution for CLI-backed tools.
//!
//! A tool runs as `<program> <args..>` with both output pipes read line by line.
//! Every line is appended to an in-memory buffer and, when a sink is attached,
//! published as a [`ScanEvent`] so listeners see progress while the process runs.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How long pipe readers may keep draining after the process is gone.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanEventKind {
    Stdout,
    Stderr,
    Status,
    Complete,
    Cancelled,
}

impl ScanEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanEventKind::Stdout => "stdout",
            ScanEventKind::Stderr => "stderr",
            ScanEventKind::Status => "status",
            ScanEventKind::Complete => "complete",
            ScanEventKind::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanEventKind::Complete | ScanEventKind::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanEvent {
    pub scan_id: String,
    pub kind: ScanEventKind,
    pub data: String,
    pub timestamp: DateTime<Utc>,
}

/// Publishes events for one scan onto a shared broadcast channel.
#[derive(Debug, Clone)]
pub struct EventSink {
    scan_id: String,
    sender: broadcast::Sender<ScanEvent>,
}

impl EventSink {
    pub fn new(scan_id: impl Into<String>, sender: broadcast::Sender<ScanEvent>) -> Self {
        Self {
            scan_id: scan_id.into(),
            sender,
        }
    }

    pub fn scan_id(&self) -> &str {
        &self.scan_id
    }

    pub fn emit(&self, kind: ScanEventKind, data: impl Into<String>) {
        let event = ScanEvent {
            scan_id: self.scan_id.clone(),
            kind,
            data: data.into(),
            timestamp: Utc::now(),
        };
        // no subscribers is fine
        let _ = self.sender.send(event);
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub timeout: Duration,
    pub cancel: CancellationToken,
}

impl RunOptions {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("command failed with {}. Error: {stderr}", describe_code(.code))]
    Failed { code: Option<i32>, stderr: String },
    #[error("command timed out after {}s", .after.as_secs())]
    Timeout {
        after: Duration,
        partial_stdout: String,
    },
    #[error("command cancelled")]
    Cancelled,
    #[error("failed to wait for command: {0}")]
    Wait(#[from] io::Error),
}

fn describe_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {code}"),
        None => "a signal".to_string(),
    }
}

enum Outcome {
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
}

/// Runs `program` to completion, timeout or cancellation.
///
/// Output is trimmed before it is returned. On timeout or cancellation the
/// child is killed and awaited so no zombie is left behind.
pub async fn run_command<S: AsRef<str>>(
    program: &str,
    args: &[S],
    options: &RunOptions,
    sink: Option<&EventSink>,
) -> Result<CommandOutput, RunnerError> {
    let mut child = Command::new(program)
        .args(args.iter().map(AsRef::as_ref))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| RunnerError::Spawn {
            program: program.to_string(),
            source,
        })?;
    debug!(program, pid = ?child.id(), "spawned tool process");

    let stdout = child
        .stdout
        .take()
        .map(|pipe| Capture::start(pipe, ScanEventKind::Stdout, sink.cloned()));
    let stderr = child
        .stderr
        .take()
        .map(|pipe| Capture::start(pipe, ScanEventKind::Stderr, sink.cloned()));

    let outcome = tokio::select! {
        status = child.wait() => Outcome::Exited(status?),
        _ = tokio::time::sleep(options.timeout) => Outcome::TimedOut,
        _ = options.cancel.cancelled() => Outcome::Cancelled,
    };

    if !matches!(outcome, Outcome::Exited(_)) {
        if let Err(err) = child.kill().await {
            warn!(program, ?err, "failed to kill tool process");
        }
    }

    let (stdout, stderr) = tokio::join!(Capture::finish(stdout), Capture::finish(stderr));

    match outcome {
        Outcome::Exited(status) if status.success() => Ok(CommandOutput {
            stdout: stdout.trim().to_string(),
            stderr: stderr.trim().to_string(),
            exit_code: status.code().unwrap_or_default(),
        }),
        Outcome::Exited(status) => Err(RunnerError::Failed {
            code: status.code(),
            stderr: stderr.trim().to_string(),
        }),
        Outcome::TimedOut => {
            warn!(program, timeout_secs = options.timeout.as_secs(), "tool process timed out");
            Err(RunnerError::Timeout {
                after: options.timeout,
                partial_stdout: stdout.trim().to_string(),
            })
        }
        Outcome::Cancelled => Err(RunnerError::Cancelled),
    }
}

struct Capture {
    buffer: Arc<Mutex<String>>,
    task: JoinHandle<()>,
}

impl Capture {
    fn start<R>(reader: R, kind: ScanEventKind, sink: Option<EventSink>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(String::new()));
        let shared = Arc::clone(&buffer);
        let task = tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if let Ok(mut buffer) = shared.lock() {
                            buffer.push_str(&line);
                            buffer.push('\n');
                        }
                        if let Some(sink) = &sink {
                            sink.emit(kind, line);
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        debug!(stream = kind.as_str(), ?err, "stopped reading tool output");
                        break;
                    }
                }
            }
        });
        Self { buffer, task }
    }

    async fn finish(capture: Option<Self>) -> String {
        let Some(Capture { buffer, mut task }) = capture else {
            return String::new();
        };
        // a grandchild may still hold the pipe open
        if tokio::time::timeout(DRAIN_GRACE, &mut task).await.is_err() {
            task.abort();
        }
        let text = match buffer.lock() {
            Ok(buffer) => buffer.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        text
    }
}

/// Locates a result file written by infoooze for this scan.
///
/// A match contains `infoooze`, the `YYYYMMDD` date and either the target
/// with dots removed or the tool id. Directories are searched in order and
/// names within a directory are compared in sorted order.
pub async fn find_result_file(
    dirs: &[PathBuf],
    target: &str,
    tool_id: &str,
    date: NaiveDate,
) -> Option<PathBuf> {
    let date_tag = date.format("%Y%m%d").to_string();
    let compact_target = target.replace('.', "");

    for dir in dirs {
        let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
            continue;
        };
        let mut names = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        if let Some(name) = names
            .into_iter()
            .find(|name| is_result_name(name, &date_tag, &compact_target, tool_id))
        {
            return Some(dir.join(name));
        }
    }
    None
}

fn is_result_name(name: &str, date_tag: &str, compact_target: &str, tool_id: &str) -> bool {
    name.contains("infoooze")
        && name.contains(date_tag)
        && ((!compact_target.is_empty() && name.contains(compact_target)) || name.contains(tool_id))
}

/// Reads a located result file, logging instead of failing the scan.
pub async fn read_result_file(path: &Path) -> Option<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Some(content),
        Err(err) => {
            warn!(path = %path.display(), ?err, "failed to read result file");
            None
        }
    }
}
