//! External tool invocation.
//!
//! Both pipeline stages drive an external binary. This module spawns the
//! tool, streams its combined output to a log file under the target
//! directory, retains a bounded stderr tail for error reports, and kills
//! the child when cancellation is requested. Argv vectors only; nothing is
//! ever passed through a shell.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;

/// Number of stderr lines retained for error reports.
pub const STDERR_TAIL_LINES: usize = 40;

/// Poll interval for cancellation and child exit.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Errors from tool invocation.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error while running {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },
}

/// One external command: program plus argv, no shell.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl ToolInvocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Human-readable command line, for logs.
    pub fn display_line(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Outcome of a finished (or killed) tool run.
#[derive(Debug)]
pub struct ToolOutput {
    /// Exit code; None when the child was terminated by a signal.
    pub exit_code: Option<i32>,
    /// Last lines of stderr, surfaced verbatim in failure reports.
    pub stderr_tail: Vec<String>,
    /// Wall-clock duration.
    pub duration: Duration,
    /// True when the run ended because cancellation was requested.
    pub cancelled: bool,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        !self.cancelled && self.exit_code == Some(0)
    }
}

enum StreamLine {
    Stdout(String),
    Stderr(String),
}

/// Run a tool to completion, streaming output to `log_path`.
///
/// The `cancel` flag is polled while the child runs; once set, the child is
/// killed and the output is marked cancelled. The caller decides what
/// cancellation means for the pipeline.
pub fn run_tool(
    invocation: &ToolInvocation,
    log_path: &Path,
    cancel: &Arc<AtomicBool>,
) -> Result<ToolOutput, ExecError> {
    let program = invocation.program.display().to_string();
    let io_err = |source: io::Error| ExecError::Io {
        program: program.clone(),
        source,
    };

    let log_file = File::create(log_path).map_err(&io_err)?;
    let mut log = BufWriter::new(log_file);
    writeln!(log, "command: {}", invocation.display_line()).map_err(&io_err)?;
    writeln!(log, "started_at: {}", Utc::now().to_rfc3339()).map_err(&io_err)?;
    log.flush().map_err(&io_err)?;

    let start = Instant::now();
    let mut child = Command::new(&invocation.program)
        .args(&invocation.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| ExecError::Spawn {
            program: program.clone(),
            source: e,
        })?;

    let stdout = child.stdout.take().expect("stdout piped");
    let stderr = child.stderr.take().expect("stderr piped");

    let (tx, rx) = mpsc::channel();
    let tx_err = tx.clone();
    let stdout_reader = thread::spawn(move || {
        for line in BufReader::new(stdout).lines().map_while(Result::ok) {
            if tx.send(StreamLine::Stdout(line)).is_err() {
                break;
            }
        }
    });
    let stderr_reader = thread::spawn(move || {
        for line in BufReader::new(stderr).lines().map_while(Result::ok) {
            if tx_err.send(StreamLine::Stderr(line)).is_err() {
                break;
            }
        }
    });

    let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
    let mut cancelled = false;

    loop {
        // Checked on every iteration, not only when the channel is quiet: a
        // child that streams output continuously must still die promptly.
        if cancel.load(Ordering::SeqCst) && !cancelled {
            cancelled = true;
            // Best effort; the child may have exited already.
            let _ = child.kill();
        }
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(StreamLine::Stdout(line)) => {
                writeln!(log, "{line}").map_err(&io_err)?;
            }
            Ok(StreamLine::Stderr(line)) => {
                writeln!(log, "{line}").map_err(&io_err)?;
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    // Readers are done once the channel disconnects.
    let _ = stdout_reader.join();
    let _ = stderr_reader.join();

    let status = child.wait().map_err(&io_err)?;
    let duration = start.elapsed();

    writeln!(log, "ended_at: {}", Utc::now().to_rfc3339()).map_err(&io_err)?;
    writeln!(log, "exit: {status}").map_err(&io_err)?;
    log.flush().map_err(&io_err)?;

    // A cancel that raced the child's own exit still counts as cancelled.
    if cancel.load(Ordering::SeqCst) {
        cancelled = true;
    }

    Ok(ToolOutput {
        exit_code: status.code(),
        stderr_tail: tail.into_iter().collect(),
        duration,
        cancelled,
    })
}
