//! spawns a child with a fully pre-assembled argv (no shell
//! interpolation), streams stdout to a log sink and stderr into memory
//! concurrently so the child never blocks on a full pipe buffer.

use anyhow::{Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write as _;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::debug;

const RETRY_MARKER: &str = "(will try again)";

/// A sink that either writes plain lines or streams them through gzip,
/// flushing after every line so a tail -f sees output as it happens.
enum LogSink {
    Plain(std::fs::File),
    Gzip(GzEncoder<std::fs::File>),
}

impl LogSink {
    fn open(path: &Path, compress: bool) -> Result<Self> {
        let file = std::fs::File::create(path)
            .with_context(|| format!("failed to create log file {}", path.display()))?;
        Ok(if compress {
            LogSink::Gzip(GzEncoder::new(file, Compression::default()))
        } else {
            LogSink::Plain(file)
        })
    }

    fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        match self {
            LogSink::Plain(f) => {
                writeln!(f, "{line}")?;
                f.flush()
            }
            LogSink::Gzip(enc) => {
                writeln!(enc, "{line}")?;
                enc.flush()
            }
        }
    }

    fn finish(self) -> std::io::Result<()> {
        if let LogSink::Gzip(enc) = self {
            enc.finish()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Warning,
    Failure,
}

#[derive(Debug)]
pub struct RunResult {
    pub exit_code: Option<i32>,
    pub stderr: String,
    pub outcome: Outcome,
}

/// Classify a completed run: non-zero exit, or any stderr
/// line lacking the retry marker, is a hard failure; stderr present but
/// every line carrying the marker is a warning, not a failure.
fn classify(exit_code: Option<i32>, stderr: &str) -> Outcome {
    let success_exit = exit_code == Some(0);
    if stderr.trim().is_empty() {
        return if success_exit { Outcome::Success } else { Outcome::Failure };
    }
    let all_retryable = stderr
        .lines()
        .filter(|l| !l.trim().is_empty())
        .all(|l| l.contains(RETRY_MARKER));
    if success_exit && all_retryable {
        Outcome::Warning
    } else {
        Outcome::Failure
    }
}

/// Spawn `argv[0]` with `argv[1..]`, writing stdout lines into `log_path`
/// (gzip'd if `compress_log`) and returning the captured stderr and the
/// classified outcome.
pub async fn run(argv: &[String], log_path: &Path, compress_log: bool) -> Result<RunResult> {
    debug!(cmd = %argv.join(" "), "spawning subprocess");
    anyhow::ensure!(!argv.is_empty(), "empty argv");

    let mut command = Command::new(&argv[0]);
    command
        .args(&argv[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command
        .spawn()
        .with_context(|| format!("failed to spawn {}", argv[0]))?;

    let stdout = child.stdout.take().expect("stdout was piped");
    let stderr = child.stderr.take().expect("stderr was piped");

    let stdout_log_path = log_path.to_path_buf();
    let stdout_handle = tokio::spawn(async move {
        let mut sink = LogSink::open(&stdout_log_path, compress_log)?;
        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            sink.write_line(&line)?;
        }
        sink.finish()?;
        Ok::<(), anyhow::Error>(())
    });

    let stderr_handle = tokio::spawn(async move {
        let mut buf = String::new();
        let mut lines = BufReader::new(stderr).lines();
        while let Some(line) = lines.next_line().await? {
            buf.push_str(&line);
            buf.push('\n');
        }
        Ok::<String, anyhow::Error>(buf)
    });

    let status = child.wait().await.context("failed to wait on child process")?;
    let stdout_result = stdout_handle.await.context("stdout drain task panicked")?;
    let stderr_result = stderr_handle.await.context("stderr drain task panicked")?;

    stdout_result.context("stdout drain failed")?;
    let stderr = stderr_result.context("stderr drain failed")?;

    let exit_code = status.code();
    let outcome = classify(exit_code, &stderr);

    Ok(RunResult {
        exit_code,
        stderr,
        outcome,
    })
}
