//! Piped child-process runner shared by command engines and transcribers

use std::io::{Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

const POLL: Duration = Duration::from_millis(20);
const DRAIN_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("cannot start {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("{program} killed after {elapsed:?}")]
    TimedOut { program: String, elapsed: Duration },

    #[error("waiting on {program} failed: {source}")]
    Wait {
        program: String,
        source: std::io::Error,
    },
}

#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: String,
}

/// Run `program`, feeding `input` on stdin and collecting both streams
///
/// With a timeout, the child is killed once it runs longer than allowed.
pub fn run_piped(
    program: &str,
    args: &[String],
    input: Vec<u8>,
    timeout: Option<Duration>,
) -> Result<ProcessOutput, ProcessError> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| ProcessError::Spawn {
            program: program.to_string(),
            source,
        })?;

    if let Some(mut stdin) = child.stdin.take() {
        thread::spawn(move || {
            // Closing stdin on drop signals end of input
            let _ = stdin.write_all(&input);
        });
    }

    let (out_tx, out_rx) = mpsc::channel();
    let (err_tx, err_rx) = mpsc::channel();
    if let Some(mut stdout) = child.stdout.take() {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = stdout.read_to_end(&mut buf);
            let _ = out_tx.send(buf);
        });
    }
    if let Some(mut stderr) = child.stderr.take() {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf);
            let _ = err_tx.send(buf);
        });
    }

    let started = Instant::now();
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {}
            Err(source) => {
                return Err(ProcessError::Wait {
                    program: program.to_string(),
                    source,
                })
            }
        }
        if timeout.map(|t| started.elapsed() >= t).unwrap_or(false) {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ProcessError::TimedOut {
                program: program.to_string(),
                elapsed: started.elapsed(),
            });
        }
        thread::sleep(POLL);
    };

    let stdout = out_rx.recv_timeout(DRAIN_WAIT).unwrap_or_default();
    let stderr = err_rx.recv_timeout(DRAIN_WAIT).unwrap_or_default();
    Ok(ProcessOutput {
        status,
        stdout,
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
    })
}
