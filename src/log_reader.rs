//! Log Stream Reader: drains a child's stdout/stderr into `tracing` events until the stream
//! ends or shutdown is signalled.
//!
//! The external "log sinks" collaborator named in the original design is satisfied by a
//! `tracing` subscriber the embedding application configures; this module only produces events,
//! it does not own a sink (see `SPEC_FULL.md` §4.8, REDESIGN FLAGS).

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{ChildStderr, ChildStdout};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// How long the shutdown-time drain is willing to wait for one more already-buffered line.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(50);

pub fn spawn_stdout_reader(pid: u32, stdout: ChildStdout, shutdown: Arc<Notify>) -> JoinHandle<()> {
	spawn_reader(pid, BufReader::new(stdout), "stdout", false, shutdown)
}

pub fn spawn_stderr_reader(pid: u32, stderr: ChildStderr, shutdown: Arc<Notify>) -> JoinHandle<()> {
	spawn_reader(pid, BufReader::new(stderr), "stderr", true, shutdown)
}

fn spawn_reader<R>(
	pid: u32,
	mut reader: BufReader<R>,
	stream: &'static str,
	is_stderr: bool,
	shutdown: Arc<Notify>,
) -> JoinHandle<()>
where
	R: AsyncRead + Unpin + Send + 'static,
{
	tokio::spawn(async move {
		let mut line = String::new();
		loop {
			tokio::select! {
				biased;
				_ = shutdown.notified() => {
					line.clear();
					if let Ok(Ok(n)) = tokio::time::timeout(DRAIN_TIMEOUT, reader.read_line(&mut line)).await {
						if n > 0 {
							emit(pid, stream, is_stderr, &line);
						}
					}
					break;
				}
				result = reader.read_line(&mut line) => {
					match result {
						Ok(0) => break,
						Ok(_) => { emit(pid, stream, is_stderr, &line); line.clear(); }
						Err(error) => {
							tracing::debug!(pid, stream, %error, "log stream reader I/O error");
							break;
						}
					}
				}
			}
		}
	})
}

fn emit(pid: u32, stream: &str, is_stderr: bool, line: &str) {
	let line = line.trim_end_matches(['\n', '\r']);
	if line.is_empty() {
		return;
	}
	if is_stderr {
		tracing::warn!(pid, stream, "{line}");
	} else {
		tracing::info!(pid, stream, "{line}");
	}
}
