//! Channel Connector: opens the read end of the in-pipe and the write end of the out-pipe, with
//! a bounded retry window.
//!
//! Intended to run inside [`tokio::task::spawn_blocking`]: on POSIX both opens block until the
//! child opens the opposite end, which is why the two are raced against each other on separate
//! threads rather than opened sequentially (a sequential open risks deadlocking against a child
//! that opens its ends in the opposite order).

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::error::SupervisorError;

const CONNECT_RETRY_BACKOFF: Duration = Duration::from_millis(100);
const CONNECT_RETRY_WINDOW: Duration = Duration::from_secs(2);

/// The supervisor's read end of the in-pipe (the side the child writes into).
pub struct InChannel(File);

/// The supervisor's write end of the out-pipe (the side the child reads from).
pub struct OutChannel(File);

impl Read for InChannel {
	fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
		self.0.read(buf)
	}
}

impl Write for OutChannel {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		self.0.write(buf)
	}

	fn flush(&mut self) -> io::Result<()> {
		self.0.flush()
	}
}

/// Opens both channels, retrying each independently for up to [`CONNECT_RETRY_WINDOW`].
///
/// If one side connects but the other exhausts its retry window, the connected side is dropped
/// (closing it) before the error is returned, per the "partially-opened channel is closed before
/// retry" requirement.
pub fn connect(in_pipe: &Path, out_pipe: &Path) -> Result<(InChannel, OutChannel), SupervisorError> {
	let in_pipe_owned = in_pipe.to_path_buf();
	let in_handle = std::thread::spawn(move || open_with_retry(&in_pipe_owned, open_read));
	let out_result = open_with_retry(out_pipe, open_write);
	let in_result = in_handle.join().expect("in-pipe connect thread panicked");

	let in_file = in_result?;
	let out_file = out_result?;
	Ok((InChannel(in_file), OutChannel(out_file)))
}

fn open_read(path: &Path) -> io::Result<File> {
	OpenOptions::new().read(true).open(path)
}

fn open_write(path: &Path) -> io::Result<File> {
	OpenOptions::new().write(true).open(path)
}

fn open_with_retry(path: &Path, open: fn(&Path) -> io::Result<File>) -> Result<File, SupervisorError> {
	let deadline = Instant::now() + CONNECT_RETRY_WINDOW;
	loop {
		match open(path) {
			Ok(file) => return Ok(file),
			Err(source) => {
				if Instant::now() >= deadline {
					return Err(SupervisorError::ConnectFailed { path: path.to_path_buf(), source });
				}
				std::thread::sleep(CONNECT_RETRY_BACKOFF);
			}
		}
	}
}
