//! Pipe Factory: creates the two FIFO/named-pipe endpoints a supervisor and its child connect
//! the framed transport across.
//!
//! Intended to run inside [`tokio::task::spawn_blocking`] — both the POSIX `mkfifo` calls and
//! the visibility poll are blocking by nature.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::SupervisorError;

const PIPE_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(15);

/// Default cadence of the POSIX visibility poll, used when a caller has no
/// [`Settings::pipe_visibility_poll_interval`](crate::config::Settings::pipe_visibility_poll_interval) of
/// its own to pass (e.g. the unit tests in this module).
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// The two filesystem/namespace paths a freshly created pipe pair lives at.
#[derive(Debug, Clone)]
pub struct PipePaths {
	pub in_pipe: PathBuf,
	pub out_pipe: PathBuf,
}

/// Creates a fresh, uniquely-named pipe pair under `working_directory` (POSIX) or the global
/// named-pipe namespace (Windows), blocking the calling thread until both endpoints are visible.
///
/// `poll_interval` is the cadence of the POSIX visibility poll (see
/// [`Settings::pipe_visibility_poll_interval`](crate::config::Settings::pipe_visibility_poll_interval));
/// it has no effect on Windows, which allocates a name without polling for it to appear.
pub fn create_pair(working_directory: &Path, poll_interval: Duration) -> Result<PipePaths, SupervisorError> {
	cfg_if::cfg_if! {
		if #[cfg(unix)] {
			posix::create_pair(working_directory, poll_interval)
		} else if #[cfg(windows)] {
			let _ = poll_interval;
			windows::create_pair(working_directory)
		} else {
			compile_error!("kpl-supervisor's pipe factory supports only unix and windows");
		}
	}
}

fn candidate_name(role: &str) -> String {
	let uuid = uuid::Uuid::new_v4().simple().to_string();
	format!("amz-aws-kpl-{role}-pipe-{}", &uuid[..8])
}

#[cfg(unix)]
mod posix {
	use super::*;
	use std::ffi::CString;
	use std::io;
	use std::time::Instant;

	pub fn create_pair(working_directory: &Path, poll_interval: Duration) -> Result<PipePaths, SupervisorError> {
		crate::cleanup::install_signal_handler();
		std::fs::create_dir_all(working_directory).map_err(|source| SupervisorError::PipeCreation {
			path: working_directory.to_path_buf(),
			source,
		})?;

		let (in_pipe, out_pipe) = roll_unused_paths(working_directory);
		mkfifo(&in_pipe)?;
		mkfifo(&out_pipe)?;
		wait_until_visible(&in_pipe, poll_interval)?;
		wait_until_visible(&out_pipe, poll_interval)?;
		Ok(PipePaths { in_pipe, out_pipe })
	}

	fn roll_unused_paths(working_directory: &Path) -> (PathBuf, PathBuf) {
		loop {
			let in_pipe = working_directory.join(candidate_name("in"));
			let out_pipe = working_directory.join(candidate_name("out"));
			if !in_pipe.exists() && !out_pipe.exists() {
				return (in_pipe, out_pipe);
			}
		}
	}

	fn mkfifo(path: &Path) -> Result<(), SupervisorError> {
		let c_path = CString::new(path.as_os_str().to_string_lossy().into_owned())
			.expect("pipe path must not contain a NUL byte");
		let result = unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) };
		if result != 0 {
			return Err(SupervisorError::PipeCreation {
				path: path.to_path_buf(),
				source: io::Error::last_os_error(),
			});
		}
		Ok(())
	}

	fn wait_until_visible(path: &Path, poll_interval: Duration) -> Result<(), SupervisorError> {
		let deadline = Instant::now() + PIPE_VISIBILITY_TIMEOUT;
		while !path.exists() {
			if Instant::now() >= deadline {
				return Err(SupervisorError::PipeCreation {
					path: path.to_path_buf(),
					source: io::Error::new(
						io::ErrorKind::TimedOut,
						"pipe did not become visible within the creation deadline",
					),
				});
			}
			std::thread::sleep(poll_interval);
		}
		Ok(())
	}
}

#[cfg(windows)]
mod windows {
	use super::*;
	use std::io;
	use std::os::windows::ffi::OsStrExt;
	use winapi::shared::winerror::ERROR_FILE_NOT_FOUND;
	use winapi::um::errhandlingapi::GetLastError;
	use winapi::um::fileapi::{GetFileAttributesW, INVALID_FILE_ATTRIBUTES};

	pub fn create_pair(_working_directory: &Path) -> Result<PipePaths, SupervisorError> {
		// No creation syscall is needed: the child process creates the named-pipe server end.
		// This factory only has to allocate two names nothing is currently using.
		let in_pipe = roll_unused_path("in")?;
		let out_pipe = roll_unused_path("out")?;
		Ok(PipePaths { in_pipe, out_pipe })
	}

	fn roll_unused_path(role: &str) -> Result<PathBuf, SupervisorError> {
		for _ in 0..1000 {
			let path = PathBuf::from(format!(r"\\.\pipe\{}", candidate_name(role)));
			if !name_in_use(&path)? {
				return Ok(path);
			}
		}
		Err(SupervisorError::PipeCreation {
			path: PathBuf::from(r"\\.\pipe\"),
			source: io::Error::new(io::ErrorKind::AlreadyExists, "exhausted retries allocating a pipe name"),
		})
	}

	fn name_in_use(path: &Path) -> Result<bool, SupervisorError> {
		let wide: Vec<u16> = path.as_os_str().encode_wide().chain(std::iter::once(0)).collect();
		let attrs = unsafe { GetFileAttributesW(wide.as_ptr()) };
		if attrs != INVALID_FILE_ATTRIBUTES {
			return Ok(true);
		}
		let last_error = unsafe { GetLastError() };
		if last_error == ERROR_FILE_NOT_FOUND {
			Ok(false)
		} else {
			Err(SupervisorError::PipeCreation {
				path: path.to_path_buf(),
				source: io::Error::from_raw_os_error(last_error as i32),
			})
		}
	}
}
