//! Child Launcher: assembles the native child's command line, spawns it with an augmented
//! environment, and hands back its stdio handles for the Log Stream Reader.

use std::path::Path;
use std::process::Stdio;

use tokio::process::{Child, Command};

use crate::config::Configuration;
use crate::error::SupervisorError;
use crate::message::SetCredentials;

/// A freshly spawned child, with its pid captured before its stdio handles are moved out.
pub struct LaunchedChild {
	pub child: Child,
	pub pid: u32,
}

/// Builds the argument vector, spawns the child, and returns it with stdout/stderr still piped.
///
/// Fetches credentials from both providers once, up front, for the `-k`/`-w` flags — the
/// credential refresh loop takes over re-sending them as messages once the supervisor is running
/// (see `SPEC_FULL.md` §4.5, §9).
pub async fn launch(config: &Configuration, in_pipe: &Path, out_pipe: &Path) -> Result<LaunchedChild, SupervisorError> {
	let primary = config
		.primary_credentials
		.credentials()
		.await
		.map_err(SupervisorError::SpawnFailed)?;
	let metrics = config
		.metrics_credentials()
		.credentials()
		.await
		.map_err(SupervisorError::SpawnFailed)?;

	let primary_msg = SetCredentials { credentials: primary, for_metrics: false }.to_message();
	let metrics_msg = SetCredentials { credentials: metrics, for_metrics: true }.to_message();

	let mut command = Command::new(&config.settings.executable);
	command
		.arg("-o")
		.arg(out_pipe)
		.arg("-i")
		.arg(in_pipe)
		.arg("-c")
		.arg(hex_upper(&config.settings.config_proto))
		.arg("-k")
		.arg(hex_upper(primary_msg.as_bytes()))
		.arg("-w")
		.arg(hex_upper(metrics_msg.as_bytes()))
		.arg("-t")
		.envs(&config.settings.environment)
		.stdout(Stdio::piped())
		.stderr(Stdio::piped())
		.kill_on_drop(true);

	let child = command.spawn().map_err(SupervisorError::SpawnFailed)?;
	let pid = child.id().unwrap_or(0);
	Ok(LaunchedChild { child, pid })
}

fn hex_upper(bytes: &[u8]) -> String {
	hex::encode_upper(bytes)
}

/// Forcibly terminates the child identified by `pid`.
///
/// Used by the Failure Arbiter instead of `tokio::process::Child::kill`, since the child's
/// `Child` value is owned exclusively by its exit waiter task (see `supervisor::spawn_child_waiter`)
/// for the lifetime of the wait; the pid is a cheap, `Copy` diagnostic the arbiter can act on
/// without contending for that ownership.
#[cfg(unix)]
pub fn terminate(pid: u32) {
	unsafe {
		libc::kill(pid as libc::pid_t, libc::SIGKILL);
	}
}

#[cfg(windows)]
pub fn terminate(pid: u32) {
	use winapi::um::handleapi::CloseHandle;
	use winapi::um::processthreadsapi::{OpenProcess, TerminateProcess};
	use winapi::um::winnt::PROCESS_TERMINATE;
	unsafe {
		let handle = OpenProcess(PROCESS_TERMINATE, 0, pid);
		if !handle.is_null() {
			TerminateProcess(handle, 1);
			CloseHandle(handle);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn hex_upper_is_uppercase_and_unpadded() {
		assert_eq!(hex_upper(&[0x0a, 0xff]), "0AFF");
		assert_eq!(hex_upper(&[]), "");
	}
}
