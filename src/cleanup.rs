//! Process-wide registry of pipe paths pending deletion: a belt-and-braces safety net in case a
//! supervisor is torn down by something other than its own Failure Arbiter (e.g. the process is
//! killed by a signal before teardown completes).

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

fn registry() -> &'static Mutex<HashSet<PathBuf>> {
	static REGISTRY: OnceLock<Mutex<HashSet<PathBuf>>> = OnceLock::new();
	REGISTRY.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Registers `path` for deletion if the process exits before it is explicitly unlinked.
pub fn register(path: &Path) {
	registry().lock().expect("cleanup registry poisoned").insert(path.to_path_buf());
}

/// Deregisters `path`, normally called right after the Failure Arbiter has unlinked it itself.
pub fn deregister(path: &Path) {
	registry().lock().expect("cleanup registry poisoned").remove(path);
}

/// Unlinks every path still in the registry. Idempotent; safe to call from a signal handler
/// context in spirit (it is invoked from the handler's deferred work, not the signal frame
/// itself — see [`install_signal_handler`]).
fn sweep() {
	let mut set = registry().lock().expect("cleanup registry poisoned");
	for path in set.drain() {
		let _ = std::fs::remove_file(&path);
	}
}

/// Installs a `SIGINT`/`SIGTERM` handler (POSIX only) that sweeps the registry before
/// terminating, so pipes are not left behind if the embedding process is killed instead of
/// calling [`crate::supervisor::Supervisor::destroy`].
///
/// Safe to call more than once; only the first call installs the handler. Has no effect on
/// platforms without `signal_hook` support for termination signals (Windows relies solely on the
/// Failure Arbiter's normal teardown path, see `SPEC_FULL.md` §4.11).
#[cfg(unix)]
pub fn install_signal_handler() {
	use std::sync::Once;
	static INSTALLED: Once = Once::new();
	INSTALLED.call_once(spawn_signal_sweeper);
}

#[cfg(unix)]
fn spawn_signal_sweeper() {
	use signal_hook::consts::{SIGINT, SIGTERM};
	use signal_hook::iterator::Signals;

	let mut signals = match Signals::new([SIGINT, SIGTERM]) {
		Ok(s) => s,
		Err(e) => {
			tracing::warn!(error = %e, "failed to register signal iterator for cleanup");
			return;
		}
	};
	std::thread::Builder::new()
		.name("kpl-supervisor-cleanup".into())
		.spawn(move || {
			if let Some(signal) = signals.forever().next() {
				sweep();
				// Re-raise with default disposition so the process terminates the way the
				// shell expects instead of silently swallowing the signal.
				unsafe {
					libc::signal(signal, libc::SIG_DFL);
					libc::raise(signal);
				}
			}
		})
		.expect("failed to spawn cleanup signal thread");
}

#[cfg(not(unix))]
pub fn install_signal_handler() {
	// No belt-and-braces hook on this platform; the Failure Arbiter's normal path is
	// authoritative (see SPEC_FULL.md §4.11).
}
