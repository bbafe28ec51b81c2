//! The supervisor itself: the Public Contract, the four Message Pumps, and the Failure Arbiter
//! that collapses any of them into a single shutdown edge.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Child;
use tokio::sync::{mpsc, Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;

use crate::channel::{self, InChannel, OutChannel};
use crate::child;
use crate::cleanup;
use crate::codec::{self, FrameReader};
use crate::config::Configuration;
use crate::error::{AddError, SupervisorError};
use crate::handler::MessageHandler;
use crate::log_reader;
use crate::message::{Message, SetCredentials};
use crate::pipe::{self, PipePaths};
use crate::queue::{inbound_channel, OutboundQueue, OutboundReceiver};

/// How long the arbiter waits for the message pumps and readers to finish cooperatively before
/// aborting the outstanding tasks.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Owns a native child process's lifecycle and the framed transport to it.
///
/// Construct with [`Supervisor::spawn`] for the normal path (creates pipes, launches the child,
/// connects channels); tests inject a mock child via [`Supervisor::for_pre_made_pipes`] instead
/// (see `tests/supervisor.rs`).
pub struct Supervisor {
	shutdown: AtomicBool,
	shutdown_notify: Arc<Notify>,
	outbound: Arc<OutboundQueue>,
	outbound_rx: AsyncMutex<Option<OutboundReceiver>>,
	inbound_tx: mpsc::UnboundedSender<Message>,
	inbound_rx: AsyncMutex<Option<mpsc::UnboundedReceiver<Message>>>,
	handler: Arc<dyn MessageHandler>,
	config: Configuration,
	executable: PathBuf,
	working_directory: PathBuf,
	in_pipe: PathBuf,
	out_pipe: PathBuf,
	child_pid: AtomicU32,
	tasks: AsyncMutex<Vec<JoinHandle<()>>>,
}

impl Supervisor {
	/// Creates pipes, spawns the child, connects the channels, and starts the message pumps.
	///
	/// Setup failures (pipe creation, spawn, connect) are returned directly to the caller without
	/// going through the Failure Arbiter — the supervisor never reached a running state for the
	/// arbiter's single-`on_error` guarantee to apply to (see `DESIGN.md`).
	pub async fn spawn(config: Configuration) -> Result<Arc<Self>, SupervisorError> {
		let working_directory = config.settings.working_directory.clone();
		let executable = config.settings.executable.clone();
		let capacity = config.settings.receive_buffer_capacity;

		let pipes = {
			let wd = working_directory.clone();
			let poll_interval = config.settings.pipe_visibility_poll_interval;
			tokio::task::spawn_blocking(move || pipe::create_pair(&wd, poll_interval))
				.await
				.expect("pipe factory task panicked")?
		};
		cleanup::register(&pipes.in_pipe);
		cleanup::register(&pipes.out_pipe);

		let mut launched = match child::launch(&config, &pipes.in_pipe, &pipes.out_pipe).await {
			Ok(launched) => launched,
			Err(error) => {
				remove_pipes(&pipes);
				return Err(error);
			}
		};
		let pid = launched.child.id().unwrap_or(0);
		let stdout = launched.child.stdout.take();
		let stderr = launched.child.stderr.take();

		let (in_channel, out_channel) = match connect_channels(&pipes).await {
			Ok(channels) => channels,
			Err(error) => {
				child::terminate(pid);
				remove_pipes(&pipes);
				return Err(error);
			}
		};

		let supervisor = Self::new(
			config,
			executable,
			working_directory,
			pipes.in_pipe,
			pipes.out_pipe,
			pid,
		);

		{
			let mut tasks = supervisor.tasks.lock().await;
			if let Some(stdout) = stdout {
				tasks.push(log_reader::spawn_stdout_reader(pid, stdout, supervisor.shutdown_notify.clone()));
			}
			if let Some(stderr) = stderr {
				tasks.push(log_reader::spawn_stderr_reader(pid, stderr, supervisor.shutdown_notify.clone()));
			}
			tasks.push(supervisor.clone().spawn_child_waiter(launched.child));
		}

		supervisor.clone().start_pumps(in_channel, out_channel, capacity).await;
		Ok(supervisor)
	}

	/// Binds directly to an already-created pipe pair without going through the Pipe Factory or
	/// Child Launcher, for injecting a mock child process in integration tests.
	///
	/// `child`, if given, is watched by the same exit waiter the normal [`Supervisor::spawn`] path
	/// uses, so child-exit scenarios can be exercised without a real native binary. Pass `None`
	/// when a test only cares about frame-level behaviour and would rather not race the receive
	/// loop's fatal against the mock process's own exit.
	pub async fn for_pre_made_pipes(
		config: Configuration,
		in_pipe: PathBuf,
		out_pipe: PathBuf,
		child: Option<Child>,
	) -> Result<Arc<Self>, SupervisorError> {
		let capacity = config.settings.receive_buffer_capacity;
		let executable = config.settings.executable.clone();
		let working_directory = config.settings.working_directory.clone();

		let pipes = PipePaths { in_pipe, out_pipe };
		let (in_channel, out_channel) = connect_channels(&pipes).await?;

		let pid = child.as_ref().and_then(Child::id).unwrap_or(0);
		let supervisor = Self::new(config, executable, working_directory, pipes.in_pipe, pipes.out_pipe, pid);

		if let Some(mut child) = child {
			let stdout = child.stdout.take();
			let stderr = child.stderr.take();
			let mut tasks = supervisor.tasks.lock().await;
			if let Some(stdout) = stdout {
				tasks.push(log_reader::spawn_stdout_reader(pid, stdout, supervisor.shutdown_notify.clone()));
			}
			if let Some(stderr) = stderr {
				tasks.push(log_reader::spawn_stderr_reader(pid, stderr, supervisor.shutdown_notify.clone()));
			}
			tasks.push(supervisor.clone().spawn_child_waiter(child));
		}

		supervisor.clone().start_pumps(in_channel, out_channel, capacity).await;
		Ok(supervisor)
	}

	fn new(
		config: Configuration,
		executable: PathBuf,
		working_directory: PathBuf,
		in_pipe: PathBuf,
		out_pipe: PathBuf,
		pid: u32,
	) -> Arc<Self> {
		let (outbound, outbound_rx) = OutboundQueue::new();
		let (inbound_tx, inbound_rx) = inbound_channel();
		Arc::new(Self {
			shutdown: AtomicBool::new(false),
			shutdown_notify: Arc::new(Notify::new()),
			outbound,
			outbound_rx: AsyncMutex::new(Some(outbound_rx)),
			inbound_tx,
			inbound_rx: AsyncMutex::new(Some(inbound_rx)),
			handler: config.handler.clone(),
			config,
			executable,
			working_directory,
			in_pipe,
			out_pipe,
			child_pid: AtomicU32::new(pid),
			tasks: AsyncMutex::new(Vec::new()),
		})
	}

	async fn start_pumps(self: Arc<Self>, in_channel: InChannel, out_channel: OutChannel, capacity: u32) {
		let outbound_rx = self
			.outbound_rx
			.lock()
			.await
			.take()
			.expect("start_pumps is called exactly once per supervisor");
		let inbound_rx = self
			.inbound_rx
			.lock()
			.await
			.take()
			.expect("start_pumps is called exactly once per supervisor");

		let send = self.clone().spawn_send_loop(out_channel, outbound_rx);
		let receive = self.clone().spawn_receive_loop(in_channel, capacity);
		let dispatch = self.clone().spawn_dispatch_loop(inbound_rx);
		let refresh = self.clone().spawn_credential_refresh_loop();

		let mut tasks = self.tasks.lock().await;
		tasks.push(send);
		tasks.push(receive);
		tasks.push(dispatch);
		tasks.push(refresh);
	}

	// ---- Public Contract -------------------------------------------------------------------

	/// Enqueues `message` for delivery to the child. Rejects synchronously once the supervisor
	/// has latched into shutdown.
	pub fn add(&self, message: Message) -> Result<(), AddError> {
		if self.is_shutdown() {
			return Err(AddError::ShuttingDown);
		}
		self.outbound.enqueue(message)
	}

	/// Invokes the Failure Arbiter with a retryable "destroy is called" error. Idempotent: the
	/// second and subsequent calls observe `shutdown` already latched and return immediately.
	pub async fn destroy(self: &Arc<Self>) {
		self.clone().fail(SupervisorError::Destroyed).await;
	}

	/// The number of messages currently queued, awaiting the send loop.
	pub fn queue_len(&self) -> usize {
		self.outbound.len()
	}

	pub fn in_pipe(&self) -> &Path {
		&self.in_pipe
	}

	pub fn out_pipe(&self) -> &Path {
		&self.out_pipe
	}

	pub fn executable(&self) -> &Path {
		&self.executable
	}

	pub fn working_directory(&self) -> &Path {
		&self.working_directory
	}

	pub fn handler(&self) -> &Arc<dyn MessageHandler> {
		&self.handler
	}

	/// The child's pid, or `None` for a supervisor constructed with
	/// [`Supervisor::for_pre_made_pipes`] or one that has already torn down its child.
	pub fn child_pid(&self) -> Option<u32> {
		match self.child_pid.load(Ordering::Relaxed) {
			0 => None,
			pid => Some(pid),
		}
	}

	fn is_shutdown(&self) -> bool {
		self.shutdown.load(Ordering::Acquire)
	}

	// ---- Message Pumps ----------------------------------------------------------------------

	/// Send loop: waits for the next outbound message on the async executor (so shutdown can
	/// interrupt it even while the outbound queue is empty — the steady-state case), then hands
	/// the actual write to the blocking pool, since flushing a FIFO can still block indefinitely.
	///
	/// Unlike the receive loop, an idle send loop is *not* unblocked by killing the child: it is
	/// waiting on an in-process channel, not the pipe, so the wait itself must be made
	/// cancellable rather than relying on the arbiter's child-termination side effect.
	fn spawn_send_loop(self: Arc<Self>, out_channel: OutChannel, mut rx: OutboundReceiver) -> JoinHandle<()> {
		tokio::spawn(async move {
			let mut out_channel = out_channel;
			loop {
				// `enable()` registers this waiter with `shutdown_notify` before `is_shutdown()`
				// is checked, so a `fail()` that lands in the gap between the check and the
				// `select!` below is never missed (see `tokio::sync::Notify`'s documented pattern
				// for racing a condition check against a notification).
				let notified = self.shutdown_notify.notified();
				tokio::pin!(notified);
				notified.as_mut().enable();
				if self.is_shutdown() {
					return;
				}

				let message = tokio::select! {
					biased;
					_ = notified => return,
					msg = rx.recv() => msg,
				};
				let Some(message) = message else {
					return;
				};

				let (returned_channel, result) = tokio::task::spawn_blocking(move || {
					let result = codec::encode(&mut out_channel, &message);
					(out_channel, result)
				})
				.await
				.expect("send loop's blocking write task panicked");
				out_channel = returned_channel;

				if let Err(source) = result {
					self.clone().fail(SupervisorError::ChannelIo(source)).await;
					return;
				}
			}
		})
	}

	/// Receive loop: runs on the blocking pool for the same reason as the send loop.
	fn spawn_receive_loop(self: Arc<Self>, mut in_channel: InChannel, capacity: u32) -> JoinHandle<()> {
		let inbound_tx = self.inbound_tx.clone();
		tokio::task::spawn_blocking(move || {
			let mut reader = FrameReader::with_capacity(capacity);
			loop {
				if self.is_shutdown() {
					return;
				}
				match reader.read_frame(&mut in_channel) {
					Ok(message) => {
						if inbound_tx.send(message).is_err() {
							return;
						}
					}
					Err(error) => {
						fail_from_blocking(self.clone(), error);
						return;
					}
				}
			}
		})
	}

	/// Dispatch loop: hands inbound messages to the handler. A panic unwinding out of
	/// `on_message` is caught and logged — a misbehaving handler must not kill the supervisor.
	fn spawn_dispatch_loop(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<Message>) -> JoinHandle<()> {
		tokio::spawn(async move {
			while let Some(message) = rx.recv().await {
				let handler = self.handler.clone();
				let outcome =
					std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || handler.on_message(message)));
				if outcome.is_err() {
					tracing::error!("message handler panicked in on_message; supervisor continues");
				}
			}
		})
	}

	/// Credential refresh loop: sleeps, then enqueues a primary and a metrics `SetCredentials`
	/// message, then repeats. Runtime errors are logged; the loop does not itself call fatal.
	///
	/// Sleeps first rather than sending immediately, since the child already received an initial
	/// set of credentials via its `-k`/`-w` launch arguments (see `DESIGN.md` for why this
	/// implementation departs from a literal "send, then sleep" reading of the loop body).
	fn spawn_credential_refresh_loop(self: Arc<Self>) -> JoinHandle<()> {
		tokio::spawn(async move {
			let delay = self.config.settings.credentials_refresh_delay;
			loop {
				tokio::select! {
					_ = self.shutdown_notify.notified() => return,
					_ = tokio::time::sleep(delay) => {}
				}
				if self.is_shutdown() {
					return;
				}
				if self.refresh_once(false).await.is_err() {
					return;
				}
				if self.refresh_once(true).await.is_err() {
					return;
				}
			}
		})
	}

	async fn refresh_once(&self, for_metrics: bool) -> Result<(), ()> {
		let provider = if for_metrics { self.config.metrics_credentials() } else { &self.config.primary_credentials };
		match provider.credentials().await {
			Ok(credentials) => {
				let message = SetCredentials { credentials, for_metrics }.to_message();
				match self.outbound.enqueue(message) {
					Ok(()) => Ok(()),
					Err(_) => Err(()), // outbound closed: the send loop, and thus the supervisor, is gone
				}
			}
			Err(error) => {
				tracing::warn!(%error, for_metrics, "credential refresh runtime error; will retry next cycle");
				Ok(())
			}
		}
	}

	fn spawn_child_waiter(self: Arc<Self>, mut child: Child) -> JoinHandle<()> {
		tokio::spawn(async move {
			match child.wait().await {
				Ok(status) => self.fail(SupervisorError::ChildExited { code: status.code() }).await,
				Err(source) => self.fail(SupervisorError::ChannelIo(source)).await,
			}
		})
	}

	// ---- Failure Arbiter ----------------------------------------------------------------------

	/// Collapses any loop's fatal event into the single shutdown edge. Idempotent via a
	/// compare-and-set on `shutdown`: only the first caller runs teardown and calls
	/// `handler.on_error`.
	async fn fail(self: Arc<Self>, error: SupervisorError) {
		if self.shutdown.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
			return;
		}

		let retryable = error.retryability().is_retryable();
		tracing::error!(%error, retryable, "supervisor entering terminal shutdown");
		self.shutdown_notify.notify_waiters();

		let pid = self.child_pid.swap(0, Ordering::AcqRel);
		if pid != 0 {
			child::terminate(pid);
		}

		let handles = std::mem::take(&mut *self.tasks.lock().await);
		let abort_handles: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
		let join_all = async {
			for handle in handles {
				let _ = handle.await;
			}
		};
		if tokio::time::timeout(SHUTDOWN_GRACE, join_all).await.is_err() {
			tracing::warn!("message pumps did not finish within the shutdown grace period; cancelling");
			for handle in abort_handles {
				handle.abort();
			}
		}

		for path in [&self.in_pipe, &self.out_pipe] {
			let _ = std::fs::remove_file(path);
			cleanup::deregister(path);
		}

		self.handler.on_error(error);
	}
}

/// Bridges a fatal detected on the blocking pool (no `.await` available) into an async call to
/// the arbiter. Fire-and-forget: `fail` is idempotent, and the blocking loop has already returned
/// by the time this runs.
fn fail_from_blocking(supervisor: Arc<Supervisor>, error: SupervisorError) {
	tokio::spawn(async move { supervisor.fail(error).await });
}

async fn connect_channels(pipes: &PipePaths) -> Result<(InChannel, OutChannel), SupervisorError> {
	let in_pipe = pipes.in_pipe.clone();
	let out_pipe = pipes.out_pipe.clone();
	tokio::task::spawn_blocking(move || channel::connect(&in_pipe, &out_pipe))
		.await
		.expect("channel connector task panicked")
}

fn remove_pipes(pipes: &PipePaths) {
	for path in [&pipes.in_pipe, &pipes.out_pipe] {
		let _ = std::fs::remove_file(path);
		cleanup::deregister(path);
	}
}
