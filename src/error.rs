//! The error taxonomy for the supervisor.
//!
//! Every fatal condition the supervisor can encounter is represented by a single
//! [`SupervisorError`] variant, carrying its [`Retryability`] as data rather than through a
//! parallel error type. This is the value handed to [`MessageHandler::on_error`](crate::handler::MessageHandler::on_error)
//! exactly once per supervisor lifetime.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Whether a terminated supervisor may be usefully replaced by a fresh one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Retryability {
	/// The caller may construct a new supervisor and try again.
	Retryable,
	/// The caller should stop trying to reconstruct a supervisor for this configuration.
	Irrecoverable,
}

impl Retryability {
	/// Returns `true` for [`Retryability::Retryable`].
	pub fn is_retryable(self) -> bool {
		matches!(self, Retryability::Retryable)
	}
}

/// A fatal condition that latches the supervisor into terminal shutdown.
#[derive(Debug, Error)]
pub enum SupervisorError {
	/// A frame header declared a length outside `(0, capacity]`.
	#[error("invalid message size {len} (capacity is {capacity} bytes)")]
	InvalidMessageSize { len: u32, capacity: u32 },

	/// The channel returned EOF before a frame was fully read.
	#[error("EOF reached during read")]
	UnexpectedEof,

	/// A read or write on one of the channels failed.
	#[error("I/O failure on supervisor channel: {0}")]
	ChannelIo(#[source] io::Error),

	/// The child process exited.
	#[error("child process exited with code {code:?}")]
	ChildExited { code: Option<i32> },

	/// The child's pipes never became visible within the creation deadline, or `mkfifo` failed.
	#[error("failed to create pipe {}: {source}", path.display())]
	PipeCreation { path: PathBuf, #[source] source: io::Error },

	/// Spawning the child process failed.
	#[error("failed to spawn child process: {0}")]
	SpawnFailed(#[source] io::Error),

	/// Opening a channel onto an already-created pipe failed within the retry window.
	#[error("failed to connect channel {}: {source}", path.display())]
	ConnectFailed { path: PathBuf, #[source] source: io::Error },

	/// `destroy()` was called by the caller.
	#[error("destroy is called")]
	Destroyed,

	/// Enqueueing onto the outbound queue was interrupted.
	#[error("interrupted while enqueueing message: {0}")]
	EnqueueInterrupted(#[source] io::Error),
}

impl SupervisorError {
	/// The [`Retryability`] this error carries.
	pub fn retryability(&self) -> Retryability {
		use SupervisorError::*;
		match self {
			InvalidMessageSize { .. } => Retryability::Retryable,
			UnexpectedEof => Retryability::Retryable,
			ChannelIo(_) => Retryability::Retryable,
			ChildExited { code } => {
				if *code == Some(1) {
					Retryability::Irrecoverable
				} else {
					Retryability::Retryable
				}
			}
			PipeCreation { .. } => Retryability::Irrecoverable,
			SpawnFailed(_) => Retryability::Irrecoverable,
			ConnectFailed { .. } => Retryability::Irrecoverable,
			Destroyed => Retryability::Retryable,
			EnqueueInterrupted(_) => Retryability::Retryable,
		}
	}
}

/// Synchronous rejection returned by [`Supervisor::add`](crate::supervisor::Supervisor::add).
#[derive(Debug, Error)]
pub enum AddError {
	/// The supervisor has already latched into shutdown; the message was not enqueued.
	#[error("supervisor is shutting down, message was not enqueued")]
	ShuttingDown,
}
