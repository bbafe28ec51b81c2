//! The callback surface the supervisor delivers inbound messages and terminal errors through.

use crate::error::SupervisorError;
use crate::message::Message;

/// A capability set of two sinks: one for inbound messages, one for the single terminal error.
///
/// Implementations must not panic: the supervisor logs but otherwise ignores panics unwound out
/// of `on_message` (see the dispatch loop in [`crate::supervisor`]), treating a misbehaving
/// handler as the caller's problem rather than a fatal condition for the supervisor itself.
pub trait MessageHandler: Send + Sync + 'static {
	/// Called once per frame received from the child, in receive order.
	///
	/// Never called again after [`on_error`](MessageHandler::on_error) has fired.
	fn on_message(&self, message: Message);

	/// Called exactly once, when the supervisor latches into terminal shutdown.
	fn on_error(&self, error: SupervisorError);
}

/// A [`MessageHandler`] built from two closures, for callers who would rather not define a type.
pub struct FnHandler<M, E> {
	on_message: M,
	on_error: E,
}

impl<M, E> FnHandler<M, E>
where
	M: Fn(Message) + Send + Sync + 'static,
	E: Fn(SupervisorError) + Send + Sync + 'static,
{
	pub fn new(on_message: M, on_error: E) -> Self {
		Self { on_message, on_error }
	}
}

impl<M, E> MessageHandler for FnHandler<M, E>
where
	M: Fn(Message) + Send + Sync + 'static,
	E: Fn(SupervisorError) + Send + Sync + 'static,
{
	fn on_message(&self, message: Message) {
		(self.on_message)(message)
	}

	fn on_error(&self, error: SupervisorError) {
		(self.on_error)(error)
	}
}
