//! The unbounded FIFO queues connecting the public contract to the message pumps.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::AddError;
use crate::message::Message;

/// The outbound side: messages a caller (or the credential refresh loop) has enqueued for the
/// send loop to write to the child.
///
/// Unbounded by design (see spec §9, open question on backpressure): no flow control is applied
/// beyond process memory. `len()` gives the caller an observation point to build their own
/// backpressure atop, should they want one.
pub struct OutboundQueue {
	sender: mpsc::UnboundedSender<Message>,
	len: Arc<AtomicUsize>,
}

/// The send loop's half of [`OutboundQueue`].
pub struct OutboundReceiver {
	receiver: mpsc::UnboundedReceiver<Message>,
	len: Arc<AtomicUsize>,
}

impl OutboundQueue {
	pub fn new() -> (Arc<Self>, OutboundReceiver) {
		let (sender, receiver) = mpsc::unbounded_channel();
		let len = Arc::new(AtomicUsize::new(0));
		(
			Arc::new(Self { sender, len: len.clone() }),
			OutboundReceiver { receiver, len },
		)
	}

	/// Enqueues `message`. Fails if the send loop's receiver has already been dropped, which
	/// only happens once the Failure Arbiter has torn down the pumps.
	pub fn enqueue(&self, message: Message) -> Result<(), AddError> {
		self.sender.send(message).map_err(|_| AddError::ShuttingDown)?;
		self.len.fetch_add(1, Ordering::Relaxed);
		Ok(())
	}

	/// The number of messages currently queued, awaiting the send loop.
	pub fn len(&self) -> usize {
		self.len.load(Ordering::Relaxed)
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

impl OutboundReceiver {
	/// Awaits a message, or the queue being closed (all senders dropped). Cancel-safe: dropping
	/// this future before it resolves (e.g. losing a `select!` race) does not consume a message.
	pub async fn recv(&mut self) -> Option<Message> {
		let msg = self.receiver.recv().await;
		if msg.is_some() {
			self.len.fetch_sub(1, Ordering::Relaxed);
		}
		msg
	}
}

/// The inbound side: frames decoded off the child's out-pipe, awaiting dispatch to the handler.
///
/// There is no producer other than the receive loop, so enqueue-after-shutdown is structurally
/// impossible rather than merely rejected.
pub fn inbound_channel() -> (mpsc::UnboundedSender<Message>, mpsc::UnboundedReceiver<Message>) {
	mpsc::unbounded_channel()
}
