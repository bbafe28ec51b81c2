//! Supervisor for the native Kinesis Producer Library child process.
//!
//! This crate owns the child's lifecycle, establishes a bidirectional length-prefixed framed
//! transport over a pair of uni-directional FIFO/named pipes, pumps messages between an
//! in-process producer API and the child, periodically refreshes credentials inside the child,
//! and transitions cleanly — and exactly once — into a terminal failure state when anything goes
//! wrong.
//!
//! See `SPEC_FULL.md` in the repository root for the full component-by-component design; `DESIGN.md`
//! records where each piece is grounded and the calls made on the design's open questions.
//!
//! ```text
//! caller ──add()──▶ outbound queue ──send loop──▶ out-pipe ──▶ child
//! caller ◀─handler──  inbound queue ◀─receive loop◀─ in-pipe ◀──  child
//! ```

pub mod channel;
pub mod child;
pub mod cleanup;
pub mod codec;
pub mod config;
pub mod error;
pub mod handler;
pub mod log_reader;
pub mod message;
pub mod pipe;
pub mod queue;
pub mod supervisor;

pub use config::{Configuration, CredentialsProvider, Settings};
pub use error::{AddError, Retryability, SupervisorError};
pub use handler::{FnHandler, MessageHandler};
pub use message::{Credentials, Message, SetCredentials};
pub use supervisor::Supervisor;
