//! Supervisor configuration: the plain-data [`Settings`] an embedding application can source
//! from its own config file or environment, plus the non-data collaborators (credentials
//! providers, message handler) a [`Builder`] combines with it into a [`Configuration`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::handler::MessageHandler;
use crate::message::Credentials;

/// A pluggable source of [`Credentials`], refreshed every
/// [`Settings::credentials_refresh_delay`].
#[async_trait]
pub trait CredentialsProvider: Send + Sync + 'static {
	/// Fetches the current credentials. Called once at child-launch time and once per refresh
	/// cycle thereafter.
	async fn credentials(&self) -> std::io::Result<Credentials>;
}

/// The plain-data subset of [`Configuration`], deserializable from an embedding application's
/// own config source (TOML, JSON, environment, …) via `serde`.
///
/// This is additive to the spec's original programmatic construction path: nothing here is
/// required reading for `Configuration::builder()` callers who already have the values in hand.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
	/// Path to the native child executable.
	pub executable: PathBuf,
	/// Directory the FIFOs (POSIX) or nothing (Windows, which uses the global pipe namespace)
	/// are created under.
	pub working_directory: PathBuf,
	/// Environment variables merged into (and overriding) the parent environment for the child.
	pub environment: HashMap<String, String>,
	/// How often the credential refresh loop re-fetches and re-sends credentials.
	#[serde(with = "humantime_duration")]
	pub credentials_refresh_delay: Duration,
	/// The maximum frame size accepted by the receive buffer, in bytes.
	pub receive_buffer_capacity: u32,
	/// Cadence of the Pipe Factory's POSIX visibility poll — how often it re-checks whether a
	/// freshly `mkfifo`'d path has appeared. Has no effect on Windows (see
	/// [`crate::pipe::create_pair`]).
	#[serde(with = "humantime_duration")]
	pub pipe_visibility_poll_interval: Duration,
	/// Opaque, pre-serialized config message handed to the child via `-c`.
	#[serde(skip)]
	pub config_proto: Vec<u8>,
}

impl Default for Settings {
	fn default() -> Self {
		Self {
			executable: PathBuf::new(),
			working_directory: std::env::temp_dir(),
			environment: HashMap::new(),
			credentials_refresh_delay: Duration::from_secs(5 * 60),
			receive_buffer_capacity: crate::codec::MAX_FRAME_SIZE,
			pipe_visibility_poll_interval: crate::pipe::DEFAULT_POLL_INTERVAL,
			config_proto: Vec::new(),
		}
	}
}

mod humantime_duration {
	use serde::{Deserialize, Deserializer};
	use std::time::Duration;

	pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
		// Accept either a plain number of seconds or a string like "5m", "30s".
		#[derive(Deserialize)]
		#[serde(untagged)]
		enum Repr {
			Seconds(u64),
			Text(String),
		}
		match Repr::deserialize(de)? {
			Repr::Seconds(secs) => Ok(Duration::from_secs(secs)),
			Repr::Text(text) => parse_duration(&text)
				.ok_or_else(|| serde::de::Error::custom(format!("invalid duration: {text}"))),
		}
	}

	fn parse_duration(text: &str) -> Option<Duration> {
		let (number, unit) = text.split_at(text.find(|c: char| !c.is_ascii_digit())?);
		let number: u64 = number.parse().ok()?;
		match unit {
			"ms" => Some(Duration::from_millis(number)),
			"s" => Some(Duration::from_secs(number)),
			"m" => Some(Duration::from_secs(number * 60)),
			"h" => Some(Duration::from_secs(number * 3600)),
			_ => None,
		}
	}
}

/// Fully assembled supervisor configuration: [`Settings`] plus the non-data collaborators.
#[derive(Clone)]
pub struct Configuration {
	pub settings: Settings,
	pub primary_credentials: Arc<dyn CredentialsProvider>,
	pub metrics_credentials: Option<Arc<dyn CredentialsProvider>>,
	pub handler: Arc<dyn MessageHandler>,
}

impl Configuration {
	/// Starts a [`Builder`] for programmatic assembly.
	pub fn builder() -> Builder {
		Builder::default()
	}

	/// The metrics credentials provider, falling back to the primary provider when unset,
	/// mirroring the child's own fallback (see spec §3, `SetCredentials`).
	pub fn metrics_credentials(&self) -> &Arc<dyn CredentialsProvider> {
		self.metrics_credentials.as_ref().unwrap_or(&self.primary_credentials)
	}
}

/// Builder combining a [`Settings`] value with the collaborators `Settings` cannot carry.
#[derive(Default)]
pub struct Builder {
	settings: Option<Settings>,
	primary_credentials: Option<Arc<dyn CredentialsProvider>>,
	metrics_credentials: Option<Arc<dyn CredentialsProvider>>,
	handler: Option<Arc<dyn MessageHandler>>,
}

impl Builder {
	pub fn settings(mut self, settings: Settings) -> Self {
		self.settings = Some(settings);
		self
	}

	pub fn primary_credentials(mut self, provider: Arc<dyn CredentialsProvider>) -> Self {
		self.primary_credentials = Some(provider);
		self
	}

	pub fn metrics_credentials(mut self, provider: Arc<dyn CredentialsProvider>) -> Self {
		self.metrics_credentials = Some(provider);
		self
	}

	pub fn handler(mut self, handler: Arc<dyn MessageHandler>) -> Self {
		self.handler = Some(handler);
		self
	}

	/// Assembles the final [`Configuration`].
	///
	/// # Panics
	/// Panics if `settings`, `primary_credentials` or `handler` were never supplied — this
	/// mirrors the teacher crate's builder convention of validating eagerly at `create()` time
	/// rather than deferring to a fallible multi-field constructor.
	pub fn build(self) -> Configuration {
		Configuration {
			settings: self.settings.expect("Settings must be supplied to Configuration::builder()"),
			primary_credentials: self
				.primary_credentials
				.expect("a primary CredentialsProvider must be supplied"),
			metrics_credentials: self.metrics_credentials,
			handler: self.handler.expect("a MessageHandler must be supplied"),
		}
	}
}
