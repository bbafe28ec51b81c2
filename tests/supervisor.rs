//! End-to-end scenarios against the mock child binary, using the protected
//! [`Supervisor::for_pre_made_pipes`] constructor to inject it (see `SPEC_FULL.md` §8).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use kpl_supervisor::{
	child, codec, pipe, Configuration, Credentials, CredentialsProvider, Message, MessageHandler, SetCredentials,
	Settings, Supervisor, SupervisorError,
};

struct StaticCredentials;

#[async_trait]
impl CredentialsProvider for StaticCredentials {
	async fn credentials(&self) -> std::io::Result<Credentials> {
		Ok(Credentials {
			access_key_id: "AKIDEXAMPLE".to_string(),
			secret_key: "examplesecret".to_string(),
			session_token: None,
		})
	}
}

#[derive(Default)]
struct RecordingHandler {
	messages: Mutex<Vec<Message>>,
	errors: Mutex<Vec<SupervisorError>>,
}

impl MessageHandler for RecordingHandler {
	fn on_message(&self, message: Message) {
		self.messages.lock().unwrap().push(message);
	}

	fn on_error(&self, error: SupervisorError) {
		self.errors.lock().unwrap().push(error);
	}
}

impl RecordingHandler {
	fn messages(&self) -> Vec<Message> {
		self.messages.lock().unwrap().clone()
	}

	fn error_count(&self) -> usize {
		self.errors.lock().unwrap().len()
	}

	async fn wait_for(&self, timeout: Duration, mut ready: impl FnMut(&Self) -> bool) {
		tokio::time::timeout(timeout, async {
			while !ready(self) {
				tokio::time::sleep(Duration::from_millis(10)).await;
			}
		})
		.await
		.expect("condition was not met within the timeout");
	}
}

fn init_tracing() {
	use std::sync::Once;
	static INIT: Once = Once::new();
	INIT.call_once(|| {
		let _ = tracing_subscriber::fmt()
			.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
			.with_test_writer()
			.try_init();
	});
}

fn mock_child_path() -> PathBuf {
	PathBuf::from(env!("CARGO_BIN_EXE_kpl-mock-child"))
}

fn test_config(working_directory: &Path, handler: Arc<RecordingHandler>) -> Configuration {
	Configuration::builder()
		.settings(Settings {
			executable: mock_child_path(),
			working_directory: working_directory.to_path_buf(),
			environment: HashMap::new(),
			credentials_refresh_delay: Duration::from_secs(3600),
			receive_buffer_capacity: codec::MAX_FRAME_SIZE,
			pipe_visibility_poll_interval: pipe::DEFAULT_POLL_INTERVAL,
			config_proto: Vec::new(),
		})
		.primary_credentials(Arc::new(StaticCredentials))
		.handler(handler)
		.build()
}

/// Spawns the mock child unmanaged by the supervisor: used by scenarios that only assert on
/// frame-level behaviour and don't want to race the receive loop against the mock's own exit.
fn spawn_unmanaged_mock(scenario: &str, in_pipe: &Path, out_pipe: &Path) -> std::process::Child {
	std::process::Command::new(mock_child_path())
		.arg("-o")
		.arg(out_pipe)
		.arg("-i")
		.arg(in_pipe)
		.arg("-c")
		.arg("00")
		.arg("-k")
		.arg("00")
		.arg("-w")
		.arg("00")
		.arg("-t")
		.env("KPL_MOCK_SCENARIO", scenario)
		.spawn()
		.expect("spawn mock child")
}

/// Spawns the mock child as a `tokio::process::Child` so it can be handed to the supervisor and
/// watched by its exit waiter.
fn spawn_managed_mock(scenario: &str, in_pipe: &Path, out_pipe: &Path) -> tokio::process::Child {
	tokio::process::Command::new(mock_child_path())
		.arg("-o")
		.arg(out_pipe)
		.arg("-i")
		.arg(in_pipe)
		.arg("-c")
		.arg("00")
		.arg("-k")
		.arg("00")
		.arg("-w")
		.arg("00")
		.arg("-t")
		.env("KPL_MOCK_SCENARIO", scenario)
		.spawn()
		.expect("spawn mock child")
}

#[tokio::test]
async fn echo_ten_frames_delivered_in_order() {
	init_tracing();
	let dir = tempfile::tempdir().unwrap();
	let pipes = pipe::create_pair(dir.path(), pipe::DEFAULT_POLL_INTERVAL).unwrap();
	let mut mock = spawn_unmanaged_mock("echo", &pipes.in_pipe, &pipes.out_pipe);

	let handler = Arc::new(RecordingHandler::default());
	let config = test_config(dir.path(), handler.clone());
	let supervisor = Supervisor::for_pre_made_pipes(config, pipes.in_pipe.clone(), pipes.out_pipe.clone(), None)
		.await
		.expect("connect to mock child");

	let expected: Vec<Message> = (0..10).map(|i| Message::new(format!("frame-{i}").into_bytes())).collect();
	for message in &expected {
		supervisor.add(message.clone()).expect("enqueue while running");
	}

	handler.wait_for(Duration::from_secs(5), |h| h.messages().len() >= 10).await;
	assert_eq!(handler.messages(), expected);
	assert_eq!(handler.error_count(), 0);

	supervisor.destroy().await;
	let _ = mock.kill();
	let _ = mock.wait();
}

#[tokio::test]
async fn oversize_frame_is_rejected_and_retryable() {
	init_tracing();
	let dir = tempfile::tempdir().unwrap();
	let pipes = pipe::create_pair(dir.path(), pipe::DEFAULT_POLL_INTERVAL).unwrap();
	let mut mock = spawn_unmanaged_mock("oversize", &pipes.in_pipe, &pipes.out_pipe);

	let handler = Arc::new(RecordingHandler::default());
	let config = test_config(dir.path(), handler.clone());
	let supervisor = Supervisor::for_pre_made_pipes(config, pipes.in_pipe.clone(), pipes.out_pipe.clone(), None)
		.await
		.expect("connect to mock child");

	handler.wait_for(Duration::from_secs(5), |h| h.error_count() >= 1).await;
	assert_eq!(handler.error_count(), 1);
	let errors = handler.errors.lock().unwrap();
	match &errors[0] {
		SupervisorError::InvalidMessageSize { .. } => {
			assert!(errors[0].retryability().is_retryable());
			assert!(errors[0].to_string().contains("invalid message size"));
		}
		other => panic!("expected InvalidMessageSize, got {other:?}"),
	}
	drop(errors);

	assert!(!pipes.in_pipe.exists(), "in-pipe should be unlinked on teardown");
	assert!(!pipes.out_pipe.exists(), "out-pipe should be unlinked on teardown");

	let _ = mock.kill();
	let _ = mock.wait();
}

#[tokio::test]
async fn premature_eof_does_not_deliver_a_partial_message() {
	init_tracing();
	let dir = tempfile::tempdir().unwrap();
	let pipes = pipe::create_pair(dir.path(), pipe::DEFAULT_POLL_INTERVAL).unwrap();
	let mut mock = spawn_unmanaged_mock("premature-eof", &pipes.in_pipe, &pipes.out_pipe);

	let handler = Arc::new(RecordingHandler::default());
	let config = test_config(dir.path(), handler.clone());
	let supervisor = Supervisor::for_pre_made_pipes(config, pipes.in_pipe.clone(), pipes.out_pipe.clone(), None)
		.await
		.expect("connect to mock child");

	handler.wait_for(Duration::from_secs(5), |h| h.error_count() >= 1).await;
	assert_eq!(handler.messages().len(), 0, "no partial message should ever be dispatched");
	let errors = handler.errors.lock().unwrap();
	assert!(matches!(errors[0], SupervisorError::UnexpectedEof));
	assert!(errors[0].retryability().is_retryable());
	drop(errors);

	let _ = mock.kill();
	let _ = mock.wait();
}

#[tokio::test]
async fn child_exit_code_one_is_irrecoverable() {
	init_tracing();
	let dir = tempfile::tempdir().unwrap();
	let pipes = pipe::create_pair(dir.path(), pipe::DEFAULT_POLL_INTERVAL).unwrap();
	let mock = spawn_managed_mock("exit1", &pipes.in_pipe, &pipes.out_pipe);

	let handler = Arc::new(RecordingHandler::default());
	let config = test_config(dir.path(), handler.clone());
	let _supervisor = Supervisor::for_pre_made_pipes(config, pipes.in_pipe.clone(), pipes.out_pipe.clone(), Some(mock))
		.await
		.expect("connect to mock child");

	handler.wait_for(Duration::from_secs(5), |h| h.error_count() >= 1).await;
	let errors = handler.errors.lock().unwrap();
	match &errors[0] {
		SupervisorError::ChildExited { code: Some(1) } => assert!(!errors[0].retryability().is_retryable()),
		other => panic!("expected ChildExited {{ code: Some(1) }}, got {other:?}"),
	}
}

#[tokio::test]
async fn child_exit_code_two_is_retryable() {
	init_tracing();
	let dir = tempfile::tempdir().unwrap();
	let pipes = pipe::create_pair(dir.path(), pipe::DEFAULT_POLL_INTERVAL).unwrap();
	let mock = spawn_managed_mock("exit2", &pipes.in_pipe, &pipes.out_pipe);

	let handler = Arc::new(RecordingHandler::default());
	let config = test_config(dir.path(), handler.clone());
	let _supervisor = Supervisor::for_pre_made_pipes(config, pipes.in_pipe.clone(), pipes.out_pipe.clone(), Some(mock))
		.await
		.expect("connect to mock child");

	handler.wait_for(Duration::from_secs(5), |h| h.error_count() >= 1).await;
	let errors = handler.errors.lock().unwrap();
	match &errors[0] {
		SupervisorError::ChildExited { code: Some(2) } => assert!(errors[0].retryability().is_retryable()),
		other => panic!("expected ChildExited {{ code: Some(2) }}, got {other:?}"),
	}
}

#[tokio::test]
async fn add_after_destroy_rejects_synchronously_and_destroy_is_idempotent() {
	init_tracing();
	let dir = tempfile::tempdir().unwrap();
	let pipes = pipe::create_pair(dir.path(), pipe::DEFAULT_POLL_INTERVAL).unwrap();
	let mut mock = spawn_unmanaged_mock("echo", &pipes.in_pipe, &pipes.out_pipe);

	let handler = Arc::new(RecordingHandler::default());
	let config = test_config(dir.path(), handler.clone());
	let supervisor = Supervisor::for_pre_made_pipes(config, pipes.in_pipe.clone(), pipes.out_pipe.clone(), None)
		.await
		.expect("connect to mock child");

	supervisor.destroy().await;
	supervisor.destroy().await;
	supervisor.destroy().await;
	assert_eq!(handler.error_count(), 1, "destroy() must be idempotent: exactly one onError");

	let rejection = supervisor.add(Message::new(b"too late".to_vec()));
	assert!(rejection.is_err(), "add() after destroy() must reject synchronously");

	let _ = mock.kill();
	let _ = mock.wait();
}

/// Exercises the Child Launcher directly (the production entry point `Supervisor::spawn` goes
/// through), asserting on the argv it assembles and the environment it forwards, rather than on
/// any pipe traffic.
#[tokio::test]
async fn launch_assembles_expected_argv_and_env() {
	init_tracing();
	let dir = tempfile::tempdir().unwrap();
	let pipes = pipe::create_pair(dir.path(), pipe::DEFAULT_POLL_INTERVAL).unwrap();
	let dump_path = dir.path().join("argv-dump.txt");

	let mut environment = HashMap::new();
	environment.insert("KPL_MOCK_SCENARIO".to_string(), "dump-argv".to_string());
	environment.insert("KPL_MOCK_DUMP_PATH".to_string(), dump_path.to_string_lossy().into_owned());
	environment.insert("KPL_MOCK_EXTRA_ENV_PROBE".to_string(), "hello-child".to_string());

	let handler = Arc::new(RecordingHandler::default());
	let config = Configuration::builder()
		.settings(Settings {
			executable: mock_child_path(),
			working_directory: dir.path().to_path_buf(),
			environment,
			credentials_refresh_delay: Duration::from_secs(3600),
			receive_buffer_capacity: codec::MAX_FRAME_SIZE,
			pipe_visibility_poll_interval: pipe::DEFAULT_POLL_INTERVAL,
			config_proto: vec![0xde, 0xad, 0xbe, 0xef],
		})
		.primary_credentials(Arc::new(StaticCredentials))
		.handler(handler)
		.build();

	let mut launched = child::launch(&config, &pipes.in_pipe, &pipes.out_pipe)
		.await
		.expect("launch mock child");
	let status = launched.child.wait().await.expect("wait for mock child");
	assert!(status.success(), "dump-argv scenario should exit 0, got {status:?}");

	let dump = std::fs::read_to_string(&dump_path).expect("mock child should have written its argv dump");
	let lines: Vec<&str> = dump.lines().collect();

	assert_eq!(lines[0], "arg:-o");
	assert_eq!(lines[1], format!("arg:{}", pipes.out_pipe.display()));
	assert_eq!(lines[2], "arg:-i");
	assert_eq!(lines[3], format!("arg:{}", pipes.in_pipe.display()));
	assert_eq!(lines[4], "arg:-c");
	assert_eq!(lines[5], "arg:DEADBEEF");

	assert_eq!(lines[6], "arg:-k");
	let primary_msg = SetCredentials {
		credentials: Credentials {
			access_key_id: "AKIDEXAMPLE".to_string(),
			secret_key: "examplesecret".to_string(),
			session_token: None,
		},
		for_metrics: false,
	}
	.to_message();
	assert_eq!(lines[7], format!("arg:{}", hex::encode_upper(primary_msg.as_bytes())));

	assert_eq!(lines[8], "arg:-w");
	let metrics_msg = SetCredentials {
		credentials: Credentials {
			access_key_id: "AKIDEXAMPLE".to_string(),
			secret_key: "examplesecret".to_string(),
			session_token: None,
		},
		for_metrics: true,
	}
	.to_message();
	assert_eq!(lines[9], format!("arg:{}", hex::encode_upper(metrics_msg.as_bytes())));

	assert_eq!(lines[10], "arg:-t");
	assert!(
		lines.contains(&"env:KPL_MOCK_EXTRA_ENV_PROBE=hello-child"),
		"child should have inherited the environment override: {lines:?}"
	);
}
