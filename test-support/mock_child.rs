//! Minimal stand-in for the native child binary, driven by integration tests through the
//! `KPL_MOCK_SCENARIO` environment variable.
//!
//! Understands the same command-line contract the supervisor's Child Launcher emits (`-o`, `-i`,
//! `-c`, `-k`, `-w`, `-t`) but does not interpret `-c`/`-k`/`-w` beyond accepting them — this
//! binary only exists to drive the end-to-end scenarios in `tests/supervisor.rs`.

use std::env;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use kpl_supervisor::codec;

fn main() {
	let args: Vec<String> = env::args().collect();
	let mut out_pipe = None;
	let mut in_pipe = None;

	let mut i = 1;
	while i < args.len() {
		match args[i].as_str() {
			"-o" => {
				out_pipe = Some(PathBuf::from(&args[i + 1]));
				i += 2;
			}
			"-i" => {
				in_pipe = Some(PathBuf::from(&args[i + 1]));
				i += 2;
			}
			"-c" | "-k" | "-w" => i += 2,
			"-t" => i += 1,
			_ => i += 1,
		}
	}

	let out_pipe = out_pipe.expect("mock child requires -o <out-pipe>");
	let in_pipe = in_pipe.expect("mock child requires -i <in-pipe>");
	let scenario = env::var("KPL_MOCK_SCENARIO").unwrap_or_else(|_| "echo".to_string());

	match scenario.as_str() {
		"echo" => run_echo(&out_pipe, &in_pipe),
		"oversize" => run_oversize(&out_pipe, &in_pipe),
		"premature-eof" => run_premature_eof(&out_pipe, &in_pipe),
		"exit1" => run_exit(&out_pipe, &in_pipe, 1),
		"exit2" => run_exit(&out_pipe, &in_pipe, 2),
		"dump-argv" => run_dump_argv(&args),
		other => {
			eprintln!("kpl-mock-child: unknown KPL_MOCK_SCENARIO {other}");
			std::process::exit(70);
		}
	}
}

/// Records the argv it was launched with (and a probe environment variable) to the file named by
/// `KPL_MOCK_DUMP_PATH`, then exits without touching either pipe — used to assert on what the
/// Child Launcher actually assembles, without needing a peer to open the FIFOs.
fn run_dump_argv(args: &[String]) {
	let dump_path = env::var("KPL_MOCK_DUMP_PATH").expect("dump-argv requires KPL_MOCK_DUMP_PATH");
	let mut file = File::create(&dump_path).expect("mock child: create dump file");
	for arg in &args[1..] {
		writeln!(file, "arg:{arg}").unwrap();
	}
	if let Ok(value) = env::var("KPL_MOCK_EXTRA_ENV_PROBE") {
		writeln!(file, "env:KPL_MOCK_EXTRA_ENV_PROBE={value}").unwrap();
	}
}

/// Echoes every frame it reads back verbatim until its read side hits EOF or a protocol error.
fn run_echo(out_pipe: &PathBuf, in_pipe: &PathBuf) {
	let mut reader_file = File::open(out_pipe).expect("mock child: open out-pipe for read");
	let mut writer_file = File::create(in_pipe).expect("mock child: open in-pipe for write");
	let mut reader = codec::FrameReader::with_capacity(codec::MAX_FRAME_SIZE);
	loop {
		let message = match reader.read_frame(&mut reader_file) {
			Ok(message) => message,
			Err(_) => break,
		};
		if codec::encode(&mut writer_file, &message).is_err() {
			break;
		}
	}
}

/// Writes a single frame header declaring a length beyond the supervisor's receive capacity.
fn run_oversize(out_pipe: &PathBuf, in_pipe: &PathBuf) {
	let _reader_file = File::open(out_pipe).expect("mock child: open out-pipe for read");
	let mut writer_file = File::create(in_pipe).expect("mock child: open in-pipe for write");
	let oversize_len: u32 = 0x0100_0001; // 16 MiB + 1, beyond the 8 MiB default capacity.
	let _ = writer_file.write_all(&oversize_len.to_be_bytes());
	let _ = writer_file.flush();
}

/// Announces a 4-byte frame but only ever supplies 3, then closes its write side.
fn run_premature_eof(out_pipe: &PathBuf, in_pipe: &PathBuf) {
	let _reader_file = File::open(out_pipe).expect("mock child: open out-pipe for read");
	let mut writer_file = File::create(in_pipe).expect("mock child: open in-pipe for write");
	let _ = writer_file.write_all(&4u32.to_be_bytes());
	let _ = writer_file.write_all(b"abc");
	let _ = writer_file.flush();
	drop(writer_file);
}

/// Opens both pipe ends (so the supervisor's connector unblocks) then exits with `code`.
fn run_exit(out_pipe: &PathBuf, in_pipe: &PathBuf, code: i32) {
	let _reader_file = File::open(out_pipe).expect("mock child: open out-pipe for read");
	let _writer_file = File::create(in_pipe).expect("mock child: open in-pipe for write");
	std::process::exit(code);
}
