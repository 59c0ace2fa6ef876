//! Purpose: Operator tool for inspecting sequence number index files.
//! Role: Binary crate root; parses args, emits JSON lines on stdout.
//! Invariants: Corruption notices go to stderr as JSON; the exit code is
//! derived from `api::to_exit_code`.
use std::cell::RefCell;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::json;

use fixdex::api::{to_exit_code, Error, ErrorKind, ErrorSink, SequenceNumberIndexReader};

#[derive(Parser)]
#[command(name = "fixdex", about = "Inspect sequence number index files")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print every session record and indexed position as JSON lines.
    Dump { path: PathBuf },
    /// Validate sector checksums and report a summary.
    Check { path: PathBuf },
}

#[derive(Default)]
struct StderrSink {
    reported: RefCell<Vec<ErrorKind>>,
}

impl ErrorSink for StderrSink {
    fn on_error(&self, error: Error) {
        self.reported.borrow_mut().push(error.kind());
        eprintln!(
            "{}",
            json!({
                "notice": {
                    "kind": format!("{:?}", error.kind()),
                    "message": error.to_string(),
                }
            })
        );
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!(
                "{}",
                json!({
                    "error": {
                        "kind": format!("{:?}", err.kind()),
                        "message": err.to_string(),
                    }
                })
            );
            ExitCode::from(to_exit_code(err.kind()) as u8)
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode, Error> {
    match cli.command {
        Command::Dump { path } => {
            let sink = StderrSink::default();
            let reader = SequenceNumberIndexReader::open(&path, &sink)?;
            for (session_id, sequence_number) in reader.iter() {
                println!(
                    "{}",
                    json!({
                        "session_id": session_id,
                        "sequence_number": sequence_number,
                    })
                );
            }
            reader.read_last_position(&mut |session, recording, position| {
                println!(
                    "{}",
                    json!({
                        "transport_session_id": session,
                        "recording_id": recording,
                        "position": position,
                    })
                );
            });
            Ok(exit_for(&sink))
        }
        Command::Check { path } => {
            let sink = StderrSink::default();
            let reader = SequenceNumberIndexReader::open(&path, &sink)?;
            let failures = sink
                .reported
                .borrow()
                .iter()
                .filter(|kind| **kind == ErrorKind::ChecksumFailed)
                .count();
            println!(
                "{}",
                json!({
                    "records": reader.iter().count(),
                    "failed_sectors": failures,
                })
            );
            Ok(exit_for(&sink))
        }
    }
}

fn exit_for(sink: &StderrSink) -> ExitCode {
    match sink.reported.borrow().first() {
        Some(kind) => ExitCode::from(to_exit_code(*kind) as u8),
        None => ExitCode::SUCCESS,
    }
}
