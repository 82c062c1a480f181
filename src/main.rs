//! Binary entrypoint for the interactive converse client.

use std::process::ExitCode;

use converse_engine::start_converse;

/// Chat with the configured assistant endpoint over stdin/stdout.
fn main() -> ExitCode {
    start_converse::run_client()
}
