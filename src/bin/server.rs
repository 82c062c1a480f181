//! Stub exchange server for local development.
//! Run with: cargo run --bin converse-stub-server

use std::process::ExitCode;

use converse_engine::start_converse;

fn main() -> ExitCode {
    start_converse::run_stub_server()
}
