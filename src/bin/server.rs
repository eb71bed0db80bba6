//! Aurora reply server binary.
//! Run with: cargo run --bin aurora-server

use std::process::ExitCode;

use aurora_chat::start_reply_server;

fn main() -> ExitCode {
    start_reply_server::run()
}
