//! Binary entrypoint for the RAG console.

use std::process::ExitCode;

use rag_console::start_rag_console;

/// Run the interactive console against the configured backend.
fn main() -> ExitCode {
    start_rag_console::run()
}
