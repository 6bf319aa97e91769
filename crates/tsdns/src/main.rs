//! tsdns.
//!
//! tsdns is a small name resolution service. Clients connect over TCP, send a domain key and
//! receive the host, and optionally the port, registered for it. Records are kept in a
//! persistent store and mirrored into memory, which is refreshed in the background.

#![warn(
    missing_docs,
    missing_debug_implementations,
    unused_crate_dependencies,
    clippy::all
)]

mod cli;
mod logging;
mod records;
mod server;
mod shutdown;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
