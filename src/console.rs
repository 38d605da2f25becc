//! Console printing straight to the terminal.

use shell_core::Console;
use tracing::{debug, error, warn};

/// Status and notes on stdout, warnings and errors on stderr.
///
/// Everything is also logged, so `RUST_LOG` captures the whole run.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalConsole;

impl Console for TerminalConsole {
    fn print_status(&self, message: &str) {
        debug!("{message}");
        println!("{message}");
    }

    fn print_info(&self, message: &str) {
        debug!("{message}");
        println!("{message}");
    }

    fn print_note(&self, message: &str) {
        debug!("NOTE: {message}");
        println!("NOTE: {message}");
    }

    fn print_warning(&self, message: &str) {
        warn!("{message}");
        eprintln!("WARNING: {message}");
    }

    fn print_error(&self, message: &str) {
        error!("{message}");
        eprintln!("ERROR: {message}");
    }
}
