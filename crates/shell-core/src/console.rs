use tracing::{error, info, warn};

/// User-facing reporter injected into components that print.
///
/// Output is purely observational; nothing reads back what was printed.
pub trait Console: Send + Sync {
    fn print_status(&self, message: &str);
    fn print_info(&self, message: &str);
    fn print_note(&self, message: &str);
    fn print_warning(&self, message: &str);
    fn print_error(&self, message: &str);
}

/// Console that forwards everything to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingConsole;

impl Console for TracingConsole {
    fn print_status(&self, message: &str) {
        info!("{message}");
    }

    fn print_info(&self, message: &str) {
        info!("{message}");
    }

    fn print_note(&self, message: &str) {
        info!("NOTE: {message}");
    }

    fn print_warning(&self, message: &str) {
        warn!("WARNING: {message}");
    }

    fn print_error(&self, message: &str) {
        error!("ERROR: {message}");
    }
}
