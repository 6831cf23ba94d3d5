//! Log filter selection for the CLI frontends.
//!
//! Precedence: an explicit `--log-filter` beats `-v`/`-vv`, which beat
//! `RUST_LOG`, which beats the default.

pub const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoggingOptions {
    /// Count of `-v` flags: 1 = debug, 2+ = trace.
    pub verbose: u8,
    /// Explicit tracing filter from the command line.
    pub cli_log_filter: Option<String>,
    /// Value of the RUST_LOG environment variable, if set.
    pub rust_log_env: Option<String>,
}

pub fn select_log_filter(options: &LoggingOptions) -> String {
    if let Some(filter) = options.cli_log_filter.as_deref() {
        filter.to_string()
    } else if options.verbose >= 2 {
        "trace".to_string()
    } else if options.verbose == 1 {
        "debug".to_string()
    } else if let Some(filter) = options.rust_log_env.as_deref() {
        filter.to_string()
    } else {
        DEFAULT_LOG_FILTER.to_string()
    }
}
