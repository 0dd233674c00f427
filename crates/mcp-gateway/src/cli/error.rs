//! User-friendly error formatting for CLI startup failures.
//!
//! Plain-text rather than the teacher's `colored`-based rendering — the
//! gateway runs as a long-lived daemon, so only the startup-failure path
//! ever reaches a terminal, and `colored` isn't otherwise pulled in.

use crate::error::GatewayError;

/// Format an error for CLI display.
#[must_use]
pub fn format_error(error: &GatewayError) -> String {
    match error {
        GatewayError::Config { message, key } => format!(
            "Configuration error\n  {message}{}\n\nSuggestion:\n  Check the mcpServers config file and GATEWAY_* environment variables",
            key.as_ref().map(|k| format!(" (key: {k})")).unwrap_or_default()
        ),
        GatewayError::TransportStartup { upstream, message } => format!(
            "Failed to start upstream '{upstream}'\n  {message}\n\nSuggestion:\n  Check that the upstream command or URL is correct and reachable"
        ),
        GatewayError::Io(err) => format!(
            "I/O error\n  {err}\n\nSuggestion:\n  Check that the configured host/port is free and file paths are readable"
        ),
        other => format!("Startup error\n  {other}"),
    }
}

/// Display an error to stderr and return the process exit code.
#[must_use]
pub fn display_error(error: &GatewayError) -> i32 {
    eprintln!("{}", format_error(error));
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_names_the_key() {
        let err = GatewayError::config_with_key("bad name", "name");
        let formatted = format_error(&err);
        assert!(formatted.contains("key: name"));
    }

    #[test]
    fn transport_startup_names_the_upstream() {
        let err = GatewayError::transport_startup("alpha", "spawn failed");
        let formatted = format_error(&err);
        assert!(formatted.contains("alpha"));
    }
}
