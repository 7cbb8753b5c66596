//! Error kinds and the single place they are turned into console output.

use std::io::Write;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AutoflashError {
    #[error("unsupported command")]
    UnsupportedCommand,

    #[error("no port found")]
    NoPortFound,

    #[error("OS not yet supported ({0})")]
    UnsupportedPlatform(String),

    /// The flashing tool could not be started or waited on.
    #[error("failed to run {tool}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to enumerate serial ports")]
    Enumerate(#[from] serialport::Error),
}

impl AutoflashError {
    /// Fixed remediation text for the kinds a user can fix themselves.
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            Self::UnsupportedCommand => Some(
                "Command unknown. Please check 'autoflash --help' for instructions on how to use this tool.",
            ),
            Self::NoPortFound => Some(
                "Couldn't find a port to select. Please specify it manually using the --port flag",
            ),
            _ => None,
        }
    }
}

/// Render the user-facing message for an error, without the trailing separator.
pub fn render(error: &anyhow::Error) -> String {
    match error
        .downcast_ref::<AutoflashError>()
        .and_then(AutoflashError::remediation)
    {
        Some(text) => format!("Error: {text}"),
        None => format!("Error: {error:#}"),
    }
}

/// Print an error to stderr followed by a blank line on stdout. Never fails.
pub fn present(error: &anyhow::Error) {
    present_to(error, &mut std::io::stdout(), &mut std::io::stderr());
}

/// Write the message to `err` and one blank separator line to `out`.
/// Write failures are ignored; there is nowhere left to report them.
pub fn present_to(error: &anyhow::Error, out: &mut impl Write, err: &mut impl Write) {
    tracing::debug!(?error, "presenting error");
    let _ = writeln!(err, "{}", render(error));
    let _ = writeln!(out);
}
