//! Command dispatch.
//!
//! The joined positional tokens are tested against a fixed, ordered table of
//! regular expressions. Every pattern that matches runs, in table order, one
//! after the other; a failing command is reported and the next one still runs.

pub mod flash;
pub mod util;

pub use flash::*;
pub use util::*;

use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;

use crate::cli::{CommandLine, Flags};
use crate::error::{self, AutoflashError};
use crate::esptool::FlashTool;
use crate::serial::{PortEnumerator, PortSelector};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Erase,
    Upload,
    Download,
    Devices,
    Device,
    Help,
}

struct CommandSpec {
    kind: CommandKind,
    pattern: Regex,
}

static COMMANDS: LazyLock<Vec<CommandSpec>> = LazyLock::new(|| {
    [
        (CommandKind::Erase, r"erase"),
        // ASCII word characters and boundaries only
        (CommandKind::Upload, r"upload ((?-u:[\w.-/])+)"),
        (CommandKind::Download, r"download(?-u:\b) *((?-u:[\w.-/])*)"),
        (CommandKind::Devices, r"devices"),
        (CommandKind::Device, r"device"),
        (CommandKind::Help, r"help"),
    ]
    .into_iter()
    .map(|(kind, pattern)| CommandSpec {
        kind,
        pattern: Regex::new(pattern).expect("command patterns are valid"),
    })
    .collect()
});

/// A table entry that matched, with its capture groups in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Matched {
    pub kind: CommandKind,
    pub params: Vec<String>,
}

/// All table entries matching `command`, in table order.
pub fn match_commands(command: &str) -> Vec<Matched> {
    COMMANDS
        .iter()
        .filter_map(|spec| {
            let caps = spec.pattern.captures(command)?;
            // Optional groups that did not participate capture ""
            let params = caps
                .iter()
                .skip(1)
                .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
                .collect();
            Some(Matched { kind: spec.kind, params })
        })
        .collect()
}

/// Outcome of one handler run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Executed {
    pub kind: CommandKind,
    pub succeeded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    Help,
    Version,
    Commands(Vec<Executed>),
}

/// Everything a handler needs to reach the outside world.
pub struct Session<E, T> {
    ports: PortSelector<E>,
    tool: T,
}

impl<E: PortEnumerator, T: FlashTool> Session<E, T> {
    pub fn new(ports: PortSelector<E>, tool: T) -> Self {
        Self { ports, tool }
    }

    /// Run the command line. Only an unmatched command is returned as an error;
    /// handler failures are presented as they happen.
    pub async fn dispatch(&self, line: &CommandLine) -> Result<Dispatched, AutoflashError> {
        if line.help {
            cmd_help();
            return Ok(Dispatched::Help);
        }
        if line.version {
            println!("{}", env!("CARGO_PKG_VERSION"));
            return Ok(Dispatched::Version);
        }

        let command = line.command_string();
        let matched = match_commands(&command);
        let kinds: Vec<CommandKind> = matched.iter().map(|m| m.kind).collect();
        tracing::debug!(%command, ?kinds, "matched commands");
        if matched.is_empty() {
            return Err(AutoflashError::UnsupportedCommand);
        }

        let mut executed = Vec::with_capacity(matched.len());
        for Matched { kind, params } in matched {
            let result = self.execute(kind, &params, &line.flags, line.verbose).await;
            if let Err(e) = &result {
                error::present(e);
            }
            executed.push(Executed { kind, succeeded: result.is_ok() });
        }

        Ok(Dispatched::Commands(executed))
    }

    async fn execute(
        &self,
        kind: CommandKind,
        params: &[String],
        flags: &Flags,
        verbose: bool,
    ) -> Result<()> {
        let first = params.first().map(String::as_str).unwrap_or_default();
        match kind {
            CommandKind::Erase => cmd_erase(&self.ports, &self.tool, flags, verbose).await,
            CommandKind::Upload => cmd_upload(&self.ports, &self.tool, first, flags, verbose).await,
            CommandKind::Download => {
                cmd_download(&self.ports, &self.tool, first, flags, verbose).await
            }
            CommandKind::Devices => cmd_devices(&self.ports).await,
            CommandKind::Device => cmd_device(&self.ports).await,
            CommandKind::Help => {
                cmd_help();
                Ok(())
            }
        }
    }
}
