//! CLI argument definitions using clap

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "autoflash")]
#[command(about = "Create and upload backups to and from ESP8266", long_about = None)]
// -h and -V are ordinary flags so they can short-circuit command dispatch
#[command(disable_help_flag = true, disable_version_flag = true)]
pub struct Cli {
    /// Command to run, e.g. `upload firmware.afl`
    pub command: Vec<String>,

    /// Serial port (e.g., /dev/ttyUSB0 on Linux, COM3 on Windows).
    /// Selected automatically when omitted
    #[arg(short, long)]
    pub port: Option<String>,

    /// Flash chip size in MB, used by `download`. Fractions such as 0.5 are allowed
    #[arg(long = "chipSize", visible_alias = "chip-size", default_value_t = 4.0)]
    pub chip_size: f64,

    /// Print everything esptool prints
    #[arg(short, long)]
    pub verbose: bool,

    /// Show usage
    #[arg(short, long)]
    pub help: bool,

    /// Show the version number
    #[arg(short = 'V', long)]
    pub version: bool,

    /// Path to esptool.py
    #[arg(long, env = "AUTOFLASH_ESPTOOL")]
    pub esptool: Option<PathBuf>,
}

/// Flags handed to every command handler.
#[derive(Debug, Clone, PartialEq)]
pub struct Flags {
    pub port: Option<String>,
    pub chip_size: f64,
}

impl Default for Flags {
    fn default() -> Self {
        Self { port: None, chip_size: 4.0 }
    }
}

/// One parsed invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandLine {
    pub tokens: Vec<String>,
    pub flags: Flags,
    pub verbose: bool,
    pub help: bool,
    pub version: bool,
}

impl CommandLine {
    /// The positional tokens joined with single spaces.
    pub fn command_string(&self) -> String {
        self.tokens.join(" ")
    }
}

impl From<&Cli> for CommandLine {
    fn from(cli: &Cli) -> Self {
        Self {
            tokens: cli.command.clone(),
            flags: Flags {
                port: cli.port.clone().filter(|p| !p.is_empty()),
                chip_size: cli.chip_size,
            },
            verbose: cli.verbose,
            help: cli.help,
            version: cli.version,
        }
    }
}
