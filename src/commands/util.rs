//! Utility commands

use anyhow::Result;

use crate::serial::{PortEnumerator, PortSelector};

/// List every connected serial port
pub async fn cmd_devices<E: PortEnumerator>(ports: &PortSelector<E>) -> Result<()> {
    for port in ports.list_ports().await? {
        println!("{port}");
    }
    Ok(())
}

/// Show the port that would be picked automatically
pub async fn cmd_device<E: PortEnumerator>(ports: &PortSelector<E>) -> Result<()> {
    println!("{}", ports.select_port(None).await?);
    Ok(())
}

pub fn cmd_help() {
    println!("{}", usage());
}

fn usage() -> String {
    format!(
        "Autoflash {version}. A CLI to easily create and upload backups to and from ESP8266.

Usage:
  autoflash <command> <flags>

Commands:
  erase [--port=<auto>]
  upload file.afl [--port=<auto>]
  download [backup.afl] [--port=<auto>] [--chipSize=4]

  devices  Shows all connected serial devices
  device   Shows the automatically selected device
  help     Shows this screen

Options:
  -h --help            Show this screen
  -p --port <path>     Specify the port on which to perform the action
                         If not manually specified, one will automatically be selected.
                         Default port can be viewed with 'autoflash device'
  --chipSize <MB>      Size of the flash chip read by 'download', may be fractional [default: 4]
  --esptool <path>     Path to esptool.py [env: AUTOFLASH_ESPTOOL]
  -v --verbose         Execute verbosely, printing everything esptool prints
  -V --version         Displays the version number
",
        version = env!("CARGO_PKG_VERSION")
    )
}
