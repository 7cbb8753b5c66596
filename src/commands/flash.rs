//! Erase, upload and download commands

use std::path::Path;

use anyhow::Result;

use crate::cli::Flags;
use crate::esptool::{self, FlashTool};
use crate::serial::{PortEnumerator, PortSelector};

const DEFAULT_BACKUP: &str = "backup.afl";

/// Erase the whole flash chip
pub async fn cmd_erase<E: PortEnumerator, T: FlashTool>(
    ports: &PortSelector<E>,
    tool: &T,
    flags: &Flags,
    verbose: bool,
) -> Result<()> {
    let port = ports.select_port(flags.port.as_deref()).await?;

    println!("** erasing on port {port}...");
    let exit_code = tool.run(&esptool::erase_args(&port), verbose).await?;
    report_finished(exit_code);

    Ok(())
}

/// Write `filename` to the chip, starting at address 0
pub async fn cmd_upload<E: PortEnumerator, T: FlashTool>(
    ports: &PortSelector<E>,
    tool: &T,
    filename: &str,
    flags: &Flags,
    verbose: bool,
) -> Result<()> {
    let port = ports.select_port(flags.port.as_deref()).await?;

    println!("** uploading {filename} on port {port}...");
    let exit_code = tool.run(&esptool::upload_args(&port, filename), verbose).await?;
    report_finished(exit_code);

    Ok(())
}

/// Read the whole chip into `filename` (`backup.afl` when empty)
pub async fn cmd_download<E: PortEnumerator, T: FlashTool>(
    ports: &PortSelector<E>,
    tool: &T,
    filename: &str,
    flags: &Flags,
    verbose: bool,
) -> Result<()> {
    let port = ports.select_port(flags.port.as_deref()).await?;
    let filename = backup_filename(filename);

    println!("** downloading from port {port} ...");
    println!("** downloading to {}\n", display_target(Path::new(filename)));

    let args = esptool::download_args(&port, flags.chip_size, filename);
    let exit_code = tool.run(&args, verbose).await?;
    report_finished(exit_code);

    Ok(())
}

fn backup_filename(captured: &str) -> &str {
    if captured.is_empty() {
        DEFAULT_BACKUP
    } else {
        captured
    }
}

/// Where esptool will put a file, relative names resolved against the cwd.
fn display_target(filename: &Path) -> String {
    if filename.is_absolute() {
        return filename.display().to_string();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(filename).display().to_string(),
        Err(_) => filename.display().to_string(),
    }
}

fn report_finished(exit_code: Option<i32>) {
    match exit_code {
        Some(code) => println!("** finished with exit-code {code}"),
        None => println!("** terminated without an exit code"),
    }
}
