//! Driving esptool.py as a subprocess.
//!
//! All ESP8266 bootloader work happens inside esptool; this module only
//! assembles its command line, starts it and optionally streams its output.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;

use crate::error::AutoflashError;

/// Baud rate used when reading flash back from the chip.
pub const READ_BAUD: u32 = 115200;
/// Baud rate used for erasing and writing.
pub const WRITE_BAUD: u32 = 921600;

const BUNDLED_DIR: &str = "esptool";
const CANDIDATES: &[&str] = &["esptool.py", "esptool"];

/// Arguments for `erase_flash`.
pub fn erase_args(port: &str) -> Vec<String> {
    vec![
        format!("--port={port}"),
        format!("--baud={WRITE_BAUD}"),
        "erase_flash".into(),
    ]
}

/// Arguments for writing `filename` at address 0.
pub fn upload_args(port: &str, filename: &str) -> Vec<String> {
    vec![
        format!("--port={port}"),
        format!("--baud={WRITE_BAUD}"),
        "write_flash".into(),
        "0".into(),
        filename.into(),
    ]
}

/// Arguments for reading the whole chip (`chip_size_mb` megabytes) into `filename`.
/// Fractional sizes are rounded down to whole bytes.
pub fn download_args(port: &str, chip_size_mb: f64, filename: &str) -> Vec<String> {
    // `as` saturates, so negative sizes read nothing
    let read_until = (chip_size_mb * 1024.0 * 1024.0).floor() as u64;
    vec![
        format!("--port={port}"),
        format!("--baud={READ_BAUD}"),
        "read_flash".into(),
        "0".into(),
        read_until.to_string(),
        filename.into(),
    ]
}

/// Something that can run the flashing tool with a prepared argument list.
pub trait FlashTool {
    /// Run to completion. `Ok(None)` means the tool ended without an exit code
    /// (killed by a signal).
    async fn run(&self, args: &[String], verbose: bool) -> Result<Option<i32>, AutoflashError>;
}

/// The real esptool executable.
#[derive(Debug, Clone)]
pub struct Esptool {
    path: PathBuf,
}

impl Esptool {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Use `explicit` if given, otherwise look for a bundled copy next to the
    /// binary, then on `PATH`.
    pub fn locate(explicit: Option<PathBuf>) -> Self {
        if let Some(path) = explicit {
            return Self::new(path);
        }

        let bundled = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join(BUNDLED_DIR).join("esptool.py")))
            .filter(|path| path.is_file());

        let path = bundled
            .or_else(|| {
                let dirs = std::env::var_os("PATH")?;
                find_in_dirs(std::env::split_paths(&dirs), CANDIDATES)
            })
            .unwrap_or_else(|| PathBuf::from(CANDIDATES[0]));

        Self::new(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn spawn_error(&self, source: std::io::Error) -> AutoflashError {
        AutoflashError::Spawn { tool: self.path.display().to_string(), source }
    }
}

impl FlashTool for Esptool {
    async fn run(&self, args: &[String], verbose: bool) -> Result<Option<i32>, AutoflashError> {
        tracing::debug!(tool = %self.path.display(), ?args, "spawning");

        let output = || if verbose { Stdio::piped() } else { Stdio::null() };
        let mut child = Command::new(&self.path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(output())
            .stderr(output())
            .spawn()
            .map_err(|source| self.spawn_error(source))?;

        let status = if verbose {
            let stdout = child.stdout.take();
            let stderr = child.stderr.take();
            let (status, out, err) = tokio::join!(
                child.wait(),
                forward(stdout, tokio::io::stdout()),
                forward(stderr, tokio::io::stderr()),
            );
            if let Err(e) = out.and(err) {
                tracing::warn!("failed to read esptool output: {e}");
            }
            status
        } else {
            child.wait().await
        };

        let status = status.map_err(|source| self.spawn_error(source))?;
        tracing::debug!(%status, "esptool exited");
        Ok(status.code())
    }
}

/// First `candidates` entry present in any of `dirs`, searched dir by dir.
fn find_in_dirs<I>(dirs: I, candidates: &[&str]) -> Option<PathBuf>
where
    I: IntoIterator<Item = PathBuf>,
{
    for dir in dirs {
        for name in candidates {
            let path = dir.join(name);
            if path.is_file() {
                return Some(path);
            }
            if cfg!(windows) {
                let exe = path.with_extension("exe");
                if exe.is_file() {
                    return Some(exe);
                }
            }
        }
    }
    None
}

/// Copy `reader` to `sink` as text, flushing after every chunk.
///
/// The child's pipe is always read to EOF. Once `sink` fails, later output is
/// discarded so a closed console never stalls or kills the child.
async fn forward<R, W>(reader: Option<R>, mut sink: W) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let Some(mut reader) = reader else {
        return Ok(());
    };

    let mut decoder = Utf8Decoder::default();
    let mut buf = [0u8; 1024];
    let mut sink_open = true;
    loop {
        let n = reader.read(&mut buf).await?;
        if sink_open {
            let text = if n == 0 { decoder.finish() } else { decoder.decode(&buf[..n]) };
            if !text.is_empty() {
                if let Err(e) = write_chunk(&mut sink, &text).await {
                    tracing::warn!("esptool output is no longer shown: {e}");
                    sink_open = false;
                }
            }
        }
        if n == 0 {
            return Ok(());
        }
    }
}

async fn write_chunk<W: AsyncWrite + Unpin>(sink: &mut W, text: &str) -> std::io::Result<()> {
    sink.write_all(text.as_bytes()).await?;
    sink.flush().await
}

/// Incremental UTF-8 decoding that tolerates sequences split across reads.
#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);

        let mut text = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(valid) => {
                    text.push_str(valid);
                    self.pending.clear();
                    return text;
                }
                Err(e) => {
                    let (valid, rest) = self.pending.split_at(e.valid_up_to());
                    text.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        // Incomplete sequence at the end, wait for more bytes
                        None => {
                            self.pending = rest.to_vec();
                            return text;
                        }
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            self.pending = rest[len..].to_vec();
                        }
                    }
                }
            }
        }
    }

    fn finish(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_erase_args() {
        assert_eq!(
            erase_args("/dev/ttyUSB0"),
            strings(&["--port=/dev/ttyUSB0", "--baud=921600", "erase_flash"])
        );
    }

    #[test]
    fn test_upload_args() {
        assert_eq!(
            upload_args("/dev/ttyUSB0", "test.afl"),
            strings(&["--port=/dev/ttyUSB0", "--baud=921600", "write_flash", "0", "test.afl"])
        );
    }

    #[test]
    fn test_download_args() {
        assert_eq!(
            download_args("COM3", 2.0, "backup2.afl"),
            strings(&["--port=COM3", "--baud=115200", "read_flash", "0", "2097152", "backup2.afl"])
        );
        assert_eq!(download_args("COM3", 4.0, "b.afl")[4], "4194304");
    }

    #[test]
    fn test_download_args_fractional_size() {
        assert_eq!(download_args("COM3", 0.5, "half.afl")[4], "524288");
        assert_eq!(download_args("COM3", 0.3, "odd.afl")[4], "314572");
    }

    #[test]
    fn test_decoder_passes_ascii_through() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.decode(b"Connecting...\n"), "Connecting...\n");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn test_decoder_joins_split_sequences() {
        let bytes = "Wrote 100% ✓\n".as_bytes();
        let split = bytes.len() - 3;
        let mut decoder = Utf8Decoder::default();
        let mut text = decoder.decode(&bytes[..split]);
        assert_eq!(text, "Wrote 100% ");
        text.push_str(&decoder.decode(&bytes[split..]));
        assert_eq!(text, "Wrote 100% ✓\n");
    }

    #[test]
    fn test_decoder_replaces_invalid_bytes() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.decode(b"a\xffb"), "a\u{fffd}b");
        assert_eq!(decoder.decode(b"c\xe2\x9c"), "c");
        assert_eq!(decoder.finish(), "\u{fffd}");
    }

    #[tokio::test]
    async fn test_forward_copies_everything() {
        let mut sink = Vec::new();
        forward(Some(&b"hello\nworld"[..]), &mut sink).await.unwrap();
        assert_eq!(sink, b"hello\nworld");

        let mut sink = Vec::new();
        forward(None::<&[u8]>, &mut sink).await.unwrap();
        assert!(sink.is_empty());
    }

    #[test]
    fn test_find_in_dirs() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        std::fs::write(second.path().join("esptool"), b"").unwrap();

        let dirs = vec![first.path().to_path_buf(), second.path().to_path_buf()];
        assert_eq!(
            find_in_dirs(dirs.clone(), CANDIDATES),
            Some(second.path().join("esptool"))
        );

        std::fs::write(first.path().join("esptool.py"), b"").unwrap();
        assert_eq!(
            find_in_dirs(dirs, CANDIDATES),
            Some(first.path().join("esptool.py"))
        );
    }

    #[test]
    fn test_locate_prefers_explicit_path() {
        let tool = Esptool::locate(Some(PathBuf::from("/opt/esptool/esptool.py")));
        assert_eq!(tool.path(), Path::new("/opt/esptool/esptool.py"));
    }

    #[tokio::test]
    async fn test_missing_executable_is_spawn_error() {
        let tool = Esptool::new("/nonexistent/autoflash-test/esptool.py");
        let result = tool.run(&erase_args("COM1"), false).await;
        assert!(matches!(result, Err(AutoflashError::Spawn { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_code_is_reported() {
        let tool = Esptool::new("sh");
        let code = tool.run(&strings(&["-c", "exit 3"]), false).await.unwrap();
        assert_eq!(code, Some(3));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_verbose_run_streams_and_exits() {
        let tool = Esptool::new("sh");
        let code = tool
            .run(&strings(&["-c", "echo out; echo err >&2"]), true)
            .await
            .unwrap();
        assert_eq!(code, Some(0));
    }

    /// Sink that rejects every write, like stdout piped into a finished `head`.
    struct ClosedSink;

    impl AsyncWrite for ClosedSink {
        fn poll_write(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            _buf: &[u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            std::task::Poll::Ready(Err(std::io::ErrorKind::BrokenPipe.into()))
        }

        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_forward_keeps_reading_after_sink_fails() {
        let input = "line\n".repeat(5000);
        forward(Some(input.as_bytes()), ClosedSink).await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_closed_console_does_not_kill_child() {
        let script = "echo first; sleep 0.3; i=0; \
            while [ $i -lt 2000 ]; do echo \"writing at 0x$i\"; i=$((i+1)); done; exit 0";
        let mut child = Command::new("sh")
            .args(["-c", script])
            .stdout(Stdio::piped())
            .spawn()
            .unwrap();
        let stdout = child.stdout.take();

        let (status, forwarded) = tokio::join!(child.wait(), forward(stdout, ClosedSink));

        assert!(forwarded.is_ok());
        assert_eq!(status.unwrap().code(), Some(0));
    }
}
