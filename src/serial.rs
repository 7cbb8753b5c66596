//! Serial port discovery.
//!
//! Lists the ports the OS knows about and guesses which one is the ESP8266
//! by a per-platform device name prefix.

use crate::error::AutoflashError;

/// Source of serial port names.
pub trait PortEnumerator {
    /// List every connected serial port, in the order the OS reports them.
    async fn list_ports(&self) -> Result<Vec<String>, AutoflashError>;
}

/// Ports reported by the host through `serialport`.
pub struct SystemPorts;

impl PortEnumerator for SystemPorts {
    async fn list_ports(&self) -> Result<Vec<String>, AutoflashError> {
        let ports = serialport::available_ports()?;
        Ok(ports.into_iter().map(|port| port.port_name).collect())
    }
}

/// Host platforms with a known USB-serial naming scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Platform {
    Darwin,
    Linux,
    Win32,
    Unsupported(String),
}

impl Platform {
    /// Platform of the running binary.
    pub fn current() -> Self {
        Self::from_os(std::env::consts::OS)
    }

    /// Map a `std::env::consts::OS` value to a platform.
    pub fn from_os(os: &str) -> Self {
        match os {
            "macos" => Self::Darwin,
            "linux" => Self::Linux,
            "windows" => Self::Win32,
            other => Self::Unsupported(other.to_string()),
        }
    }

    /// Device name prefix the CH340/CP210x adapters show up under.
    pub fn port_prefix(&self) -> Result<&'static str, AutoflashError> {
        match self {
            Self::Darwin => Ok("/dev/tty.wchusbserial"),
            Self::Linux => Ok("/dev/ttyUSB"),
            // Windows gives no hint which COM port is the adapter
            Self::Win32 => Ok("COM"),
            Self::Unsupported(os) => Err(AutoflashError::UnsupportedPlatform(os.clone())),
        }
    }
}

/// Picks the port a command operates on.
pub struct PortSelector<E> {
    platform: Platform,
    enumerator: E,
}

impl<E: PortEnumerator> PortSelector<E> {
    pub fn new(platform: Platform, enumerator: E) -> Self {
        Self { platform, enumerator }
    }

    /// Every connected port, unfiltered.
    pub async fn list_ports(&self) -> Result<Vec<String>, AutoflashError> {
        self.enumerator.list_ports().await
    }

    /// Use `explicit` when given, otherwise the first port matching the
    /// platform prefix. An explicit port is not checked for existence.
    pub async fn select_port(&self, explicit: Option<&str>) -> Result<String, AutoflashError> {
        if let Some(port) = explicit.filter(|p| !p.is_empty()) {
            return Ok(port.to_string());
        }

        let prefix = self.platform.port_prefix()?;
        let ports = self.enumerator.list_ports().await?;
        tracing::debug!(platform = ?self.platform, prefix, ?ports, "auto-selecting port");

        ports
            .into_iter()
            .find(|port| port.starts_with(prefix))
            .ok_or(AutoflashError::NoPortFound)
    }
}
