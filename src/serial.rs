//! Serial control port for snapshot triggers.
//!
//! The video server reads single command bytes from a serial device (an
//! Arduino, a foot switch, a test harness). The port is opened in blocking
//! mode with a short read timeout so the reader thread can notice shutdown.
//!
//! # Example
//!
//! ```no_run
//! use media_relay::serial::{open_control_port, SerialConfig};
//!
//! let port = open_control_port(&SerialConfig::new("/dev/ttyACM0", 115200))?;
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! # Listing Available Ports
//!
//! ```no_run
//! use media_relay::serial::list_ports;
//!
//! for port in list_ports()? {
//!     println!("{} - {:?}", port.name, port.port_type);
//! }
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{Context, Result};
use std::time::Duration;

/// Default baud rate of the control port.
pub const DEFAULT_BAUD: u32 = 115200;

/// Serial port configuration.
///
/// Use [`SerialConfig::new`] for common defaults (8 data bits, no parity,
/// 1 stop bit, 100 ms read timeout).
#[derive(Clone, Debug)]
pub struct SerialConfig {
    /// Port name (e.g., "/dev/ttyUSB0" on Linux, "COM3" on Windows)
    pub port: String,
    /// Baud rate (e.g., 9600, 115200)
    pub baud_rate: u32,
    /// Number of data bits per character
    pub data_bits: DataBits,
    /// Parity checking mode
    pub parity: Parity,
    /// Number of stop bits
    pub stop_bits: StopBits,
    /// Read timeout
    pub timeout: Duration,
}

impl SerialConfig {
    /// Create a new config with common defaults (8N1).
    pub fn new(port: &str, baud_rate: u32) -> Self {
        Self {
            port: port.to_string(),
            baud_rate,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            timeout: Duration::from_millis(100),
        }
    }
}

/// Number of data bits per character.
#[derive(Clone, Copy, Debug, Default)]
pub enum DataBits {
    Seven,
    #[default]
    Eight,
}

impl From<DataBits> for serialport::DataBits {
    fn from(db: DataBits) -> Self {
        match db {
            DataBits::Seven => serialport::DataBits::Seven,
            DataBits::Eight => serialport::DataBits::Eight,
        }
    }
}

/// Parity checking mode.
#[derive(Clone, Copy, Debug, Default)]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

impl From<Parity> for serialport::Parity {
    fn from(p: Parity) -> Self {
        match p {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        }
    }
}

/// Number of stop bits.
#[derive(Clone, Copy, Debug, Default)]
pub enum StopBits {
    #[default]
    One,
    Two,
}

impl From<StopBits> for serialport::StopBits {
    fn from(sb: StopBits) -> Self {
        match sb {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        }
    }
}

/// Open the control port for reading trigger bytes.
///
/// The returned port implements [`std::io::Read`]; timeouts surface as
/// `ErrorKind::TimedOut`.
pub fn open_control_port(config: &SerialConfig) -> Result<Box<dyn serialport::SerialPort>> {
    let port = serialport::new(&config.port, config.baud_rate)
        .data_bits(config.data_bits.into())
        .parity(config.parity.into())
        .stop_bits(config.stop_bits.into())
        .timeout(config.timeout)
        .open()
        .with_context(|| format!("Failed to open serial port {}", config.port))?;

    // Bytes sent before we were listening are not requests for this run.
    if let Err(e) = port.clear(serialport::ClearBuffer::Input) {
        tracing::warn!("Failed to clear serial input buffer: {}", e);
    }

    tracing::info!(
        "Opened serial control port {} at {} baud",
        config.port,
        config.baud_rate
    );
    Ok(port)
}

/// List available serial ports.
pub fn list_ports() -> Result<Vec<SerialPortInfo>> {
    let ports = serialport::available_ports()?;
    Ok(ports
        .into_iter()
        .map(|p| SerialPortInfo {
            name: p.port_name,
            port_type: match p.port_type {
                serialport::SerialPortType::UsbPort(info) => PortType::Usb {
                    vid: info.vid,
                    pid: info.pid,
                    manufacturer: info.manufacturer,
                    product: info.product,
                },
                serialport::SerialPortType::PciPort => PortType::Pci,
                serialport::SerialPortType::BluetoothPort => PortType::Bluetooth,
                serialport::SerialPortType::Unknown => PortType::Unknown,
            },
        })
        .collect())
}

/// Information about a detected serial port.
#[derive(Clone, Debug)]
pub struct SerialPortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" on Linux, "COM3" on Windows)
    pub name: String,
    /// Type of port (USB, PCI, Bluetooth, etc.)
    pub port_type: PortType,
}

/// Type of serial port hardware.
#[derive(Clone, Debug)]
pub enum PortType {
    /// USB serial adapter
    Usb {
        vid: u16,
        pid: u16,
        manufacturer: Option<String>,
        product: Option<String>,
    },
    Pci,
    Bluetooth,
    Unknown,
}
