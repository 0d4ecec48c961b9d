//! Serial port scanner
//!
//! This module provides serial port enumeration for callers that need to
//! pick a port before probing.

use serde::Serialize;
use serialport::{available_ports, SerialPortType};
use tracing::info;

use crate::error::DetectError;

/// Information about a serial port
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SerialPortInfo {
    /// Device path used to open the port (e.g., /dev/ttyUSB0, COM3)
    pub device: String,
    /// Short name (last path component)
    pub name: String,
    /// Human-readable description
    pub description: String,
}

impl SerialPortInfo {
    /// Create from serialport crate's port info
    fn from_serialport(device: String, port_type: &SerialPortType) -> Self {
        let name = device
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(device.as_str())
            .to_string();

        let description = match port_type {
            SerialPortType::UsbPort(usb) => match (&usb.manufacturer, &usb.product) {
                (_, Some(product)) => product.clone(),
                (Some(manufacturer), None) => format!("{} USB serial", manufacturer),
                (None, None) => format!("USB serial {:04x}:{:04x}", usb.vid, usb.pid),
            },
            SerialPortType::PciPort => "PCI serial port".to_string(),
            SerialPortType::BluetoothPort => "Bluetooth serial port".to_string(),
            SerialPortType::Unknown => "n/a".to_string(),
        };

        Self {
            device,
            name,
            description,
        }
    }
}

/// Serial port scanner configuration
#[derive(Debug, Clone, Default)]
pub struct ScannerConfig {
    /// Skip ports matching these patterns
    pub skip_patterns: Vec<String>,
}

/// Serial port scanner
pub struct PortScanner {
    config: ScannerConfig,
}

impl PortScanner {
    /// Create a new scanner with default configuration
    pub fn new() -> Self {
        Self {
            config: ScannerConfig {
                skip_patterns: vec![
                    // Bluetooth ports on macOS
                    "Bluetooth".to_string(),
                    // Debug/logging ports
                    "debug".to_string(),
                ],
            },
        }
    }

    /// Create a scanner with custom configuration
    pub fn with_config(config: ScannerConfig) -> Self {
        Self { config }
    }

    /// Enumerate all available serial ports
    pub fn enumerate_ports(&self) -> Result<Vec<SerialPortInfo>, DetectError> {
        info!("Enumerating serial ports...");
        let ports = available_ports().map_err(|e| DetectError::EnumerationFailed(e.to_string()))?;

        let result: Vec<_> = ports
            .into_iter()
            .map(|p| SerialPortInfo::from_serialport(p.port_name, &p.port_type))
            .filter(|p| !self.should_skip_port(p))
            .collect();

        if result.is_empty() {
            info!("No serial ports found");
        } else {
            info!("Found {} serial port(s)", result.len());
            for port in &result {
                info!("  {} - {}", port.device, port.description);
            }
        }

        Ok(result)
    }

    /// Check if a port should be skipped
    fn should_skip_port(&self, port: &SerialPortInfo) -> bool {
        self.config
            .skip_patterns
            .iter()
            .any(|pattern| port.device.contains(pattern.as_str()))
    }
}

impl Default for PortScanner {
    fn default() -> Self {
        Self::new()
    }
}
