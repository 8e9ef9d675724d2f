//! Snapshot diagnostics for status displays and logging.

use serde::{Deserialize, Serialize};

use crate::device::{DeviceHandle, SampleFormat};

/// A point-in-time snapshot of the output subsystem.
///
/// Every field is fixed and typed; consumers render or serialize the record
/// without probing for optional keys. Snapshots are built from
/// configuration frozen at open time plus atomic session state, so
/// capturing one never blocks on, or deadlocks with, an in-flight stop or
/// write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDiagnostics {
    /// Configured frames per second.
    pub sample_rate: u32,
    /// Configured output channel count.
    pub channel_count: u16,
    /// Configured frames per hardware buffer.
    pub chunk_size: u32,
    /// Configured sample encoding.
    pub sample_format: SampleFormat,
    /// Whether the device handle is open.
    pub is_initialized: bool,
    /// Whether a playback session is currently running.
    pub is_playing: bool,
    /// Whether a real platform stream backs the handle.
    pub backend_available: bool,
    /// Platform device name, when a real device was opened.
    pub device_name: Option<String>,
    /// Largest output channel count the platform device reports.
    pub max_output_channels: Option<u16>,
    /// The platform device's default sample rate.
    pub default_sample_rate: Option<u32>,
}

impl DeviceDiagnostics {
    /// Capture a snapshot from a device handle and the session flag.
    pub fn capture(device: &DeviceHandle, is_playing: bool) -> Self {
        let config = device.config();
        let info = device.output_device_info();
        Self {
            sample_rate: config.sample_rate,
            channel_count: config.channel_count,
            chunk_size: config.chunk_size,
            sample_format: config.sample_format,
            is_initialized: device.is_open(),
            is_playing,
            backend_available: device.availability().is_available(),
            device_name: info.map(|info| info.name.clone()),
            max_output_channels: info.map(|info| info.max_output_channels),
            default_sample_rate: info.map(|info| info.default_sample_rate),
        }
    }
}
