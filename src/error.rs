//! Error types for device access and playback scheduling.

use std::io;

/// Errors raised while opening, writing to, or closing an output device.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// No usable platform output device at open time.
    ///
    /// This error is recovered locally: the handle falls back to a
    /// simulation backend and stays usable. It is surfaced through
    /// diagnostics (`backend_available == false`) rather than as a hard
    /// failure.
    #[error("Audio output unavailable: {reason}")]
    Unavailable {
        /// Why the platform backend could not be used.
        reason: String,
    },

    /// A synchronous device write did not complete.
    #[error("Device write failed: {reason}")]
    WriteFailed {
        /// Why the write did not complete.
        reason: String,
    },

    /// A configuration field is out of its valid range.
    #[error("Invalid device configuration: {parameter} {reason}")]
    InvalidConfig {
        /// Name of the configuration field that was rejected.
        parameter: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

impl DeviceError {
    /// Create an unavailable-backend error.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    /// Create a write failure error.
    pub fn write_failed(reason: impl Into<String>) -> Self {
        Self::WriteFailed {
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(parameter: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            parameter,
            reason: reason.into(),
        }
    }

    /// Check whether this error is recovered by the simulation fallback.
    pub const fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// Errors raised by the playback engine.
#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    /// Playback was requested on a closed (or never opened) device handle.
    #[error("Audio device not initialized")]
    NotInitialized,

    /// A device handle could not be opened for playback.
    ///
    /// Kept apart from [`PlaybackError::WriteFailed`] so a rejected
    /// configuration does not report as a failed write.
    #[error("Failed to open audio device: {source}")]
    OpenFailed {
        /// The device-layer error that prevented the open.
        #[source]
        source: DeviceError,
    },

    /// The playback worker thread could not be spawned.
    #[error("Failed to schedule playback worker: {source}")]
    SchedulingFailed {
        /// The spawn error reported by the operating system.
        #[source]
        source: io::Error,
    },

    /// The underlying device write failed.
    #[error(transparent)]
    WriteFailed(#[from] DeviceError),
}

impl PlaybackError {
    /// Create an open failure from a device error.
    pub const fn open_failed(source: DeviceError) -> Self {
        Self::OpenFailed { source }
    }

    /// Create a scheduling failure from a spawn error.
    pub const fn scheduling_failed(source: io::Error) -> Self {
        Self::SchedulingFailed { source }
    }

    /// Check whether this error came from the device layer.
    pub const fn is_write_error(&self) -> bool {
        matches!(self, Self::WriteFailed(_))
    }
}

/// Result type for device operations.
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Result type for playback operations.
pub type PlaybackResult<T> = Result<T, PlaybackError>;

impl From<cpal::DefaultStreamConfigError> for DeviceError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        Self::unavailable(format!("failed to query default stream config: {err}"))
    }
}

impl From<cpal::BuildStreamError> for DeviceError {
    fn from(err: cpal::BuildStreamError) -> Self {
        Self::unavailable(format!("failed to build output stream: {err}"))
    }
}

impl From<cpal::PlayStreamError> for DeviceError {
    fn from(err: cpal::PlayStreamError) -> Self {
        Self::unavailable(format!("failed to start output stream: {err}"))
    }
}
