// Correctness and logic
#![warn(clippy::unit_cmp)] // Detects comparing unit types
#![warn(clippy::match_same_arms)]
// Duplicate match arms

// Performance-focused
#![warn(clippy::inefficient_to_string)] // `format!("{}", x)` vs `x.to_string()`
#![warn(clippy::map_clone)] // Cloning inside `map()` unnecessarily
#![warn(clippy::unnecessary_to_owned)] // Detects redundant `.to_owned()` or `.clone()`
#![warn(clippy::large_stack_arrays)] // Helps avoid stack overflows
#![warn(clippy::box_collection)] // Warns on boxed `Vec`, `String`, etc.
#![warn(clippy::vec_box)] // Avoids using `Vec<Box<T>>` when unnecessary
#![warn(clippy::needless_collect)] // Avoids `.collect().iter()` chains

// Style and idiomatic Rust
#![warn(clippy::redundant_clone)] // Detects unnecessary `.clone()`
#![warn(clippy::identity_op)] // e.g., `x + 0`, `x * 1`
#![warn(clippy::needless_return)] // Avoids `return` at the end of functions
#![warn(clippy::let_unit_value)] // Avoids binding `()` to variables
#![warn(clippy::manual_map)] // Use `.map()` instead of manual `match`
#![warn(clippy::unwrap_used)] // Avoids using `unwrap()`

// Maintainability
#![warn(clippy::missing_panics_doc)] // Docs for functions that might panic
#![warn(clippy::missing_safety_doc)] // Docs for `unsafe` functions
#![warn(clippy::missing_const_for_fn)] // Suggests making eligible functions `const`
#![deny(missing_docs)] // Documentation is a must for release

//! # AudioOutput
//!
//! A real-time audio output library that turns normalized sample buffers into sound on the
//! platform's default output device, with blocking and asynchronous scheduling and a simulation
//! fallback for machines without usable audio.
//!
//! ## Overview
//!
//! The crate was built as the playback layer of an audio editor: a host application synthesizes
//! or edits normalized `f32` samples and needs them audible *now*, without caring which platform
//! audio stack is underneath, whether the hardware wants `i16` or `f32`, how many channels it
//! runs, or whether the machine has working audio at all. Everything funnels through three
//! pieces:
//!
//! - [`DeviceHandle`] — one opened output device (or its timed simulation stand-in).
//! - A fixed conversion pipeline ([`convert_for_device`]) — clamp, channel reconciliation,
//!   interleave, numeric encoding.
//! - [`PlaybackEngine`] — the `Idle -> Playing -> Idle` session machine with last-writer-wins
//!   asynchronous scheduling.
//!
//! ## Installation
//!
//! Add this to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! audio_output = "0.1.0"
//! ```
//!
//! or more easily with:
//! ```bash
//! cargo add audio_output
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use audio_output::{DeviceConfig, PlaybackEngine, PlaybackMode, SampleBuffer};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Opens the default output device, or a timed simulation when no usable
//! // device exists.
//! let config = DeviceConfig::default().with_sample_rate(8_000);
//! let mut engine = PlaybackEngine::open(config)?;
//!
//! let samples = [0.0f32; 160]; // 20 ms of silence
//! let buffer = SampleBuffer::from_mono_slice(&samples);
//! engine.play(&buffer, PlaybackMode::Blocking)?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Converting Without Playing
//!
//! The conversion pipeline is a pure function, usable (and testable) on its own:
//!
//! ```rust
//! use audio_output::{DeviceConfig, SampleBuffer, convert_for_device};
//! use ndarray::array;
//!
//! let buffer = SampleBuffer::from_mono(array![0.5f32, -0.5]);
//! let stereo = DeviceConfig::default().with_channel_count(2);
//!
//! // Mono replicates across both device channels before encoding.
//! let bytes = convert_for_device(&buffer, &stereo);
//! assert_eq!(bytes.len(), 16); // 2 frames x 2 channels x 4 bytes
//! ```
//!
//! ## Simulation Fallback
//!
//! [`DeviceHandle::open`] never hard-fails on missing hardware. When the platform has no default
//! output device, rejects the requested format, or cannot start a stream, the handle opens in a
//! degraded simulation mode: writes sleep for the duration the audio would have taken and report
//! success. The degradation is visible in [`DeviceDiagnostics::backend_available`], never as an
//! error the caller must branch on.
//!
//! ## Error Handling
//!
//! Device and scheduling failures are separate enums, matching where they arise:
//!
//! ```rust
//! use audio_output::{DeviceError, DeviceResult};
//!
//! let result: DeviceResult<()> = Err(DeviceError::invalid_config(
//!     "sample_rate",
//!     "must be greater than zero",
//! ));
//!
//! match result {
//!     Ok(()) => {}
//!     Err(DeviceError::Unavailable { reason }) => eprintln!("No device: {reason}"),
//!     Err(other) => eprintln!("Device error: {other}"),
//! }
//! ```
//!
//! A failed note must never take the host application down: all platform errors are caught at
//! the device boundary and surfaced as values.
//!
//! ## Documentation
//!
//! Full API documentation is available at [docs.rs/audio_output](https://docs.rs/audio_output).
//!
//! ## License
//!
//! MIT License
//!
//! ## Contributing
//!
//! Contributions are welcome! Please feel free to submit a Pull Request.

mod conversions;
mod device;
mod diagnostics;
mod engine;
mod error;
mod repr;

pub use crate::conversions::convert_for_device;
pub use crate::device::{
    BackendAvailability, DeviceConfig, DeviceHandle, DeviceWriter, OutputDeviceInfo, SampleFormat,
};
pub use crate::diagnostics::DeviceDiagnostics;
pub use crate::engine::{
    CompletionCallback, PlaybackEngine, PlaybackMode, WORKER_JOIN_TIMEOUT, play_once,
};
pub use crate::error::{DeviceError, DeviceResult, PlaybackError, PlaybackResult};
pub use crate::repr::SampleBuffer;
