//! Core sample buffer representation.
//!
//! This module provides the buffer type handed to the playback engine. It
//! wraps `ndarray` storage so callers can lend their own sample memory
//! without copying, while workers that outlive the caller's borrow can take
//! an owned deep copy.
//!
//! # Layout
//!
//! Mono audio is a 1D array. Multi-channel audio is a 2D array with
//! channels as rows and frames as columns; interleaving only happens at the
//! device boundary, inside the conversion pipeline.
//!
//! # Examples
//!
//! ```rust
//! use audio_output::SampleBuffer;
//! use ndarray::array;
//!
//! // Borrow a mono slice, zero copy.
//! let samples = [0.1f32, 0.2, -0.3];
//! let mono = SampleBuffer::from_mono_slice(&samples);
//! assert_eq!(mono.num_channels(), 1);
//! assert_eq!(mono.samples_per_channel(), 3);
//!
//! // Own stereo data (2 channels x 3 frames).
//! let stereo = SampleBuffer::from_channels(array![
//!     [0.1f32, 0.2, 0.3],
//!     [0.4f32, 0.5, 0.6]
//! ])
//! .unwrap();
//! assert_eq!(stereo.num_channels(), 2);
//! ```

use std::time::Duration;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, CowArray, Ix1, Ix2};

use crate::error::{DeviceError, DeviceResult};

/// Normalized audio samples, mono or multi-channel, borrowed or owned.
///
/// Sample values are nominally in `[-1.0, 1.0]`. Out-of-range values are
/// accepted here and clamped by the conversion pipeline, never mutated in
/// place.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleBuffer<'a> {
    /// A single channel of samples.
    Mono(CowArray<'a, f32, Ix1>),
    /// Channels as rows, frames as columns.
    Multi(CowArray<'a, f32, Ix2>),
}

impl<'a> SampleBuffer<'a> {
    /// Borrow a mono slice without copying.
    pub fn from_mono_slice(samples: &'a [f32]) -> Self {
        Self::Mono(ArrayView1::from(samples).into())
    }

    /// Take ownership of a mono array.
    pub fn from_mono(samples: Array1<f32>) -> SampleBuffer<'static> {
        SampleBuffer::Mono(samples.into())
    }

    /// Take ownership of a channel-major array (channels as rows).
    ///
    /// Rejects arrays with zero channels; an array with zero frames is a
    /// legal empty buffer.
    pub fn from_channels(channels: Array2<f32>) -> DeviceResult<SampleBuffer<'static>> {
        if channels.nrows() == 0 {
            return Err(DeviceError::invalid_config(
                "channel_count",
                "buffer must carry at least one channel",
            ));
        }
        Ok(SampleBuffer::Multi(channels.into()))
    }

    /// De-interleave a frame-major slice (`LRLR...`) into an owned buffer.
    ///
    /// The slice length must be a whole number of frames.
    pub fn from_interleaved(
        samples: &[f32],
        channel_count: u16,
    ) -> DeviceResult<SampleBuffer<'static>> {
        if channel_count == 0 {
            return Err(DeviceError::invalid_config(
                "channel_count",
                "must be at least 1",
            ));
        }
        let channels = channel_count as usize;
        if channels == 1 {
            return Ok(SampleBuffer::Mono(Array1::from_vec(samples.to_vec()).into()));
        }
        if !samples.len().is_multiple_of(channels) {
            return Err(DeviceError::invalid_config(
                "buffer_len",
                format!(
                    "{} samples do not divide into {channels}-channel frames",
                    samples.len()
                ),
            ));
        }
        let frames = samples.len() / channels;
        let data = Array2::from_shape_fn((channels, frames), |(channel, frame)| {
            samples[frame * channels + channel]
        });
        Ok(SampleBuffer::Multi(data.into()))
    }

    /// Number of channels in the buffer.
    pub fn num_channels(&self) -> usize {
        match self {
            Self::Mono(_) => 1,
            Self::Multi(data) => data.nrows(),
        }
    }

    /// Number of samples per channel (frames).
    pub fn samples_per_channel(&self) -> usize {
        match self {
            Self::Mono(data) => data.len(),
            Self::Multi(data) => data.ncols(),
        }
    }

    /// Check whether the buffer holds no frames.
    pub fn is_empty(&self) -> bool {
        self.samples_per_channel() == 0
    }

    /// Playback duration of the buffer at the given sample rate.
    pub fn duration(&self, sample_rate: u32) -> Duration {
        if sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples_per_channel() as f64 / f64::from(sample_rate))
    }

    /// A channel-major 2D view of the samples (mono becomes one row).
    pub fn channels_view(&self) -> ArrayView2<'_, f32> {
        match self {
            Self::Mono(data) => data.view().insert_axis(Axis(0)),
            Self::Multi(data) => data.view(),
        }
    }

    /// Deep-copy into an owned buffer with no borrowed storage.
    ///
    /// Used to hand sample data to a playback worker that may outlive the
    /// caller's borrow.
    pub fn to_owned_buffer(&self) -> SampleBuffer<'static> {
        match self {
            Self::Mono(data) => SampleBuffer::Mono(data.to_owned().into()),
            Self::Multi(data) => SampleBuffer::Multi(data.to_owned().into()),
        }
    }
}

impl From<Vec<f32>> for SampleBuffer<'static> {
    fn from(samples: Vec<f32>) -> Self {
        SampleBuffer::Mono(Array1::from_vec(samples).into())
    }
}
