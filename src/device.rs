//! Output device access over CPAL, with a simulation fallback.
//!
//! A [`DeviceHandle`] owns at most one platform output stream. Opening never
//! hard-fails on missing hardware: when no usable output device exists the
//! handle degrades to a simulation backend that preserves write timing, so a
//! host application keeps working with audio silently no-op'd.
//!
//! Encoded bytes flow through a shared queue drained by the stream callback;
//! [`DeviceHandle::write`] blocks until the queue empties, the stream
//! errors, or a liveness deadline expires. The `cpal::Stream` itself never
//! leaves the handle (it is not `Send`); worker threads write through a
//! cloned [`DeviceWriter`] instead.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, StreamConfig};
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{DeviceError, DeviceResult};

/// Extra wall-clock allowance past a buffer's nominal duration before a
/// blocking write is abandoned as stalled.
const WRITE_DEADLINE_MARGIN: Duration = Duration::from_secs(1);

/// How long a blocked writer waits between drain checks.
const DRAIN_WAIT_SLICE: Duration = Duration::from_millis(50);

/// Numeric encoding delivered to the output device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
    /// Signed 16-bit integer samples.
    Int16,
    /// Native-endian 32-bit float samples.
    Float32,
}

impl SampleFormat {
    /// Size of one encoded sample in bytes.
    pub const fn size_bytes(&self) -> usize {
        match self {
            Self::Int16 => 2,
            Self::Float32 => 4,
        }
    }

    /// Check if this is a floating point format.
    pub const fn is_float(&self) -> bool {
        matches!(self, Self::Float32)
    }
}

/// Immutable configuration for an output device.
///
/// Fixed once a handle is opened; reconfiguration means closing and opening
/// a new handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Frames per second.
    pub sample_rate: u32,
    /// Output channels the device is asked to run with.
    pub channel_count: u16,
    /// Frames per hardware buffer.
    pub chunk_size: u32,
    /// Numeric encoding of delivered samples.
    pub sample_format: SampleFormat,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channel_count: 1,
            chunk_size: 1024,
            sample_format: SampleFormat::Float32,
        }
    }
}

impl DeviceConfig {
    /// Create a configuration with every field explicit.
    pub const fn new(
        sample_rate: u32,
        channel_count: u16,
        chunk_size: u32,
        sample_format: SampleFormat,
    ) -> Self {
        Self {
            sample_rate,
            channel_count,
            chunk_size,
            sample_format,
        }
    }

    /// Set the sample rate.
    pub const fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Set the channel count.
    pub const fn with_channel_count(mut self, channel_count: u16) -> Self {
        self.channel_count = channel_count;
        self
    }

    /// Set the hardware buffer size in frames.
    pub const fn with_chunk_size(mut self, chunk_size: u32) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Set the sample format.
    pub const fn with_sample_format(mut self, sample_format: SampleFormat) -> Self {
        self.sample_format = sample_format;
        self
    }

    /// Reject configurations with zero-valued fields.
    pub fn validate(&self) -> DeviceResult<()> {
        if self.sample_rate == 0 {
            return Err(DeviceError::invalid_config(
                "sample_rate",
                "must be greater than zero",
            ));
        }
        if self.channel_count == 0 {
            return Err(DeviceError::invalid_config(
                "channel_count",
                "must be at least 1",
            ));
        }
        if self.chunk_size == 0 {
            return Err(DeviceError::invalid_config(
                "chunk_size",
                "must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Size of one frame (all channels of one sample instant) in bytes.
    pub const fn frame_size_bytes(&self) -> usize {
        self.channel_count as usize * self.sample_format.size_bytes()
    }

    /// Playback duration of an encoded byte slice under this configuration.
    pub fn duration_of_bytes(&self, len: usize) -> Duration {
        let frame_size = self.frame_size_bytes();
        if frame_size == 0 || self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let frames = len / frame_size;
        Duration::from_secs_f64(frames as f64 / f64::from(self.sample_rate))
    }
}

/// Whether a platform output stream was acquired when the handle opened.
///
/// Decided exactly once at open time and carried in the handle; there is no
/// ambient availability flag to consult.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendAvailability {
    /// A real platform stream is running.
    Available,
    /// No usable platform output; writes are simulated.
    Unavailable,
}

impl BackendAvailability {
    /// Check whether a real platform stream backs the handle.
    pub const fn is_available(&self) -> bool {
        matches!(self, Self::Available)
    }
}

/// Properties of the platform output device, recorded once at open time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputDeviceInfo {
    /// Device name as reported by the platform.
    pub name: String,
    /// Largest channel count any supported output configuration offers.
    pub max_output_channels: u16,
    /// Sample rate of the device's default output configuration.
    pub default_sample_rate: u32,
}

struct QueueState {
    buffer: VecDeque<u8>,
    /// Absolute offset of `buffer[0]` in the enqueue stream: total bytes
    /// consumed by the callback or discarded. Each writer derives its own
    /// span from this, so one writer never settles another's bytes.
    front_offset: u64,
    shutdown: bool,
    stream_error: Option<String>,
}

/// Byte queue between blocking writers and the stream callback.
struct OutputQueue {
    state: Mutex<QueueState>,
    drained: Condvar,
}

impl OutputQueue {
    fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                buffer: VecDeque::new(),
                front_offset: 0,
                shutdown: false,
                stream_error: None,
            }),
            drained: Condvar::new(),
        }
    }

    /// Enqueue encoded bytes and block until the callback has consumed
    /// this write's own span.
    ///
    /// The liveness deadline covers bytes already queued ahead of the
    /// write. On expiry only the write's own undrained bytes are
    /// discarded; global discard happens in [`OutputQueue::shut_down`]
    /// and [`OutputQueue::record_stream_error`].
    fn write_blocking(&self, bytes: &[u8], playback_duration: Duration) -> DeviceResult<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        let mut state = self.state.lock();

        if state.shutdown {
            return Err(DeviceError::write_failed("output stream is closed"));
        }
        if let Some(reason) = state.stream_error.clone() {
            return Err(DeviceError::write_failed(reason));
        }

        let start = state.front_offset + state.buffer.len() as u64;
        let end = start + bytes.len() as u64;
        let queued = (end - state.front_offset) as f64 / bytes.len() as f64;
        let deadline = Instant::now() + playback_duration.mul_f64(queued) + WRITE_DEADLINE_MARGIN;
        state.buffer.extend(bytes.iter().copied());

        loop {
            if let Some(reason) = state.stream_error.clone() {
                return Err(DeviceError::write_failed(reason));
            }
            if state.shutdown {
                return Err(DeviceError::write_failed("output stream closed during write"));
            }
            if state.front_offset >= end {
                return Ok(());
            }
            if Instant::now() >= deadline {
                let undrained = (end - state.front_offset.max(start)) as usize;
                if state.front_offset >= start {
                    // This span sits at the queue front; bytes behind it
                    // belong to newer writes and stay put.
                    state.buffer.drain(..undrained);
                    state.front_offset = end;
                    drop(state);
                    self.drained.notify_all();
                }
                return Err(DeviceError::write_failed(format!(
                    "write deadline expired with {undrained} bytes undrained"
                )));
            }
            self.drained.wait_for(&mut state, DRAIN_WAIT_SLICE);
        }
    }

    /// Record the first stream error, discard pending bytes, wake any
    /// blocked writer.
    fn record_stream_error(&self, reason: String) {
        let mut state = self.state.lock();
        if state.stream_error.is_none() {
            state.stream_error = Some(reason);
        }
        let discarded = state.buffer.len() as u64;
        state.buffer.clear();
        state.front_offset += discarded;
        drop(state);
        self.drained.notify_all();
    }

    /// Mark the queue closed, discard pending bytes, wake blocked writers.
    fn shut_down(&self) {
        let mut state = self.state.lock();
        state.shutdown = true;
        let discarded = state.buffer.len() as u64;
        state.buffer.clear();
        state.front_offset += discarded;
        drop(state);
        self.drained.notify_all();
    }
}

fn pop_sample_bytes<const N: usize>(buffer: &mut VecDeque<u8>) -> Option<[u8; N]> {
    if buffer.len() < N {
        return None;
    }
    let mut bytes = [0u8; N];
    for byte in &mut bytes {
        *byte = buffer.pop_front()?;
    }
    Some(bytes)
}

fn render_f32(queue: &OutputQueue, data: &mut [f32]) {
    let mut state = queue.state.lock();
    let mut consumed = false;
    for slot in data.iter_mut() {
        *slot = match pop_sample_bytes::<4>(&mut state.buffer) {
            Some(bytes) => {
                state.front_offset += 4;
                consumed = true;
                f32::from_ne_bytes(bytes)
            }
            None => 0.0,
        };
    }
    drop(state);
    if consumed {
        queue.drained.notify_all();
    }
}

fn render_i16(queue: &OutputQueue, data: &mut [i16]) {
    let mut state = queue.state.lock();
    let mut consumed = false;
    for slot in data.iter_mut() {
        *slot = match pop_sample_bytes::<2>(&mut state.buffer) {
            Some(bytes) => {
                state.front_offset += 2;
                consumed = true;
                i16::from_ne_bytes(bytes)
            }
            None => 0,
        };
    }
    drop(state);
    if consumed {
        queue.drained.notify_all();
    }
}

struct StreamBackend {
    // Held only to keep the callback alive; dropped on close.
    _stream: cpal::Stream,
    queue: Arc<OutputQueue>,
}

enum Backend {
    Stream(StreamBackend),
    Simulated,
}

#[derive(Clone)]
enum WriteTarget {
    Queue(Arc<OutputQueue>),
    Simulated,
    Closed,
}

/// A handle to one opened output device.
///
/// Closing is idempotent and also happens automatically on drop, so the
/// platform stream is released on every exit path.
pub struct DeviceHandle {
    config: DeviceConfig,
    availability: BackendAvailability,
    info: Option<OutputDeviceInfo>,
    backend: Option<Backend>,
}

impl DeviceHandle {
    /// Open the default platform output device under `config`.
    ///
    /// Only an invalid configuration is a hard failure. Any platform
    /// failure (no default device, unsupported format, stream build or
    /// start failure) is logged and recovered by opening in simulation
    /// mode; the caller can keep playing and the degradation is visible as
    /// [`BackendAvailability::Unavailable`].
    pub fn open(config: DeviceConfig) -> DeviceResult<Self> {
        config.validate()?;

        match Self::open_stream(&config) {
            Ok((backend, info)) => {
                info!(
                    device = %info.name,
                    max_output_channels = info.max_output_channels,
                    default_sample_rate = info.default_sample_rate,
                    sample_rate = config.sample_rate,
                    channels = config.channel_count,
                    format = ?config.sample_format,
                    "audio output initialized"
                );
                Ok(Self {
                    config,
                    availability: BackendAvailability::Available,
                    info: Some(info),
                    backend: Some(Backend::Stream(backend)),
                })
            }
            Err(err) => {
                warn!(error = %err, "audio output unavailable, falling back to simulation");
                Ok(Self {
                    config,
                    availability: BackendAvailability::Unavailable,
                    info: None,
                    backend: Some(Backend::Simulated),
                })
            }
        }
    }

    /// Open a handle that simulates writes without touching the platform.
    ///
    /// Simulated writes sleep for the duration a real write would take, so
    /// timing-sensitive callers behave identically.
    pub fn simulated(config: DeviceConfig) -> DeviceResult<Self> {
        config.validate()?;
        debug!(
            sample_rate = config.sample_rate,
            channels = config.channel_count,
            "opening simulated audio output"
        );
        Ok(Self {
            config,
            availability: BackendAvailability::Unavailable,
            info: None,
            backend: Some(Backend::Simulated),
        })
    }

    fn open_stream(config: &DeviceConfig) -> DeviceResult<(StreamBackend, OutputDeviceInfo)> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| DeviceError::unavailable("no default output device"))?;

        let name = device
            .name()
            .unwrap_or_else(|_| String::from("unknown output device"));
        let default_config = device.default_output_config()?;
        let max_output_channels = device
            .supported_output_configs()
            .map(|configs| {
                configs
                    .map(|range| range.channels())
                    .max()
                    .unwrap_or_else(|| default_config.channels())
            })
            .unwrap_or_else(|_| default_config.channels());
        let info = OutputDeviceInfo {
            name,
            max_output_channels,
            default_sample_rate: default_config.sample_rate().0,
        };

        let queue = Arc::new(OutputQueue::new());
        let stream_config = StreamConfig {
            channels: config.channel_count,
            sample_rate: SampleRate(config.sample_rate),
            buffer_size: BufferSize::Fixed(config.chunk_size),
        };

        let stream = match Self::build_stream(&device, &stream_config, config.sample_format, &queue)
        {
            Ok(stream) => stream,
            Err(err) => {
                debug!(
                    error = %err,
                    chunk_size = config.chunk_size,
                    "fixed buffer size rejected, retrying with device default"
                );
                let fallback = StreamConfig {
                    buffer_size: BufferSize::Default,
                    ..stream_config
                };
                Self::build_stream(&device, &fallback, config.sample_format, &queue)?
            }
        };
        stream.play()?;

        Ok((
            StreamBackend {
                _stream: stream,
                queue,
            },
            info,
        ))
    }

    fn build_stream(
        device: &cpal::Device,
        stream_config: &StreamConfig,
        format: SampleFormat,
        queue: &Arc<OutputQueue>,
    ) -> DeviceResult<cpal::Stream> {
        let error_queue = Arc::clone(queue);
        let err_fn = move |err: cpal::StreamError| {
            error!(error = %err, "audio stream error");
            error_queue.record_stream_error(err.to_string());
        };

        let render_queue = Arc::clone(queue);
        let stream = match format {
            SampleFormat::Float32 => device.build_output_stream(
                stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    render_f32(&render_queue, data);
                },
                err_fn,
                None,
            )?,
            SampleFormat::Int16 => device.build_output_stream(
                stream_config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    render_i16(&render_queue, data);
                },
                err_fn,
                None,
            )?,
        };
        Ok(stream)
    }

    /// Synchronously write encoded bytes to the device.
    ///
    /// Returns once the stream callback has consumed every byte (or, in
    /// simulation mode, after sleeping for the equivalent duration). An
    /// empty slice is a legal no-op. Fails without retrying when the handle
    /// is closed, the byte length is not whole frames, the stream reports
    /// an error, or the drain deadline expires.
    pub fn write(&self, bytes: &[u8]) -> DeviceResult<()> {
        self.writer().write(bytes)
    }

    /// A cheap, `Send` writer for use on worker threads.
    ///
    /// The writer observes a close that happens after it was created: queue
    /// writes fail once the handle shuts the stream down.
    pub fn writer(&self) -> DeviceWriter {
        let target = match &self.backend {
            Some(Backend::Stream(stream)) => WriteTarget::Queue(Arc::clone(&stream.queue)),
            Some(Backend::Simulated) => WriteTarget::Simulated,
            None => WriteTarget::Closed,
        };
        DeviceWriter {
            config: self.config,
            target,
        }
    }

    /// Release the platform stream.
    ///
    /// Idempotent; any writer blocked on the queue is woken with a write
    /// failure. Also invoked on drop.
    pub fn close(&mut self) {
        if let Some(backend) = self.backend.take() {
            if let Backend::Stream(stream) = &backend {
                stream.queue.shut_down();
            }
            drop(backend);
            info!("audio output closed");
        }
    }

    /// Check whether the handle still owns a backend.
    pub const fn is_open(&self) -> bool {
        self.backend.is_some()
    }

    /// The configuration the handle was opened with.
    pub const fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Backend availability decided at open time.
    pub const fn availability(&self) -> BackendAvailability {
        self.availability
    }

    /// Platform device properties, when a real device was opened.
    pub const fn output_device_info(&self) -> Option<&OutputDeviceInfo> {
        self.info.as_ref()
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("config", &self.config)
            .field("availability", &self.availability)
            .field("info", &self.info)
            .field("is_open", &self.is_open())
            .finish()
    }
}

/// A `Send` write endpoint detached from the handle's platform stream.
#[derive(Clone)]
pub struct DeviceWriter {
    config: DeviceConfig,
    target: WriteTarget,
}

impl DeviceWriter {
    /// Synchronously write encoded bytes; see [`DeviceHandle::write`].
    pub fn write(&self, bytes: &[u8]) -> DeviceResult<()> {
        if bytes.is_empty() {
            return Ok(());
        }

        let frame_size = self.config.frame_size_bytes();
        if !bytes.len().is_multiple_of(frame_size) {
            return Err(DeviceError::write_failed(format!(
                "{} bytes is not a whole number of {frame_size}-byte frames",
                bytes.len()
            )));
        }

        let playback_duration = self.config.duration_of_bytes(bytes.len());
        match &self.target {
            WriteTarget::Queue(queue) => queue.write_blocking(bytes, playback_duration),
            WriteTarget::Simulated => {
                debug!(
                    frames = bytes.len() / frame_size,
                    duration_ms = playback_duration.as_millis() as u64,
                    "simulating device write"
                );
                if !playback_duration.is_zero() {
                    thread::sleep(playback_duration);
                }
                Ok(())
            }
            WriteTarget::Closed => Err(DeviceError::write_failed("device is closed")),
        }
    }

    /// The configuration of the handle this writer came from.
    pub const fn config(&self) -> &DeviceConfig {
        &self.config
    }
}
