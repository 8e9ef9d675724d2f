//! Playback engine: the session lifecycle over one device handle.
//!
//! An engine owns exactly one [`DeviceHandle`] and runs at most one playback
//! session at a time, `Idle -> Playing -> Idle`. Blocking sessions run on
//! the calling thread. Asynchronous sessions run on a single worker thread
//! with last-writer-wins semantics: starting a new session cancels the
//! previous one and waits up to [`WORKER_JOIN_TIMEOUT`] for its worker to
//! exit. A worker that overstays the bound is detached rather than waited
//! on, so `play` and `stop` always return promptly.
//!
//! Cancellation is observed between well-defined points only, before and
//! after the device write. A write that has already started runs to
//! completion, and its completion callback with it; callers must tolerate a
//! cancelled session's callback either firing or not.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::conversions::convert_for_device;
use crate::device::{DeviceConfig, DeviceHandle, DeviceWriter};
use crate::diagnostics::DeviceDiagnostics;
use crate::error::{DeviceResult, PlaybackError, PlaybackResult};
use crate::repr::SampleBuffer;

/// How long `stop` and a superseding `play` wait for the previous worker
/// before detaching it.
pub const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Poll interval while waiting for a worker to finish.
const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How a playback session is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackMode {
    /// Convert and write on the calling thread; return after the write
    /// completes.
    Blocking,
    /// Hand the buffer to a background worker; return once it is scheduled.
    Async,
}

/// Invoked at most once, when a session's device write has completed.
pub type CompletionCallback = Box<dyn FnOnce() + Send + 'static>;

/// Packed session state: generation in the high bits, playing flag in the
/// low bit.
///
/// Packing both into one atomic lets a finishing worker clear the playing
/// flag with a single compare-exchange that fails harmlessly when a newer
/// session has already taken over, so a stale worker can never stomp the
/// state of a session it does not own.
struct SessionState {
    packed: AtomicU64,
}

impl SessionState {
    const PLAYING_BIT: u64 = 1;

    const fn new() -> Self {
        Self {
            packed: AtomicU64::new(0),
        }
    }

    /// Mark a new session playing and return its token.
    fn begin(&self, generation: u64) -> u64 {
        let token = (generation << 1) | Self::PLAYING_BIT;
        self.packed.store(token, Ordering::SeqCst);
        token
    }

    /// Clear the playing flag, provided `token`'s session is still current.
    fn finish(&self, token: u64) {
        let _ = self.packed.compare_exchange(
            token,
            token & !Self::PLAYING_BIT,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    /// Force the current session idle.
    fn force_idle(&self) {
        let current = self.packed.load(Ordering::SeqCst);
        self.packed
            .store(current & !Self::PLAYING_BIT, Ordering::SeqCst);
    }

    fn is_playing(&self) -> bool {
        self.packed.load(Ordering::SeqCst) & Self::PLAYING_BIT != 0
    }
}

/// Clears the session's playing flag on every exit path, including worker
/// panics (a panicking completion callback must not leave the engine
/// reporting `Playing` forever).
struct SessionGuard {
    state: Arc<SessionState>,
    token: u64,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.state.finish(self.token);
    }
}

/// The conversion + write sequence shared by both playback modes.
fn run_session(
    writer: &DeviceWriter,
    buffer: &SampleBuffer<'_>,
    cancel: &AtomicBool,
    callback: Option<CompletionCallback>,
) -> PlaybackResult<()> {
    if cancel.load(Ordering::SeqCst) {
        debug!("playback session cancelled before write");
        return Ok(());
    }

    debug!(
        frames = buffer.samples_per_channel(),
        channels = buffer.num_channels(),
        "starting playback session"
    );
    let bytes = convert_for_device(buffer, writer.config());
    writer.write(&bytes)?;

    if cancel.load(Ordering::SeqCst) {
        debug!("playback session cancelled after write");
        return Ok(());
    }

    if let Some(callback) = callback {
        callback();
    }
    Ok(())
}

/// Schedules sample buffers onto one output device.
///
/// The engine is the single writer for its device: exclusive `&mut self`
/// access serializes `play` and `stop`, while [`PlaybackEngine::is_playing`]
/// and [`PlaybackEngine::diagnostics`] read atomic state and are safe to
/// call from observers at any time.
pub struct PlaybackEngine {
    device: DeviceHandle,
    state: Arc<SessionState>,
    next_generation: u64,
    worker: Option<JoinHandle<()>>,
    cancel: Arc<AtomicBool>,
}

impl PlaybackEngine {
    /// Create an engine owning an already opened device handle.
    pub fn new(device: DeviceHandle) -> Self {
        Self {
            device,
            state: Arc::new(SessionState::new()),
            next_generation: 0,
            worker: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Open the default output device under `config` and wrap it.
    ///
    /// Fails only on an invalid configuration; a missing platform device
    /// falls back to simulation, as with [`DeviceHandle::open`].
    pub fn open(config: DeviceConfig) -> DeviceResult<Self> {
        Ok(Self::new(DeviceHandle::open(config)?))
    }

    /// Play a sample buffer.
    ///
    /// See [`PlaybackEngine::play_with_callback`] for the full contract.
    pub fn play(&mut self, buffer: &SampleBuffer<'_>, mode: PlaybackMode) -> PlaybackResult<()> {
        self.play_inner(buffer, mode, None)
    }

    /// Play a sample buffer and invoke `callback` when its write completes.
    ///
    /// Starting a session supersedes any session still in flight. In
    /// blocking mode the callback runs exactly once, after the write and
    /// before this method returns; a failed write returns
    /// [`PlaybackError::WriteFailed`] without invoking the callback. In
    /// async mode the method returns as soon as the worker is scheduled and
    /// the callback runs in the worker's context. An empty buffer is a
    /// legal no-op that still completes the session.
    ///
    /// Returns [`PlaybackError::NotInitialized`] once the device has been
    /// closed, with no side effects.
    pub fn play_with_callback(
        &mut self,
        buffer: &SampleBuffer<'_>,
        mode: PlaybackMode,
        callback: CompletionCallback,
    ) -> PlaybackResult<()> {
        self.play_inner(buffer, mode, Some(callback))
    }

    fn play_inner(
        &mut self,
        buffer: &SampleBuffer<'_>,
        mode: PlaybackMode,
        callback: Option<CompletionCallback>,
    ) -> PlaybackResult<()> {
        if !self.device.is_open() {
            return Err(PlaybackError::NotInitialized);
        }

        match mode {
            PlaybackMode::Blocking => self.play_blocking(buffer, callback),
            PlaybackMode::Async => self.play_async(buffer, callback),
        }
    }

    fn play_blocking(
        &mut self,
        buffer: &SampleBuffer<'_>,
        callback: Option<CompletionCallback>,
    ) -> PlaybackResult<()> {
        self.cancel_and_reap();

        let token = self.begin_session();
        let guard = SessionGuard {
            state: Arc::clone(&self.state),
            token,
        };

        // Nothing can cancel a blocking session: stop() needs the same
        // exclusive borrow this method holds.
        let never_cancelled = AtomicBool::new(false);
        let result = run_session(&self.device.writer(), buffer, &never_cancelled, callback);
        drop(guard);
        result
    }

    fn play_async(
        &mut self,
        buffer: &SampleBuffer<'_>,
        callback: Option<CompletionCallback>,
    ) -> PlaybackResult<()> {
        self.cancel_and_reap();

        let token = self.begin_session();
        let cancel = Arc::new(AtomicBool::new(false));
        let writer = self.device.writer();
        let owned = buffer.to_owned_buffer();
        let guard = SessionGuard {
            state: Arc::clone(&self.state),
            token,
        };
        let worker_cancel = Arc::clone(&cancel);

        let spawned = thread::Builder::new()
            .name(String::from("audio-playback"))
            .spawn(move || {
                let _guard = guard;
                if let Err(err) = run_session(&writer, &owned, &worker_cancel, callback) {
                    warn!(error = %err, "asynchronous playback failed");
                }
            });

        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                self.cancel = cancel;
                Ok(())
            }
            Err(err) => {
                // The guard moved into the failed spawn's closure never ran;
                // the closure was dropped, which already cleared the state.
                Err(PlaybackError::scheduling_failed(err))
            }
        }
    }

    fn begin_session(&mut self) -> u64 {
        self.next_generation += 1;
        self.state.begin(self.next_generation)
    }

    /// Cancel the in-flight worker, if any, and wait up to the join bound.
    fn cancel_and_reap(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.cancel.store(true, Ordering::SeqCst);

        let deadline = Instant::now() + WORKER_JOIN_TIMEOUT;
        while !worker.is_finished() {
            if Instant::now() >= deadline {
                warn!(
                    timeout_ms = WORKER_JOIN_TIMEOUT.as_millis() as u64,
                    "playback worker did not stop in time, detaching"
                );
                return;
            }
            thread::sleep(JOIN_POLL_INTERVAL);
        }
        if worker.join().is_err() {
            warn!("playback worker panicked");
        }
    }

    /// Cancel any in-flight session and force the engine idle.
    ///
    /// Returns within the worker join bound. A no-op when already idle.
    pub fn stop(&mut self) {
        let had_worker = self.worker.is_some();
        self.cancel_and_reap();
        self.state.force_idle();
        if had_worker {
            debug!("playback stopped");
        }
    }

    /// Stop playback and release the device.
    ///
    /// Subsequent `play` calls return [`PlaybackError::NotInitialized`].
    pub fn close(&mut self) {
        self.stop();
        self.device.close();
    }

    /// Whether a session is currently playing.
    pub fn is_playing(&self) -> bool {
        self.state.is_playing()
    }

    /// Snapshot the engine and device state without blocking.
    pub fn diagnostics(&self) -> DeviceDiagnostics {
        DeviceDiagnostics::capture(&self.device, self.is_playing())
    }

    /// The device handle the engine schedules onto.
    pub const fn device(&self) -> &DeviceHandle {
        &self.device
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        // Stop before the device field drops so the stream is never
        // released while a worker is still writing through it.
        self.stop();
    }
}

/// Open the default output at `sample_rate`, play `buffer` to completion,
/// and release the device.
///
/// Channel and format mismatches are reconciled by the conversion pipeline;
/// with no usable platform device the call degrades to a timed simulation.
pub fn play_once(buffer: &SampleBuffer<'_>, sample_rate: u32) -> PlaybackResult<()> {
    let config = DeviceConfig::default().with_sample_rate(sample_rate);
    let device = DeviceHandle::open(config).map_err(PlaybackError::open_failed)?;
    let mut engine = PlaybackEngine::new(device);
    engine.play(buffer, PlaybackMode::Blocking)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::SampleFormat;
    use crate::error::DeviceError;
    use ndarray::Array1;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    fn sim_engine(config: DeviceConfig) -> PlaybackEngine {
        PlaybackEngine::new(DeviceHandle::simulated(config).unwrap())
    }

    fn frames(count: usize) -> SampleBuffer<'static> {
        SampleBuffer::from_mono(Array1::from_elem(count, 0.25f32))
    }

    #[test]
    fn test_blocking_play_blocks_for_buffer_duration() {
        let mut engine = sim_engine(DeviceConfig::default().with_sample_rate(8000));

        // 2000 frames at 8 kHz = 250 ms.
        let started = Instant::now();
        engine.play(&frames(2000), PlaybackMode::Blocking).unwrap();
        let elapsed = started.elapsed();

        assert!(elapsed >= Duration::from_millis(225), "blocked {elapsed:?}");
        assert!(elapsed < Duration::from_millis(700), "blocked {elapsed:?}");
        assert!(!engine.is_playing());
    }

    #[test]
    fn test_blocking_simulation_of_one_second_buffer_takes_one_second() {
        let mut engine = sim_engine(DeviceConfig::default());

        let started = Instant::now();
        engine
            .play(&frames(44_100), PlaybackMode::Blocking)
            .unwrap();
        let elapsed = started.elapsed();

        assert!(elapsed >= Duration::from_millis(950), "blocked {elapsed:?}");
        assert!(elapsed < Duration::from_millis(1600), "blocked {elapsed:?}");
    }

    #[test]
    fn test_blocking_play_of_empty_buffer_is_quick_noop() {
        let mut engine = sim_engine(DeviceConfig::default());
        let fired = Arc::new(AtomicBool::new(false));
        let fired_in_callback = Arc::clone(&fired);

        let started = Instant::now();
        engine
            .play_with_callback(
                &frames(0),
                PlaybackMode::Blocking,
                Box::new(move || fired_in_callback.store(true, Ordering::SeqCst)),
            )
            .unwrap();

        assert!(started.elapsed() < Duration::from_millis(100));
        assert!(fired.load(Ordering::SeqCst));
        assert!(!engine.is_playing());
    }

    #[test]
    fn test_play_after_close_is_not_initialized() {
        let mut engine = sim_engine(DeviceConfig::default());
        engine.close();

        let started = Instant::now();
        let result = engine.play(&frames(44_100), PlaybackMode::Blocking);

        assert!(matches!(result, Err(PlaybackError::NotInitialized)));
        // Failing fast means no conversion or simulated write happened.
        assert!(started.elapsed() < Duration::from_millis(100));
        assert!(!engine.is_playing());
    }

    #[test]
    fn test_blocking_callback_fires_exactly_once() {
        let mut engine = sim_engine(DeviceConfig::default().with_sample_rate(8000));
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_callback = Arc::clone(&calls);

        engine
            .play_with_callback(
                &frames(80),
                PlaybackMode::Blocking,
                Box::new(move || {
                    calls_in_callback.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_async_play_returns_immediately_then_completes() {
        let mut engine = sim_engine(DeviceConfig::default().with_sample_rate(8000));
        let (done_tx, done_rx) = mpsc::channel();

        // 800 frames at 8 kHz = 100 ms of playback.
        let started = Instant::now();
        engine
            .play_with_callback(
                &frames(800),
                PlaybackMode::Async,
                Box::new(move || {
                    let _ = done_tx.send(());
                }),
            )
            .unwrap();
        assert!(started.elapsed() < Duration::from_millis(50));

        done_rx
            .recv_timeout(Duration::from_secs(2))
            .expect("async session never completed");

        // The worker clears the playing flag right after the callback.
        let deadline = Instant::now() + Duration::from_millis(500);
        while engine.is_playing() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!engine.is_playing());
    }

    #[test]
    fn test_second_async_play_supersedes_first() {
        let mut engine = sim_engine(DeviceConfig::default().with_sample_rate(8000));

        // 4000 frames = 500 ms; long enough that the first session is still
        // writing when the second arrives.
        engine.play(&frames(4000), PlaybackMode::Async).unwrap();
        thread::sleep(Duration::from_millis(50));
        assert!(engine.is_playing());

        engine.play(&frames(800), PlaybackMode::Async).unwrap();

        let started = Instant::now();
        engine.stop();
        assert!(started.elapsed() <= WORKER_JOIN_TIMEOUT + Duration::from_millis(200));
        assert!(!engine.is_playing());
    }

    #[test]
    fn test_stop_when_idle_is_noop() {
        let mut engine = sim_engine(DeviceConfig::default());
        engine.stop();
        engine.stop();
        assert!(!engine.is_playing());
    }

    #[test]
    fn test_stop_cancels_async_session_within_bound() {
        let mut engine = sim_engine(DeviceConfig::default().with_sample_rate(8000));

        engine.play(&frames(4000), PlaybackMode::Async).unwrap();
        thread::sleep(Duration::from_millis(50));
        assert!(engine.is_playing());

        let started = Instant::now();
        engine.stop();

        assert!(!engine.is_playing());
        assert!(started.elapsed() <= WORKER_JOIN_TIMEOUT + Duration::from_millis(200));
    }

    #[test]
    fn test_blocking_play_supersedes_async() {
        let mut engine = sim_engine(DeviceConfig::default().with_sample_rate(8000));

        engine.play(&frames(2000), PlaybackMode::Async).unwrap();
        engine.play(&frames(80), PlaybackMode::Blocking).unwrap();

        assert!(!engine.is_playing());
    }

    #[test]
    fn test_cancelled_session_skips_write_and_callback() {
        let handle =
            DeviceHandle::simulated(DeviceConfig::default().with_sample_rate(8000)).unwrap();
        let buffer = frames(2000);
        let cancel = AtomicBool::new(true);
        let fired = Arc::new(AtomicBool::new(false));
        let fired_in_callback = Arc::clone(&fired);

        let started = Instant::now();
        run_session(
            &handle.writer(),
            &buffer,
            &cancel,
            Some(Box::new(move || {
                fired_in_callback.store(true, Ordering::SeqCst)
            })),
        )
        .unwrap();

        // Cancelled before the write: no 250 ms simulated sleep, no callback.
        assert!(started.elapsed() < Duration::from_millis(50));
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_stale_worker_cannot_clear_newer_session() {
        let state = SessionState::new();

        let first = state.begin(1);
        let second = state.begin(2);
        assert!(state.is_playing());

        // The stale worker's finish must not affect the newer session.
        state.finish(first);
        assert!(state.is_playing());

        state.finish(second);
        assert!(!state.is_playing());
    }

    #[test]
    fn test_play_once_blocks_for_buffer_duration() {
        // With no platform device this runs against the simulation backend,
        // which preserves the timing contract.
        let started = Instant::now();
        play_once(&frames(800), 8000).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(90));
    }

    #[test]
    fn test_play_once_reports_invalid_rate_as_open_failure() {
        let err = play_once(&frames(8), 0).unwrap_err();

        // A rejected configuration never counts as a write failure.
        assert!(!err.is_write_error());
        assert!(matches!(
            err,
            PlaybackError::OpenFailed {
                source: DeviceError::InvalidConfig { .. }
            }
        ));
    }

    #[test]
    fn test_engine_open_validates_config() {
        let config = DeviceConfig::new(0, 1, 1024, SampleFormat::Float32);
        assert!(PlaybackEngine::open(config).is_err());
    }
}
