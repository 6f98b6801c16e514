//! Audio device capability and its two platform backends
//!
//! Callers see four operations ([`AudioDevice`]) and never branch on the
//! platform. The backend is picked once by [`platform_device`]:
//!
//! - [`MobileAudio`]: native low-latency path. Prefers i16 streams and asks
//!   for twice the backend's minimum buffer.
//! - [`DesktopAudio`]: desktop path. Prefers f32 streams and asks for at
//!   least one frame of buffering, never less than twice the minimum.
//!
//! Both run their cpal streams on a dedicated thread that owns them for the
//! lifetime of the open device. No error from the backend ever reaches the
//! caller: `open` reports a bool, reads yield `None`, writes are dropped.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::bounded;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::{create_shared_buffer, AudioFrame, SharedRingBuffer};
use crate::audio::capture::{build_capture_stream, FrameAssembler, CAPTURE_QUEUE_CHUNKS};
use crate::audio::playback::build_playback_stream;
use crate::constants::{CAPTURE_POLL_MS, FRAME_SAMPLES, PLAYBACK_QUEUE_FRAMES, SAMPLE_RATE};
use crate::error::AudioError;

/// Raw PCM capture and playback, one frame at a time
pub trait AudioDevice: Send + Sync {
    /// Which backend this device drives
    fn backend(&self) -> Backend;

    /// Acquire capture and playback streams. Returns false if either cannot be opened.
    fn open(&self) -> bool;

    /// Block for one captured frame. `None` is normal: no data yet, or the device is closed.
    fn read_frame(&self) -> Option<AudioFrame>;

    /// Queue one frame for playback. Dropped if the device is closed or the queue is full.
    fn write_frame(&self, frame: &AudioFrame);

    /// Stop and release both streams. Idempotent.
    fn close(&self);
}

/// Platform audio backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Mobile,
    Desktop,
}

impl Backend {
    /// Backend for the platform this binary was built for
    pub fn detect() -> Self {
        if cfg!(any(target_os = "android", target_os = "ios")) {
            Backend::Mobile
        } else {
            Backend::Desktop
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Mobile => write!(f, "mobile"),
            Backend::Desktop => write!(f, "desktop"),
        }
    }
}

/// Build the audio device for the running platform
pub fn platform_device() -> Arc<dyn AudioDevice> {
    match Backend::detect() {
        Backend::Mobile => Arc::new(MobileAudio::new()),
        Backend::Desktop => Arc::new(DesktopAudio::new()),
    }
}

/// Concrete stream parameters chosen for one direction
#[derive(Debug, Clone, PartialEq)]
pub struct StreamPlan {
    pub channels: u16,
    pub format: cpal::SampleFormat,
    pub buffer_size: cpal::BufferSize,
}

impl StreamPlan {
    pub fn stream_config(&self) -> cpal::StreamConfig {
        cpal::StreamConfig {
            channels: self.channels,
            sample_rate: cpal::SampleRate(SAMPLE_RATE),
            buffer_size: self.buffer_size.clone(),
        }
    }
}

/// One supported configuration range, reduced to what negotiation needs
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigCandidate {
    pub channels: u16,
    pub min_rate: u32,
    pub max_rate: u32,
    pub format: cpal::SampleFormat,
    /// Backend buffer range in frames, when the backend reports one
    pub buffer_range: Option<(u32, u32)>,
}

impl From<&cpal::SupportedStreamConfigRange> for ConfigCandidate {
    fn from(range: &cpal::SupportedStreamConfigRange) -> Self {
        let buffer_range = match range.buffer_size() {
            cpal::SupportedBufferSize::Range { min, max } => Some((*min, *max)),
            cpal::SupportedBufferSize::Unknown => None,
        };
        Self {
            channels: range.channels(),
            min_rate: range.min_sample_rate().0,
            max_rate: range.max_sample_rate().0,
            format: range.sample_format(),
            buffer_range,
        }
    }
}

/// How a backend sizes its stream buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferPolicy {
    /// Twice the backend minimum
    DoubleMinimum,
    /// Twice the backend minimum, but no less than one frame
    DoubleMinimumAtLeastFrame,
}

impl BufferPolicy {
    pub fn size(self, range: Option<(u32, u32)>) -> cpal::BufferSize {
        let Some((min, max)) = range else {
            return cpal::BufferSize::Default;
        };
        let doubled = min.max(1).saturating_mul(2);
        let wanted = match self {
            BufferPolicy::DoubleMinimum => doubled,
            BufferPolicy::DoubleMinimumAtLeastFrame => doubled.max(FRAME_SAMPLES as u32),
        };
        cpal::BufferSize::Fixed(wanted.clamp(min, max.max(min)))
    }
}

/// Negotiation preferences of one backend
#[derive(Debug, Clone, Copy)]
pub struct Profile {
    pub preferred_format: cpal::SampleFormat,
    pub buffer_policy: BufferPolicy,
}

impl Profile {
    pub fn mobile() -> Self {
        Self {
            preferred_format: cpal::SampleFormat::I16,
            buffer_policy: BufferPolicy::DoubleMinimum,
        }
    }

    pub fn desktop() -> Self {
        Self {
            preferred_format: cpal::SampleFormat::F32,
            buffer_policy: BufferPolicy::DoubleMinimumAtLeastFrame,
        }
    }

    /// Pick a configuration that can run at the fixed sample rate.
    ///
    /// Mono beats multi-channel, then the preferred sample format wins.
    pub fn choose(&self, candidates: &[ConfigCandidate]) -> Option<StreamPlan> {
        candidates
            .iter()
            .filter(|c| c.min_rate <= SAMPLE_RATE && SAMPLE_RATE <= c.max_rate)
            .filter(|c| matches!(c.format, cpal::SampleFormat::I16 | cpal::SampleFormat::F32))
            .filter(|c| c.channels > 0)
            .min_by_key(|c| (c.channels != 1, c.format != self.preferred_format, c.channels))
            .map(|c| StreamPlan {
                channels: c.channels,
                format: c.format,
                buffer_size: self.buffer_policy.size(c.buffer_range),
            })
    }
}

/// Audio thread and the handles the session-facing side keeps
struct Worker {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Shared cpal engine behind both backends
struct CpalEngine {
    backend: Backend,
    profile: Profile,
    worker: Mutex<Option<Worker>>,
    capture: Mutex<Option<FrameAssembler>>,
    playback: RwLock<Option<SharedRingBuffer>>,
}

impl CpalEngine {
    fn new(backend: Backend, profile: Profile) -> Self {
        Self {
            backend,
            profile,
            worker: Mutex::new(None),
            capture: Mutex::new(None),
            playback: RwLock::new(None),
        }
    }

    fn open(&self) -> bool {
        match self.try_open() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(backend = %self.backend, "Audio device unavailable: {}", e);
                false
            }
        }
    }

    fn try_open(&self) -> Result<(), AudioError> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }

        let (capture_tx, capture_rx) = bounded::<Vec<i16>>(CAPTURE_QUEUE_CHUNKS);
        let ring = create_shared_buffer(PLAYBACK_QUEUE_FRAMES);
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

        let running = Arc::new(AtomicBool::new(true));
        let running_for_thread = running.clone();
        let ring_for_thread = ring.clone();
        let profile = self.profile;

        let handle = thread::Builder::new()
            .name(format!("audio-{}", self.backend))
            .spawn(move || match start_streams(&profile, capture_tx, ring_for_thread) {
                Ok(streams) => {
                    let _ = ready_tx.send(Ok(()));

                    // Keep the streams alive while running
                    while running_for_thread.load(Ordering::Relaxed) {
                        thread::sleep(Duration::from_millis(10));
                    }

                    drop(streams);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(AudioError::StreamError("audio thread exited during setup".into()));
            }
        }

        *self.capture.lock() = Some(FrameAssembler::new(
            capture_rx,
            FRAME_SAMPLES,
            Duration::from_millis(CAPTURE_POLL_MS),
        ));
        *self.playback.write() = Some(ring);
        *worker = Some(Worker { running, handle });

        tracing::info!(backend = %self.backend, "Audio device opened");
        Ok(())
    }

    fn read_frame(&self) -> Option<AudioFrame> {
        self.capture.lock().as_mut()?.next_frame()
    }

    fn write_frame(&self, frame: &AudioFrame) {
        if let Some(ring) = self.playback.read().as_ref() {
            if !ring.push(frame.clone()) {
                tracing::trace!("Playback queue full, frame dropped");
            }
        }
    }

    fn close(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };

        worker.running.store(false, Ordering::SeqCst);
        if worker.handle.join().is_err() {
            tracing::warn!(backend = %self.backend, "Audio thread panicked");
        }

        self.capture.lock().take();
        if let Some(ring) = self.playback.write().take() {
            tracing::debug!(
                overflows = ring.overflow_count(),
                underruns = ring.underrun_count(),
                "Playback queue stats"
            );
        }

        tracing::info!(backend = %self.backend, "Audio device closed");
    }
}

impl Drop for CpalEngine {
    fn drop(&mut self) {
        self.close();
    }
}

/// Open both default devices and start their streams on the current thread
fn start_streams(
    profile: &Profile,
    capture_tx: crossbeam_channel::Sender<Vec<i16>>,
    ring: SharedRingBuffer,
) -> Result<(cpal::Stream, cpal::Stream), AudioError> {
    let host = cpal::default_host();

    let input = host
        .default_input_device()
        .ok_or_else(|| AudioError::DeviceNotFound("No default input device".to_string()))?;
    let output = host
        .default_output_device()
        .ok_or_else(|| AudioError::DeviceNotFound("No default output device".to_string()))?;

    let input_candidates: Vec<ConfigCandidate> = input
        .supported_input_configs()
        .map_err(|e| AudioError::CpalError(e.to_string()))?
        .map(|range| ConfigCandidate::from(&range))
        .collect();
    let output_candidates: Vec<ConfigCandidate> = output
        .supported_output_configs()
        .map_err(|e| AudioError::CpalError(e.to_string()))?
        .map(|range| ConfigCandidate::from(&range))
        .collect();

    let input_plan = profile.choose(&input_candidates).ok_or_else(|| {
        AudioError::UnsupportedFormat(format!("input cannot capture {} Hz PCM", SAMPLE_RATE))
    })?;
    let output_plan = profile.choose(&output_candidates).ok_or_else(|| {
        AudioError::UnsupportedFormat(format!("output cannot play {} Hz PCM", SAMPLE_RATE))
    })?;

    tracing::debug!(?input_plan, ?output_plan, "Negotiated audio streams");

    let capture = build_capture_stream(&input, &input_plan, capture_tx)?;
    let playback = build_playback_stream(&output, &output_plan, ring)?;

    capture
        .play()
        .map_err(|e| AudioError::StreamError(e.to_string()))?;
    playback
        .play()
        .map_err(|e| AudioError::StreamError(e.to_string()))?;

    Ok((capture, playback))
}

/// Native low-latency backend used on phones
pub struct MobileAudio {
    engine: CpalEngine,
}

impl MobileAudio {
    pub fn new() -> Self {
        Self {
            engine: CpalEngine::new(Backend::Mobile, Profile::mobile()),
        }
    }
}

impl Default for MobileAudio {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioDevice for MobileAudio {
    fn backend(&self) -> Backend {
        Backend::Mobile
    }

    fn open(&self) -> bool {
        self.engine.open()
    }

    fn read_frame(&self) -> Option<AudioFrame> {
        self.engine.read_frame()
    }

    fn write_frame(&self, frame: &AudioFrame) {
        self.engine.write_frame(frame)
    }

    fn close(&self) {
        self.engine.close()
    }
}

/// Desktop backend
pub struct DesktopAudio {
    engine: CpalEngine,
}

impl DesktopAudio {
    pub fn new() -> Self {
        Self {
            engine: CpalEngine::new(Backend::Desktop, Profile::desktop()),
        }
    }
}

impl Default for DesktopAudio {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioDevice for DesktopAudio {
    fn backend(&self) -> Backend {
        Backend::Desktop
    }

    fn open(&self) -> bool {
        self.engine.open()
    }

    fn read_frame(&self) -> Option<AudioFrame> {
        self.engine.read_frame()
    }

    fn write_frame(&self, frame: &AudioFrame) {
        self.engine.write_frame(frame)
    }

    fn close(&self) {
        self.engine.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpal::SampleFormat;

    fn candidate(channels: u16, format: SampleFormat, buffer_range: Option<(u32, u32)>) -> ConfigCandidate {
        ConfigCandidate {
            channels,
            min_rate: 8_000,
            max_rate: 48_000,
            format,
            buffer_range,
        }
    }

    #[test]
    fn test_mobile_prefers_mono_i16() {
        let candidates = vec![
            candidate(2, SampleFormat::I16, None),
            candidate(1, SampleFormat::F32, None),
            candidate(1, SampleFormat::I16, Some((256, 4096))),
        ];
        let plan = Profile::mobile().choose(&candidates).unwrap();
        assert_eq!(plan.channels, 1);
        assert_eq!(plan.format, SampleFormat::I16);
        assert_eq!(plan.buffer_size, cpal::BufferSize::Fixed(512));
    }

    #[test]
    fn test_desktop_prefers_f32_and_at_least_a_frame() {
        let candidates = vec![
            candidate(1, SampleFormat::I16, None),
            candidate(1, SampleFormat::F32, Some((64, 8192))),
        ];
        let plan = Profile::desktop().choose(&candidates).unwrap();
        assert_eq!(plan.format, SampleFormat::F32);
        assert_eq!(plan.buffer_size, cpal::BufferSize::Fixed(FRAME_SAMPLES as u32));
    }

    #[test]
    fn test_falls_back_to_stereo() {
        let candidates = vec![candidate(2, SampleFormat::F32, None)];
        let plan = Profile::mobile().choose(&candidates).unwrap();
        assert_eq!(plan.channels, 2);
        assert_eq!(plan.buffer_size, cpal::BufferSize::Default);
    }

    #[test]
    fn test_rejects_unusable_configs() {
        let mut narrow = candidate(1, SampleFormat::I16, None);
        narrow.min_rate = 44_100;
        let candidates = vec![narrow, candidate(1, SampleFormat::U8, None)];
        assert!(Profile::desktop().choose(&candidates).is_none());
    }

    #[test]
    fn test_buffer_clamped_to_backend_range() {
        assert_eq!(
            BufferPolicy::DoubleMinimum.size(Some((300, 500))),
            cpal::BufferSize::Fixed(500)
        );
        assert_eq!(
            BufferPolicy::DoubleMinimumAtLeastFrame.size(Some((16, 256))),
            cpal::BufferSize::Fixed(256)
        );
    }

    #[test]
    fn test_closed_device_is_inert() {
        let device = DesktopAudio::new();
        assert!(device.read_frame().is_none());
        device.write_frame(&AudioFrame::silence(FRAME_SAMPLES));
        device.close();
        device.close();
    }

    #[test]
    fn test_detect_matches_target() {
        let expected = if cfg!(any(target_os = "android", target_os = "ios")) {
            Backend::Mobile
        } else {
            Backend::Desktop
        };
        assert_eq!(Backend::detect(), expected);
        assert_eq!(platform_device().backend(), expected);
    }
}
