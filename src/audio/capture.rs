//! Microphone capture
//!
//! The cpal input callback downmixes to mono, converts to i16 and hands the
//! chunk to a bounded channel. [`FrameAssembler`] on the reading side slices
//! that stream of chunks into fixed-size [`AudioFrame`]s.

use cpal::traits::DeviceTrait;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use crate::audio::buffer::AudioFrame;
use crate::audio::device::StreamPlan;
use crate::error::AudioError;

/// Chunks queued between the capture callback and the reader
pub const CAPTURE_QUEUE_CHUNKS: usize = 64;

/// Build (but do not start) the input stream described by `plan`
pub fn build_capture_stream(
    device: &cpal::Device,
    plan: &StreamPlan,
    tx: Sender<Vec<i16>>,
) -> Result<cpal::Stream, AudioError> {
    match plan.format {
        cpal::SampleFormat::I16 => build::<i16, _>(device, plan, tx, |s| s),
        cpal::SampleFormat::F32 => build::<f32, _>(device, plan, tx, f32_to_i16),
        other => Err(AudioError::UnsupportedFormat(format!("{:?}", other))),
    }
}

fn build<T, F>(
    device: &cpal::Device,
    plan: &StreamPlan,
    tx: Sender<Vec<i16>>,
    convert: F,
) -> Result<cpal::Stream, AudioError>
where
    T: cpal::SizedSample,
    F: Fn(T) -> i16 + Send + 'static,
{
    let channels = usize::from(plan.channels.max(1));

    device
        .build_input_stream(
            &plan.stream_config(),
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let chunk: Vec<i16> = data.chunks(channels).map(|frame| convert(frame[0])).collect();
                // Reader fell behind or is gone; drop rather than block the callback.
                let _ = tx.try_send(chunk);
            },
            |err| tracing::warn!("Capture stream error: {}", err),
            None,
        )
        .map_err(|e| AudioError::StreamError(e.to_string()))
}

pub(crate) fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16
}

/// Slices captured chunks into frames of exactly `frame_samples` samples
pub struct FrameAssembler {
    rx: Receiver<Vec<i16>>,
    pending: Vec<i16>,
    frame_samples: usize,
    poll: Duration,
}

impl FrameAssembler {
    pub fn new(rx: Receiver<Vec<i16>>, frame_samples: usize, poll: Duration) -> Self {
        Self {
            rx,
            pending: Vec::with_capacity(frame_samples * 2),
            frame_samples,
            poll,
        }
    }

    /// Block until one full frame is available.
    ///
    /// Returns `None` if no chunk arrives within the poll interval or the
    /// capture side has gone away. Partial data is kept for the next call.
    pub fn next_frame(&mut self) -> Option<AudioFrame> {
        loop {
            if self.pending.len() >= self.frame_samples {
                let frame = AudioFrame::from_samples(&self.pending[..self.frame_samples]);
                self.pending.drain(..self.frame_samples);
                return Some(frame);
            }

            match self.rx.recv_timeout(self.poll) {
                Ok(chunk) => self.pending.extend_from_slice(&chunk),
                Err(RecvTimeoutError::Timeout) => return None,
                Err(RecvTimeoutError::Disconnected) => {
                    self.pending.clear();
                    return None;
                }
            }
        }
    }
}
