//! Speaker playback
//!
//! The cpal output callback pulls frames from the shared ring buffer one
//! sample at a time and plays silence when nothing is queued. Frames are
//! played in arrival order; lost datagrams simply leave a gap.

use cpal::traits::DeviceTrait;

use crate::audio::buffer::{AudioFrame, SharedRingBuffer};
use crate::audio::device::StreamPlan;
use crate::error::AudioError;

/// Build (but do not start) the output stream described by `plan`
pub fn build_playback_stream(
    device: &cpal::Device,
    plan: &StreamPlan,
    ring: SharedRingBuffer,
) -> Result<cpal::Stream, AudioError> {
    match plan.format {
        cpal::SampleFormat::I16 => build::<i16, _>(device, plan, ring, |s| s),
        cpal::SampleFormat::F32 => build::<f32, _>(device, plan, ring, i16_to_f32),
        other => Err(AudioError::UnsupportedFormat(format!("{:?}", other))),
    }
}

fn build<T, F>(
    device: &cpal::Device,
    plan: &StreamPlan,
    ring: SharedRingBuffer,
    convert: F,
) -> Result<cpal::Stream, AudioError>
where
    T: cpal::SizedSample,
    F: Fn(i16) -> T + Send + 'static,
{
    let channels = usize::from(plan.channels.max(1));
    let mut cursor = PlaybackCursor::default();

    device
        .build_output_stream(
            &plan.stream_config(),
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                for frame in data.chunks_mut(channels) {
                    let sample = convert(cursor.next_sample(&ring));
                    for out in frame.iter_mut() {
                        *out = sample;
                    }
                }
            },
            |err| tracing::warn!("Playback stream error: {}", err),
            None,
        )
        .map_err(|e| AudioError::StreamError(e.to_string()))
}

pub(crate) fn i16_to_f32(sample: i16) -> f32 {
    f32::from(sample) / 32768.0
}

/// Read position inside the frame currently being played
#[derive(Default)]
pub struct PlaybackCursor {
    current: Option<AudioFrame>,
    position: usize,
}

impl PlaybackCursor {
    /// Next sample to play, or silence when the queue is dry
    pub fn next_sample(&mut self, ring: &SharedRingBuffer) -> i16 {
        loop {
            if let Some(frame) = &self.current {
                if let Some(sample) = frame.sample(self.position) {
                    self.position += 1;
                    return sample;
                }
            }

            match ring.pop() {
                Some(frame) => {
                    self.current = Some(frame);
                    self.position = 0;
                }
                None => {
                    // Counted once per gap, not per silent sample.
                    if self.current.take().is_some() {
                        ring.record_underrun();
                    }
                    return 0;
                }
            }
        }
    }
}
