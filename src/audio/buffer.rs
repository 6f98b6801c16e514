//! PCM frames and the lock-free playback queue
//!
//! Frames travel between the network loops and the audio callbacks through a
//! bounded single-producer single-consumer queue, so the realtime callback
//! never takes a lock.

use bytes::Bytes;
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// One buffer of 16-bit signed little-endian mono PCM.
///
/// Frames built by capture hold exactly `FRAME_SAMPLES` samples. Frames
/// received from the network are taken as-is: a trailing odd byte is ignored
/// on playback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioFrame {
    data: Bytes,
}

impl AudioFrame {
    /// Wrap raw little-endian PCM bytes without copying
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    /// Encode samples as little-endian PCM
    pub fn from_samples(samples: &[i16]) -> Self {
        let mut data = Vec::with_capacity(samples.len() * 2);
        for sample in samples {
            data.extend_from_slice(&sample.to_le_bytes());
        }
        Self { data: data.into() }
    }

    /// A frame of `samples` zero samples
    pub fn silence(samples: usize) -> Self {
        Self {
            data: Bytes::from(vec![0u8; samples * 2]),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }

    /// Number of whole samples in the frame
    pub fn sample_count(&self) -> usize {
        self.data.len() / 2
    }

    /// Sample at `index`, if the frame holds that many whole samples
    pub fn sample(&self, index: usize) -> Option<i16> {
        let at = index.checked_mul(2)?;
        let bytes = self.data.get(at..at + 2)?;
        Some(i16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Decode the whole samples of the frame
    pub fn samples(&self) -> impl Iterator<Item = i16> + '_ {
        self.data
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
    }

    pub fn is_empty(&self) -> bool {
        self.sample_count() == 0
    }
}

/// Lock-free ring buffer for audio frames
pub struct RingBuffer {
    queue: ArrayQueue<AudioFrame>,
    overflow_count: AtomicUsize,
    underrun_count: AtomicUsize,
}

impl RingBuffer {
    /// Create a new ring buffer with the specified capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
            overflow_count: AtomicUsize::new(0),
            underrun_count: AtomicUsize::new(0),
        }
    }

    /// Push a frame into the buffer
    /// Returns false if buffer is full (overflow); the frame is dropped
    pub fn push(&self, frame: AudioFrame) -> bool {
        match self.queue.push(frame) {
            Ok(()) => true,
            Err(_) => {
                self.overflow_count.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Pop a frame from the buffer, or None if it is empty
    pub fn pop(&self) -> Option<AudioFrame> {
        self.queue.pop()
    }

    /// Count one underrun: playback ran dry and fell back to silence
    pub fn record_underrun(&self) {
        self.underrun_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn overflow_count(&self) -> usize {
        self.overflow_count.load(Ordering::Relaxed)
    }

    pub fn underrun_count(&self) -> usize {
        self.underrun_count.load(Ordering::Relaxed)
    }
}

/// Thread-safe handle to a ring buffer
pub type SharedRingBuffer = Arc<RingBuffer>;

/// Create a new shared ring buffer
pub fn create_shared_buffer(capacity: usize) -> SharedRingBuffer {
    Arc::new(RingBuffer::new(capacity))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_sample_encoding() {
        let frame = AudioFrame::from_samples(&[1, -1, i16::MAX, i16::MIN]);
        assert_eq!(frame.as_bytes(), &[1, 0, 0xFF, 0xFF, 0xFF, 0x7F, 0x00, 0x80]);
        assert_eq!(frame.sample_count(), 4);
        assert_eq!(frame.samples().collect::<Vec<_>>(), vec![1, -1, i16::MAX, i16::MIN]);
        assert_eq!(frame.sample(2), Some(i16::MAX));
        assert_eq!(frame.sample(4), None);
    }

    #[test]
    fn test_odd_trailing_byte_ignored() {
        let frame = AudioFrame::from_bytes(vec![0x10, 0x00, 0x7F]);
        assert_eq!(frame.sample_count(), 1);
        assert_eq!(frame.samples().collect::<Vec<_>>(), vec![16]);
        assert_eq!(frame.sample(1), None);
    }

    #[test]
    fn test_silence() {
        let frame = AudioFrame::silence(8);
        assert_eq!(frame.as_bytes().len(), 16);
        assert!(frame.samples().all(|s| s == 0));
    }

    #[test]
    fn test_ring_buffer_basic() {
        let buffer = RingBuffer::new(4);

        assert!(buffer.push(AudioFrame::from_samples(&[1])));
        assert!(buffer.push(AudioFrame::from_samples(&[2])));
        assert_eq!(buffer.len(), 2);

        assert_eq!(buffer.pop().unwrap().sample(0), Some(1));
        assert_eq!(buffer.pop().unwrap().sample(0), Some(2));

        assert!(buffer.is_empty());
        assert!(buffer.pop().is_none());
        assert_eq!(buffer.underrun_count(), 0);

        buffer.record_underrun();
        assert_eq!(buffer.underrun_count(), 1);
    }

    #[test]
    fn test_ring_buffer_overflow_drops_newest() {
        let buffer = RingBuffer::new(2);
        assert!(buffer.push(AudioFrame::from_samples(&[1])));
        assert!(buffer.push(AudioFrame::from_samples(&[2])));
        assert!(!buffer.push(AudioFrame::from_samples(&[3])));
        assert_eq!(buffer.overflow_count(), 1);
        assert_eq!(buffer.pop().unwrap().sample(0), Some(1));
    }
}
