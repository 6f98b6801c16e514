//! Loudness feedback for the mic and speaker paths

/// RMS of a buffer of 16-bit signed little-endian samples, truncated to an integer.
///
/// Never fails: an empty or odd-length buffer yields 0.
pub fn amplitude(frame: &[u8]) -> u32 {
    if frame.is_empty() || frame.len() % 2 != 0 {
        return 0;
    }

    let count = frame.len() / 2;
    let sum_squares: f64 = frame
        .chunks_exact(2)
        .map(|pair| {
            let sample = f64::from(i16::from_le_bytes([pair[0], pair[1]]));
            sample * sample
        })
        .sum();

    (sum_squares / count as f64).sqrt() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::AudioFrame;
    use proptest::prelude::*;

    #[test]
    fn test_silence_is_zero() {
        assert_eq!(amplitude(AudioFrame::silence(1024).as_bytes()), 0);
    }

    #[test]
    fn test_malformed_is_zero() {
        assert_eq!(amplitude(&[]), 0);
        assert_eq!(amplitude(&[0xFF, 0x7F, 0x01]), 0);
    }

    #[test]
    fn test_constant_signal() {
        let frame = AudioFrame::from_samples(&[1000; 64]);
        assert_eq!(amplitude(frame.as_bytes()), 1000);

        let square = AudioFrame::from_samples(&[300, -300, 300, -300]);
        assert_eq!(amplitude(square.as_bytes()), 300);
    }

    #[test]
    fn test_full_scale() {
        let frame = AudioFrame::from_samples(&[i16::MIN; 16]);
        assert_eq!(amplitude(frame.as_bytes()), 32768);
    }

    proptest! {
        #[test]
        fn prop_sign_flip_invariant(samples in prop::collection::vec(-i16::MAX..=i16::MAX, 1..512)) {
            let flipped: Vec<i16> = samples.iter().map(|s| -s).collect();
            prop_assert_eq!(
                amplitude(AudioFrame::from_samples(&samples).as_bytes()),
                amplitude(AudioFrame::from_samples(&flipped).as_bytes())
            );
        }

        #[test]
        fn prop_bounded_by_peak(samples in prop::collection::vec(any::<i16>(), 1..512)) {
            let peak = samples.iter().map(|s| i32::from(*s).unsigned_abs()).max().unwrap_or(0);
            prop_assert!(amplitude(AudioFrame::from_samples(&samples).as_bytes()) <= peak);
        }
    }
}
