//! Gain stage and PCM serialization for outgoing audio

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use bytes::{Buf, BufMut, BytesMut};

/// Live-adjustable gain shared between the control surface and the streamer.
///
/// Stored as `f32` bits in an atomic; readers may see a slightly stale value,
/// which only affects amplitude.
#[derive(Debug, Clone)]
pub struct Sensitivity {
    bits: Arc<AtomicU32>,
    max: f32,
}

impl Sensitivity {
    pub fn new(initial: f32, max: f32) -> Self {
        let max = if max.is_finite() && max > 0.0 { max } else { 1.0 };
        Self {
            bits: Arc::new(AtomicU32::new(clamp_gain(initial, max).to_bits())),
            max,
        }
    }

    /// Current gain factor
    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    /// Set the gain, clamped to `0.0..=max`. Returns the value stored.
    pub fn set(&self, gain: f32) -> f32 {
        let gain = clamp_gain(gain, self.max);
        self.bits.store(gain.to_bits(), Ordering::Relaxed);
        gain
    }

    pub fn max(&self) -> f32 {
        self.max
    }
}

fn clamp_gain(gain: f32, max: f32) -> f32 {
    if gain.is_nan() {
        0.0
    } else {
        gain.clamp(0.0, max)
    }
}

/// Scale one sample, saturating at the i16 bounds.
///
/// The product is formed in `f64`, where it is exact, so rounding sees the
/// true value.
#[inline]
pub fn apply_gain(sample: i16, gain: f32) -> i16 {
    let scaled = (f64::from(sample) * f64::from(gain)).round();
    scaled.clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16
}

/// Append `samples * gain` to `out` as little-endian i16
pub fn encode_frame(samples: &[i16], gain: f32, out: &mut BytesMut) {
    out.reserve(samples.len() * 2);
    for &sample in samples {
        out.put_i16_le(apply_gain(sample, gain));
    }
}

/// Decode a little-endian i16 payload; a trailing odd byte is ignored
pub fn decode_frame(mut payload: &[u8]) -> Vec<i16> {
    let mut samples = Vec::with_capacity(payload.len() / 2);
    while payload.remaining() >= 2 {
        samples.push(payload.get_i16_le());
    }
    samples
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_gain_clamps_at_both_bounds() {
        assert_eq!(apply_gain(30000, 2.0), 32767);
        assert_eq!(apply_gain(-30000, 2.0), -32768);
        assert_eq!(apply_gain(i16::MIN, 1.0), i16::MIN);
        assert_eq!(apply_gain(i16::MAX, 1.0), i16::MAX);
    }

    #[test]
    fn test_gain_rounds() {
        assert_eq!(apply_gain(3, 0.5), 2);
        assert_eq!(apply_gain(-3, 0.5), -2);
        assert_eq!(apply_gain(1000, 0.7), 700);
        assert_eq!(apply_gain(1234, 0.0), 0);
    }

    #[test]
    fn test_gain_rounds_exact_product() {
        // -32765 * 0.7f32 is just above -22935.5; an f32 product lands on the tie
        assert_eq!(apply_gain(-32765, 0.7), -22935);

        for gain in [0.7f32, 0.3, 1.1, 1.3, 0.9] {
            for sample in i16::MIN..=i16::MAX {
                let expected = (f64::from(sample) * f64::from(gain))
                    .round()
                    .clamp(-32768.0, 32767.0) as i16;
                assert_eq!(apply_gain(sample, gain), expected, "sample {} gain {}", sample, gain);
            }
        }
    }

    #[test]
    fn test_encode_is_little_endian() {
        let mut out = BytesMut::new();
        encode_frame(&[0x0102, -2], 1.0, &mut out);
        assert_eq!(&out[..], &[0x02, 0x01, 0xFE, 0xFF]);
    }

    #[test]
    fn test_decode_ignores_trailing_byte() {
        assert_eq!(decode_frame(&[0x02, 0x01, 0xFE, 0xFF, 0x7F]), vec![0x0102, -2]);
        assert!(decode_frame(&[]).is_empty());
    }

    #[test]
    fn test_sensitivity_is_clamped() {
        let sensitivity = Sensitivity::new(0.7, 2.0);
        assert_eq!(sensitivity.get(), 0.7);

        assert_eq!(sensitivity.set(3.0), 2.0);
        assert_eq!(sensitivity.set(-1.0), 0.0);
        assert_eq!(sensitivity.set(f32::NAN), 0.0);

        let shared = sensitivity.clone();
        shared.set(1.25);
        assert_eq!(sensitivity.get(), 1.25);
    }

    proptest! {
        #[test]
        fn prop_gain_matches_clamped_round(sample in any::<i16>(), gain in 0.0f32..=2.0) {
            let expected = ((sample as f64) * (gain as f64))
                .round()
                .clamp(-32768.0, 32767.0);
            prop_assert_eq!(apply_gain(sample, gain), expected as i16);
        }

        #[test]
        fn prop_unity_gain_is_lossless(samples in proptest::collection::vec(any::<i16>(), 0..512)) {
            let mut out = BytesMut::new();
            encode_frame(&samples, 1.0, &mut out);
            prop_assert_eq!(out.len(), samples.len() * 2);
            prop_assert_eq!(decode_frame(&out), samples);
        }
    }
}
