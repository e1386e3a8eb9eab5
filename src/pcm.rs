//! PCM sample conversion.
//!
//! The wire carries interleaved int16; local audio engines consume
//! per-channel `f32` planes in [-1, 1]. The conversion pair is fixed so
//! both ends agree: floats are clamped then rounded through `* 32767`
//! on the way in, and divided by 32768 on the way out. A round trip
//! moves a sample by at most one LSB.

use crate::{Error, Result};

/// Convert one int16 sample to float in [-1, 1).
#[inline]
pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

/// Convert one float sample to int16, clamping to [-1, 1] first.
#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * 32767.0).round() as i16
}

/// De-interleave int16 samples into per-channel float planes.
///
/// The sample count must divide evenly by `channels`.
pub fn deinterleave(samples: &[i16], channels: u8) -> Result<Vec<Vec<f32>>> {
    let channels = channels as usize;
    if channels == 0 || samples.len() % channels != 0 {
        return Err(Error::ChannelMismatch {
            samples: samples.len(),
            channels,
        });
    }

    let frames = samples.len() / channels;
    let mut planes = vec![Vec::with_capacity(frames); channels];
    for frame in samples.chunks_exact(channels) {
        for (plane, &sample) in planes.iter_mut().zip(frame) {
            plane.push(i16_to_f32(sample));
        }
    }
    Ok(planes)
}

/// Interleave per-channel float planes into int16 samples.
///
/// All planes must have the same length.
pub fn interleave(planes: &[Vec<f32>]) -> Result<Vec<i16>> {
    let Some(first) = planes.first() else {
        return Err(Error::ChannelMismatch {
            samples: 0,
            channels: 0,
        });
    };
    let frames = first.len();
    if planes.iter().any(|plane| plane.len() != frames) {
        return Err(Error::ChannelMismatch {
            samples: planes.iter().map(Vec::len).sum(),
            channels: planes.len(),
        });
    }

    let mut samples = Vec::with_capacity(frames * planes.len());
    for i in 0..frames {
        for plane in planes {
            samples.push(f32_to_i16(plane[i]));
        }
    }
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_stays_within_one_lsb() {
        let input: Vec<i16> = vec![-32768, -1, 0, 1, 32767];

        let reencoded: Vec<i16> = input
            .iter()
            .map(|&s| f32_to_i16(i16_to_f32(s)))
            .collect();

        for (&a, &b) in input.iter().zip(&reencoded) {
            assert!((a as i32 - b as i32).abs() <= 1, "{a} -> {b}");
            assert_eq!(a.signum(), b.signum());
        }
        assert_eq!(reencoded[2], 0);
    }

    #[test]
    fn f32_to_i16_clamps_out_of_range() {
        assert_eq!(f32_to_i16(1.5), 32767);
        assert_eq!(f32_to_i16(-1.5), -32767);
    }

    #[test]
    fn deinterleave_splits_channels() {
        // L R L R across two frames.
        let planes = deinterleave(&[100, -100, 200, -200], 2).unwrap();

        assert_eq!(planes.len(), 2);
        assert_eq!(planes[0], vec![i16_to_f32(100), i16_to_f32(200)]);
        assert_eq!(planes[1], vec![i16_to_f32(-100), i16_to_f32(-200)]);
    }

    #[test]
    fn deinterleave_rejects_uneven_input() {
        assert!(matches!(
            deinterleave(&[1, 2, 3], 2),
            Err(Error::ChannelMismatch {
                samples: 3,
                channels: 2
            })
        ));
    }

    #[test]
    fn interleave_restores_channel_order() {
        let left = vec![0.5, -0.5];
        let right = vec![0.25, -0.25];

        let samples = interleave(&[left, right]).unwrap();
        assert_eq!(samples, vec![16384, 8192, -16384, -8192]);
    }

    #[test]
    fn interleave_rejects_ragged_planes() {
        let result = interleave(&[vec![0.0, 0.0], vec![0.0]]);
        assert!(matches!(result, Err(Error::ChannelMismatch { .. })));
    }
}
