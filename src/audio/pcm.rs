//! Float / PCM16 sample conversion.
//!
//! One scaling convention in both directions: hard clamp to [-1.0, 1.0],
//! then scale by 32767. Using the same factor for encode and decode keeps
//! round-trip error within one quantization step.

use bytes::Bytes;

/// Convert one normalized float sample to a 16-bit signed sample.
#[inline]
pub fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * 32767.0).round() as i16
}

/// Convert one 16-bit signed sample back to a normalized float.
#[inline]
pub fn to_f32(sample: i16) -> f32 {
    f32::from(sample) / 32767.0
}

/// Encode a float frame into `out`, reusing its allocation.
pub fn encode_frame(samples: &[f32], out: &mut Vec<i16>) {
    out.clear();
    out.extend(samples.iter().map(|&s| to_i16(s)));
}

/// Little-endian byte view of a PCM16 frame, ready for the wire.
pub fn frame_to_bytes(samples: &[i16]) -> Bytes {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    Bytes::from(bytes)
}

/// Decode little-endian PCM16 bytes into normalized floats. A trailing
/// odd byte is ignored; the envelope codec rejects such payloads before
/// they get here.
pub fn bytes_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| to_f32(i16::from_le_bytes([pair[0], pair[1]])))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_error_is_within_one_quantization_step() {
        let step = 1.0 / 32768.0;
        for i in 0..=2000 {
            let sample = -1.0 + i as f32 * 0.001;
            let back = to_f32(to_i16(sample));
            assert!(
                (back - sample.clamp(-1.0, 1.0)).abs() <= step,
                "sample {} decoded to {}",
                sample,
                back
            );
        }
    }

    #[test]
    fn clamps_out_of_range_input() {
        assert_eq!(to_i16(1.5), 32767);
        assert_eq!(to_i16(-1.5), -32767);
        assert_eq!(to_i16(0.0), 0);
    }

    #[test]
    fn byte_layout_is_little_endian() {
        let bytes = frame_to_bytes(&[1, -2]);
        assert_eq!(bytes.as_ref(), &[0x01, 0x00, 0xfe, 0xff]);
    }

    #[test]
    fn zero_pcm_decodes_to_zero_floats() {
        let samples = bytes_to_f32(&[0, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(samples, vec![0.0; 4]);
    }

    #[test]
    fn encode_frame_reuses_buffer() {
        let mut out = Vec::new();
        encode_frame(&[0.5, -0.5], &mut out);
        assert_eq!(out.len(), 2);
        encode_frame(&[1.0], &mut out);
        assert_eq!(out, vec![32767]);
    }
}
