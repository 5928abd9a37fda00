//! PCM sample conversion and base64 framing helpers.
//!
//! Both legs of the audio bridge carry 16-bit signed little-endian PCM, mono,
//! 24 kHz. Browser clients that capture with an AudioWorklet hand us 32-bit
//! float samples instead, so the bridge converts at the edge. Mismatched
//! sample rates are a configuration error, not something this module
//! corrects.

use base64::prelude::*;
use bytes::Bytes;

use crate::errors::{AppError, AppResult};

/// Expected sample rate on both legs, in Hz.
pub const SAMPLE_RATE_HZ: u32 = 24_000;

/// Convert little-endian PCM16 bytes to float samples in [-1.0, 1.0].
pub fn pcm16_to_f32(pcm: &[u8]) -> Vec<f32> {
    pcm.chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]) as f32 / 32768.0)
        .collect()
}

/// Convert float samples to little-endian PCM16 bytes, clamping out-of-range
/// samples instead of wrapping.
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let clamped = (s.clamp(-1.0, 1.0) * 32767.0).round() as i16;
        out.extend_from_slice(&clamped.to_le_bytes());
    }
    out
}

/// Decode a base64 PCM16 frame as received from a caller transport.
pub fn decode_pcm16_frame(data: &str) -> AppResult<Bytes> {
    let bytes = BASE64_STANDARD
        .decode(data)
        .map_err(|e| AppError::InvalidRequest(format!("invalid base64 audio frame: {e}")))?;
    if bytes.len() % 2 != 0 {
        return Err(AppError::InvalidRequest(
            "audio frame is not whole PCM16 samples".to_string(),
        ));
    }
    Ok(Bytes::from(bytes))
}

/// Decode a base64 frame of raw little-endian f32 samples and convert it to
/// PCM16 for the relay.
pub fn decode_f32_frame(data: &str) -> AppResult<Bytes> {
    let bytes = BASE64_STANDARD
        .decode(data)
        .map_err(|e| AppError::InvalidRequest(format!("invalid base64 audio frame: {e}")))?;
    if bytes.len() % 4 != 0 {
        return Err(AppError::InvalidRequest(
            "audio frame is not whole f32 samples".to_string(),
        ));
    }
    let samples: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Ok(Bytes::from(f32_to_pcm16(&samples)))
}

/// Encode a PCM16 frame for a JSON transport.
pub fn encode_frame(pcm: &[u8]) -> String {
    BASE64_STANDARD.encode(pcm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm16_f32_round_trip_within_one_lsb() {
        let original: Vec<i16> = vec![0, 1, -1, 1000, -1000, i16::MAX, i16::MIN + 1];
        let pcm: Vec<u8> = original.iter().flat_map(|s| s.to_le_bytes()).collect();

        let floats = pcm16_to_f32(&pcm);
        let back = f32_to_pcm16(&floats);
        let decoded: Vec<i16> = back
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();

        for (a, b) in original.iter().zip(decoded.iter()) {
            assert!((a - b).abs() <= 1, "sample {a} round-tripped to {b}");
        }
    }

    #[test]
    fn test_f32_clamps_out_of_range() {
        let pcm = f32_to_pcm16(&[2.0, -2.0]);
        let decoded: Vec<i16> = pcm
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(decoded, vec![i16::MAX, -i16::MAX]);
    }

    #[test]
    fn test_decode_pcm16_frame_rejects_odd_length() {
        let b64 = BASE64_STANDARD.encode([0u8, 1, 2]);
        assert!(decode_pcm16_frame(&b64).is_err());
    }

    #[test]
    fn test_decode_pcm16_frame_rejects_bad_base64() {
        assert!(decode_pcm16_frame("not-base64!!!").is_err());
    }

    #[test]
    fn test_decode_f32_frame_converts() {
        let samples = [0.0f32, 0.5, -0.5];
        let raw: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let b64 = BASE64_STANDARD.encode(&raw);

        let pcm = decode_f32_frame(&b64).unwrap();
        let decoded: Vec<i16> = pcm
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(decoded[0], 0);
        assert!((decoded[1] - 16384).abs() <= 1);
        assert!((decoded[2] + 16384).abs() <= 1);
    }

    #[test]
    fn test_encode_frame_round_trip() {
        let pcm = vec![1u8, 2, 3, 4];
        let encoded = encode_frame(&pcm);
        assert_eq!(decode_pcm16_frame(&encoded).unwrap().as_ref(), &pcm[..]);
    }
}
