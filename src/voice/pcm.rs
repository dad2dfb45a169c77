//! 16-bit PCM conversion
//!
//! Outbound microphone blocks are clamped and scaled asymmetrically:
//! negative samples by 32768, non-negative by 32767, so -1.0 maps to
//! `i16::MIN` and 1.0 to `i16::MAX`. Decoding is the exact inverse.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::DecodeError;

/// Convert one float sample to a signed 16-bit sample
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn float_to_i16(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

/// Convert one signed 16-bit sample back to a float in [-1, 1]
#[must_use]
pub fn i16_to_float(sample: i16) -> f32 {
    if sample < 0 {
        f32::from(sample) / 32768.0
    } else {
        f32::from(sample) / 32767.0
    }
}

/// Encode a block of float samples as little-endian 16-bit PCM bytes
#[must_use]
pub fn encode_block(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        bytes.extend_from_slice(&float_to_i16(sample).to_le_bytes());
    }
    bytes
}

/// Decode little-endian 16-bit PCM bytes into float samples
///
/// # Errors
///
/// Returns error if the byte count is odd or zero
pub fn decode_pcm(bytes: &[u8]) -> Result<Vec<f32>, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    if bytes.len() % 2 != 0 {
        return Err(DecodeError::OddLength(bytes.len()));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16_to_float(i16::from_le_bytes([pair[0], pair[1]])))
        .collect())
}

/// Decode a textual audio payload (hex or base64) into raw bytes
///
/// Lowercase hex is tried first since that is what the service sends; any
/// other payload is standard base64. Uppercase hex is never accepted, since
/// base64 of silence (`AAAA...`) would otherwise pass as hex.
///
/// # Errors
///
/// Returns error if the payload is neither encoding
pub fn decode_payload_bytes(payload: &str) -> Result<Vec<u8>, DecodeError> {
    let payload = payload.trim();
    if payload.is_empty() {
        return Err(DecodeError::Empty);
    }

    if looks_like_hex(payload) {
        if let Ok(bytes) = hex::decode(payload) {
            return Ok(bytes);
        }
    }

    STANDARD
        .decode(payload)
        .map_err(|e| DecodeError::Encoding(e.to_string()))
}

/// Decode a textual audio payload straight to playable float samples
///
/// # Errors
///
/// Returns error if the text encoding or the PCM layout is malformed
pub fn decode_payload(payload: &str) -> Result<Vec<f32>, DecodeError> {
    decode_pcm(&decode_payload_bytes(payload)?)
}

fn looks_like_hex(s: &str) -> bool {
    s.len() % 2 == 0 && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
