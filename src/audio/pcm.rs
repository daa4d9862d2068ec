//! Linear PCM sample conversion
//!
//! The wire carries 16-bit signed little-endian PCM in both directions;
//! audio devices work in normalized f32. Conversion happens at the frame
//! boundary, nowhere else.

use crate::Result;

/// Quantize normalized f32 samples to 16-bit little-endian PCM bytes.
#[must_use]
pub fn encode_i16le(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        #[allow(clippy::cast_possible_truncation)]
        let quantized = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
        bytes.extend_from_slice(&quantized.to_le_bytes());
    }
    bytes
}

/// Decode 16-bit little-endian PCM bytes to normalized f32 samples.
///
/// A trailing odd byte is ignored.
#[must_use]
pub fn decode_i16le(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
        .collect()
}

/// Encode f32 samples as WAV bytes (16-bit mono), for debug captures.
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| crate::Error::Audio(e.to_string()))?;

        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| crate::Error::Audio(e.to_string()))?;
        }

        writer
            .finalize()
            .map_err(|e| crate::Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
