//! Sample-rate conversion for synthesized speech headed to the 8 kHz telephony leg.

use rubato::{FftFixedIn, Resampler};
use tracing::debug;

use crate::error::{VoiceError, VoiceResult};

/// Sample rate of the telephony media stream.
pub const TELEPHONY_RATE: u32 = 8000;

const CHUNK_FRAMES: usize = 1024;

/// Resample mono PCM16LE from `from_hz` to `to_hz`.
///
/// The output holds exactly `samples * to_hz / from_hz` samples, aligned with the input (the
/// resampler's delay is trimmed off). A trailing odd byte is ignored.
pub fn resample_pcm16(pcm: &[u8], from_hz: u32, to_hz: u32) -> VoiceResult<Vec<u8>> {
    let even = &pcm[..pcm.len() & !1];
    if from_hz == to_hz || even.is_empty() {
        return Ok(even.to_vec());
    }
    if from_hz == 0 || to_hz == 0 {
        return Err(VoiceError::Codec(format!("invalid sample rates {from_hz} -> {to_hz}")));
    }

    let input: Vec<f32> = even
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect();
    let wanted = (input.len() as u64 * to_hz as u64 / from_hz as u64) as usize;

    let mut resampler = FftFixedIn::<f32>::new(from_hz as usize, to_hz as usize, CHUNK_FRAMES, 2, 1)
        .map_err(|e| VoiceError::Codec(format!("resampler setup failed: {e}")))?;
    let delay = resampler.output_delay();

    // Feed fixed-size chunks, zero-padding past the end, until the delayed output covers `wanted`.
    let mut output: Vec<f32> = Vec::with_capacity(delay + wanted);
    let mut pos = 0;
    while output.len() < delay + wanted {
        let need = resampler.input_frames_next();
        let mut chunk = vec![0.0f32; need];
        if pos < input.len() {
            let end = (pos + need).min(input.len());
            chunk[..end - pos].copy_from_slice(&input[pos..end]);
        }
        pos += need;

        let wave_in = vec![chunk];
        let wave_out = resampler
            .process(&wave_in, None)
            .map_err(|e| VoiceError::Codec(format!("resampling failed: {e}")))?;
        output.extend_from_slice(&wave_out[0]);
    }

    debug!(from_hz, to_hz, samples_in = input.len(), samples_out = wanted, "resampled synthesis audio");

    let mut pcm_out = Vec::with_capacity(wanted * 2);
    for &s in &output[delay..delay + wanted] {
        let sample = (s * 32768.0).round().clamp(-32768.0, 32767.0) as i16;
        pcm_out.extend_from_slice(&sample.to_le_bytes());
    }
    Ok(pcm_out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(rate: u32, hz: f32, amplitude: f32, samples: usize) -> Vec<u8> {
        (0..samples)
            .flat_map(|n| {
                let t = n as f32 / rate as f32;
                let s = (amplitude * (2.0 * std::f32::consts::PI * hz * t).sin() * 32767.0) as i16;
                s.to_le_bytes()
            })
            .collect()
    }

    fn rms(pcm: &[u8]) -> f64 {
        let samples: Vec<f64> = pcm
            .chunks_exact(2)
            .map(|p| i16::from_le_bytes([p[0], p[1]]) as f64)
            .collect();
        (samples.iter().map(|s| s * s).sum::<f64>() / samples.len() as f64).sqrt()
    }

    #[test]
    fn ten_ms_at_24k_becomes_ten_ms_at_8k() {
        let out = resample_pcm16(&vec![0u8; 480], 24_000, TELEPHONY_RATE).unwrap();
        assert_eq!(out.len(), 160);
    }

    #[test]
    fn one_second_keeps_duration_and_level() {
        let input = sine(24_000, 1_000.0, 0.5, 24_000);
        let out = resample_pcm16(&input, 24_000, TELEPHONY_RATE).unwrap();
        assert_eq!(out.len(), 8_000 * 2);

        // Skip the edges; a 1 kHz tone is well inside the 4 kHz band.
        let level_in = rms(&input[4_000..44_000]);
        let level_out = rms(&out[1_000..15_000]);
        let ratio = level_out / level_in;
        assert!((0.8..1.2).contains(&ratio), "level ratio {ratio}");
    }

    #[test]
    fn matching_rates_pass_through() {
        let input = vec![1u8, 2, 3, 4, 5];
        assert_eq!(resample_pcm16(&input, 8_000, 8_000).unwrap(), vec![1, 2, 3, 4]);
        assert!(resample_pcm16(&[], 24_000, 8_000).unwrap().is_empty());
    }
}
