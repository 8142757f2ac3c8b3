//! G.711 μ-law ↔ 16-bit linear PCM transcoding for the 8 kHz telephony leg.
//!
//! PCM byte buffers are little-endian signed 16-bit samples. All functions are pure.

const BIAS: i32 = 0x84;
const CLIP: i32 = 32767;

/// Encode one linear sample into a μ-law byte.
pub fn encode_sample(sample: i16) -> u8 {
    let value = sample as i32;
    let sign: u8 = if value < 0 { 0x80 } else { 0 };
    let magnitude = (value.abs() + BIAS).min(CLIP);

    // Segment = index of the highest set bit above bit 7 (magnitude >= BIAS keeps this >= 1).
    let segment = 31 - ((magnitude >> 7) as u32).leading_zeros();
    let mantissa = ((magnitude >> (segment + 3)) & 0x0F) as u8;

    !(sign | ((segment as u8) << 4) | mantissa)
}

/// Decode one μ-law byte into a linear sample.
pub fn decode_sample(byte: u8) -> i16 {
    let bits = !byte;
    let segment = ((bits >> 4) & 0x07) as i32;
    let mantissa = (bits & 0x0F) as i32;
    let magnitude = (((mantissa << 3) + BIAS) << segment) - BIAS;
    if bits & 0x80 != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

/// Quantization step of the segment a μ-law byte falls in.
pub fn step_size(byte: u8) -> i32 {
    let segment = ((!byte >> 4) & 0x07) as i32;
    1 << (segment + 3)
}

/// PCM16LE → μ-law. Output is half the input length; a trailing odd byte is ignored.
pub fn encode(pcm: &[u8]) -> Vec<u8> {
    pcm.chunks_exact(2)
        .map(|pair| encode_sample(i16::from_le_bytes([pair[0], pair[1]])))
        .collect()
}

/// μ-law → PCM16LE. Output is twice the input length.
pub fn decode(mulaw: &[u8]) -> Vec<u8> {
    let mut pcm = Vec::with_capacity(mulaw.len() * 2);
    for &b in mulaw {
        pcm.extend_from_slice(&decode_sample(b).to_le_bytes());
    }
    pcm
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm_bytes(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn zero_is_exact() {
        assert_eq!(decode_sample(encode_sample(0)), 0);
        assert_eq!(encode_sample(0), 0xFF);
    }

    #[test]
    fn every_sample_within_one_step() {
        for x in i16::MIN..=i16::MAX {
            let byte = encode_sample(x);
            let back = decode_sample(byte) as i32;
            let err = (back - x as i32).abs();
            assert!(err <= step_size(byte), "sample {x} decoded to {back}");
        }
    }

    #[test]
    fn sign_is_preserved() {
        assert!(decode_sample(encode_sample(1000)) > 0);
        assert!(decode_sample(encode_sample(-1000)) < 0);
    }

    #[test]
    fn extremes_round_trip_within_step() {
        let encoded = encode(&pcm_bytes(&[0, 32767, -32768]));
        assert_eq!(encoded.len(), 3);

        let decoded = decode(&encoded);
        let samples: Vec<i16> = decoded
            .chunks_exact(2)
            .map(|p| i16::from_le_bytes([p[0], p[1]]))
            .collect();
        assert_eq!(samples[0], 0);
        assert!((samples[1] as i32 - 32767).abs() <= step_size(encoded[1]));
        assert!((samples[2] as i32 + 32768).abs() <= step_size(encoded[2]));
    }

    #[test]
    fn trailing_odd_byte_is_ignored() {
        let mut pcm = pcm_bytes(&[100, -100]);
        pcm.push(0x7F);
        assert_eq!(encode(&pcm).len(), 2);
        assert_eq!(decode(&[0xFF, 0x7F]).len(), 4);
    }
}
