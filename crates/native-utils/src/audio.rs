use base64::Engine;
use ringbuf::HeapRb;

/// Sample rate of PCM16 audio exchanged with the agent session.
pub const REALTIME_API_PCM16_SAMPLE_RATE: u32 = 24_000;

/// Creates a ring buffer on the heap for queued playback samples.
pub fn shared_buffer(size: usize) -> HeapRb<i16> {
    HeapRb::new(size)
}

/// Decodes a base64 string into a vector of i16 PCM values.
/// A trailing odd byte is dropped.
pub fn decode_i16(base64_fragment: &str) -> Vec<i16> {
    match base64::engine::general_purpose::STANDARD.decode(base64_fragment) {
        Ok(pcm16) => pcm16
            .chunks_exact(2)
            .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
            .collect(),
        Err(e) => {
            tracing::error!("Failed to decode base64 fragment: {}", e);
            Vec::new()
        }
    }
}

/// Encodes a slice of i16 samples into a base64 string.
pub fn encode_i16(pcm16: &[i16]) -> String {
    let bytes: Vec<u8> = pcm16.iter().flat_map(|s| s.to_le_bytes()).collect();
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringbuf::traits::{Consumer, Producer, Split};

    #[test]
    fn decodes_little_endian_pcm16() {
        // 0x0001, 0xFFFF, 0x7FFF
        let encoded = base64::engine::general_purpose::STANDARD.encode([1u8, 0, 255, 255, 255, 127]);

        assert_eq!(decode_i16(&encoded), vec![1, -1, i16::MAX]);
    }

    #[test]
    fn invalid_base64_yields_no_samples() {
        assert!(decode_i16("not base64!").is_empty());
    }

    #[test]
    fn encode_matches_decode_layout() {
        let samples = [0i16, 1200, -1200];
        assert_eq!(decode_i16(&encode_i16(&samples)), samples.to_vec());
    }

    #[test]
    fn full_ring_buffer_rejects_overflow() {
        let (mut tx, mut rx) = shared_buffer(2).split();

        assert!(tx.try_push(1).is_ok());
        assert!(tx.try_push(2).is_ok());
        assert!(tx.try_push(3).is_err());
        assert_eq!(rx.try_pop(), Some(1));
    }
}
