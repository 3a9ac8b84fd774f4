//! Per-call voice segments: codec-domain byte accumulation with packet
//! counters, decoded to linear PCM when handed downstream.

use crate::codec::{Codec, pcm_to_le_bytes};
use crate::reorder::Drained;

/// G.711 runs at one byte per sample, 8 kHz.
const SAMPLE_RATE: f64 = 8000.0;

/// Minimum fraction of voice packets for a segment to be worth emitting.
const MIN_VOICE_FRACTION: f64 = 0.10;

#[derive(Debug)]
pub struct VoiceSegment {
    buffer: Vec<u8>,
    pub silence_pkts: u64,
    pub voice_pkts: u64,
    pub discontinuities: u64,
    pub max_gap: u16,
    /// Wall-clock seconds when the segment was opened.
    pub start_ts: f64,
    /// Wall-clock seconds of the newest packet applied.
    pub end_ts: f64,
    /// Index of this segment within its call, for diagnostics.
    pub seq: u64,
}

impl VoiceSegment {
    pub fn new(start_ts: f64, seq: u64) -> Self {
        Self {
            buffer: Vec::new(),
            silence_pkts: 0,
            voice_pkts: 0,
            discontinuities: 0,
            max_gap: 0,
            start_ts,
            end_ts: start_ts,
            seq,
        }
    }

    /// Applies one step of reorder output to the buffer.
    pub fn apply(&mut self, drained: &Drained, codec: Codec, now: f64) {
        match drained {
            Drained::Payload(payload) => {
                if is_silence(payload, codec) {
                    self.silence_pkts += 1;
                } else {
                    self.voice_pkts += 1;
                }
                self.buffer.extend_from_slice(payload);
                self.end_ts = now;
            }
            Drained::Gap { count, payload_len } => {
                self.discontinuities += 1;
                self.max_gap = self.max_gap.max(*count);
                self.buffer
                    .extend(std::iter::repeat_n(codec.silence_byte(), *count as usize * payload_len));
            }
            Drained::Stale { count } => {
                self.discontinuities += *count as u64;
            }
        }
    }

    /// Accumulated audio duration in seconds.
    pub fn duration(&self) -> f64 {
        self.buffer.len() as f64 / SAMPLE_RATE
    }

    /// Fraction of applied packets that carried voice.
    pub fn voice_fraction(&self) -> f64 {
        let total = self.voice_pkts + self.silence_pkts;
        if total == 0 {
            return 0.0;
        }
        self.voice_pkts as f64 / total as f64
    }

    /// Whether the segment carries enough voice to bother the recognizer.
    pub fn worth_emitting(&self) -> bool {
        !self.buffer.is_empty() && self.voice_fraction() >= MIN_VOICE_FRACTION
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Raw codec-domain bytes (silence fills included), for inspection.
    pub fn raw(&self) -> &[u8] {
        &self.buffer
    }

    /// Decodes the buffer to signed 16-bit little-endian mono 8 kHz PCM.
    pub fn to_pcm_bytes(&self, codec: Codec) -> Vec<u8> {
        pcm_to_le_bytes(&codec.decode(&self.buffer))
    }
}

/// A payload counts as silence when every byte is the codec's silence code.
pub fn is_silence(payload: &[u8], codec: Codec) -> bool {
    let silence = codec.silence_byte();
    payload.iter().all(|&b| b == silence)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voice_payload() -> Vec<u8> {
        // Encoded non-silence: alternate two arbitrary codes.
        (0..160).map(|i| if i % 2 == 0 { 0x53 } else { 0xA1 }).collect()
    }

    #[test]
    fn duration_tracks_samples() {
        let mut seg = VoiceSegment::new(100.0, 0);
        for _ in 0..100 {
            seg.apply(&Drained::Payload(voice_payload()), Codec::Pcmu, 102.0);
        }
        assert!((seg.duration() - 2.0).abs() < f64::EPSILON);
        assert_eq!(seg.end_ts, 102.0);
    }

    #[test]
    fn gap_fill_counts_and_preserves_timing() {
        let mut seg = VoiceSegment::new(0.0, 0);
        seg.apply(&Drained::Payload(voice_payload()), Codec::Pcmu, 0.02);
        seg.apply(&Drained::Gap { count: 3, payload_len: 160 }, Codec::Pcmu, 0.02);
        seg.apply(&Drained::Payload(voice_payload()), Codec::Pcmu, 0.10);
        assert_eq!(seg.discontinuities, 1);
        assert_eq!(seg.max_gap, 3);
        assert_eq!(seg.raw().len(), 5 * 160);
        assert!(seg.raw()[160..4 * 160].iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn mostly_silent_segments_are_not_worth_emitting() {
        let mut seg = VoiceSegment::new(0.0, 0);
        seg.apply(&Drained::Payload(voice_payload()), Codec::Pcmu, 0.0);
        for _ in 0..19 {
            seg.apply(&Drained::Payload(vec![0xFF; 160]), Codec::Pcmu, 0.0);
        }
        // 1 voice / 20 packets = 5% < 10%
        assert!(!seg.worth_emitting());
        seg.apply(&Drained::Payload(voice_payload()), Codec::Pcmu, 0.0);
        seg.apply(&Drained::Payload(voice_payload()), Codec::Pcmu, 0.0);
        // 3 / 22 ≈ 13.6%
        assert!(seg.worth_emitting());
    }

    #[test]
    fn pcm_output_is_twice_the_codec_bytes() {
        let mut seg = VoiceSegment::new(0.0, 0);
        seg.apply(&Drained::Payload(vec![0xFF; 160]), Codec::Pcmu, 0.0);
        let pcm = seg.to_pcm_bytes(Codec::Pcmu);
        assert_eq!(pcm.len(), 320);
        // µ-law silence decodes to zero samples.
        assert!(pcm.iter().all(|&b| b == 0));
    }

    #[test]
    fn silence_detection_is_codec_specific() {
        assert!(is_silence(&[0xFF; 10], Codec::Pcmu));
        assert!(!is_silence(&[0xFF; 10], Codec::Pcma));
        assert!(is_silence(&[0xD5; 10], Codec::Pcma));
    }
}
