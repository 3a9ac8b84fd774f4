//! SIP dialog tracking and per-stream reassembly state.
//!
//! All mutable capture state lives behind one mutex owned by the process:
//! the sniffer thread and the timeout sweeper both funnel through the
//! methods here, and emitted segments are returned to the caller so sends
//! happen outside the lock.

use std::collections::HashMap;
use std::collections::VecDeque;

use tracing::{debug, info, warn};

use hotline_protocol::{CallKey, SegmentMeta, Source};

use crate::codec::{Codec, pcm_to_le_bytes};
use crate::reorder::{Drained, ReorderBuffer};
use crate::rtp;
use crate::segment::{VoiceSegment, is_silence};
use crate::sip::SipMessage;

/// How much opposite-leg audio the far-end tap retains, in seconds.
const FAR_END_WINDOW: f64 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Incoming,
    Outgoing,
}

#[derive(Debug)]
pub struct CallEntry {
    pub unique_key: String,
    /// IP of the remote party; RTP association and transcript routing key.
    pub from_ip: String,
    pub from_ext: Option<String>,
    pub to_ext: Option<String>,
    pub direction: Direction,
    pub start_ts: f64,
    pub last_packet_ts: f64,
    pub active: bool,
}

struct StreamState {
    codec: Codec,
    reorder: ReorderBuffer,
    segment: Option<VoiceSegment>,
    segments_emitted: u64,
}

/// A segment ready for the ASR hop.
#[derive(Debug)]
pub struct EmittedSegment {
    pub meta: SegmentMeta,
    /// Signed 16-bit LE mono 8 kHz; empty for a bare end-of-call marker.
    pub pcm: Vec<u8>,
    /// Opposite-leg reference audio for echo cancellation, when available.
    pub far_end: Option<Vec<u8>>,
}

/// Rolling window of decoded citizen-leg PCM, used as the AEC reference
/// for hot-line segments of the same dialog.
#[derive(Default)]
struct FarEndTap {
    chunks: VecDeque<(f64, Vec<u8>)>,
}

impl FarEndTap {
    fn append(&mut self, ts: f64, pcm: Vec<u8>) {
        self.chunks.push_back((ts, pcm));
        while let Some((front_ts, _)) = self.chunks.front() {
            if ts - front_ts > FAR_END_WINDOW {
                self.chunks.pop_front();
            } else {
                break;
            }
        }
    }

    fn slice(&self, start_ts: f64, end_ts: f64) -> Option<Vec<u8>> {
        let mut out = Vec::new();
        for (ts, pcm) in &self.chunks {
            if *ts >= start_ts - 0.02 && *ts <= end_ts {
                out.extend_from_slice(pcm);
            }
        }
        (!out.is_empty()).then_some(out)
    }
}

pub struct CaptureState {
    host_ip: String,
    segment_threshold: f64,
    call_timeout: f64,
    calls: HashMap<String, CallEntry>,
    streams: HashMap<CallKey, StreamState>,
    far_end: HashMap<String, FarEndTap>,
}

impl CaptureState {
    pub fn new(host_ip: String, segment_threshold: f64, call_timeout: f64) -> Self {
        Self {
            host_ip,
            segment_threshold,
            call_timeout,
            calls: HashMap::new(),
            streams: HashMap::new(),
            far_end: HashMap::new(),
        }
    }

    pub fn active_calls(&self) -> usize {
        self.calls.values().filter(|c| c.active).count()
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    pub fn call(&self, unique_key: &str) -> Option<&CallEntry> {
        self.calls.get(unique_key)
    }

    /// Handles a SIP datagram observed on port 5060.
    pub fn handle_sip(
        &mut self,
        src_ip: &str,
        dst_ip: &str,
        payload: &[u8],
        now: f64,
    ) -> Vec<EmittedSegment> {
        let Some(msg) = SipMessage::parse(payload) else {
            debug!(%src_ip, "unparseable SIP datagram dropped");
            return Vec::new();
        };
        let Some(call_id) = msg.call_id().map(str::to_string) else {
            return Vec::new();
        };

        match msg.method() {
            Some("INVITE") => {
                if !self.calls.contains_key(&call_id) {
                    let direction = if src_ip == self.host_ip {
                        Direction::Incoming
                    } else {
                        Direction::Outgoing
                    };
                    let from_ip = match direction {
                        Direction::Outgoing => src_ip.to_string(),
                        Direction::Incoming => dst_ip.to_string(),
                    };
                    let entry = CallEntry {
                        unique_key: call_id.clone(),
                        from_ip,
                        from_ext: msg.from_extension(),
                        to_ext: msg.to_extension(),
                        direction,
                        start_ts: now,
                        last_packet_ts: now,
                        active: true,
                    };
                    info!(
                        unique_key = %call_id,
                        from_ip = %entry.from_ip,
                        from_ext = ?entry.from_ext,
                        to_ext = ?entry.to_ext,
                        direction = ?entry.direction,
                        media_port = ?msg.sdp_media_port(),
                        "new call"
                    );
                    self.calls.insert(call_id, entry);
                } else if let Some(call) = self.calls.get_mut(&call_id) {
                    call.last_packet_ts = now;
                }
                Vec::new()
            }
            Some("BYE") => {
                if let Some(call) = self.calls.get_mut(&call_id)
                    && call.active
                {
                    call.active = false;
                    info!(unique_key = %call_id, "call ended by BYE");
                    return self.finish_call(&call_id, now);
                }
                Vec::new()
            }
            _ => {
                if let Some(call) = self.calls.get_mut(&call_id) {
                    call.last_packet_ts = now;
                }
                Vec::new()
            }
        }
    }

    /// Handles a UDP datagram from the RTP port range.
    pub fn handle_rtp(
        &mut self,
        src_ip: &str,
        dst_ip: &str,
        datagram: &[u8],
        now: f64,
    ) -> Vec<EmittedSegment> {
        let Some((header, payload)) = rtp::validate(datagram) else {
            return Vec::new();
        };

        let (peer_ip, source) = match self.associate(src_ip, dst_ip) {
            Association::One(peer_ip, source) => (peer_ip, source),
            Association::None => return Vec::new(),
            Association::Ambiguous(count) => {
                warn!(%src_ip, count, "RTP matches multiple active calls, dropping");
                return Vec::new();
            }
        };

        let Some(unique_key) = self
            .calls
            .values()
            .find(|c| c.active && c.from_ip == peer_ip)
            .map(|c| c.unique_key.clone())
        else {
            return Vec::new();
        };
        if let Some(call) = self.calls.get_mut(&unique_key) {
            call.last_packet_ts = now;
        }

        // PT is G.711 per validate(); unknown PTs never get here.
        let Some(codec) = Codec::from_payload_type(header.payload_type) else {
            return Vec::new();
        };

        let key = CallKey {
            peer_ip,
            source,
            unique_key,
            ssrc: header.ssrc,
        };
        let stream = self.streams.entry(key.clone()).or_insert_with(|| StreamState {
            codec,
            reorder: ReorderBuffer::new(),
            segment: None,
            segments_emitted: 0,
        });

        let drained = stream.reorder.push(header.sequence_number, payload);
        Self::apply_drained(stream, &mut self.far_end, &key, drained, now);

        let due = stream
            .segment
            .as_ref()
            .is_some_and(|seg| seg.duration() >= self.segment_threshold);
        if due {
            return self
                .close_segment(&key, false, now)
                .into_iter()
                .collect();
        }
        Vec::new()
    }

    /// Every-second sweep: calls silent for `call_timeout` are ended.
    pub fn sweep_timeouts(&mut self, now: f64) -> Vec<EmittedSegment> {
        let expired: Vec<String> = self
            .calls
            .values()
            .filter(|c| c.active && now - c.last_packet_ts >= self.call_timeout)
            .map(|c| c.unique_key.clone())
            .collect();

        let mut out = Vec::new();
        for unique_key in expired {
            if let Some(call) = self.calls.get_mut(&unique_key) {
                call.active = false;
            }
            info!(%unique_key, "call timed out");
            out.extend(self.finish_call(&unique_key, now));
        }
        out
    }

    /// Shutdown path: terminate every active call.
    pub fn flush_all(&mut self, now: f64) -> Vec<EmittedSegment> {
        let active: Vec<String> = self
            .calls
            .values()
            .filter(|c| c.active)
            .map(|c| c.unique_key.clone())
            .collect();
        let mut out = Vec::new();
        for unique_key in active {
            if let Some(call) = self.calls.get_mut(&unique_key) {
                call.active = false;
            }
            out.extend(self.finish_call(&unique_key, now));
        }
        out
    }

    fn associate(&self, src_ip: &str, dst_ip: &str) -> Association {
        let citizen: Vec<&CallEntry> = self
            .calls
            .values()
            .filter(|c| c.active && c.from_ip == src_ip)
            .collect();
        if !citizen.is_empty() {
            if citizen.len() > 1 {
                return Association::Ambiguous(citizen.len());
            }
            return Association::One(src_ip.to_string(), Source::Citizen);
        }

        if src_ip == self.host_ip {
            let hotline: Vec<&CallEntry> = self
                .calls
                .values()
                .filter(|c| c.active && c.from_ip == dst_ip)
                .collect();
            if hotline.len() > 1 {
                return Association::Ambiguous(hotline.len());
            }
            if hotline.len() == 1 {
                return Association::One(dst_ip.to_string(), Source::HotLine);
            }
        }

        Association::None
    }

    fn apply_drained(
        stream: &mut StreamState,
        far_end: &mut HashMap<String, FarEndTap>,
        key: &CallKey,
        drained: Vec<Drained>,
        now: f64,
    ) {
        for item in drained {
            if stream.segment.is_none() {
                // A segment opens on the first voice payload; leading
                // silence and gap fill are not buffered.
                match &item {
                    Drained::Payload(p) if !is_silence(p, stream.codec) => {
                        stream.segment = Some(VoiceSegment::new(now, stream.segments_emitted));
                    }
                    _ => continue,
                }
            }
            if let Some(seg) = stream.segment.as_mut() {
                seg.apply(&item, stream.codec, now);
            }
            if key.source == Source::Citizen
                && let Drained::Payload(p) = &item
            {
                far_end
                    .entry(key.unique_key.clone())
                    .or_default()
                    .append(now, pcm_to_le_bytes(&stream.codec.decode(p)));
            }
        }
    }

    /// Closes the open segment of one stream, returning the outbound
    /// message when the segment is worth sending (or when a terminal
    /// marker is required).
    fn close_segment(&mut self, key: &CallKey, finished: bool, now: f64) -> Option<EmittedSegment> {
        let stream = self.streams.get_mut(key)?;
        let seg = stream.segment.take();

        let (start_ts, end_ts, pcm, counted) = match seg {
            Some(seg) if seg.worth_emitting() => {
                let pcm = seg.to_pcm_bytes(stream.codec);
                debug!(
                    unique_key = %key.unique_key,
                    ssrc = key.ssrc,
                    source = %key.source,
                    seq = seg.seq,
                    duration = seg.duration(),
                    voice_pkts = seg.voice_pkts,
                    silence_pkts = seg.silence_pkts,
                    discontinuities = seg.discontinuities,
                    max_gap = seg.max_gap,
                    "segment emitted"
                );
                (seg.start_ts, seg.end_ts, pcm, true)
            }
            Some(seg) => {
                debug!(
                    unique_key = %key.unique_key,
                    ssrc = key.ssrc,
                    voice_fraction = seg.voice_fraction(),
                    "segment below voice threshold, dropped"
                );
                if !finished {
                    return None;
                }
                (seg.start_ts, now, Vec::new(), false)
            }
            None => {
                if !finished {
                    return None;
                }
                (now, now, Vec::new(), false)
            }
        };
        if counted {
            stream.segments_emitted += 1;
        }

        let far_end = (key.source == Source::HotLine && !pcm.is_empty())
            .then(|| self.far_end.get(&key.unique_key).and_then(|t| t.slice(start_ts, end_ts)))
            .flatten();

        Some(EmittedSegment {
            meta: SegmentMeta {
                peer_ip: key.peer_ip.clone(),
                source: key.source,
                unique_key: key.unique_key.clone(),
                ssrc: key.ssrc,
                start_ts,
                end_ts,
                is_finished: finished,
            },
            pcm,
            far_end,
        })
    }

    /// Flushes reorder buffers and emits the terminal segment for every
    /// stream of a dialog, then drops the dialog's reassembly state.
    fn finish_call(&mut self, unique_key: &str, now: f64) -> Vec<EmittedSegment> {
        let keys: Vec<CallKey> = self
            .streams
            .keys()
            .filter(|k| k.unique_key == unique_key)
            .cloned()
            .collect();

        let mut out = Vec::new();
        for key in keys {
            if let Some(stream) = self.streams.get_mut(&key) {
                let drained = stream.reorder.flush();
                Self::apply_drained(stream, &mut self.far_end, &key, drained, now);
            }
            out.extend(self.close_segment(&key, true, now));
            self.streams.remove(&key);
        }
        self.far_end.remove(unique_key);
        out
    }
}

enum Association {
    One(String, Source),
    None,
    Ambiguous(usize),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtp::build_packet;

    const PEER: &str = "192.168.10.19";
    const HOST: &str = "10.0.0.2";

    fn invite(call_id: &str) -> Vec<u8> {
        format!(
            "INVITE sip:1004@pbx SIP/2.0\r\n\
             Call-ID: {call_id}\r\n\
             From: <sip:1001@pbx>\r\n\
             To: <sip:1004@pbx>\r\n\r\n"
        )
        .into_bytes()
    }

    fn bye(call_id: &str) -> Vec<u8> {
        format!("BYE sip:1004@pbx SIP/2.0\r\nCall-ID: {call_id}\r\n\r\n").into_bytes()
    }

    fn voice() -> Vec<u8> {
        (0..160).map(|i| if i % 2 == 0 { 0x53 } else { 0xA1 }).collect()
    }

    fn state() -> CaptureState {
        CaptureState::new(HOST.to_string(), 2.0, 30.0)
    }

    #[test]
    fn invite_creates_an_outgoing_call() {
        let mut st = state();
        st.handle_sip(PEER, HOST, &invite("c1"), 10.0);
        let call = st.call("c1").unwrap();
        assert_eq!(call.direction, Direction::Outgoing);
        assert_eq!(call.from_ip, PEER);
        assert_eq!(call.from_ext.as_deref(), Some("1001"));
        assert!(call.active);
    }

    #[test]
    fn invite_from_host_is_incoming_with_peer_from_ip() {
        let mut st = state();
        st.handle_sip(HOST, PEER, &invite("c2"), 10.0);
        let call = st.call("c2").unwrap();
        assert_eq!(call.direction, Direction::Incoming);
        assert_eq!(call.from_ip, PEER);
    }

    #[test]
    fn ordered_call_emits_a_two_second_segment() {
        let mut st = state();
        st.handle_sip(PEER, HOST, &invite("c1"), 0.0);

        let mut emitted = Vec::new();
        for (i, seq) in (1000u16..1100).enumerate() {
            let pkt = build_packet(0, seq, seq as u32 * 160, 0x1234_5678, &voice());
            emitted.extend(st.handle_rtp(PEER, HOST, &pkt, i as f64 * 0.02));
        }
        assert_eq!(emitted.len(), 1);
        let seg = &emitted[0];
        assert_eq!(seg.meta.ssrc, 0x1234_5678);
        assert_eq!(seg.meta.source, Source::Citizen);
        assert_eq!(seg.meta.peer_ip, PEER);
        assert!(!seg.meta.is_finished);
        // 2 s at 8 kHz = 16000 samples = 32000 bytes of s16-LE.
        assert_eq!(seg.pcm.len(), 32_000);

        let finals = st.handle_sip(PEER, HOST, &bye("c1"), 2.1);
        assert_eq!(finals.len(), 1);
        assert!(finals[0].meta.is_finished);
    }

    #[test]
    fn rtp_without_a_call_is_dropped() {
        let mut st = state();
        let pkt = build_packet(0, 1, 0, 9, &voice());
        assert!(st.handle_rtp(PEER, HOST, &pkt, 0.0).is_empty());
        assert_eq!(st.stream_count(), 0);
    }

    #[test]
    fn ambiguous_peer_ip_drops_packets() {
        let mut st = state();
        st.handle_sip(PEER, HOST, &invite("c1"), 0.0);
        st.handle_sip(PEER, HOST, &invite("c2"), 0.1);
        let pkt = build_packet(0, 1, 0, 9, &voice());
        assert!(st.handle_rtp(PEER, HOST, &pkt, 0.2).is_empty());
        assert_eq!(st.stream_count(), 0);
    }

    #[test]
    fn host_originated_rtp_lands_on_the_hotline_leg() {
        let mut st = state();
        st.handle_sip(PEER, HOST, &invite("c1"), 0.0);
        let pkt = build_packet(0, 7, 0, 0xBEEF, &voice());
        st.handle_rtp(HOST, PEER, &pkt, 0.1);
        assert_eq!(st.stream_count(), 1);
        let finals = st.handle_sip(PEER, HOST, &bye("c1"), 0.2);
        assert_eq!(finals.len(), 1);
        assert_eq!(finals[0].meta.source, Source::HotLine);
        assert_eq!(finals[0].meta.peer_ip, PEER);
    }

    #[test]
    fn timeout_sweep_finishes_idle_calls() {
        let mut st = state();
        st.handle_sip(PEER, HOST, &invite("c1"), 0.0);
        let pkt = build_packet(0, 1, 0, 5, &voice());
        st.handle_rtp(PEER, HOST, &pkt, 1.0);

        assert!(st.sweep_timeouts(20.0).is_empty());
        let finals = st.sweep_timeouts(31.5);
        assert_eq!(finals.len(), 1);
        assert!(finals[0].meta.is_finished);
        assert!(!st.call("c1").unwrap().active);
        assert_eq!(st.stream_count(), 0);
    }

    #[test]
    fn hotline_terminal_segment_carries_far_end_reference() {
        let mut st = state();
        st.handle_sip(PEER, HOST, &invite("c1"), 0.0);
        // Citizen audio first so the tap has reference material.
        for seq in 0u16..10 {
            let pkt = build_packet(0, seq, 0, 1, &voice());
            st.handle_rtp(PEER, HOST, &pkt, 0.02 * seq as f64);
        }
        // Hot-line leg audio in the same window.
        for seq in 0u16..10 {
            let pkt = build_packet(0, seq, 0, 2, &voice());
            st.handle_rtp(HOST, PEER, &pkt, 0.02 * seq as f64);
        }
        let finals = st.handle_sip(PEER, HOST, &bye("c1"), 0.3);
        let hotline = finals
            .iter()
            .find(|e| e.meta.source == Source::HotLine)
            .unwrap();
        assert!(hotline.far_end.is_some());
        let citizen = finals
            .iter()
            .find(|e| e.meta.source == Source::Citizen)
            .unwrap();
        assert!(citizen.far_end.is_none());
    }

    #[test]
    fn pure_silence_never_opens_a_segment() {
        let mut st = state();
        st.handle_sip(PEER, HOST, &invite("c1"), 0.0);
        for seq in 0u16..200 {
            let pkt = build_packet(0, seq, 0, 3, &vec![0xFF; 160]);
            st.handle_rtp(PEER, HOST, &pkt, 0.02 * seq as f64);
        }
        let finals = st.handle_sip(PEER, HOST, &bye("c1"), 4.1);
        // Terminal marker only, no audio.
        assert_eq!(finals.len(), 1);
        assert!(finals[0].meta.is_finished);
        assert!(finals[0].pcm.is_empty());
    }
}
