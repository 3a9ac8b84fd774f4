//! Per-peer reordering of ASR events by voice-activity start time.
//!
//! ASR latency varies across concurrent calls and speakers, so events reach
//! the router out of order. Each peer gets a min-heap on `voice_start_ts`;
//! an event is released once it is at or past the peer's publication floor,
//! or once it has waited `max_delay`, whichever comes first. A
//! `call_finished` drains the whole peer heap unconditionally and then
//! travels last.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::time::{Duration, Instant};

use tracing::debug;

use hotline_protocol::{AsrEvent, EventKind};

struct HeapEntry {
    voice_start_ts: f64,
    received: Instant,
    /// Insertion tiebreak so equal timestamps release in arrival order.
    seq: u64,
    event: AsrEvent,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap, we want the minimum on top.
        other
            .voice_start_ts
            .total_cmp(&self.voice_start_ts)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

pub struct PeerQueues {
    max_delay: Duration,
    heaps: HashMap<String, BinaryHeap<HeapEntry>>,
    last_published: HashMap<String, f64>,
    next_seq: u64,
}

impl PeerQueues {
    pub fn new(max_delay: Duration) -> Self {
        Self {
            max_delay,
            heaps: HashMap::new(),
            last_published: HashMap::new(),
            next_seq: 0,
        }
    }

    pub fn pending(&self) -> usize {
        self.heaps.values().map(BinaryHeap::len).sum()
    }

    /// Accepts one event and returns everything now publishable, in order.
    pub fn on_event(&mut self, event: AsrEvent, now: Instant) -> Vec<AsrEvent> {
        let peer = event.peer_ip.clone();

        if event.kind == EventKind::CallFinished {
            let mut out = self.flush_peer(&peer);
            debug!(peer_ip = %peer, flushed = out.len(), "peer heap flushed on finish");
            out.push(event);
            return out;
        }

        let entry = HeapEntry {
            voice_start_ts: event.voice_start_ts,
            received: now,
            seq: self.next_seq,
            event,
        };
        self.next_seq += 1;
        self.heaps.entry(peer.clone()).or_default().push(entry);
        self.release_ready(&peer, now)
    }

    /// Periodic fairness check; also run on every arrival so a stalled
    /// stream cannot hold events past `max_delay`.
    pub fn tick(&mut self, now: Instant) -> Vec<AsrEvent> {
        let peers: Vec<String> = self.heaps.keys().cloned().collect();
        let mut out = Vec::new();
        for peer in peers {
            out.extend(self.release_ready(&peer, now));
        }
        out
    }

    /// Shutdown path: every heap drained in heap order.
    pub fn drain_all(&mut self) -> Vec<AsrEvent> {
        let peers: Vec<String> = self.heaps.keys().cloned().collect();
        let mut out = Vec::new();
        for peer in peers {
            out.extend(self.flush_peer(&peer));
        }
        out
    }

    fn release_ready(&mut self, peer: &str, now: Instant) -> Vec<AsrEvent> {
        let mut out = Vec::new();
        let Some(heap) = self.heaps.get_mut(peer) else {
            return out;
        };

        loop {
            let publish = match heap.peek() {
                None => break,
                Some(top) => {
                    let in_order = self
                        .last_published
                        .get(peer)
                        .is_some_and(|&floor| top.voice_start_ts >= floor);
                    let aged_out = now.duration_since(top.received) >= self.max_delay;
                    in_order || aged_out
                }
            };
            if !publish {
                break;
            }
            if let Some(entry) = heap.pop() {
                self.last_published.insert(peer.to_string(), entry.voice_start_ts);
                out.push(entry.event);
            }
        }

        if heap.is_empty() {
            self.heaps.remove(peer);
        }
        out
    }

    /// Unconditional in-order drain plus floor reset for a peer.
    fn flush_peer(&mut self, peer: &str) -> Vec<AsrEvent> {
        let mut out = Vec::new();
        if let Some(mut heap) = self.heaps.remove(peer) {
            while let Some(entry) = heap.pop() {
                out.push(entry.event);
            }
        }
        self.last_published.remove(peer);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hotline_protocol::{CallKey, Source};

    fn event(peer: &str, vst: f64) -> AsrEvent {
        AsrEvent {
            kind: EventKind::AsrUpdate,
            text: format!("t{vst}"),
            peer_ip: peer.to_string(),
            source: Source::Citizen,
            unique_key: "k".to_string(),
            ssrc: 1,
            is_finished: false,
            voice_start_ts: vst,
            chunk_start_ts: vst,
            offset_ms: 0.0,
        }
    }

    fn finished(peer: &str) -> AsrEvent {
        let key = CallKey {
            peer_ip: peer.to_string(),
            source: Source::Citizen,
            unique_key: "k".to_string(),
            ssrc: 1,
        };
        AsrEvent::finished(&key, 0.0)
    }

    const DELAY: Duration = Duration::from_secs(5);

    #[test]
    fn first_event_is_held_until_the_fairness_bound() {
        let mut q = PeerQueues::new(DELAY);
        let t0 = Instant::now();

        assert!(q.on_event(event("p", 10.0), t0).is_empty());
        assert!(q.tick(t0 + Duration::from_secs(4)).is_empty());

        let released = q.tick(t0 + Duration::from_secs(5));
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].voice_start_ts, 10.0);
    }

    #[test]
    fn late_earlier_event_is_published_first() {
        // 10.0 and 10.5 arrive, then 9.7 within the window.
        let mut q = PeerQueues::new(DELAY);
        let t0 = Instant::now();

        assert!(q.on_event(event("p", 10.0), t0).is_empty());
        assert!(q.on_event(event("p", 10.5), t0 + Duration::from_millis(100)).is_empty());
        assert!(q.on_event(event("p", 9.7), t0 + Duration::from_secs(2)).is_empty());

        // 9.7 ages out first (at its own receive time + 5 s); the rest are
        // then in order and follow immediately.
        let released = q.tick(t0 + Duration::from_secs(7));
        let order: Vec<f64> = released.iter().map(|e| e.voice_start_ts).collect();
        assert_eq!(order, vec![9.7, 10.0, 10.5]);
        assert_eq!(q.pending(), 0);
    }

    #[test]
    fn missing_earlier_event_forces_publication_after_max_delay() {
        let mut q = PeerQueues::new(DELAY);
        let t0 = Instant::now();
        q.on_event(event("p", 10.0), t0);
        q.on_event(event("p", 10.5), t0);

        assert!(q.tick(t0 + Duration::from_millis(4900)).is_empty());
        let released = q.tick(t0 + Duration::from_secs(5));
        let order: Vec<f64> = released.iter().map(|e| e.voice_start_ts).collect();
        assert_eq!(order, vec![10.0, 10.5]);
    }

    #[test]
    fn in_order_events_flow_without_delay_once_the_floor_is_set() {
        let mut q = PeerQueues::new(DELAY);
        let t0 = Instant::now();
        q.on_event(event("p", 1.0), t0);
        let first = q.tick(t0 + DELAY);
        assert_eq!(first.len(), 1);

        // Floor is 1.0 now; later events pass straight through.
        let released = q.on_event(event("p", 2.0), t0 + DELAY + Duration::from_millis(1));
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].voice_start_ts, 2.0);
    }

    #[test]
    fn delivered_sequence_is_monotone_per_peer() {
        let mut q = PeerQueues::new(DELAY);
        let t0 = Instant::now();
        let mut delivered = Vec::new();

        for (i, vst) in [3.0, 1.0, 2.0, 5.0, 4.0].iter().enumerate() {
            delivered.extend(q.on_event(event("p", *vst), t0 + Duration::from_millis(i as u64)));
        }
        delivered.extend(q.tick(t0 + Duration::from_secs(6)));

        let order: Vec<f64> = delivered.iter().map(|e| e.voice_start_ts).collect();
        let mut sorted = order.clone();
        sorted.sort_by(f64::total_cmp);
        assert_eq!(order, sorted);
        assert_eq!(order.len(), 5);
    }

    #[test]
    fn peers_are_independent() {
        let mut q = PeerQueues::new(DELAY);
        let t0 = Instant::now();
        q.on_event(event("a", 10.0), t0);
        q.on_event(event("b", 20.0), t0);
        // Finishing peer a must not disturb peer b.
        let released = q.on_event(finished("a"), t0);
        assert_eq!(released.len(), 2);
        assert!(released.iter().all(|e| e.peer_ip == "a"));
        assert_eq!(q.pending(), 1);
    }

    #[test]
    fn finish_flushes_queued_updates_first() {
        let mut q = PeerQueues::new(DELAY);
        let t0 = Instant::now();
        q.on_event(event("p", 10.0), t0);
        q.on_event(event("p", 9.0), t0);

        let released = q.on_event(finished("p"), t0);
        let kinds: Vec<EventKind> = released.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![EventKind::AsrUpdate, EventKind::AsrUpdate, EventKind::CallFinished]
        );
        let order: Vec<f64> = released[..2].iter().map(|e| e.voice_start_ts).collect();
        assert_eq!(order, vec![9.0, 10.0]);
        // No state left behind for the peer.
        assert_eq!(q.pending(), 0);
        assert!(q.last_published.is_empty());
    }

    #[test]
    fn drain_all_empties_every_heap_in_order() {
        let mut q = PeerQueues::new(DELAY);
        let t0 = Instant::now();
        q.on_event(event("a", 2.0), t0);
        q.on_event(event("a", 1.0), t0);
        q.on_event(event("b", 7.0), t0);

        let released = q.drain_all();
        assert_eq!(released.len(), 3);
        let a: Vec<f64> = released
            .iter()
            .filter(|e| e.peer_ip == "a")
            .map(|e| e.voice_start_ts)
            .collect();
        assert_eq!(a, vec![1.0, 2.0]);
        assert_eq!(q.pending(), 0);
    }

    #[test]
    fn equal_timestamps_release_in_arrival_order() {
        let mut q = PeerQueues::new(DELAY);
        let t0 = Instant::now();
        let mut first = event("p", 5.0);
        first.text = "first".into();
        let mut second = event("p", 5.0);
        second.text = "second".into();
        q.on_event(first, t0);
        q.on_event(second, t0);

        let released = q.drain_all();
        assert_eq!(released[0].text, "first");
        assert_eq!(released[1].text, "second");
    }
}
