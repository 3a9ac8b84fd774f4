//! Sequence-number reordering for one RTP stream.
//!
//! Packets are held in a pending map and released strictly in ascending
//! sequence order (mod 2¹⁶). A hole that has aged more than [`LOST_AFTER`]
//! sequence numbers is declared lost and replaced with codec silence, one
//! payload per missing packet, so downstream timing is preserved.

use std::collections::{HashMap, HashSet, VecDeque};

/// Sequence distance after which a missing packet is given up on.
pub const LOST_AFTER: u16 = 100;

/// Bound on the duplicate-suppression window; late replays older than this
/// are treated as fresh arrivals and then discarded behind the cursor.
const SEEN_WINDOW: usize = 1024;

/// One step of in-order output from the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Drained {
    /// A real payload, released in sequence order.
    Payload(Vec<u8>),
    /// `count` packets declared lost; fill with `count * payload_len` bytes
    /// of codec silence before the next payload.
    Gap { count: u16, payload_len: usize },
    /// Stale pending entries discarded behind the cursor.
    Stale { count: u16 },
}

/// Bounded membership window over recently accepted sequence numbers.
struct SeenWindow {
    order: VecDeque<u16>,
    set: HashSet<u16>,
}

impl SeenWindow {
    fn new() -> Self {
        Self { order: VecDeque::with_capacity(SEEN_WINDOW), set: HashSet::with_capacity(SEEN_WINDOW) }
    }

    fn contains(&self, seq: u16) -> bool {
        self.set.contains(&seq)
    }

    fn insert(&mut self, seq: u16) {
        if self.order.len() == SEEN_WINDOW
            && let Some(old) = self.order.pop_front()
        {
            self.set.remove(&old);
        }
        self.order.push_back(seq);
        self.set.insert(seq);
    }
}

pub struct ReorderBuffer {
    pending: HashMap<u16, Vec<u8>>,
    last_processed: Option<u16>,
    /// Newest sequence accepted, in stream order; ages holes.
    highest: Option<u16>,
    seen: SeenWindow,
}

/// Distance from `from` forward to `to`, mod 2¹⁶; values ≥ 0x8000 mean
/// `to` is behind `from`.
fn ahead(to: u16, from: u16) -> u16 {
    to.wrapping_sub(from)
}

impl ReorderBuffer {
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
            last_processed: None,
            highest: None,
            seen: SeenWindow::new(),
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Accepts one packet and returns everything now releasable in order.
    /// Duplicates produce no output.
    pub fn push(&mut self, seq: u16, payload: &[u8]) -> Vec<Drained> {
        if self.seen.contains(seq) {
            return Vec::new();
        }
        self.seen.insert(seq);
        self.pending.insert(seq, payload.to_vec());

        match self.highest {
            Some(h) if ahead(seq, h) >= 0x8000 => {}
            _ => self.highest = Some(seq),
        }

        // First packet of the stream anchors the cursor just behind itself.
        if self.last_processed.is_none() {
            self.last_processed = Some(seq.wrapping_sub(1));
        }

        let mut out = Vec::new();
        self.collect_garbage(&mut out);
        self.drain(false, &mut out);
        out
    }

    /// Releases everything still pending, filling every hole with silence.
    /// Called when the owning call ends.
    pub fn flush(&mut self) -> Vec<Drained> {
        let mut out = Vec::new();
        self.collect_garbage(&mut out);
        self.drain(true, &mut out);
        out
    }

    fn drain(&mut self, force: bool, out: &mut Vec<Drained>) {
        let Some(mut last) = self.last_processed else {
            return;
        };

        loop {
            let next = last.wrapping_add(1);
            if let Some(payload) = self.pending.remove(&next) {
                out.push(Drained::Payload(payload));
                last = next;
                continue;
            }
            if self.pending.is_empty() {
                break;
            }

            // Hole at `next`. Give up on it once it has aged past
            // LOST_AFTER, or unconditionally on flush.
            let aged = self.highest.is_some_and(|h| {
                let age = ahead(h, next);
                age < 0x8000 && age > LOST_AFTER
            });
            if !force && !aged {
                break;
            }

            let Some((seq, gap)) = self
                .pending
                .keys()
                .filter_map(|&k| {
                    let d = ahead(k, next);
                    (d < 0x8000).then_some((k, d))
                })
                .min_by_key(|&(_, d)| d)
            else {
                break;
            };

            let payload = self.pending.remove(&seq).unwrap_or_default();
            if gap > 0 {
                out.push(Drained::Gap { count: gap, payload_len: payload.len() });
            }
            out.push(Drained::Payload(payload));
            last = seq;
        }

        self.last_processed = Some(last);
    }

    /// Discards pending entries more than LOST_AFTER behind the cursor;
    /// they can never be released in order.
    fn collect_garbage(&mut self, out: &mut Vec<Drained>) {
        let Some(last) = self.last_processed else {
            return;
        };
        let stale: Vec<u16> = self
            .pending
            .keys()
            .filter(|&&k| {
                let behind = last.wrapping_sub(k);
                behind > 0 && behind < 0x8000 && behind > LOST_AFTER
            })
            .copied()
            .collect();
        if !stale.is_empty() {
            for seq in &stale {
                self.pending.remove(seq);
            }
            out.push(Drained::Stale { count: stale.len() as u16 });
        }
    }
}

impl Default for ReorderBuffer {
    fn default() -> Self {
        Self::new()
    }
}
