//! Ordered, sparse storage of inbound RTP packets keyed by extended index.
//!
//! A `BufferStore` lifts 16-bit wire sequence numbers onto a monotonically
//! increasing 32-bit-range index (kept as `i64` so the bootstrap and rollover
//! arithmetic below never underflows), and releases them either in strict
//! order up to the first gap (`shift_ordered`) or by wall-clock timeout
//! (`shift_older_than`).

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::error::InsertError;

/// Wire-sequence cycle width: sequence numbers are 16 bits.
const CYCLE: i64 = 0x1_0000;

/// A 32-bit-range monotonic lift of a 16-bit RTP sequence number, kept as
/// `i64` internally so bootstrap/rollover math never underflows.
pub type ExtendedSeq = i64;

/// Opaque media payload plus the RTP metadata the store and jitter buffer
/// need; everything else (payload type, extensions, …) is the caller's
/// concern.
#[derive(Debug, Clone)]
pub struct Buffer {
    pub payload: Bytes,
    pub rtp_timestamp: u32,
    /// Arrival time from the transport layer, when it tracks one. Absent,
    /// the jitter buffer falls back to the local clock at insert time.
    pub arrival_ts: Option<Instant>,
}

/// A packet that has been promoted to an extended index and admitted into
/// the store.
#[derive(Debug, Clone)]
pub struct PacketRecord {
    pub index: ExtendedSeq,
    pub wire_seq: u16,
    pub inserted_at: Instant,
    pub buffer: Buffer,
}

/// One element of a drain: either a packet or a marker standing in for an
/// index that was skipped over as lost.
#[derive(Debug, Clone)]
pub enum Drained {
    Record(PacketRecord),
    Discontinuity,
}

enum RolloverClass {
    Current,
    Next,
    Previous,
}

/// "Short arc rollover" test against a reference index: classifies wire
/// sequence `s` as belonging to the reference's cycle, the next cycle, or
/// the previous one, and returns the corresponding extended index.
fn classify(reference_index: ExtendedSeq, s: u16) -> (RolloverClass, ExtendedSeq) {
    let s = s as i64;
    let ref_wire = reference_index.rem_euclid(CYCLE);
    let cycle = reference_index.div_euclid(CYCLE);

    let d = (ref_wire - s).abs();
    let d_prime = ref_wire.min(s) + (CYCLE - ref_wire.max(s));
    let rollover = d_prime < d;

    if !rollover {
        (RolloverClass::Current, s + cycle * CYCLE)
    } else if ref_wire > s {
        (RolloverClass::Next, s + (cycle + 1) * CYCLE)
    } else {
        (RolloverClass::Previous, s + (cycle - 1) * CYCLE)
    }
}

/// An ordered, sparse store of RTP packets keyed by extended index.
///
/// `base_index` is the lower water mark: the index of the most recently
/// drained (or skipped-as-lost) packet. It is `None` only before the very
/// first packet has ever arrived; from that point on it is always `Some`,
/// seeded to `first_index - 1` so the `base_index < r.index` invariant
/// holds immediately. Until the store's first real drain, nothing has been
/// committed yet, so classification and lateness are judged against
/// `end_index` instead and nothing is ever rejected as late — a rollover
/// discovered in that window shifts the store rather than bouncing a
/// packet. After the first drain, `base_index` is a real commitment and
/// classification/lateness follow it literally.
pub struct BufferStore {
    base_index: Option<ExtendedSeq>,
    end_index: Option<ExtendedSeq>,
    /// Index of the very first packet ever admitted, tracked (and shifted
    /// alongside everything else) so `JitterBuffer` can compute `expected`.
    first_index: Option<ExtendedSeq>,
    records: BTreeMap<ExtendedSeq, PacketRecord>,
    received: u64,
    ever_drained: bool,
}

impl Default for BufferStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferStore {
    pub fn new() -> Self {
        BufferStore {
            base_index: None,
            end_index: None,
            first_index: None,
            records: BTreeMap::new(),
            received: 0,
            ever_drained: false,
        }
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn end_index(&self) -> Option<ExtendedSeq> {
        self.end_index
    }

    pub fn base_index(&self) -> Option<ExtendedSeq> {
        self.base_index
    }

    /// The index of the first packet this store ever admitted; `None` for
    /// an empty store. Used by `JitterBuffer::get_and_update_stats` as the
    /// `expected` baseline.
    pub fn base_seq_first(&self) -> Option<ExtendedSeq> {
        self.first_index
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn shift_all(&mut self, amount: ExtendedSeq) {
        let shifted: BTreeMap<ExtendedSeq, PacketRecord> = std::mem::take(&mut self.records)
            .into_iter()
            .map(|(idx, mut rec)| {
                rec.index += amount;
                (idx + amount, rec)
            })
            .collect();
        self.records = shifted;
        self.end_index = self.end_index.map(|e| e + amount);
        self.first_index = self.first_index.map(|f| f + amount);
    }

    /// Promotes `wire_seq` to an extended index and admits the packet, or
    /// rejects it as a late arrival.
    pub fn insert(
        &mut self,
        wire_seq: u16,
        buffer: Buffer,
        now: Instant,
    ) -> Result<ExtendedSeq, InsertError> {
        let final_index = match (self.base_index, self.end_index) {
            (None, _) => {
                // Very first packet this store has ever seen.
                let idx = wire_seq as i64;
                self.first_index = Some(idx);
                self.base_index = Some(idx - 1);
                idx
            }
            (Some(_base), Some(end)) if !self.ever_drained => {
                let (class, candidate) = classify(end, wire_seq);
                match class {
                    RolloverClass::Previous => {
                        self.shift_all(CYCLE);
                        let idx = candidate + CYCLE;
                        self.base_index = Some(idx - 1);
                        idx
                    }
                    RolloverClass::Current | RolloverClass::Next => candidate,
                }
            }
            (Some(base), Some(_)) => {
                let (class, candidate) = classify(base, wire_seq);
                match class {
                    RolloverClass::Previous => {
                        if candidate <= base {
                            return Err(InsertError::LatePacket {
                                index: candidate,
                                base_index: base,
                            });
                        }
                        self.shift_all(CYCLE);
                        candidate + CYCLE
                    }
                    RolloverClass::Current | RolloverClass::Next => {
                        if candidate <= base {
                            return Err(InsertError::LatePacket {
                                index: candidate,
                                base_index: base,
                            });
                        }
                        candidate
                    }
                }
            }
            (None, Some(_)) => unreachable!("end_index is only ever set alongside base_index"),
        };

        let record = PacketRecord {
            index: final_index,
            wire_seq,
            inserted_at: now,
            buffer,
        };
        self.records.insert(final_index, record);
        self.end_index = Some(self.end_index.map_or(final_index, |e| e.max(final_index)));
        self.received += 1;
        Ok(final_index)
    }

    /// Pops the contiguous prefix starting immediately after `base_index`.
    /// Stops at the first gap; never fabricates a discontinuity marker.
    pub fn shift_ordered(&mut self) -> Vec<PacketRecord> {
        let mut out = Vec::new();
        loop {
            let base = match self.base_index {
                Some(b) => b,
                None => break,
            };
            let next = base + 1;
            match self.records.remove(&next) {
                Some(rec) => {
                    self.base_index = Some(next);
                    self.ever_drained = true;
                    out.push(rec);
                }
                None => break,
            }
        }
        out
    }

    /// While the lowest-index record has dwelt longer than `latency`,
    /// drains the entire prefix up to and including it, synthesizing
    /// discontinuity markers for any gaps advanced over.
    pub fn shift_older_than(&mut self, latency: Duration, now: Instant) -> Vec<Drained> {
        let mut out = Vec::new();
        loop {
            let lowest_index = match self.records.keys().next() {
                Some(&idx) => idx,
                None => break,
            };
            let inserted_at = self.records[&lowest_index].inserted_at;
            if now.saturating_duration_since(inserted_at) <= latency {
                break;
            }
            let Some(base) = self.base_index else { break };
            let mut idx = base + 1;
            while idx <= lowest_index {
                match self.records.remove(&idx) {
                    Some(rec) => out.push(Drained::Record(rec)),
                    None => out.push(Drained::Discontinuity),
                }
                idx += 1;
            }
            self.base_index = Some(lowest_index);
            self.ever_drained = true;
        }
        out
    }

    /// Drains every remaining record interleaved with discontinuity markers
    /// for the gaps between them, leaving the store empty.
    pub fn dump(&mut self) -> Vec<Drained> {
        let mut out = Vec::new();
        if let (Some(base), Some(end)) = (self.base_index, self.end_index) {
            let mut idx = base + 1;
            while idx <= end {
                match self.records.remove(&idx) {
                    Some(rec) => out.push(Drained::Record(rec)),
                    None => out.push(Drained::Discontinuity),
                }
                idx += 1;
            }
            self.base_index = Some(end);
            self.ever_drained = true;
        }
        self.records.clear();
        out
    }

    /// The `inserted_at` of the lowest-index record currently held, or
    /// `None` if the store is empty.
    pub fn first_record_timestamp(&self) -> Option<Instant> {
        self.records.values().next().map(|r| r.inserted_at)
    }
}
