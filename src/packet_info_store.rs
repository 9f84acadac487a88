//! Per-feedback-window store of packet arrival timestamps for TWCC.
//!
//! Mirrors [`crate::buffer_store::BufferStore`]'s rollover classification
//! but carries no release pipeline and no water mark: it is simply
//! replaced wholesale after each feedback emission, so a lower index can
//! always be folded in by re-keying rather than rejected.

use std::collections::BTreeMap;
use std::time::Instant;

use crate::time::MicroTime;

const CYCLE: i64 = 0x1_0000;

enum RolloverClass {
    Current,
    Next,
    Previous,
}

fn classify(reference_index: i64, s: u16) -> (RolloverClass, i64) {
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

/// One entry of the stats this store hands to the TWCC feedback codec.
#[derive(Debug, Clone)]
pub struct PacketInfoStats {
    pub base_seq_num: u16,
    pub packet_status_count: u16,
    pub reference_time: MicroTime,
    /// One slot per index in `[base_seq, max_seq]`; `None` means
    /// not-received.
    pub receive_deltas: Vec<Option<MicroTime>>,
}

pub struct PacketInfoStore {
    base_seq: Option<i64>,
    max_seq: Option<i64>,
    seq_to_ts: BTreeMap<i64, MicroTime>,
    /// Local wall-clock instant the store's very first packet arrived,
    /// used to convert `Instant` arrivals into `MicroTime`. Seeded once and
    /// held for the life of the store so `reference_time` reflects a
    /// persistent clock across feedback windows, not a per-window one.
    epoch: Option<Instant>,
}

impl Default for PacketInfoStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketInfoStore {
    pub fn new() -> Self {
        PacketInfoStore {
            base_seq: None,
            max_seq: None,
            seq_to_ts: BTreeMap::new(),
            epoch: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.base_seq.is_none()
    }

    fn to_micros(&mut self, arrival: Instant) -> MicroTime {
        let epoch = *self.epoch.get_or_insert(arrival);
        MicroTime::from_micros(arrival.saturating_duration_since(epoch).as_micros() as i64)
    }

    /// Admits an arrival for `wire_seq`, classifying it against the
    /// current minimum key exactly like `BufferStore`, except that a
    /// previous-cycle result simply re-keys everything rather than being
    /// rejected — this store has no committed water mark to violate.
    pub fn insert(&mut self, wire_seq: u16, arrival: Instant) {
        let ts = self.to_micros(arrival);

        let new_index = match self.base_seq {
            None => wire_seq as i64,
            Some(base) => {
                let (class, candidate) = classify(base, wire_seq);
                if let RolloverClass::Previous = class {
                    let shifted: BTreeMap<i64, MicroTime> = std::mem::take(&mut self.seq_to_ts)
                        .into_iter()
                        .map(|(k, v)| (k + CYCLE, v))
                        .collect();
                    self.seq_to_ts = shifted;
                    self.max_seq = self.max_seq.map(|m| m + CYCLE);
                    self.base_seq = self.base_seq.map(|b| b + CYCLE);
                    candidate + CYCLE
                } else {
                    candidate
                }
            }
        };

        self.base_seq = Some(self.base_seq.map_or(new_index, |b| b.min(new_index)));
        self.max_seq = Some(self.max_seq.map_or(new_index, |m| m.max(new_index)));
        self.seq_to_ts.insert(new_index, ts);
    }

    /// Builds the stats record the TWCC feedback codec encodes, or `None`
    /// if nothing has been inserted this window.
    pub fn stats(&self) -> Option<PacketInfoStats> {
        let base = self.base_seq?;
        let max = self.max_seq?;
        let packet_status_count = (max - base + 1) as u16;

        let reference_time = self.seq_to_ts[&base].floor_to(64_000);
        let mut previous_ts = reference_time;

        let mut receive_deltas = Vec::with_capacity(packet_status_count as usize);
        for i in base..=max {
            match self.seq_to_ts.get(&i) {
                Some(&ts) => {
                    receive_deltas.push(Some(ts - previous_ts));
                    previous_ts = ts;
                }
                None => receive_deltas.push(None),
            }
        }

        Some(PacketInfoStats {
            base_seq_num: (base.rem_euclid(CYCLE)) as u16,
            packet_status_count,
            reference_time,
            receive_deltas,
        })
    }

    /// Resets the store for the next feedback window. Called externally
    /// after a feedback payload has been built. `epoch` is left untouched —
    /// it anchors `MicroTime` to the store's first-ever packet so
    /// `reference_time` reflects a persistent clock across consecutive
    /// feedback reports, not one that re-zeros every window.
    pub fn reset(&mut self) {
        self.base_seq = None;
        self.max_seq = None;
        self.seq_to_ts.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_empty_store_has_no_stats() {
        let store = PacketInfoStore::new();
        assert!(store.stats().is_none());
    }

    #[test]
    fn test_in_order_deltas() {
        let mut store = PacketInfoStore::new();
        let t0 = Instant::now();
        store.insert(10, t0);
        store.insert(11, t0 + Duration::from_millis(5));
        store.insert(12, t0 + Duration::from_millis(11));

        let stats = store.stats().unwrap();
        assert_eq!(stats.base_seq_num, 10);
        assert_eq!(stats.packet_status_count, 3);
        assert_eq!(stats.receive_deltas.len(), 3);
        assert!(stats.receive_deltas.iter().all(Option::is_some));
    }

    #[test]
    fn test_gap_emits_not_received() {
        let mut store = PacketInfoStore::new();
        let t0 = Instant::now();
        store.insert(10, t0);
        store.insert(12, t0 + Duration::from_millis(20));

        let stats = store.stats().unwrap();
        assert_eq!(stats.packet_status_count, 3);
        assert_eq!(
            stats
                .receive_deltas
                .iter()
                .map(Option::is_some)
                .collect::<Vec<_>>(),
            vec![true, false, true]
        );
    }

    #[test]
    fn test_lower_index_is_folded_in_not_rejected() {
        // Unlike BufferStore, PacketInfoStore has no water mark: a lower
        // index arriving after a higher one is accepted and widens the
        // window downward.
        let mut store = PacketInfoStore::new();
        let t0 = Instant::now();
        store.insert(12, t0);
        store.insert(10, t0 + Duration::from_millis(5));

        let stats = store.stats().unwrap();
        assert_eq!(stats.base_seq_num, 10);
        assert_eq!(stats.packet_status_count, 3);
    }

    #[test]
    fn test_reference_time_persists_across_reset() {
        // reset() clears the window but not the store's clock anchor, so
        // reference_time keeps advancing relative to the stream's start
        // instead of re-zeroing every feedback report.
        let mut store = PacketInfoStore::new();
        let t0 = Instant::now();
        store.insert(0, t0);
        let first_ref = store.stats().unwrap().reference_time;
        store.reset();

        store.insert(1, t0 + Duration::from_millis(500));
        let second_ref = store.stats().unwrap().reference_time;

        assert!(second_ref > first_ref);
    }

    #[test]
    fn test_previous_cycle_rekeys_window() {
        let mut store = PacketInfoStore::new();
        let t0 = Instant::now();
        store.insert(0, t0);
        store.insert(65535, t0 + Duration::from_millis(1));

        let stats = store.stats().unwrap();
        assert_eq!(stats.packet_status_count, 2);
    }
}
