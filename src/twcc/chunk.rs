//! Packet-status chunks: the run-length and status-vector encodings from
//! draft-holmer-rmcat-transport-wide-cc-extensions-01 §3.1.3/§3.1.4.

use crate::error::DecodeError;

/// One packet's receive status, as carried in a packet-status chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketStatusSymbol {
    NotReceived = 0,
    SmallDelta = 1,
    LargeOrNegativeDelta = 2,
    /// Wire value 3; never produced by this encoder, accepted on decode.
    Reserved = 3,
}

impl TryFrom<u8> for PacketStatusSymbol {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PacketStatusSymbol::NotReceived),
            1 => Ok(PacketStatusSymbol::SmallDelta),
            2 => Ok(PacketStatusSymbol::LargeOrNegativeDelta),
            3 => Ok(PacketStatusSymbol::Reserved),
            other => Err(DecodeError::InvalidSymbol(other)),
        }
    }
}

/// Longest a single run-length chunk can claim (13-bit field).
const MAX_RUN_LENGTH_CAPACITY: u16 = 0x1FFF;
/// Slots in a 2-bit status-vector chunk (14 bits / 2).
const MAX_TWO_BIT_CAPACITY: usize = 7;
/// Slots in a 1-bit status-vector chunk (14 bits / 1), decode-only.
const MAX_ONE_BIT_CAPACITY: usize = 14;

/// An in-progress chunk, built up one symbol at a time while packing
/// deltas right-to-left.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ChunkBuilder {
    RunLength {
        status: PacketStatusSymbol,
        count: u16,
    },
    /// Always 2-bit symbols; this encoder never emits 1-bit vectors.
    Vector { symbols: Vec<PacketStatusSymbol> },
}

/// Packs a full sequence of packet statuses into wire chunks, following
/// the 5-rule state machine: process right-to-left, accumulate chunks in
/// reverse, then reverse for emission.
pub fn pack_chunks(statuses: &[PacketStatusSymbol]) -> Vec<u16> {
    let mut builders: Vec<ChunkBuilder> = Vec::new();

    for &status in statuses.iter().rev() {
        add_status(&mut builders, status);
    }

    builders.reverse();
    for b in &mut builders {
        if let ChunkBuilder::Vector { symbols } = b {
            symbols.reverse();
        }
    }

    builders.iter().map(emit).collect()
}

fn add_status(builders: &mut Vec<ChunkBuilder>, status: PacketStatusSymbol) {
    let Some(last) = builders.last_mut() else {
        builders.push(ChunkBuilder::RunLength { status, count: 1 });
        return;
    };
    match last {
        ChunkBuilder::RunLength {
            status: tail_status,
            count,
        } => {
            if *count >= MAX_RUN_LENGTH_CAPACITY {
                builders.push(ChunkBuilder::RunLength { status, count: 1 });
            } else if *tail_status == status {
                *count += 1;
            } else if (*count as usize) < MAX_TWO_BIT_CAPACITY {
                let mut symbols = vec![*tail_status; *count as usize];
                symbols.push(status);
                *last = ChunkBuilder::Vector { symbols };
            } else {
                builders.push(ChunkBuilder::RunLength { status, count: 1 });
            }
        }
        ChunkBuilder::Vector { symbols } => {
            if symbols.len() < MAX_TWO_BIT_CAPACITY {
                symbols.push(status);
            } else {
                builders.push(ChunkBuilder::RunLength { status, count: 1 });
            }
        }
    }
}

fn emit(builder: &ChunkBuilder) -> u16 {
    match builder {
        ChunkBuilder::RunLength { status, count } => {
            debug_assert!(*count <= MAX_RUN_LENGTH_CAPACITY);
            ((*status as u16) << 13) | count
        }
        ChunkBuilder::Vector { symbols } => {
            debug_assert!(symbols.len() <= MAX_TWO_BIT_CAPACITY);
            let mut bits: u16 = 0;
            for (i, s) in symbols.iter().enumerate() {
                bits |= (*s as u16) << (12 - 2 * i);
            }
            (1 << 15) | (1 << 14) | bits
        }
    }
}

/// Expands one wire chunk into its constituent statuses, truncating to
/// `remaining` if the chunk would otherwise overshoot (the final
/// over-filled status vector per libwebrtc's own encoder).
pub fn unpack_chunk(raw: u16, remaining: usize) -> Result<Vec<PacketStatusSymbol>, DecodeError> {
    let symbols = if raw & 0x8000 == 0 {
        let status = PacketStatusSymbol::try_from(((raw >> 13) & 0b11) as u8)?;
        let run_length = (raw & MAX_RUN_LENGTH_CAPACITY) as usize;
        vec![status; run_length]
    } else {
        let symbol_size_id = (raw >> 14) & 0b1;
        let payload = raw & 0x3FFF;
        match symbol_size_id {
            0 => (0..MAX_ONE_BIT_CAPACITY)
                .map(|i| {
                    let bit = (payload >> (13 - i)) & 0b1;
                    // 1 = small_delta, 0 = not_received, per libwebrtc.
                    if bit == 1 {
                        PacketStatusSymbol::SmallDelta
                    } else {
                        PacketStatusSymbol::NotReceived
                    }
                })
                .collect(),
            1 => (0..MAX_TWO_BIT_CAPACITY)
                .map(|i| {
                    let sym = ((payload >> (12 - 2 * i)) & 0b11) as u8;
                    PacketStatusSymbol::try_from(sym)
                })
                .collect::<Result<Vec<_>, _>>()?,
            other => return Err(DecodeError::InvalidSymbolSize(other as u8)),
        }
    };

    if symbols.len() > remaining {
        Ok(symbols.into_iter().take(remaining).collect())
    } else {
        Ok(symbols)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PacketStatusSymbol::*;

    #[test]
    fn test_single_run_length_chunk() {
        let chunks = pack_chunks(&[SmallDelta, SmallDelta, SmallDelta]);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], (1u16 << 13) | 3);
    }

    #[test]
    fn test_run_length_folds_into_vector_under_capacity() {
        // Two small deltas followed by a large delta: the run-length of 2
        // is short enough to fold into a 2-bit vector instead of emitting
        // two chunks.
        let chunks = pack_chunks(&[SmallDelta, SmallDelta, LargeOrNegativeDelta]);
        assert_eq!(chunks.len(), 1);
        let raw = chunks[0];
        assert_eq!(raw & 0x8000, 0x8000);
        assert_eq!((raw >> 14) & 1, 1); // 2-bit vector
        let bits = raw & 0x3FFF;
        assert_eq!((bits >> 12) & 0b11, SmallDelta as u16);
        assert_eq!((bits >> 10) & 0b11, SmallDelta as u16);
        assert_eq!((bits >> 8) & 0b11, LargeOrNegativeDelta as u16);
    }

    #[test]
    fn test_long_run_stays_run_length_not_folded() {
        // Packing runs right-to-left: by the time the leading large delta
        // is processed, the trailing run of 7 small deltas has already
        // grown its run-length count to 7 — at the fold boundary — so
        // converting it to a vector would overflow, and it's left alone.
        let mut statuses = vec![LargeOrNegativeDelta];
        statuses.extend(vec![SmallDelta; 7]);
        let chunks = pack_chunks(&statuses);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], (LargeOrNegativeDelta as u16) << 13 | 1);
        assert_eq!(chunks[1], (SmallDelta as u16) << 13 | 7);
    }

    #[test]
    fn test_vector_fills_and_overflows_to_new_chunk() {
        let statuses = vec![SmallDelta, LargeOrNegativeDelta, SmallDelta, LargeOrNegativeDelta, SmallDelta, LargeOrNegativeDelta, SmallDelta, LargeOrNegativeDelta];
        let chunks = pack_chunks(&statuses);
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn test_run_length_round_trips() {
        let chunks = pack_chunks(&[NotReceived, NotReceived, NotReceived, NotReceived]);
        let decoded = unpack_chunk(chunks[0], 4).unwrap();
        assert_eq!(decoded, vec![NotReceived; 4]);
    }

    #[test]
    fn test_vector_round_trips() {
        let statuses = vec![SmallDelta, NotReceived, SmallDelta];
        let chunks = pack_chunks(&statuses);
        let decoded = unpack_chunk(chunks[0], statuses.len()).unwrap();
        assert_eq!(decoded, statuses);
    }

    #[test]
    fn test_overfilled_vector_truncated_on_decode() {
        // A full 7-symbol 2-bit vector chunk, but only 3 statuses remain.
        let raw = (1u16 << 15) | (1 << 14) | 0b01_01_01_01_01_01_01;
        let decoded = unpack_chunk(raw, 3).unwrap();
        assert_eq!(decoded.len(), 3);
    }

    #[test]
    fn test_reserved_symbol_decodes_but_is_never_emitted() {
        let raw = (1u16 << 15) | (1 << 14) | 0b11_00_00_00_00_00_00;
        let decoded = unpack_chunk(raw, 7).unwrap();
        assert_eq!(decoded[0], Reserved);
    }

    #[test]
    fn test_one_bit_vector_decodes_per_libwebrtc_convention() {
        // symbol_size_id = 0: 14 one-bit symbols, 1 = small_delta.
        let raw = (1u16 << 15) | 0b10_1010_1010_1010;
        let decoded = unpack_chunk(raw, 14).unwrap();
        assert_eq!(decoded[0], SmallDelta);
        assert_eq!(decoded[1], NotReceived);
    }
}
