//! The TWCC feedback payload: header, packed chunks, and receive deltas,
//! per draft-holmer-rmcat-transport-wide-cc-extensions-01.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |      base sequence number     |      packet status count     |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                 reference time                | fb pkt. count |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                packet status chunks ...                      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |               receive deltas ... | zero padding to 4 bytes    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use bytes::{Buf, BufMut, BytesMut};
use tracing::warn;

use crate::error::DecodeError;
use crate::time::MicroTime;
use crate::twcc::chunk::{pack_chunks, unpack_chunk, PacketStatusSymbol};

const HEADER_LEN: usize = 8;
const DELTA_SCALE_US: i64 = 250;
const REFERENCE_TIME_SCALE_US: i64 = 64_000;

/// One decoded or to-be-encoded TWCC feedback record.
#[derive(Debug, Clone, PartialEq)]
pub struct TwccFeedback {
    pub base_seq_num: u16,
    pub reference_time: MicroTime,
    pub feedback_packet_count: u8,
    /// One slot per packet in the window; `None` is not-received.
    pub receive_deltas: Vec<Option<MicroTime>>,
}

impl TwccFeedback {
    pub fn packet_status_count(&self) -> u16 {
        self.receive_deltas.len() as u16
    }

    /// Encodes this record to its wire form, clamping any out-of-range
    /// receive delta to the representable signed-16 range rather than
    /// failing (spec: recoverable, clamp and warn).
    pub fn encode(&self) -> BytesMut {
        let statuses: Vec<PacketStatusSymbol> = self
            .receive_deltas
            .iter()
            .map(|d| classify_delta(*d))
            .collect();
        let chunks = pack_chunks(&statuses);

        let mut buf = BytesMut::with_capacity(HEADER_LEN + chunks.len() * 2 + statuses.len() * 2);
        buf.put_u16(self.base_seq_num);
        buf.put_u16(self.packet_status_count());
        let reference_ticks = self.reference_time.ticks(REFERENCE_TIME_SCALE_US);
        buf.put_uint(reference_ticks as u64, 3);
        buf.put_u8(self.feedback_packet_count);

        for c in chunks {
            buf.put_u16(c);
        }

        for delta in &self.receive_deltas {
            let Some(d) = delta else { continue };
            let ticks = d.ticks(DELTA_SCALE_US);
            if (0..=255).contains(&ticks) {
                buf.put_u8(ticks as u8);
            } else {
                let clamped = ticks.clamp(i16::MIN as i64, i16::MAX as i64);
                if clamped != ticks {
                    warn!(ticks, "TWCC receive delta exceeds signed-16 range, clamping");
                }
                buf.put_i16(clamped as i16);
            }
        }

        let padding = (4 - (buf.len() % 4)) % 4;
        buf.put_bytes(0, padding);
        buf
    }

    /// Decodes a wire-format feedback payload.
    pub fn decode(mut data: &[u8]) -> Result<TwccFeedback, DecodeError> {
        if data.len() < HEADER_LEN {
            return Err(DecodeError::UnexpectedEof {
                needed: HEADER_LEN - data.len(),
            });
        }
        let base_seq_num = data.get_u16();
        let packet_status_count = data.get_u16() as usize;
        let reference_ticks = data.get_uint(3) as i64;
        let feedback_packet_count = data.get_u8();
        let reference_time = MicroTime::from_ticks(reference_ticks, REFERENCE_TIME_SCALE_US);

        let mut statuses = Vec::with_capacity(packet_status_count);
        while statuses.len() < packet_status_count {
            if data.remaining() < 2 {
                return Err(DecodeError::UnexpectedEof {
                    needed: 2 - data.remaining(),
                });
            }
            let raw = data.get_u16();
            let remaining = packet_status_count - statuses.len();
            statuses.extend(unpack_chunk(raw, remaining)?);
        }
        if statuses.len() != packet_status_count {
            return Err(DecodeError::ChunkCountMismatch {
                produced: statuses.len(),
                expected: packet_status_count,
            });
        }

        let mut receive_deltas = Vec::with_capacity(packet_status_count);
        for status in &statuses {
            let delta = match status {
                PacketStatusSymbol::NotReceived | PacketStatusSymbol::Reserved => None,
                PacketStatusSymbol::SmallDelta => {
                    if data.remaining() < 1 {
                        return Err(DecodeError::UnexpectedEof { needed: 1 });
                    }
                    let ticks = data.get_u8() as i64;
                    Some(MicroTime::from_ticks(ticks, DELTA_SCALE_US))
                }
                PacketStatusSymbol::LargeOrNegativeDelta => {
                    if data.remaining() < 2 {
                        return Err(DecodeError::UnexpectedEof { needed: 2 });
                    }
                    let ticks = data.get_i16() as i64;
                    Some(MicroTime::from_ticks(ticks, DELTA_SCALE_US))
                }
            };
            receive_deltas.push(delta);
        }

        Ok(TwccFeedback {
            base_seq_num,
            reference_time,
            feedback_packet_count,
            receive_deltas,
        })
    }
}

/// `small_delta` iff the scaled ticks land in `[0, 255]`; everything else
/// received classifies as `large_or_negative_delta`.
fn classify_delta(delta: Option<MicroTime>) -> PacketStatusSymbol {
    match delta {
        None => PacketStatusSymbol::NotReceived,
        Some(d) => {
            let ticks = d.ticks(DELTA_SCALE_US);
            if (0..=255).contains(&ticks) {
                PacketStatusSymbol::SmallDelta
            } else {
                PacketStatusSymbol::LargeOrNegativeDelta
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scenario 6: the worked TWCC encoding example from the spec.
    #[test]
    fn test_scenario_encode_and_round_trip() {
        let fb = TwccFeedback {
            base_seq_num: 0,
            reference_time: MicroTime::from_micros(64_000),
            feedback_packet_count: 0,
            receive_deltas: vec![
                Some(MicroTime::from_micros(500)),
                None,
                Some(MicroTime::from_micros(500)),
                Some(MicroTime::from_micros(300_000)),
            ],
        };

        let encoded = fb.encode();
        assert_eq!(encoded.len() % 4, 0);

        let decoded = TwccFeedback::decode(&encoded).unwrap();
        assert_eq!(decoded.base_seq_num, 0);
        assert_eq!(decoded.packet_status_count() as usize, 4);
        assert_eq!(decoded.reference_time, fb.reference_time);
        assert_eq!(decoded.receive_deltas[0], Some(MicroTime::from_micros(500)));
        assert_eq!(decoded.receive_deltas[1], None);
        assert_eq!(decoded.receive_deltas[2], Some(MicroTime::from_micros(500)));
        assert_eq!(decoded.receive_deltas[3], Some(MicroTime::from_micros(300_000)));
    }

    #[test]
    fn test_padding_is_multiple_of_four() {
        let fb = TwccFeedback {
            base_seq_num: 7,
            reference_time: MicroTime::ZERO,
            feedback_packet_count: 3,
            receive_deltas: vec![Some(MicroTime::from_micros(250)); 5],
        };
        assert_eq!(fb.encode().len() % 4, 0);
    }

    #[test]
    fn test_large_delta_clamped_not_failed() {
        let fb = TwccFeedback {
            base_seq_num: 0,
            reference_time: MicroTime::ZERO,
            feedback_packet_count: 0,
            // far beyond the signed-16-tick range after /250us scaling.
            receive_deltas: vec![Some(MicroTime::from_micros(50_000_000))],
        };
        let encoded = fb.encode();
        let decoded = TwccFeedback::decode(&encoded).unwrap();
        assert_eq!(
            decoded.receive_deltas[0],
            Some(MicroTime::from_ticks(i16::MAX as i64, DELTA_SCALE_US))
        );
    }

    #[test]
    fn test_decode_rejects_truncated_header() {
        let err = TwccFeedback::decode(&[0u8; 4]).unwrap_err();
        assert_eq!(err, DecodeError::UnexpectedEof { needed: 4 });
    }

    #[test]
    fn test_chunk_count_matches_packet_status_count() {
        let deltas: Vec<Option<MicroTime>> = (0..20)
            .map(|i| if i % 3 == 0 { None } else { Some(MicroTime::from_micros(250 * i as i64)) })
            .collect();
        let fb = TwccFeedback {
            base_seq_num: 100,
            reference_time: MicroTime::ZERO,
            feedback_packet_count: 1,
            receive_deltas: deltas.clone(),
        };
        let decoded = TwccFeedback::decode(&fb.encode()).unwrap();
        assert_eq!(decoded.packet_status_count() as usize, deltas.len());
    }
}
