//! Receive-side RTP jitter buffer, TWCC arrival-time store, and TWCC
//! feedback codec.
//!
//! The stream-graph wiring, SSRC routing, and RTCP dispatch that would
//! normally sit around these pieces are treated as external collaborators;
//! this crate only reorders, times, and encodes.

pub mod buffer_store;
pub mod error;
pub mod jitter_buffer;
pub mod packet_info_store;
pub mod time;
pub mod twcc;

pub use buffer_store::{Buffer, BufferStore, PacketRecord};
pub use jitter_buffer::{Event, JitterBuffer, JitterBufferConfig, Stats};
pub use packet_info_store::{PacketInfoStats, PacketInfoStore};
pub use time::MicroTime;
pub use twcc::{PacketStatusSymbol, TwccFeedback};
