//! Transport-Wide Congestion Control: packet-status chunks and the
//! receive-side feedback codec, per
//! draft-holmer-rmcat-transport-wide-cc-extensions-01.

pub mod chunk;
pub mod feedback;

pub use chunk::PacketStatusSymbol;
pub use feedback::TwccFeedback;
