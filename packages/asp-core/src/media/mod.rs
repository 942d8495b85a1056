//! Media Server driver support (C5, §4.5, §6, §10.7): the playout
//! pacer/jitter buffer, the `MediaChannel` telephony abstraction, and the
//! `CallControl` tool sink.

pub mod callcontrol;
pub mod channel;
pub mod pacer;

pub use callcontrol::{CallControl, NoopCallControl};
pub use channel::{MediaChannel, SimulatedMediaChannel};
pub use pacer::{JitterBuffer, PlayoutPacer};
