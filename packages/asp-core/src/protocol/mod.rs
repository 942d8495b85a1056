//! ASP transport & codec (C3, §4.3, §6): control JSON envelope, the binary
//! audio frame header, and the `Transport` abstraction they're carried over.

pub mod control;
pub mod frame;
pub mod transport;

pub use control::{AudioParams, ControlMessage, VadParams};
pub use frame::AudioFrame;
pub use transport::{Transport, TransportMessage};
