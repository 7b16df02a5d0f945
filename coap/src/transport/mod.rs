//! Transport adapters: datagram (UDP, RFC7252) and stream (TCP, RFC8323)
//! receive loops that feed bytes to the codec and dispatcher.

pub mod datagram;
pub mod stream;
