//! Low-level CoAP message parsing & serialization.
//!
//! Covers the datagram framing of [RFC7252](https://www.rfc-editor.org/rfc/rfc7252)
//! and the stream framing of [RFC8323](https://www.rfc-editor.org/rfc/rfc8323),
//! plus the option model shared by both (including the `Observe` option of
//! [RFC7641](https://www.rfc-editor.org/rfc/rfc7641)). This crate knows
//! nothing about sockets, retransmission, or routing — see the `coap` crate
//! for the runtime built on top of it.

mod code;
mod id;
mod msg;
pub mod opt;
mod parse_error;
pub mod stream;
mod token;
mod ty;

pub use code::{Code, CodeKind};
pub use id::Id;
pub use msg::Message;
pub use opt::{known, ContentFormat, OptNumber, OptValue, OptionMap};
pub use parse_error::{MessageParseError, MessageToBytesError};
pub use stream::frame_len;
pub use token::Token;
pub use ty::Type;

#[cfg(test)]
pub(crate) fn test_msg() -> Message {
  let mut m = Message::new(Type::Con, Code::GET, Id(1), Token(vec![0xFE]));
  m.set_path("ping");
  m
}
