//! Error hierarchy for the protocol-plane runtime. Mirrors the shape of
//! `toad::core::error::{Error, What}`: a contextless `What` plus a `When`
//! the failure occurred in, manually implementing `std::error::Error`
//! rather than reaching for `thiserror` (the teacher crate's closest
//! dependents don't use it either).

use std::fmt;
use std::io;

use coap_msg::{MessageParseError, MessageToBytesError};

/// The context an error occurred in.
#[derive(Debug, Clone)]
pub enum When {
  Decoding,
  Encoding,
  Routing,
  Dispatching,
  Transmitting,
  None,
}

/// A contextless error, mirroring §7's error kinds.
#[derive(Debug)]
pub enum What {
  /// Codec rejected inbound bytes.
  Malformed(MessageParseError),
  /// Codec rejected an outbound message.
  ToBytes(MessageToBytesError),
  /// A critical option was not recognized.
  BadOption(String),
  /// No route matched the request path.
  NotFound,
  /// A route matched the path but not the method.
  MethodNotAllowed,
  /// Handler-requested halt, carrying the status and body it attached.
  Halt(coap_msg::Code, Vec<u8>),
  /// A handler panicked or returned an unexpected error.
  HandlerError(String),
  /// A confirmable message was retransmitted `MAX_RETRANSMIT` times with
  /// no ACK/RST.
  TransmitFail,
  /// A client request or subscription exceeded its deadline.
  Timeout,
  /// The underlying socket failed.
  Io(io::Error),
}

/// An error with the context it occurred in.
#[derive(Debug)]
pub struct Error {
  pub what: What,
  pub when: When,
}

impl Error {
  pub fn new(what: What, when: When) -> Self {
    Error { what, when }
  }

  pub fn malformed(e: MessageParseError, when: When) -> Self {
    Error::new(What::Malformed(e), when)
  }

  /// Is this a `MALFORMED` error, and if so, what was the underlying
  /// parse failure?
  pub fn message_parse_error(&self) -> Option<&MessageParseError> {
    match &self.what {
      | What::Malformed(e) => Some(e),
      | _ => None,
    }
  }
}

impl fmt::Display for When {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      | When::Decoding => write!(f, "decoding a message"),
      | When::Encoding => write!(f, "encoding a message"),
      | When::Routing => write!(f, "routing a request"),
      | When::Dispatching => write!(f, "dispatching to a handler"),
      | When::Transmitting => write!(f, "transmitting a message"),
      | When::None => write!(f, "no particular context"),
    }
  }
}

impl fmt::Display for What {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      | What::Malformed(e) => write!(f, "malformed message: {e}"),
      | What::ToBytes(e) => write!(f, "could not encode message: {e}"),
      | What::BadOption(s) => write!(f, "bad option: {s}"),
      | What::NotFound => write!(f, "no route matched"),
      | What::MethodNotAllowed => write!(f, "route matched but method did not"),
      | What::Halt(code, _) => write!(f, "handler halted with {code}"),
      | What::HandlerError(s) => write!(f, "handler error: {s}"),
      | What::TransmitFail => write!(f, "confirmable message was never acknowledged"),
      | What::Timeout => write!(f, "operation timed out"),
      | What::Io(e) => write!(f, "io error: {e}"),
    }
  }
}

impl fmt::Display for Error {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} (while {})", self.what, self.when)
  }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
  fn from(e: io::Error) -> Self {
    Error::new(What::Io(e), When::None)
  }
}
