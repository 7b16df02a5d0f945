use std::fmt;

/// Everything that can go wrong while decoding bytes into a [`crate::Message`].
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum MessageParseError {
  /// Ran out of bytes before the message was fully parsed.
  UnexpectedEndOfStream,
  /// First two bits of the first byte were not `01`.
  UnsupportedVersion(u8),
  /// The 2-bit type field held a value other than 0..=3.
  InvalidType(u8),
  /// Token length nibble claimed more than 8 bytes.
  InvalidTokenLength(u8),
  /// An option number nibble extension used the reserved value `15`
  /// outside of the payload marker position.
  ReservedOptionNibble,
  /// The `0xFF` payload marker was present with no payload following it.
  EmptyPayloadAfterMarker,
}

impl MessageParseError {
  pub fn eof() -> Self {
    MessageParseError::UnexpectedEndOfStream
  }
}

impl fmt::Display for MessageParseError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      | Self::UnexpectedEndOfStream => write!(f, "message ended before expected"),
      | Self::UnsupportedVersion(v) => write!(f, "unsupported CoAP version {v}"),
      | Self::InvalidType(t) => write!(f, "invalid message type bits {t}"),
      | Self::InvalidTokenLength(l) => write!(f, "token length {l} exceeds 8 bytes"),
      | Self::ReservedOptionNibble => write!(f, "option nibble used reserved value 15"),
      | Self::EmptyPayloadAfterMarker => write!(f, "payload marker present but payload is empty"),
    }
  }
}

impl std::error::Error for MessageParseError {}

/// Everything that can go wrong while encoding a [`crate::Message`] to bytes.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum MessageToBytesError {
  /// Token was longer than 8 bytes (should be unreachable if constructed via [`crate::Token::new`]).
  TokenTooLong,
  /// An option's encoded delta did not fit any supported nibble/extension combination.
  OptionNumberTooLarge(u32),
}

impl fmt::Display for MessageToBytesError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      | Self::TokenTooLong => write!(f, "token exceeds 8 bytes"),
      | Self::OptionNumberTooLarge(n) => write!(f, "option number {n} cannot be encoded"),
    }
  }
}

impl std::error::Error for MessageToBytesError {}
