use crate::parse_error::MessageParseError;

/// Indicates if this message is of type Confirmable, Non-confirmable,
/// Acknowledgement, or Reset.
///
/// See [RFC7252 Section 3](https://www.rfc-editor.org/rfc/rfc7252#section-3).
#[derive(Copy, Clone, Hash, Eq, Ord, PartialEq, PartialOrd, Debug)]
pub enum Type {
  /// Some messages do not require an acknowledgement. This is particularly
  /// true for messages that are repeated regularly, such as readings from
  /// a sensor.
  Non,
  /// Some messages require an acknowledgement. When no packets are lost,
  /// each Confirmable message elicits exactly one return message of type
  /// Acknowledgement or Reset.
  Con,
  /// Acknowledges that a specific Confirmable message arrived. May carry
  /// a piggybacked response.
  Ack,
  /// Indicates that a specific message was received, but some context is
  /// missing to properly process it.
  Reset,
}

impl Type {
  pub(crate) fn to_bits(self) -> u8 {
    match self {
      | Type::Con => 0,
      | Type::Non => 1,
      | Type::Ack => 2,
      | Type::Reset => 3,
    }
  }
}

impl TryFrom<u8> for Type {
  type Error = MessageParseError;

  fn try_from(b: u8) -> Result<Self, Self::Error> {
    match b {
      | 0 => Ok(Type::Con),
      | 1 => Ok(Type::Non),
      | 2 => Ok(Type::Ack),
      | 3 => Ok(Type::Reset),
      | _ => Err(MessageParseError::InvalidType(b)),
    }
  }
}
