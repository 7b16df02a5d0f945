/// Registry mapping the `Content-Format`/`Accept` option's numeric codes to
/// the media types CoAP applications most commonly exchange.
///
/// See [RFC7252 Section 12.3](https://www.rfc-editor.org/rfc/rfc7252#section-12.3).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ContentFormat {
  TextPlain,
  LinkFormat,
  Json,
  Cbor,
  Other(u16),
}

impl ContentFormat {
  pub fn code(self) -> u16 {
    match self {
      | Self::TextPlain => 0,
      | Self::LinkFormat => 40,
      | Self::Json => 50,
      | Self::Cbor => 60,
      | Self::Other(n) => n,
    }
  }

  pub fn from_code(code: u16) -> Self {
    match code {
      | 0 => Self::TextPlain,
      | 40 => Self::LinkFormat,
      | 50 => Self::Json,
      | 60 => Self::Cbor,
      | n => Self::Other(n),
    }
  }

  /// Parse the human media-type string used in the `Accept:`-style headers
  /// of the spec's CLI and handler surface. Unknown strings are the
  /// `BAD_OPTION` condition at the call site.
  pub fn from_human(s: &str) -> Option<Self> {
    Some(match s {
      | "text/plain" => Self::TextPlain,
      | "application/link-format" => Self::LinkFormat,
      | "application/json" => Self::Json,
      | "application/cbor" => Self::Cbor,
      | _ => return None,
    })
  }

  pub fn to_human(self) -> String {
    match self {
      | Self::TextPlain => "text/plain".into(),
      | Self::LinkFormat => "application/link-format".into(),
      | Self::Json => "application/json".into(),
      | Self::Cbor => "application/cbor".into(),
      | Self::Other(n) => format!("application/octet-stream;code={n}"),
    }
  }
}
