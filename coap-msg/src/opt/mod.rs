use std::collections::BTreeMap;
use std::str::Utf8Error;

pub mod content_format;
pub mod known;
pub mod observe;

pub use content_format::ContentFormat;

/// A CoAP option number, e.g. `11` for Uri-Path.
pub type OptNumber = u16;

/// The opaque bytes of a single option value.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub struct OptValue(pub Vec<u8>);

impl OptValue {
  pub fn empty() -> Self {
    OptValue(Vec::new())
  }

  pub fn uint(n: u64) -> Self {
    let bytes = n.to_be_bytes();
    let first_nonzero = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    OptValue(bytes[first_nonzero..].to_vec())
  }

  pub fn string(s: impl AsRef<str>) -> Self {
    OptValue(s.as_ref().as_bytes().to_vec())
  }

  pub fn as_str(&self) -> Result<&str, Utf8Error> {
    std::str::from_utf8(&self.0)
  }

  pub fn as_uint(&self) -> u64 {
    self.0.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
  }
}

impl From<Vec<u8>> for OptValue {
  fn from(v: Vec<u8>) -> Self {
    OptValue(v)
  }
}

/// Whether an option number is critical (must be understood) or elective,
/// and whether it may repeat.
///
/// See [RFC7252 Section 5.4.1](https://www.rfc-editor.org/rfc/rfc7252#section-5.4.1).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct OptionSpec {
  pub number: OptNumber,
  pub name: &'static str,
  pub repeatable: bool,
}

impl OptionSpec {
  /// Odd option numbers are critical: an endpoint that doesn't recognize
  /// them must reject the message rather than silently ignore the option.
  pub fn critical(number: OptNumber) -> bool {
    number % 2 == 1
  }

  /// Bit 1 (from the LSB, ignoring the critical bit) marks "UnSafe to
  /// forward"; not meaningful without a proxy, kept for completeness.
  pub fn unsafe_to_forward(number: OptNumber) -> bool {
    number & 0b10 == 0b10
  }
}

/// Ordered multimap from option number to its values, preserving insertion
/// order for repeated options and overall ascending-number emission order.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct OptionMap(BTreeMap<OptNumber, Vec<OptValue>>);

impl OptionMap {
  pub fn new() -> Self {
    Self::default()
  }

  /// Append a new value for `number`, preserving earlier values.
  pub fn add(&mut self, number: OptNumber, value: OptValue) {
    self.0.entry(number).or_default().push(value);
  }

  /// Replace all existing values for `number` with `value` alone, returning
  /// whatever was previously stored.
  pub fn set(&mut self, number: OptNumber, value: OptValue) -> Option<Vec<OptValue>> {
    self.0.insert(number, vec![value])
  }

  pub fn remove(&mut self, number: OptNumber) -> Option<Vec<OptValue>> {
    self.0.remove(&number)
  }

  /// First value for `number`, if any.
  pub fn get(&self, number: OptNumber) -> Option<&OptValue> {
    self.0.get(&number).and_then(|vs| vs.first())
  }

  /// Every value for `number`, in insertion order.
  pub fn get_all(&self, number: OptNumber) -> &[OptValue] {
    self.0.get(&number).map(Vec::as_slice).unwrap_or(&[])
  }

  pub fn count(&self, number: OptNumber) -> usize {
    self.0.get(&number).map(Vec::len).unwrap_or(0)
  }

  /// Iterate `(number, value)` pairs in ascending-number, then insertion,
  /// order — the order they must be emitted on the wire.
  pub fn iter(&self) -> impl Iterator<Item = (OptNumber, &OptValue)> {
    self.0.iter().flat_map(|(&n, vs)| vs.iter().map(move |v| (n, v)))
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

/// Split a `Uri-Path` string (`"a/b/c"`) into its segments.
pub fn split_path(path: &str) -> Vec<String> {
  path.split('/').filter(|s| !s.is_empty()).map(percent_decode).collect()
}

/// Join `Uri-Path` segments back into a single string with `/` separators.
pub fn join_path<'a>(segments: impl Iterator<Item = &'a str>) -> String {
  segments.collect::<Vec<_>>().join("/")
}

/// Split a `Uri-Query` string (`"a=1&b=2"`) into its individual parameters.
pub fn split_query(query: &str) -> Vec<String> {
  query.split('&').filter(|s| !s.is_empty()).map(percent_decode).collect()
}

fn percent_decode(segment: &str) -> String {
  let bytes = segment.as_bytes();
  let mut out = Vec::with_capacity(bytes.len());
  let mut i = 0;
  while i < bytes.len() {
    if bytes[i] == b'%' && i + 2 < bytes.len() {
      if let Ok(byte) = u8::from_str_radix(std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or(""), 16) {
        out.push(byte);
        i += 3;
        continue;
      }
    }
    out.push(bytes[i]);
    i += 1;
  }
  String::from_utf8(out).unwrap_or_else(|_| segment.to_string())
}
