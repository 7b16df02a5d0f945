//! Option numbers defined by RFC7252/RFC7641, and which of them repeat.
use super::OptNumber;

pub const IF_MATCH: OptNumber = 1;
pub const URI_HOST: OptNumber = 3;
pub const ETAG: OptNumber = 4;
pub const IF_NONE_MATCH: OptNumber = 5;
pub const OBSERVE: OptNumber = 6;
pub const URI_PORT: OptNumber = 7;
pub const LOCATION_PATH: OptNumber = 8;
pub const URI_PATH: OptNumber = 11;
pub const CONTENT_FORMAT: OptNumber = 12;
pub const MAX_AGE: OptNumber = 14;
pub const URI_QUERY: OptNumber = 15;
pub const ACCEPT: OptNumber = 17;
pub const LOCATION_QUERY: OptNumber = 20;
pub const PROXY_URI: OptNumber = 35;
pub const PROXY_SCHEME: OptNumber = 39;
pub const SIZE1: OptNumber = 60;

/// Options that may appear more than once on a single message.
pub fn repeatable(number: OptNumber) -> bool {
  matches!(number, IF_MATCH | ETAG | LOCATION_PATH | URI_PATH | URI_QUERY | LOCATION_QUERY)
}

/// Human-readable name for options this crate knows about, used by logging
/// and the `4.02 Bad Option` path.
pub fn name(number: OptNumber) -> Option<&'static str> {
  Some(match number {
    | IF_MATCH => "If-Match",
    | URI_HOST => "Uri-Host",
    | ETAG => "ETag",
    | IF_NONE_MATCH => "If-None-Match",
    | OBSERVE => "Observe",
    | URI_PORT => "Uri-Port",
    | LOCATION_PATH => "Location-Path",
    | URI_PATH => "Uri-Path",
    | CONTENT_FORMAT => "Content-Format",
    | MAX_AGE => "Max-Age",
    | URI_QUERY => "Uri-Query",
    | ACCEPT => "Accept",
    | LOCATION_QUERY => "Location-Query",
    | PROXY_URI => "Proxy-Uri",
    | PROXY_SCHEME => "Proxy-Scheme",
    | SIZE1 => "Size1",
    | _ => return None,
  })
}
