//! Server-side observation registry (RFC7641): tracks subscribers per
//! resource path and builds ordered notification messages.

pub mod watcher;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

use coap_msg::{Code, ContentFormat, Message, Token, Type};
use log::debug;
use rand::Rng;

struct Subscriber {
  peer: SocketAddr,
  token: Token,
  seq: u32,
  last_payload_hash: Option<u64>,
}

/// Tracks, per resource path, which `(peer, token)` pairs are observing it
/// and the next `Observe` sequence number to hand out.
#[derive(Default)]
pub struct Registry {
  subscribers: HashMap<String, Vec<Subscriber>>,
}

impl Registry {
  pub fn new() -> Self {
    Registry::default()
  }

  /// Register `peer`/`token` as an observer of `path`, replacing any
  /// existing registration for the same `(peer, token)`.
  pub fn register(&mut self, path: &str, peer: SocketAddr, token: Token) {
    self.deregister(path, peer, &token);
    let seq = rand::thread_rng().gen_range(0..(1u32 << 24));
    self.subscribers.entry(path.to_string()).or_default().push(Subscriber { peer, token, seq, last_payload_hash: None });
    debug!("registered observer {peer} for {path}");
  }

  /// Remove the `(peer, token)` subscriber of `path`, if present.
  pub fn deregister(&mut self, path: &str, peer: SocketAddr, token: &Token) {
    if let Some(subs) = self.subscribers.get_mut(path) {
      subs.retain(|s| !(s.peer == peer && &s.token == token));
    }
  }

  /// Remove every subscription held by `peer` with `token`, across all
  /// paths — used when a `RST` is received for a notification.
  pub fn deregister_peer_token(&mut self, peer: SocketAddr, token: &Token) {
    for subs in self.subscribers.values_mut() {
      subs.retain(|s| !(s.peer == peer && &s.token == token));
    }
  }

  pub fn subscriber_count(&self, path: &str) -> usize {
    self.subscribers.get(path).map(Vec::len).unwrap_or(0)
  }

  /// The sequence number that would be attached to `(peer, token)`'s next
  /// notification on `path` — used to stamp the `Observe` option on the
  /// registering response itself.
  pub fn current_seq(&self, path: &str, peer: SocketAddr, token: &Token) -> Option<u32> {
    self.subscribers.get(path)?.iter().find(|s| s.peer == peer && &s.token == token).map(|s| s.seq)
  }

  /// Build one notification message per subscriber of `path` carrying
  /// `payload`/`content_format`, advancing each subscriber's sequence
  /// number. Skips a subscriber if the payload is unchanged since its
  /// last notification (used by the polling watcher; always notifies on
  /// a writer-triggered call since the caller already knows the value
  /// changed).
  pub fn notify(&mut self, path: &str, payload: &[u8], content_format: ContentFormat, only_on_change: bool) -> Vec<(SocketAddr, Message)> {
    let hash = hash_payload(payload);
    let Some(subs) = self.subscribers.get_mut(path) else { return Vec::new() };

    let mut out = Vec::with_capacity(subs.len());
    for sub in subs.iter_mut() {
      if only_on_change && sub.last_payload_hash == Some(hash) {
        continue;
      }
      sub.last_payload_hash = Some(hash);

      let mut msg = Message::new(Type::Non, Code::CONTENT, coap_msg::Id(0), sub.token.clone());
      msg.set_content_format(content_format);
      msg.set_observe(sub.seq);
      msg.payload = payload.to_vec();
      sub.seq = coap_msg::opt::observe::next_seq(sub.seq);

      out.push((sub.peer, msg));
    }
    out
  }
}

fn hash_payload(payload: &[u8]) -> u64 {
  use std::hash::{Hash, Hasher};
  let mut hasher = std::collections::hash_map::DefaultHasher::new();
  payload.hash(&mut hasher);
  hasher.finish()
}

/// Is `last_notified` stale enough that the RFC7641 wrap-around
/// comparator should fall back to elapsed time? Thin wrapper kept here so
/// callers don't need to reach into `coap_msg::opt::observe` directly.
pub fn is_newer(current: u32, candidate: u32, since: Instant, now: Instant) -> bool {
  coap_msg::opt::observe::is_newer(current, candidate, now.saturating_duration_since(since).as_secs())
}
