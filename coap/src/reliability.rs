//! Reliable delivery of confirmable (`CON`) messages over unreliable
//! transport: retransmit-with-backoff, deduplication, and the exchange
//! ledger that lets a duplicate request replay its cached response
//! byte-for-byte.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use coap_msg::Id;
use log::{debug, warn};

use crate::config::Config;
use crate::retry::{Attempts, RetryTimer, Strategy, YouShould};

/// A confirmable message awaiting acknowledgement.
struct Pending {
  bytes: Vec<u8>,
  dest: SocketAddr,
  timer: RetryTimer,
}

/// Outcome of a reliability tick for one pending transmission.
pub enum TickResult {
  /// Retransmit `bytes` to `dest` again.
  Retransmit { bytes: Vec<u8>, dest: SocketAddr },
  /// Attempts exhausted; the originator should be told `TRANSMIT_FAIL`.
  Failed,
}

/// Tracks in-flight `CON` messages (keyed by `(peer, message-id)`) and the
/// exchange ledger used for request deduplication.
pub struct Reliability {
  pending: Mutex<HashMap<(SocketAddr, Id), Pending>>,
  exchanges: Mutex<HashMap<(SocketAddr, Id), (Vec<u8>, Instant)>>,
  exchange_lifetime: Duration,
}

impl Reliability {
  pub fn new(config: &Config) -> Self {
    Reliability { pending: Mutex::new(HashMap::new()), exchanges: Mutex::new(HashMap::new()), exchange_lifetime: config.msg.exchange_lifetime }
  }

  /// Register a freshly-sent `CON` message for retransmit tracking.
  pub fn track(&self, peer: SocketAddr, id: Id, bytes: Vec<u8>, strategy: Strategy, max_attempts: Attempts, now: Instant) {
    let timer = RetryTimer::new(now, strategy, max_attempts);
    self.pending.lock().unwrap().insert((peer, id), Pending { bytes, dest: peer, timer });
  }

  /// An `ACK` or `RST` arrived matching `(peer, id)`; stop tracking it.
  /// Returns `true` if something was actually pending.
  pub fn acknowledge(&self, peer: SocketAddr, id: Id) -> bool {
    self.pending.lock().unwrap().remove(&(peer, id)).is_some()
  }

  /// Sweep all pending transmissions, retransmitting due ones and
  /// reporting exhausted ones. Called on the reliability tick (~100ms).
  pub fn tick(&self, now: Instant) -> Vec<((SocketAddr, Id), TickResult)> {
    let mut pending = self.pending.lock().unwrap();
    let mut results = Vec::new();
    let mut exhausted = Vec::new();

    for (key, entry) in pending.iter_mut() {
      match entry.timer.what_should_i_do(now) {
        | YouShould::Retry => {
          debug!("retransmitting {:?} attempt={}", key, entry.timer.attempts().0);
          results.push((*key, TickResult::Retransmit { bytes: entry.bytes.clone(), dest: entry.dest }));
        },
        | YouShould::Cry => {
          warn!("{:?} exhausted retransmit attempts", key);
          results.push((*key, TickResult::Failed));
          exhausted.push(*key);
        },
        | YouShould::WouldBlock => {},
      }
    }

    for key in exhausted {
      pending.remove(&key);
    }

    results
  }

  /// Record the response sent for `(peer, id)` so a duplicate request can
  /// be answered identically without re-invoking the handler.
  pub fn remember_exchange(&self, peer: SocketAddr, id: Id, response: Vec<u8>, now: Instant) {
    self.exchanges.lock().unwrap().insert((peer, id), (response, now));
  }

  /// If `(peer, id)` was already answered within `EXCHANGE_LIFETIME`,
  /// return the cached response bytes.
  pub fn cached_response(&self, peer: SocketAddr, id: Id, now: Instant) -> Option<Vec<u8>> {
    let exchanges = self.exchanges.lock().unwrap();
    exchanges.get(&(peer, id)).filter(|(_, recorded_at)| now.saturating_duration_since(*recorded_at) < self.exchange_lifetime).map(|(bytes, _)| bytes.clone())
  }

  /// Drop exchange entries older than `EXCHANGE_LIFETIME`.
  pub fn expire_exchanges(&self, now: Instant) {
    self.exchanges.lock().unwrap().retain(|_, (_, recorded_at)| now.saturating_duration_since(*recorded_at) < self.exchange_lifetime);
  }

  pub fn pending_count(&self) -> usize {
    self.pending.lock().unwrap().len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn peer() -> SocketAddr {
    "127.0.0.1:5683".parse().unwrap()
  }

  #[test]
  fn black_holed_peer_retransmits_then_fails() {
    let config = Config::default();
    let rel = Reliability::new(&config);
    let start = Instant::now();
    let strategy = Strategy::Delay { min: Duration::from_millis(10), max: Duration::from_millis(10) };

    rel.track(peer(), Id(1), vec![0xAB], strategy, Attempts(2), start);

    let first = rel.tick(start + Duration::from_millis(10));
    assert_eq!(first.len(), 1);
    assert!(matches!(first[0].1, TickResult::Retransmit { .. }));

    let second = rel.tick(start + Duration::from_millis(20));
    assert_eq!(second.len(), 1);
    assert!(matches!(second[0].1, TickResult::Retransmit { .. }));

    let third = rel.tick(start + Duration::from_secs(10));
    assert_eq!(third.len(), 1);
    assert!(matches!(third[0].1, TickResult::Failed));
    assert_eq!(rel.pending_count(), 0);
  }

  #[test]
  fn acknowledge_removes_pending_entry() {
    let config = Config::default();
    let rel = Reliability::new(&config);
    let now = Instant::now();
    rel.track(peer(), Id(2), vec![], Strategy::Delay { min: Duration::from_secs(1), max: Duration::from_secs(1) }, Attempts(4), now);
    assert_eq!(rel.pending_count(), 1);
    assert!(rel.acknowledge(peer(), Id(2)));
    assert_eq!(rel.pending_count(), 0);
    assert!(!rel.acknowledge(peer(), Id(2)));
  }

  #[test]
  fn duplicate_request_replays_cached_response() {
    let config = Config::default();
    let rel = Reliability::new(&config);
    let now = Instant::now();
    rel.remember_exchange(peer(), Id(3), vec![1, 2, 3], now);
    assert_eq!(rel.cached_response(peer(), Id(3), now + Duration::from_secs(1)), Some(vec![1, 2, 3]));
  }

  #[test]
  fn cached_response_expires_after_exchange_lifetime() {
    let mut config = Config::default();
    config.msg.exchange_lifetime = Duration::from_secs(5);
    let rel = Reliability::new(&config);
    let now = Instant::now();
    rel.remember_exchange(peer(), Id(4), vec![9], now);
    assert_eq!(rel.cached_response(peer(), Id(4), now + Duration::from_secs(10)), None);
  }
}
