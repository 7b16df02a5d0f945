//! Runtime configuration, constructed in code rather than parsed from a
//! file or environment (see crate-level Non-goals). Mirrors the shape of
//! the teacher's `toad::config`.

use std::time::Duration;

use crate::retry::{Attempts, Strategy};

/// Retry behaviour for outbound confirmable (`CON`) requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Con {
  /// Retry strategy while waiting for the initial ACK.
  ///
  /// Defaults to RFC7252's `ACK_TIMEOUT`=2s, `ACK_RANDOM_FACTOR`=1.5:
  /// a first retransmit somewhere in `[2s, 3s]`, doubling thereafter.
  pub unacked_retry_strategy: Strategy,
  /// Retry strategy once the request has been ACKed but a separate
  /// response hasn't arrived yet.
  pub acked_retry_strategy: Strategy,
  /// `MAX_RETRANSMIT`: number of retransmits allowed before giving up
  /// (RFC7252 default 4, for 5 total transmissions).
  pub max_attempts: Attempts,
}

impl Default for Con {
  fn default() -> Self {
    Con {
      unacked_retry_strategy: Strategy::Exponential { init_min: Duration::from_millis(2_000), init_max: Duration::from_millis(3_000) },
      acked_retry_strategy: Strategy::Exponential { init_min: Duration::from_millis(2_000), init_max: Duration::from_millis(3_000) },
      max_attempts: Attempts(4),
    }
  }
}

/// Retry behaviour for outbound non-confirmable (`NON`) requests awaiting
/// a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Non {
  pub retry_strategy: Strategy,
  pub max_attempts: Attempts,
}

impl Default for Non {
  fn default() -> Self {
    Non { retry_strategy: Strategy::Exponential { init_min: Duration::from_millis(250), init_max: Duration::from_millis(500) }, max_attempts: Attempts(4) }
  }
}

/// Message-layer configuration: retry strategies plus the exchange
/// deduplication window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Msg {
  pub con: Con,
  pub non: Non,
  /// `EXCHANGE_LIFETIME`: how long a processed request's response is kept
  /// around to answer duplicate deliveries byte-for-byte.
  pub exchange_lifetime: Duration,
}

impl Default for Msg {
  fn default() -> Self {
    Msg { con: Con::default(), non: Non::default(), exchange_lifetime: Duration::from_secs(247) }
  }
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
  pub msg: Msg,
  /// Number of worker threads per controller (route-group) pool.
  pub worker_pool_size: usize,
  /// How often the polling watcher re-evaluates observable handlers.
  pub watcher_interval: Duration,
  /// How often the reliability engine sweeps for due retransmits.
  pub reliability_tick: Duration,
}

impl Default for Config {
  fn default() -> Self {
    Config { msg: Msg::default(), worker_pool_size: 2, watcher_interval: Duration::from_secs(1), reliability_tick: Duration::from_millis(100) }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_match_rfc7252_constants() {
    let cfg = Config::default();
    assert_eq!(cfg.msg.con.max_attempts, Attempts(4));
    assert_eq!(cfg.msg.exchange_lifetime, Duration::from_secs(247));
    assert_eq!(cfg.reliability_tick, Duration::from_millis(100));
    assert_eq!(cfg.watcher_interval, Duration::from_secs(1));
  }
}
