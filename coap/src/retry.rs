//! Retransmit timing for confirmable messages: exponential backoff (or a
//! flat delay) with jitter, bounded by a maximum attempt count.
//!
//! Grounded on the teacher's `toad::retry`, with `embedded_time::Clock`
//! replaced by `std::time::Instant` since this crate targets std only.

use std::time::{Duration, Instant};

use rand::{Rng, SeedableRng};

/// A number of attempts.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Attempts(pub u16);

/// Result of [`RetryTimer::what_should_i_do`].
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum YouShould {
  /// Attempts have been exhausted; the work being retried should be
  /// considered failed.
  Cry,
  /// Not enough time has passed yet; call again later.
  WouldBlock,
  /// A retry should be performed now.
  Retry,
}

/// Strategy to employ when retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Double the delay after each failed attempt, starting from a value
  /// drawn uniformly from `[init_min, init_max]`.
  Exponential { init_min: Duration, init_max: Duration },
  /// Wait a fixed delay, drawn uniformly from `[min, max]`, between every
  /// attempt.
  Delay { min: Duration, max: Duration },
}

impl Strategy {
  fn has_jitter(&self) -> bool {
    let (lo, hi) = self.range();
    lo != hi
  }

  fn range(&self) -> (Duration, Duration) {
    match *self {
      | Strategy::Exponential { init_min, init_max } => (init_min, init_max),
      | Strategy::Delay { min, max } => (min, max),
    }
  }

  /// Total elapsed time if all `max_attempts` fail.
  pub fn max_time(&self, max_attempts: Attempts) -> Duration {
    match *self {
      | Strategy::Exponential { init_max, .. } => Self::total_delay_exp(init_max, max_attempts.0),
      | Strategy::Delay { max, .. } => max * max_attempts.0 as u32,
    }
  }

  /// Cumulative elapsed time through `attempt` retries of a doubling
  /// backoff: `attempt` | total delay
  /// `1`       | `init`
  /// `2`       | `init + init*2`
  /// `n`       | `init * (2^n - 1)`
  fn total_delay_exp(init: Duration, attempt: u16) -> Duration {
    if attempt == 0 {
      return Duration::ZERO;
    }
    init * (2u32.pow(attempt as u32) - 1)
  }
}

/// A retry timer that lives alongside some operation being retried. Holds
/// no reference to the operation itself — the caller drives the state
/// machine by calling [`what_should_i_do`](Self::what_should_i_do) with the
/// current time whenever the operation fails again.
#[derive(Debug, Clone, Copy)]
pub struct RetryTimer {
  start: Instant,
  init: Duration,
  strategy: Strategy,
  attempts: Attempts,
  max_attempts: Attempts,
}

impl RetryTimer {
  pub fn new(start: Instant, strategy: Strategy, max_attempts: Attempts) -> Self {
    let init = if strategy.has_jitter() {
      let (lo, hi) = strategy.range();
      let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(start.elapsed().as_nanos() as u64);
      let lo_ns = lo.as_nanos() as u64;
      let hi_ns = hi.as_nanos() as u64;
      Duration::from_nanos(rng.gen_range(lo_ns..=hi_ns))
    } else {
      strategy.range().0
    };

    RetryTimer { start, init, strategy, max_attempts, attempts: Attempts(0) }
  }

  /// Tell the timer the operation failed again and ask what to do.
  pub fn what_should_i_do(&mut self, now: Instant) -> YouShould {
    if self.attempts >= self.max_attempts {
      return YouShould::Cry;
    }

    let elapsed = now.saturating_duration_since(self.start);
    if self.is_ready(elapsed, self.attempts.0) {
      self.attempts.0 += 1;
      YouShould::Retry
    } else {
      YouShould::WouldBlock
    }
  }

  fn is_ready(&self, time_passed: Duration, attempts: u16) -> bool {
    let next = attempts + 1;
    match self.strategy {
      | Strategy::Delay { .. } => time_passed >= self.init * next as u32,
      | Strategy::Exponential { .. } => time_passed >= Strategy::total_delay_exp(self.init, next),
    }
  }

  pub fn attempts(&self) -> Attempts {
    self.attempts
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn delay_retrier_exhausts_after_max_attempts() {
    let start = Instant::now();
    let mut retry = RetryTimer::new(start, Strategy::Delay { min: Duration::from_millis(10), max: Duration::from_millis(10) }, Attempts(3));

    assert_eq!(retry.what_should_i_do(start), YouShould::WouldBlock);
    assert_eq!(retry.what_should_i_do(start + Duration::from_millis(10)), YouShould::Retry);
    assert_eq!(retry.what_should_i_do(start + Duration::from_millis(15)), YouShould::WouldBlock);
    assert_eq!(retry.what_should_i_do(start + Duration::from_millis(20)), YouShould::Retry);
    assert_eq!(retry.what_should_i_do(start + Duration::from_millis(25)), YouShould::WouldBlock);
    assert_eq!(retry.what_should_i_do(start + Duration::from_millis(30)), YouShould::Retry);
    assert_eq!(retry.what_should_i_do(start + Duration::from_secs(10)), YouShould::Cry);
  }

  #[test]
  fn exponential_strategy_doubles_each_attempt() {
    let start = Instant::now();
    let mut retry = RetryTimer::new(start, Strategy::Exponential { init_min: Duration::from_millis(100), init_max: Duration::from_millis(100) }, Attempts(5));

    assert_eq!(retry.what_should_i_do(start + Duration::from_millis(100)), YouShould::Retry);
    assert_eq!(retry.what_should_i_do(start + Duration::from_millis(250)), YouShould::WouldBlock);
    assert_eq!(retry.what_should_i_do(start + Duration::from_millis(300)), YouShould::Retry);
    assert_eq!(retry.what_should_i_do(start + Duration::from_millis(699)), YouShould::WouldBlock);
    assert_eq!(retry.what_should_i_do(start + Duration::from_millis(700)), YouShould::Retry);
  }

  #[test]
  fn max_time_sums_exponential_series() {
    let strat = Strategy::Exponential { init_min: Duration::from_millis(100), init_max: Duration::from_millis(100) };
    assert_eq!(strat.max_time(Attempts(1)), Duration::from_millis(100));
    assert_eq!(strat.max_time(Attempts(3)), Duration::from_millis(700));
  }
}
