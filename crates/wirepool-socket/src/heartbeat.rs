//! Idle-read deadline and ping cadence.
//!
//! The read side refuses to sit idle longer than the pong wait; every pong
//! (or peer ping) pushes the deadline forward. The write side pings at 9/10
//! of the pong wait so a healthy peer always answers before the deadline.

use std::time::Duration;

use tokio::time::{self, Instant, Interval, MissedTickBehavior};

pub use wirepool_settings::ping_period;

/// Deadline by which the next inbound frame must arrive.
#[derive(Debug, Clone, Copy)]
pub struct ReadDeadline {
    wait: Duration,
    at: Instant,
}

impl ReadDeadline {
    /// Start a deadline `wait` from now.
    pub fn new(wait: Duration) -> Self {
        Self {
            wait,
            at: Instant::now() + wait,
        }
    }

    /// Push the deadline to `wait` from now.
    pub fn extend(&mut self) {
        self.at = Instant::now() + self.wait;
    }

    /// The instant the deadline falls on.
    pub fn at(&self) -> Instant {
        self.at
    }

    /// Whether the deadline has passed.
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }
}

/// Ticker for outbound pings. The first tick is one period from now.
pub fn ping_interval(period: Duration) -> Interval {
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_period_is_nine_tenths() {
        assert_eq!(
            ping_period(Duration::from_secs(60)),
            Duration::from_secs(54)
        );
        assert_eq!(
            ping_period(Duration::from_millis(100)),
            Duration::from_millis(90)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_expires_after_wait() {
        let deadline = ReadDeadline::new(Duration::from_millis(100));
        assert!(!deadline.is_expired());
        time::advance(Duration::from_millis(99)).await;
        assert!(!deadline.is_expired());
        time::advance(Duration::from_millis(1)).await;
        assert!(deadline.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn extend_pushes_deadline_forward() {
        let mut deadline = ReadDeadline::new(Duration::from_millis(100));
        time::advance(Duration::from_millis(80)).await;
        let before = deadline.at();
        deadline.extend();
        assert_eq!(deadline.at() - before, Duration::from_millis(80));
        time::advance(Duration::from_millis(80)).await;
        assert!(!deadline.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn first_ping_waits_one_period() {
        let start = Instant::now();
        let mut interval = ping_interval(Duration::from_millis(90));
        let _ = interval.tick().await;
        assert_eq!(start.elapsed(), Duration::from_millis(90));
        let _ = interval.tick().await;
        assert_eq!(start.elapsed(), Duration::from_millis(180));
    }
}
