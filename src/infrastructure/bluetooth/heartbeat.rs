//! Heartbeat scheduling
//!
//! The peripheral drops the link if no control point is written within its
//! idle window. The clock remembers the last axis command and tells the
//! service loop when it is due for a re-send.

use crate::domain::control::AxisCommand;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug)]
pub struct HeartbeatClock {
    /// `None` means event-driven only
    period: Option<Duration>,
    last: AxisCommand,
    deadline: Option<Instant>,
}

impl HeartbeatClock {
    pub fn new(period: Duration) -> Self {
        Self {
            period: (!period.is_zero()).then_some(period),
            last: AxisCommand::ZERO,
            deadline: None,
        }
    }

    /// Start ticking from `now`
    pub fn arm(&mut self, now: Instant) {
        self.deadline = self.period.map(|period| now + period);
    }

    pub fn disarm(&mut self) {
        self.deadline = None;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn last(&self) -> AxisCommand {
        self.last
    }

    /// An explicit send happened; push the deadline out a full period.
    /// A disarmed clock stays disarmed.
    pub fn rearm(&mut self, now: Instant) {
        if self.deadline.is_some() {
            self.arm(now);
        }
    }

    pub fn record_axis(&mut self, command: AxisCommand, now: Instant) {
        self.last = command;
        self.rearm(now);
    }

    /// Returns the command to re-send when the deadline has passed. The next
    /// deadline is one period after the one that fired, so sends do not drift.
    pub fn poll(&mut self, now: Instant) -> Option<AxisCommand> {
        let (deadline, period) = (self.deadline?, self.period?);
        if now < deadline {
            return None;
        }

        let mut next = deadline + period;
        let mut skipped = 0u32;
        while next <= now {
            next += period;
            skipped += 1;
        }
        if skipped > 0 {
            debug!("Heartbeat fell behind, skipped {} period(s)", skipped);
        }
        self.deadline = Some(next);
        Some(self.last)
    }
}
