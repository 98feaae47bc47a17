//! Leading/trailing notification throttle.
//!
//! A pure state machine: it never touches a clock. The owner arms a timer
//! for the epoch returned by [`Throttle::on_change`] and reports it back
//! through [`Throttle::on_timer`]. A timer carrying an older epoch is stale
//! and ignored, so cancelling never has to race the timer task.

use std::time::Duration;

/// Length of one throttle window.
pub const THROTTLE_WINDOW: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThrottleState {
    /// Quiet: the next change notifies immediately.
    #[default]
    Idle,
    /// Inside a window, nothing coalesced yet.
    Window,
    /// Inside a window with a trailing notification owed.
    WindowPending,
}

#[derive(Debug, Clone, Default)]
pub struct Throttle {
    state: ThrottleState,
    epoch: u64,
}

impl Throttle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ThrottleState {
        self.state
    }

    /// Record a change.
    ///
    /// Returns the epoch of a newly opened window when the caller must
    /// notify now and arm a timer; `None` when the change was coalesced.
    pub fn on_change(&mut self) -> Option<u64> {
        match self.state {
            ThrottleState::Idle => {
                self.epoch += 1;
                self.state = ThrottleState::Window;
                Some(self.epoch)
            }
            ThrottleState::Window | ThrottleState::WindowPending => {
                self.state = ThrottleState::WindowPending;
                None
            }
        }
    }

    /// The window armed for `epoch` ended. Returns `true` when the trailing
    /// notification is due.
    pub fn on_timer(&mut self, epoch: u64) -> bool {
        if epoch != self.epoch || self.state == ThrottleState::Idle {
            return false;
        }
        let pending = self.state == ThrottleState::WindowPending;
        self.state = ThrottleState::Idle;
        pending
    }

    /// Close the window early. Returns `true` when a notification was owed.
    pub fn flush_now(&mut self) -> bool {
        let pending = self.state == ThrottleState::WindowPending;
        self.cancel();
        pending
    }

    /// Drop any window and owed notification; outstanding timers go stale.
    pub fn cancel(&mut self) {
        self.epoch += 1;
        self.state = ThrottleState::Idle;
    }
}
