//! Scheduler control handle
//!
//! The scheduler loop and the protection monitor run on one task; the
//! handle lets other tasks (CLI signal handler, UI triggers) steer them
//! through a shared "should continue" flag, the protection flag and a wake
//! signal. Wakes only reach a task that is already waiting; a sleeper checks
//! the pending stop and `place_now` flags itself. The current state doubles as the exclusive active-role flag:
//! only one of running or protecting can be current at a time.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// States of the placement scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SchedulerState {
    Idle = 0,
    Running = 1,
    Collecting = 2,
    WaitingForCharges = 3,
    Submitting = 4,
    Complete = 5,
    Protecting = 6,
}

impl SchedulerState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => SchedulerState::Running,
            2 => SchedulerState::Collecting,
            3 => SchedulerState::WaitingForCharges,
            4 => SchedulerState::Submitting,
            5 => SchedulerState::Complete,
            6 => SchedulerState::Protecting,
            _ => SchedulerState::Idle,
        }
    }

    /// True while the main placement loop owns the shared state.
    pub fn is_running(self) -> bool {
        matches!(
            self,
            SchedulerState::Running
                | SchedulerState::Collecting
                | SchedulerState::WaitingForCharges
                | SchedulerState::Submitting
        )
    }
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SchedulerState::Idle => "idle",
            SchedulerState::Running => "running",
            SchedulerState::Collecting => "collecting",
            SchedulerState::WaitingForCharges => "waiting for charges",
            SchedulerState::Submitting => "submitting",
            SchedulerState::Complete => "complete",
            SchedulerState::Protecting => "protecting",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct ControlInner {
    should_continue: AtomicBool,
    protection_enabled: AtomicBool,
    place_now: AtomicBool,
    state: AtomicU8,
    wake: Notify,
}

/// Cloneable handle for steering a running scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerControl {
    inner: Arc<ControlInner>,
}

impl SchedulerControl {
    pub fn new(protection_enabled: bool) -> Self {
        Self {
            inner: Arc::new(ControlInner {
                should_continue: AtomicBool::new(false),
                protection_enabled: AtomicBool::new(protection_enabled),
                place_now: AtomicBool::new(false),
                state: AtomicU8::new(SchedulerState::Idle as u8),
                wake: Notify::new(),
            }),
        }
    }

    /// Ask the scheduler to stop at its next check point.
    ///
    /// Clears a live protection monitor as well; the protection setting
    /// itself is kept for the next run.
    pub fn stop(&self) {
        self.inner.should_continue.store(false, Ordering::SeqCst);
        self.inner.wake.notify_waiters();
    }

    pub fn enable_protection(&self) {
        self.inner.protection_enabled.store(true, Ordering::SeqCst);
    }

    /// Disable protection; a live monitor exits at its next tick.
    pub fn disable_protection(&self) {
        self.inner.protection_enabled.store(false, Ordering::SeqCst);
        self.inner.wake.notify_waiters();
    }

    /// Cut the current wait short and place with the charges available now,
    /// even if they do not cover the remaining work.
    pub fn place_now(&self) {
        self.inner.place_now.store(true, Ordering::SeqCst);
        self.inner.wake.notify_waiters();
    }

    pub fn state(&self) -> SchedulerState {
        SchedulerState::from_u8(self.inner.state.load(Ordering::SeqCst))
    }

    pub fn should_continue(&self) -> bool {
        self.inner.should_continue.load(Ordering::SeqCst)
    }

    pub fn protection_enabled(&self) -> bool {
        self.inner.protection_enabled.load(Ordering::SeqCst)
    }

    /// Start a run. Triggers left over from an earlier run are dropped.
    pub(crate) fn begin(&self) {
        self.inner.place_now.store(false, Ordering::SeqCst);
        self.inner.should_continue.store(true, Ordering::SeqCst);
    }

    /// Consume a pending `place_now` request.
    pub(crate) fn take_place_now(&self) -> bool {
        self.inner.place_now.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn set_state(&self, state: SchedulerState) -> SchedulerState {
        SchedulerState::from_u8(self.inner.state.swap(state as u8, Ordering::SeqCst))
    }

    /// Sleep for `duration` unless woken first. Returns true if woken.
    ///
    /// A stop or `place_now` that is already pending returns at once.
    pub(crate) async fn sleep_or_wake(&self, duration: Duration) -> bool {
        let notified = self.inner.wake.notified();
        tokio::pin!(notified);
        // Register before checking the flags so a trigger between the two
        // still wakes us.
        notified.as_mut().enable();
        if !self.should_continue() || self.inner.place_now.load(Ordering::SeqCst) {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            _ = notified => true,
        }
    }
}

impl Default for SchedulerControl {
    fn default() -> Self {
        Self::new(false)
    }
}
