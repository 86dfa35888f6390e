//! Waiting for charges to replenish

use tokio::time::Instant;

use super::{CycleOutcome, PlacementScheduler, SchedulerState};
use crate::charges::Charges;
use crate::status::StatusEvent;

impl PlacementScheduler {
    /// Wait until `target` whole charges are available.
    ///
    /// The wait length comes from the charge math. In low-activity mode it
    /// is slept in one step; otherwise it is polled every `poll_interval`
    /// with a countdown event, and the quota is re-queried every
    /// `quota_refresh` so the wait ends early when charges arrive sooner.
    /// Either way `place_now` and `stop` cut the wait short.
    pub(super) async fn wait_for_charges(&mut self, charges: Charges, target: u32) -> CycleOutcome {
        let duration = charges.time_until(target);
        self.transition(SchedulerState::WaitingForCharges);
        tracing::info!(
            have = charges.count,
            target,
            wait_ms = duration.as_millis() as u64,
            "waiting for charges"
        );
        self.status.report(StatusEvent::Waiting { duration, target });

        if self.settings.low_activity {
            self.control.sleep_or_wake(duration).await;
            return self.after_wait();
        }

        let deadline = Instant::now() + duration;
        let mut next_refresh = Instant::now() + self.settings.quota_refresh;
        loop {
            if !self.control.should_continue() {
                return CycleOutcome::Stopped;
            }
            let now = Instant::now();
            if now >= deadline {
                return CycleOutcome::Continue;
            }
            let left = deadline - now;
            self.status.report(StatusEvent::Countdown { remaining: left });

            if self.control.sleep_or_wake(left.min(self.settings.poll_interval)).await {
                tracing::debug!("charge wait interrupted");
                return self.after_wait();
            }

            if Instant::now() >= next_refresh {
                next_refresh += self.settings.quota_refresh;
                match self.client.query_user_state().await {
                    Ok(user) if user.charges.whole() >= target => {
                        tracing::debug!(count = user.charges.count, "charges arrived early");
                        self.charges = Some(user.charges);
                        return CycleOutcome::Continue;
                    }
                    Ok(user) => self.charges = Some(user.charges),
                    Err(e) => tracing::warn!(error = %e, "quota refresh failed"),
                }
            }
        }
    }

    fn after_wait(&self) -> CycleOutcome {
        if self.control.should_continue() {
            CycleOutcome::Continue
        } else {
            CycleOutcome::Stopped
        }
    }
}
