//! Protection monitor
//!
//! Armed after completion when protection is enabled. Every
//! `protect_interval` it re-runs the collection diff with a zero batch size
//! and hands control back to the placement loop when drift is found and
//! charges are available.

use super::{PlacementScheduler, SchedulerState};
use crate::status::StatusEvent;

/// Why the protection monitor returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectOutcome {
    /// Drift was found and can be repaired now
    Drift,
    /// `stop` was requested
    Stopped,
    /// Protection was disabled while armed
    Disabled,
}

impl PlacementScheduler {
    pub(super) async fn protect(&mut self) -> ProtectOutcome {
        self.transition(SchedulerState::Protecting);
        tracing::info!(interval_secs = self.settings.protect_interval.as_secs(), "protection armed");

        loop {
            if self.control.sleep_or_wake(self.settings.protect_interval).await {
                // place_now while armed means check now
                self.control.take_place_now();
            }
            if !self.control.should_continue() {
                return ProtectOutcome::Stopped;
            }
            if !self.control.protection_enabled() {
                tracing::info!("protection disabled");
                return ProtectOutcome::Disabled;
            }

            match self.observe(Some(0)).await {
                Ok((collection, _)) if collection.is_complete() => {
                    tracing::debug!("template intact");
                    self.status.report(StatusEvent::Intact);
                }
                Ok((collection, charges)) if charges.whole() >= 1 => {
                    tracing::info!(remaining = collection.remaining, "drift detected, repairing");
                    self.status.report(StatusEvent::Drift {
                        remaining: collection.remaining,
                        repairing: true,
                    });
                    return ProtectOutcome::Drift;
                }
                Ok((collection, _)) => {
                    tracing::warn!(remaining = collection.remaining, "drift detected, no charges");
                    self.status.report(StatusEvent::Drift {
                        remaining: collection.remaining,
                        repairing: false,
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "protection check failed");
                    self.status.report(StatusEvent::Error {
                        message: e.to_string(),
                        retry_in: Some(self.settings.protect_interval),
                    });
                }
            }
        }
    }
}
