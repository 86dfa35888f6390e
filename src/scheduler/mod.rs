//! Placement scheduler
//!
//! Drives the canvas toward a template under the charge budget:
//!
//! ```text
//! IDLE -> RUNNING -> { COLLECTING, WAITING_FOR_CHARGES, SUBMITTING } -> RUNNING ...
//!                 -> COMPLETE -> IDLE | PROTECTING -> (drift) RUNNING
//! ```
//!
//! Everything runs as one sequence of suspending steps on the caller's task.
//! The placement loop and the protection monitor are methods of the same
//! [`PlacementScheduler`], so they can never be active at the same time and
//! the analysis cache, submitted set and charge snapshot have one writer.
//! Other tasks steer the run through a [`SchedulerControl`].

mod collect;
mod control;
mod error;
mod protect;
mod wait;

pub use collect::{collect, fetch_chunk_states, ChunkStates, Collection, PlacementBatch, ScanMode};
pub use control::{SchedulerControl, SchedulerState};
pub use error::{ErrorKind, SchedulerError};
pub use protect::ProtectOutcome;

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use crate::analyze::{CacheStats, TemplateAnalyzer};
use crate::charges::Charges;
use crate::client::{CanvasClient, PlacementStatus};
use crate::config::SchedulerConfig;
use crate::coords::GlobalPixel;
use crate::status::{StatusEvent, StatusSink};
use crate::template::Template;

/// Timing and ordering parameters of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerSettings {
    pub mode: ScanMode,
    /// Sleep whole charge waits in one step
    pub low_activity: bool,
    /// Arm the protection monitor once the template is complete
    pub protect: bool,
    pub protect_interval: Duration,
    /// Pause before retrying a rate-limited batch
    pub rate_limit_backoff: Duration,
    /// Pause after a failed cycle
    pub cycle_retry_delay: Duration,
    /// Countdown granularity of incremental waits
    pub poll_interval: Duration,
    /// How often incremental waits re-query the quota
    pub quota_refresh: Duration,
    /// Seed for random mode; entropy when absent
    pub seed: Option<u64>,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            mode: ScanMode::Scan,
            low_activity: false,
            protect: false,
            protect_interval: Duration::from_secs(10),
            rate_limit_backoff: Duration::from_secs(30),
            cycle_retry_delay: Duration::from_secs(10),
            poll_interval: Duration::from_secs(1),
            quota_refresh: Duration::from_secs(10),
            seed: None,
        }
    }
}

impl From<&SchedulerConfig> for SchedulerSettings {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            mode: config.mode,
            low_activity: config.low_activity,
            protect: config.protect,
            protect_interval: Duration::from_secs(config.protect_interval_secs),
            rate_limit_backoff: Duration::from_secs(config.rate_limit_backoff_secs),
            cycle_retry_delay: Duration::from_secs(config.cycle_retry_secs),
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            quota_refresh: Duration::from_secs(config.quota_refresh_secs),
            seed: config.seed,
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The template was completed (and protection, if armed, was disabled)
    Completed,
    /// `stop` was requested
    Stopped,
}

/// Result of one scheduling cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CycleOutcome {
    Continue,
    Complete,
    Stopped,
}

/// Drives placement of one template.
pub struct PlacementScheduler {
    client: Arc<dyn CanvasClient>,
    template: Arc<Template>,
    settings: SchedulerSettings,
    status: Arc<dyn StatusSink>,
    control: SchedulerControl,
    analyzer: TemplateAnalyzer,
    chunk_states: ChunkStates,
    submitted: HashSet<GlobalPixel>,
    charges: Option<Charges>,
    owned: BTreeSet<u8>,
    rng: StdRng,
}

impl PlacementScheduler {
    pub fn new(
        client: Arc<dyn CanvasClient>,
        template: Arc<Template>,
        settings: SchedulerSettings,
        status: Arc<dyn StatusSink>,
    ) -> Self {
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            client,
            template,
            control: SchedulerControl::new(settings.protect),
            settings,
            status,
            analyzer: TemplateAnalyzer::new(),
            chunk_states: ChunkStates::new(),
            submitted: HashSet::new(),
            charges: None,
            owned: BTreeSet::new(),
            rng,
        }
    }

    /// Handle for stopping or nudging the scheduler from another task.
    pub fn control(&self) -> SchedulerControl {
        self.control.clone()
    }

    pub fn state(&self) -> SchedulerState {
        self.control.state()
    }

    pub fn template(&self) -> &Arc<Template> {
        &self.template
    }

    pub fn analyzer_stats(&self) -> CacheStats {
        self.analyzer.stats()
    }

    /// Pixels submitted in the current run.
    pub fn submitted_count(&self) -> usize {
        self.submitted.len()
    }

    /// Last charge snapshot seen by the scheduler.
    pub fn charges(&self) -> Option<Charges> {
        self.charges
    }

    /// Replace the template, discarding all derived state.
    pub fn set_template(&mut self, template: Arc<Template>) {
        self.template = template;
        self.reset();
    }

    /// Discard the analysis cache, chunk states and submitted set.
    pub fn reset(&mut self) {
        self.analyzer.invalidate();
        self.chunk_states.clear();
        self.submitted.clear();
    }

    fn transition(&self, state: SchedulerState) {
        let previous = self.control.set_state(state);
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "state change");
            self.status.report(StatusEvent::StateChanged { state });
        }
    }

    /// Run until the template is complete, or with protection enabled, until
    /// stopped or protection is disabled.
    ///
    /// Cycle errors are reported and retried after `cycle_retry_delay`; only
    /// template errors end the run with an error.
    pub async fn run(&mut self) -> Result<RunOutcome, SchedulerError> {
        self.control.begin();
        // Pixels placed by an earlier run may have been painted over since.
        self.submitted.clear();
        self.chunk_states.clear();
        tracing::info!(
            template = %self.template.info.display_name,
            pixels = self.template.pixel_count,
            mode = ?self.settings.mode,
            "scheduler started"
        );

        loop {
            if self.run_until_complete().await? == RunOutcome::Stopped {
                return Ok(self.finish_stopped());
            }
            if !self.control.protection_enabled() {
                self.transition(SchedulerState::Idle);
                return Ok(RunOutcome::Completed);
            }

            // Drift detection must see pixels this run already placed.
            self.submitted.clear();
            match self.protect().await {
                ProtectOutcome::Drift => continue,
                ProtectOutcome::Stopped => return Ok(self.finish_stopped()),
                ProtectOutcome::Disabled => {
                    self.transition(SchedulerState::Idle);
                    return Ok(RunOutcome::Completed);
                }
            }
        }
    }

    fn finish_stopped(&self) -> RunOutcome {
        tracing::info!(submitted = self.submitted.len(), "scheduler stopped");
        self.transition(SchedulerState::Idle);
        self.status.report(StatusEvent::Stopped);
        RunOutcome::Stopped
    }

    async fn run_until_complete(&mut self) -> Result<RunOutcome, SchedulerError> {
        loop {
            if !self.control.should_continue() {
                return Ok(RunOutcome::Stopped);
            }
            self.transition(SchedulerState::Running);

            match self.cycle().await {
                Ok(CycleOutcome::Continue) => {}
                Ok(CycleOutcome::Complete) => {
                    tracing::info!("template complete");
                    self.transition(SchedulerState::Complete);
                    self.status.report(StatusEvent::Completed);
                    return Ok(RunOutcome::Completed);
                }
                Ok(CycleOutcome::Stopped) => return Ok(RunOutcome::Stopped),
                Err(e) if e.is_fatal() => {
                    tracing::error!(error = %e, "scheduler aborted");
                    self.status.report(StatusEvent::Error { message: e.to_string(), retry_in: None });
                    self.transition(SchedulerState::Idle);
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.settings.cycle_retry_delay;
                    tracing::warn!(error = %e, kind = ?e.kind(), retry_secs = delay.as_secs(), "cycle failed");
                    self.status.report(StatusEvent::Error { message: e.to_string(), retry_in: Some(delay) });
                    self.transition(SchedulerState::Running);
                    self.control.sleep_or_wake(delay).await;
                }
            }
        }
    }

    /// Query the quota, analyze the template, refresh chunk states and diff.
    ///
    /// `limit` caps the batch size; `None` uses the whole charges available.
    async fn observe(&mut self, limit: Option<usize>) -> Result<(Collection, Charges), SchedulerError> {
        let user = self.client.query_user_state().await?;
        let owned = user.owned_colors().ok_or(SchedulerError::NoEntitlement)?;
        if owned.is_empty() {
            return Err(SchedulerError::NoEntitlement);
        }
        self.owned = owned;
        self.charges = Some(user.charges);

        let analysis = self.analyzer.analyze(&self.template, &self.owned).await?;
        let chunks = analysis.eligible_chunks();
        self.chunk_states =
            fetch_chunk_states(self.client.as_ref(), &chunks, self.template.tile_size).await;

        let limit = limit.unwrap_or(user.charges.whole() as usize);
        let collection = collect(
            &analysis,
            &self.chunk_states,
            &self.submitted,
            self.settings.mode,
            limit,
            &mut self.rng,
        );
        Ok((collection, user.charges))
    }

    async fn cycle(&mut self) -> Result<CycleOutcome, SchedulerError> {
        self.transition(SchedulerState::Collecting);
        let (collection, mut charges) = self.observe(None).await?;

        tracing::info!(
            placed = collection.placed(),
            remaining = collection.remaining,
            total = collection.total,
            batch = collection.batched_pixels(),
            charges = charges.count,
            eta_secs = charges.time_until(collection.remaining.min(u32::MAX as usize) as u32).as_secs(),
            "collected"
        );
        self.status.report(StatusEvent::Progress {
            placed: collection.placed(),
            remaining: collection.remaining,
            total: collection.total,
        });

        if collection.is_complete() {
            return Ok(CycleOutcome::Complete);
        }
        let forced = self.control.take_place_now() && !collection.batches.is_empty();
        if forced {
            tracing::info!(batch = collection.batched_pixels(), "placing now on request");
        } else if !charges.can_proceed(collection.remaining) {
            let target = charges.wait_target(collection.remaining);
            return Ok(self.wait_for_charges(charges, target).await);
        }
        if collection.batches.is_empty() {
            // A full pool with no whole charge (max of zero)
            let target = charges.whole() + 1;
            return Ok(self.wait_for_charges(charges, target).await);
        }

        let outcome = self.submit(collection.batches, &mut charges).await;
        self.charges = Some(charges);
        outcome
    }

    async fn submit(
        &mut self,
        batches: Vec<PlacementBatch>,
        charges: &mut Charges,
    ) -> Result<CycleOutcome, SchedulerError> {
        self.transition(SchedulerState::Submitting);
        let tile_size = self.template.tile_size;

        for batch in batches {
            if !self.control.should_continue() {
                return Ok(CycleOutcome::Stopped);
            }
            self.client.open_placement_surface().await?;
            let request = batch.to_request();

            loop {
                match self.client.submit_placement(batch.chunk, &request).await? {
                    PlacementStatus::RateLimited => {
                        let backoff = self.settings.rate_limit_backoff;
                        tracing::warn!(chunk = %batch.chunk, backoff_secs = backoff.as_secs(), "rate limited");
                        self.status.report(StatusEvent::RateLimited { chunk: batch.chunk, backoff });
                        // Uncapped; only stop ends the retries. A pending
                        // place_now is consumed by this batch.
                        self.control.take_place_now();
                        self.control.sleep_or_wake(backoff).await;
                        if !self.control.should_continue() {
                            return Ok(CycleOutcome::Stopped);
                        }
                    }
                    PlacementStatus::Placed { painted } => {
                        self.submitted.extend(batch.global_pixels(tile_size));
                        charges.consume(batch.len());
                        tracing::info!(chunk = %batch.chunk, pixels = batch.len(), painted, "batch placed");
                        self.status.report(StatusEvent::Submitted { chunk: batch.chunk, pixels: batch.len() });
                        break;
                    }
                    PlacementStatus::Rejected { status, message } => {
                        return Err(SchedulerError::Rejected { status, message });
                    }
                }
            }
        }
        Ok(CycleOutcome::Continue)
    }
}
