// Cross-site pacing: cooldown after completions and the single in-flight slot

use std::time::Duration;

use crate::site::SiteId;

/// What a site asks before it may start stitching.
///
/// Sites never hold a reference to the orchestrator; the orchestrator hands
/// its gate in on every call that may start or end an attempt.
pub trait AttemptGate {
    fn is_attempt_allowed(&self) -> bool;

    fn remaining_cooldown(&self) -> Duration;

    /// Claim the in-flight slot. Returns false when the gate is closed.
    fn begin_attempt(&mut self, site: SiteId) -> bool;

    /// Release the slot if `site` holds it.
    fn end_attempt(&mut self, site: SiteId);
}

/// Gate state kept by the orchestrator, on its simulated clock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacingGate {
    cooldown: Duration,
    now: Duration,
    /// `None` stands for "far in the past": no completion yet this run
    last_completion: Option<Duration>,
    in_flight: Option<SiteId>,
    complete: bool,
}

impl PacingGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            now: Duration::ZERO,
            last_completion: None,
            in_flight: None,
            complete: false,
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn advance(&mut self, dt: Duration) {
        self.now = self.now.saturating_add(dt);
    }

    pub fn in_flight(&self) -> Option<SiteId> {
        self.in_flight
    }

    pub fn last_completion(&self) -> Option<Duration> {
        self.last_completion
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn record_completion(&mut self) {
        self.last_completion = Some(self.now);
    }

    pub fn mark_complete(&mut self) {
        self.complete = true;
    }

    /// Clear everything except the configured cooldown and the clock.
    pub fn reset(&mut self) {
        self.last_completion = None;
        self.in_flight = None;
        self.complete = false;
    }

    fn since_last_completion(&self) -> Option<Duration> {
        self.last_completion
            .map(|at| self.now.saturating_sub(at))
    }
}

impl AttemptGate for PacingGate {
    fn is_attempt_allowed(&self) -> bool {
        if self.complete || self.in_flight.is_some() {
            return false;
        }
        self.since_last_completion()
            .map_or(true, |since| since >= self.cooldown)
    }

    fn remaining_cooldown(&self) -> Duration {
        if self.complete {
            return Duration::ZERO;
        }
        self.since_last_completion()
            .map_or(Duration::ZERO, |since| self.cooldown.saturating_sub(since))
    }

    fn begin_attempt(&mut self, site: SiteId) -> bool {
        if !self.is_attempt_allowed() {
            return false;
        }
        self.in_flight = Some(site);
        tracing::debug!(site = %site, "Attempt slot claimed");
        true
    }

    fn end_attempt(&mut self, site: SiteId) {
        match self.in_flight {
            Some(holder) if holder == site => {
                self.in_flight = None;
                tracing::debug!(site = %site, "Attempt slot released");
            }
            Some(holder) => {
                tracing::warn!(site = %site, holder = %holder, "Site released an attempt slot it does not hold");
            }
            None => {}
        }
    }
}
