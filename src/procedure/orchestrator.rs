// Procedure orchestrator: owns the sites, paces attempts, aggregates completions

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{secs, AnimationTimings};
use crate::detector::{ToolBody, ToolCategory};
use crate::errors::SetupError;
use crate::observability::{millis, ProcedureMetrics};
use crate::site::{PointId, Side, SiteId, SiteLayout, SiteSignal, StitchSite, DEFAULT_COOLDOWN_SECS};
use crate::telemetry::generate_correlation_id;

use super::events::{EventBus, ProcedureEvent};
use super::pacing::{AttemptGate, PacingGate};

/// Where the procedure's site list comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum SiteSource {
    /// Configured list, order kept as given
    Explicit(Vec<SiteLayout>),
    /// Found in the scene; sorted by name to get a deterministic order
    Discovered(Vec<SiteLayout>),
}

/// Result of reporting a site completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    Recorded { completed_count: usize },
    Duplicate,
    AlreadyComplete,
    UnknownSite,
    /// The site has not reached `Closed`; nothing was recorded
    NotClosed,
}

pub struct ProcedureBuilder {
    source: SiteSource,
    sequential_required: bool,
    time_limit_secs: Option<f64>,
    timings: AnimationTimings,
}

impl ProcedureBuilder {
    pub fn new(source: SiteSource) -> Self {
        Self {
            source,
            sequential_required: false,
            time_limit_secs: None,
            timings: AnimationTimings::default(),
        }
    }

    pub fn explicit(layouts: Vec<SiteLayout>) -> Self {
        Self::new(SiteSource::Explicit(layouts))
    }

    pub fn discovered(layouts: Vec<SiteLayout>) -> Self {
        Self::new(SiteSource::Discovered(layouts))
    }

    pub fn sequential(mut self, required: bool) -> Self {
        self.sequential_required = required;
        self
    }

    pub fn time_limit_secs(mut self, limit: Option<f64>) -> Self {
        self.time_limit_secs = limit;
        self
    }

    pub fn timings(mut self, timings: AnimationTimings) -> Self {
        self.timings = timings;
        self
    }

    /// Validate the setup and build an orchestrator that has not started yet.
    pub fn build(self) -> Result<ProcedureOrchestrator, SetupError> {
        let layouts = match self.source {
            SiteSource::Explicit(layouts) => layouts,
            SiteSource::Discovered(mut layouts) => {
                layouts.sort_by(|a, b| a.name.cmp(&b.name));
                if self.sequential_required {
                    if let Some(pair) = layouts.windows(2).find(|pair| pair[0].name == pair[1].name) {
                        return Err(SetupError::AmbiguousOrder {
                            name: pair[0].name.clone(),
                        });
                    }
                }
                layouts
            }
        };

        if layouts.is_empty() {
            return Err(SetupError::NoSites);
        }

        for (field, value) in self.timings.fields() {
            check_duration(field, value)?;
        }
        let strength = self.timings.pull_strength;
        if !(0.0..=1.0).contains(&strength) {
            return Err(SetupError::InvalidPullStrength { value: strength });
        }
        if let Some(limit) = self.time_limit_secs {
            check_duration("time_limit_secs", limit)?;
        }
        for layout in &layouts {
            check_duration("cooldown_secs", layout.cooldown_secs)?;
            if layout.allowed_tools.is_empty() {
                return Err(SetupError::NoAllowedTools {
                    site: layout.name.clone(),
                });
            }
        }

        let cooldown = layouts
            .first()
            .map_or(DEFAULT_COOLDOWN_SECS, |layout| layout.cooldown_secs);

        let sites: Vec<StitchSite> = layouts
            .into_iter()
            .enumerate()
            .map(|(index, layout)| StitchSite::new(SiteId(index), layout, self.timings.clone()))
            .collect();

        let run_id = generate_correlation_id();
        tracing::info!(
            run_id = %run_id,
            sites = sites.len(),
            sequential = self.sequential_required,
            cooldown_secs = cooldown,
            "Procedure configured"
        );

        Ok(ProcedureOrchestrator {
            sites,
            gate: PacingGate::new(secs(cooldown)),
            sequential_required: self.sequential_required,
            time_limit: self.time_limit_secs.map(secs),
            completed: BTreeSet::new(),
            started_at: None,
            time_expired: false,
            events: EventBus::new(),
            metrics: Arc::new(ProcedureMetrics::new()),
            run_id,
        })
    }
}

fn check_duration(field: &'static str, value: f64) -> Result<(), SetupError> {
    match Duration::try_from_secs_f64(value) {
        Ok(_) => Ok(()),
        Err(_) => Err(SetupError::InvalidDuration { field, value }),
    }
}

/// Owns the ordered sites and everything shared between them.
///
/// Single-owner: every mutation of the completion set, the in-flight slot and
/// the simulated clock happens through `&mut self`, so callers on a
/// multi-threaded runtime serialise access by owning the orchestrator in one
/// task.
pub struct ProcedureOrchestrator {
    sites: Vec<StitchSite>,
    gate: PacingGate,
    sequential_required: bool,
    time_limit: Option<Duration>,
    completed: BTreeSet<SiteId>,
    started_at: Option<Duration>,
    time_expired: bool,
    events: EventBus,
    metrics: Arc<ProcedureMetrics>,
    run_id: String,
}

impl std::fmt::Debug for ProcedureOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcedureOrchestrator")
            .field("run_id", &self.run_id)
            .field("sites", &self.sites)
            .field("gate", &self.gate)
            .field("completed", &self.completed)
            .field("sequential_required", &self.sequential_required)
            .finish()
    }
}

impl ProcedureOrchestrator {
    /// Begin a run: stamp the start time and emit `ProcedureStarted`.
    pub fn start(&mut self) {
        self.started_at = Some(self.gate.now());
        self.time_expired = false;
        self.apply_enablement();
        tracing::info!(run_id = %self.run_id, sites = self.sites.len(), "Procedure started");
        self.events.publish(ProcedureEvent::ProcedureStarted);
    }

    /// Return every site and all shared state to the initial state, then start again.
    pub fn reset(&mut self) {
        for site in &mut self.sites {
            site.reset(&mut self.gate);
        }
        self.completed.clear();
        self.gate.reset();
        tracing::info!(run_id = %self.run_id, "Procedure reset");
        self.start();
    }

    /// Advance the simulated clock and every site by `dt`.
    pub fn advance(&mut self, dt: Duration) {
        self.gate.advance(dt);
        for index in 0..self.sites.len() {
            let signals = self.sites[index].advance(dt, &mut self.gate);
            self.apply_signals(SiteId(index), signals);
        }
        self.check_time_limit();
    }

    /// A categorised tool reached `point` of `site`. Returns whether the point was newly prepared.
    pub fn report_tool(&mut self, site: SiteId, point: PointId, category: ToolCategory) -> bool {
        let Some(target) = self.sites.get_mut(site.0) else {
            tracing::warn!(site = %site, "Detection for unknown site ignored");
            self.metrics.record_ignored_detection();
            return false;
        };

        let was_prepared = target.is_prepared(point);
        let signals = target.on_tool_detected(point, category, &mut self.gate);
        let prepared = !was_prepared && target.is_prepared(point);
        if prepared {
            self.metrics.record_detection();
        } else {
            self.metrics.record_ignored_detection();
        }
        self.apply_signals(site, signals);
        prepared
    }

    pub fn on_volume_entered(&mut self, site: SiteId, point: PointId, body: &ToolBody) -> bool {
        tracing::trace!(site = %site, point = %point, body = %body.name, "Body entered detection volume");
        self.report_tool(site, point, body.category)
    }

    pub fn report_tool_by_name(&mut self, name: &str, point: PointId, category: ToolCategory) -> bool {
        match self.site_id(name) {
            Some(site) => self.report_tool(site, point, category),
            None => {
                tracing::warn!(name = %name, "Detection for unknown site name ignored");
                self.metrics.record_ignored_detection();
                false
            }
        }
    }

    fn apply_signals(&mut self, site: SiteId, signals: Vec<SiteSignal>) {
        for signal in signals {
            match signal {
                SiteSignal::AttemptDeferred { remaining_cooldown } => {
                    tracing::debug!(
                        site = %site,
                        remaining_ms = millis(remaining_cooldown),
                        "Attempt deferred"
                    );
                    self.metrics.record_deferred_attempt();
                }
                SiteSignal::AttemptBegun => {
                    self.metrics.record_attempt_begun();
                }
                SiteSignal::Aborted { fault } => {
                    tracing::warn!(site = %site, fault = %fault, "Attempt aborted, procedure unchanged");
                    self.metrics.record_aborted_attempt();
                }
                SiteSignal::Closed => {
                    self.events.publish(ProcedureEvent::SiteClosed { site });
                    self.on_stitch_site_completed(site);
                }
            }
        }
    }

    /// Record a closed site. Safe to call more than once per site; reports for
    /// sites that are not `Closed` leave the in-flight slot and the count alone.
    pub fn on_stitch_site_completed(&mut self, site: SiteId) -> CompletionOutcome {
        if site.0 >= self.sites.len() {
            tracing::warn!(site = %site, "Completion reported for unknown site");
            return CompletionOutcome::UnknownSite;
        }
        if !self.sites[site.0].is_closed() {
            tracing::warn!(
                site = %site,
                state = %self.sites[site.0].state(),
                "Completion reported for a site that has not closed, ignored"
            );
            return CompletionOutcome::NotClosed;
        }
        if self.gate.in_flight() == Some(site) {
            self.gate.end_attempt(site);
        }
        if self.gate.is_complete() {
            tracing::warn!(site = %site, "Completion reported after procedure completed");
            self.metrics.record_duplicate_completion();
            return CompletionOutcome::AlreadyComplete;
        }
        if !self.completed.insert(site) {
            tracing::warn!(site = %site, "Duplicate completion ignored");
            self.metrics.record_duplicate_completion();
            return CompletionOutcome::Duplicate;
        }

        self.gate.record_completion();
        self.metrics.record_stitch_completed();
        let completed_count = self.completed.len();
        let total = self.sites.len();
        tracing::info!(site = %site, completed = completed_count, total, "Stitch completed");

        self.events.publish(ProcedureEvent::StitchCompleted {
            site,
            completed_count,
        });
        self.events.publish(ProcedureEvent::ProgressUpdated {
            fraction: self.progress(),
        });

        if completed_count == total {
            self.gate.mark_complete();
            let elapsed = self.elapsed();
            tracing::info!(
                run_id = %self.run_id,
                elapsed_ms = millis(elapsed),
                "Procedure completed"
            );
            self.events
                .publish(ProcedureEvent::ProcedureCompleted { elapsed });
        } else if self.sequential_required {
            self.enable_next_site();
        }

        CompletionOutcome::Recorded { completed_count }
    }

    fn enable_next_site(&mut self) {
        let next = self
            .sites
            .iter_mut()
            .find(|site| !site.is_closed() && !self.completed.contains(&site.id()));
        let Some(next) = next else {
            return;
        };
        if next.is_enabled() {
            return;
        }
        next.set_enabled(true);
        let site = next.id();
        tracing::info!(site = %site, name = %next.name(), "Next site enabled");
        self.events.publish(ProcedureEvent::SiteEnabled { site });
    }

    fn apply_enablement(&mut self) {
        let sequential = self.sequential_required;
        for (index, site) in self.sites.iter_mut().enumerate() {
            site.set_enabled(!sequential || index == 0);
        }
    }

    fn check_time_limit(&mut self) {
        let Some(limit) = self.time_limit else {
            return;
        };
        if self.time_expired || self.started_at.is_none() || self.gate.is_complete() {
            return;
        }
        if self.elapsed() >= limit {
            self.time_expired = true;
            tracing::warn!(
                run_id = %self.run_id,
                limit_ms = millis(limit),
                completed = self.completed.len(),
                "Procedure time limit reached"
            );
            self.events.publish(ProcedureEvent::TimeExpired { limit });
        }
    }

    pub fn is_attempt_allowed(&self) -> bool {
        self.gate.is_attempt_allowed()
    }

    pub fn remaining_cooldown(&self) -> Duration {
        self.gate.remaining_cooldown()
    }

    pub fn begin_attempt(&mut self, site: SiteId) -> bool {
        self.gate.begin_attempt(site)
    }

    pub fn end_attempt(&mut self, site: SiteId) {
        self.gate.end_attempt(site);
    }

    pub fn destroy_segment(&mut self, site: SiteId, side: Side) -> bool {
        self.sites
            .get_mut(site.0)
            .is_some_and(|s| s.destroy_segment(side))
    }

    pub fn destroy_thread(&mut self, site: SiteId) -> bool {
        self.sites
            .get_mut(site.0)
            .is_some_and(StitchSite::destroy_thread)
    }

    pub fn restore_segment(&mut self, site: SiteId, side: Side) {
        if let Some(site) = self.sites.get_mut(site.0) {
            site.restore_segment(side);
        }
    }

    pub fn subscribe(&mut self, callback: impl FnMut(&ProcedureEvent) + Send + 'static) {
        self.events.subscribe(callback);
    }

    pub fn subscribe_channel(&mut self) -> tokio::sync::mpsc::UnboundedReceiver<ProcedureEvent> {
        self.events.subscribe_channel()
    }

    /// Fraction of sites completed, in `[0, 1]`.
    pub fn progress(&self) -> f32 {
        self.completed.len() as f32 / self.sites.len() as f32
    }

    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    pub fn total_sites(&self) -> usize {
        self.sites.len()
    }

    pub fn is_complete(&self) -> bool {
        self.gate.is_complete()
    }

    pub fn is_started(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn is_sequential(&self) -> bool {
        self.sequential_required
    }

    pub fn time_expired(&self) -> bool {
        self.time_expired
    }

    pub fn time_limit(&self) -> Option<Duration> {
        self.time_limit
    }

    /// Simulated time since `start()`.
    pub fn elapsed(&self) -> Duration {
        self.started_at
            .map_or(Duration::ZERO, |at| self.gate.now().saturating_sub(at))
    }

    pub fn remaining_time(&self) -> Option<Duration> {
        self.time_limit
            .map(|limit| limit.saturating_sub(self.elapsed()))
    }

    pub fn now(&self) -> Duration {
        self.gate.now()
    }

    pub fn cooldown(&self) -> Duration {
        self.gate.cooldown()
    }

    pub fn in_flight(&self) -> Option<SiteId> {
        self.gate.in_flight()
    }

    pub fn is_completed(&self, site: SiteId) -> bool {
        self.completed.contains(&site)
    }

    pub fn site(&self, site: SiteId) -> Option<&StitchSite> {
        self.sites.get(site.0)
    }

    pub fn sites(&self) -> &[StitchSite] {
        &self.sites
    }

    pub fn site_by_name(&self, name: &str) -> Option<&StitchSite> {
        self.sites.iter().find(|site| site.name() == name)
    }

    pub fn site_id(&self, name: &str) -> Option<SiteId> {
        self.site_by_name(name).map(StitchSite::id)
    }

    pub fn metrics(&self) -> Arc<ProcedureMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }
}
