// Stitch site: detection handling, slide/settle gate and the stitching sequence

use statig::prelude::*;
use std::time::Duration;

use crate::config::AnimationTimings;
use crate::detector::{ToolBody, ToolCategory, ToolDetector};
use crate::errors::SiteFault;
use crate::geometry::{ease_between, midpoint, Offset, Pose};
use crate::observability::millis;
use crate::procedure::AttemptGate;

use super::lifecycle::{site_state, LifecycleEvent, SiteLifecycle};
use super::phase::{Phase, PhaseStep};
use super::types::{
    ConnectionPoint, PointId, RevealVisual, SegmentArena, SegmentId, Side, SiteId, SiteLayout,
    SiteState, SkinSegment, ThreadStrand,
};

/// Something a site reports back to the orchestrator after handling a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteSignal {
    /// The gate refused an attempt; reported once per wait, not per tick
    AttemptDeferred { remaining_cooldown: Duration },
    AttemptBegun,
    Aborted { fault: SiteFault },
    Closed,
}

#[derive(Debug, Clone, Copy)]
struct Slide {
    phase: Phase,
    from: Pose,
    to: Pose,
}

impl Slide {
    fn pose(&self) -> Pose {
        ease_between(&self.from, &self.to, self.phase.progress())
    }
}

#[derive(Debug, Clone, Copy)]
enum DeformStage {
    Pull(Phase),
    Hold(Phase),
    Relax(Phase),
    Done,
}

/// Pull toward the midpoint, hold, then relax onto the rest poses.
#[derive(Debug, Clone)]
struct Deformation {
    stage: DeformStage,
    start: [Pose; 2],
    pulled: [Pose; 2],
    rest: [Pose; 2],
    window: Duration,
    hold: Duration,
}

impl Deformation {
    fn new(start: [Pose; 2], center: Pose, rest: [Pose; 2], timings: &AnimationTimings) -> Self {
        let strength = timings.pull_strength.clamp(0.0, 1.0);
        let pulled = start.map(|pose| pose.lerp(&center, strength));
        let window = timings.deform();
        Self {
            stage: DeformStage::Pull(Phase::new(window)),
            start,
            pulled,
            rest,
            window,
            hold: timings.deform_hold(),
        }
    }

    fn is_done(&self) -> bool {
        matches!(self.stage, DeformStage::Done)
    }

    fn poses(&self) -> [Pose; 2] {
        match &self.stage {
            DeformStage::Pull(phase) => interpolate(&self.start, &self.pulled, phase.progress()),
            DeformStage::Hold(_) => self.pulled,
            DeformStage::Relax(phase) => interpolate(&self.pulled, &self.rest, phase.progress()),
            DeformStage::Done => self.rest,
        }
    }

    /// Advance through as many windows as `dt` covers. Returns the unused
    /// part of `dt` once the deformation is done.
    fn advance(&mut self, dt: Duration) -> Option<Duration> {
        let mut budget = dt;
        loop {
            let step = match &mut self.stage {
                DeformStage::Pull(phase) | DeformStage::Hold(phase) | DeformStage::Relax(phase) => {
                    phase.advance(budget)
                }
                DeformStage::Done => return Some(budget),
            };
            match step {
                PhaseStep::Running => return None,
                PhaseStep::Finished { overflow } => {
                    budget = overflow;
                    self.stage = match self.stage {
                        DeformStage::Pull(_) => DeformStage::Hold(Phase::new(self.hold)),
                        DeformStage::Hold(_) => DeformStage::Relax(Phase::new(self.window)),
                        DeformStage::Relax(_) | DeformStage::Done => DeformStage::Done,
                    };
                }
            }
        }
    }
}

fn interpolate(from: &[Pose; 2], to: &[Pose; 2], t: f32) -> [Pose; 2] {
    [
        ease_between(&from[0], &to[0], t),
        ease_between(&from[1], &to[1], t),
    ]
}

#[derive(Debug, Clone, Copy)]
enum RevealStage {
    Delay(Phase),
    Fade(Phase),
    Done,
}

#[derive(Debug, Clone)]
struct StitchSequence {
    growth: Phase,
    deformation: Deformation,
    reveal: Option<RevealStage>,
}

/// One two-point stitching location.
///
/// All mutation goes through detections, `advance` and `reset`; the
/// orchestrator hands in its [`AttemptGate`] on each of those calls so the
/// site can ask for and release the single in-flight slot.
pub struct StitchSite {
    id: SiteId,
    layout: SiteLayout,
    timings: AnimationTimings,
    points: [ConnectionPoint; 2],
    detectors: [ToolDetector; 2],
    arena: SegmentArena,
    segments: [SegmentId; 2],
    slides: [Option<Slide>; 2],
    settle: Option<Phase>,
    awaiting_gate: bool,
    armed: bool,
    deferral_reported: bool,
    sequence: Option<StitchSequence>,
    thread: Option<ThreadStrand>,
    reveal: Option<RevealVisual>,
    enabled: bool,
    holds_attempt: bool,
    lifecycle: StateMachine<SiteLifecycle>,
}

impl std::fmt::Debug for StitchSite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StitchSite")
            .field("id", &self.id)
            .field("name", &self.layout.name)
            .field("state", &self.state())
            .field("points", &self.points)
            .field("awaiting_gate", &self.awaiting_gate)
            .field("armed", &self.armed)
            .field("enabled", &self.enabled)
            .field("holds_attempt", &self.holds_attempt)
            .finish()
    }
}

fn build_visuals(layout: &SiteLayout) -> (SegmentArena, [SegmentId; 2]) {
    let mut arena = SegmentArena::default();
    let visible = !layout.hide_segments_initially;
    let left = arena.insert(SkinSegment {
        side: Side::Left,
        pose: layout.start_pose(Side::Left),
        visible,
    });
    let right = arena.insert(SkinSegment {
        side: Side::Right,
        pose: layout.start_pose(Side::Right),
        visible,
    });
    (arena, [left, right])
}

impl StitchSite {
    pub fn new(id: SiteId, layout: SiteLayout, timings: AnimationTimings) -> Self {
        let (arena, segments) = build_visuals(&layout);
        let allowed = layout.allowed_tools.clone();
        Self {
            id,
            points: [
                ConnectionPoint::new(PointId::First, layout.first_anchor),
                ConnectionPoint::new(PointId::Second, layout.second_anchor),
            ],
            detectors: [
                ToolDetector::new(id, PointId::First, allowed.iter().copied()),
                ToolDetector::new(id, PointId::Second, allowed.iter().copied()),
            ],
            arena,
            segments,
            slides: [None, None],
            settle: None,
            awaiting_gate: false,
            armed: true,
            deferral_reported: false,
            sequence: None,
            thread: None,
            reveal: layout.has_visualizer.then(RevealVisual::default),
            enabled: true,
            holds_attempt: false,
            lifecycle: SiteLifecycle::new(id).state_machine(),
            layout,
            timings,
        }
    }

    pub fn id(&self) -> SiteId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.layout.name
    }

    pub fn layout(&self) -> &SiteLayout {
        &self.layout
    }

    pub fn state(&self) -> SiteState {
        site_state(&self.lifecycle)
    }

    pub fn is_closed(&self) -> bool {
        self.state() == SiteState::Closed
    }

    pub fn point(&self, point: PointId) -> &ConnectionPoint {
        &self.points[point.index()]
    }

    pub fn is_prepared(&self, point: PointId) -> bool {
        self.points[point.index()].prepared
    }

    pub fn both_prepared(&self) -> bool {
        self.points.iter().all(|p| p.prepared)
    }

    pub fn is_sliding(&self) -> bool {
        self.slides.iter().any(Option::is_some)
    }

    pub fn is_settling(&self) -> bool {
        self.settle.is_some()
    }

    /// Both points ready and waiting for the orchestrator to grant an attempt.
    pub fn is_awaiting_gate(&self) -> bool {
        self.awaiting_gate && self.state() == SiteState::Activating
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn holds_attempt(&self) -> bool {
        self.holds_attempt
    }

    pub fn detectors_enabled(&self) -> bool {
        self.detectors.iter().all(ToolDetector::is_enabled)
    }

    pub fn detector(&self, point: PointId) -> &ToolDetector {
        &self.detectors[point.index()]
    }

    pub fn segment(&self, side: Side) -> Option<&SkinSegment> {
        self.arena.get(self.segments[side.index()])
    }

    pub fn thread(&self) -> Option<&ThreadStrand> {
        self.thread.as_ref()
    }

    pub fn reveal(&self) -> Option<RevealVisual> {
        self.reveal
    }

    pub fn is_revealed(&self) -> bool {
        self.reveal.is_some_and(|r| r.visible && r.opacity >= 1.0)
    }

    pub fn cooldown(&self) -> Duration {
        crate::config::secs(self.layout.cooldown_secs)
    }

    /// A body entered the detection volume of `point`.
    pub fn on_volume_entered(
        &mut self,
        point: PointId,
        body: &ToolBody,
        gate: &mut dyn AttemptGate,
    ) -> Vec<SiteSignal> {
        self.on_tool_detected(point, body.category, gate)
    }

    pub fn on_tool_detected(
        &mut self,
        point: PointId,
        category: ToolCategory,
        gate: &mut dyn AttemptGate,
    ) -> Vec<SiteSignal> {
        let mut signals = Vec::new();
        if self.detectors[point.index()]
            .on_category_entered(category)
            .is_none()
        {
            return signals;
        }

        match self.state() {
            SiteState::Closed => {
                tracing::debug!(site = %self.id, point = %point, "Site already closed, ignoring detection");
                return signals;
            }
            SiteState::Stitching => {
                tracing::debug!(site = %self.id, point = %point, "Site is stitching, ignoring detection");
                return signals;
            }
            SiteState::Idle | SiteState::Activating => {}
        }

        if !self.enabled {
            tracing::info!(site = %self.id, point = %point, "Site not enabled yet, ignoring detection");
            return signals;
        }

        if self.points[point.index()].prepared {
            tracing::warn!(site = %self.id, point = %point, "Point already prepared, duplicate detection");
            self.rearm();
            if self.both_prepared() && !self.is_sliding() && !self.is_settling() {
                self.try_begin_stitching(gate, &mut signals);
            }
            return signals;
        }

        let side = point.side();
        let start = self.layout.start_pose(side);
        let target = self.layout.slide_target(point);
        let Some(segment) = self.arena.get_mut(self.segments[side.index()]) else {
            tracing::warn!(
                site = %self.id,
                point = %point,
                side = %side,
                "Skin segment missing, point cannot be prepared"
            );
            return signals;
        };
        segment.visible = true;
        segment.pose = start;

        self.points[point.index()].prepared = true;
        self.rearm();
        self.slides[side.index()] = Some(Slide {
            phase: Phase::new(self.timings.slide()),
            from: start,
            to: target,
        });
        tracing::info!(site = %self.id, point = %point, side = %side, "Point prepared, segment sliding");
        self.lifecycle
            .handle(&LifecycleEvent::PointPrepared { point });
        signals
    }

    /// Advance every running animation phase by `dt`.
    pub fn advance(&mut self, dt: Duration, gate: &mut dyn AttemptGate) -> Vec<SiteSignal> {
        let mut signals = Vec::new();
        match self.state() {
            SiteState::Idle | SiteState::Closed => {}
            SiteState::Activating => self.advance_activation(dt, gate, &mut signals),
            SiteState::Stitching => self.advance_stitching(dt, gate, &mut signals),
        }
        signals
    }

    fn advance_activation(
        &mut self,
        dt: Duration,
        gate: &mut dyn AttemptGate,
        signals: &mut Vec<SiteSignal>,
    ) {
        let mut slide_overflow: Option<Duration> = None;
        for side in [Side::Left, Side::Right] {
            let Some(slide) = self.slides[side.index()].as_mut() else {
                continue;
            };
            let step = slide.phase.advance(dt);
            let pose = match step {
                PhaseStep::Running => slide.pose(),
                PhaseStep::Finished { .. } => slide.to,
            };
            if let Some(segment) = self.arena.get_mut(self.segments[side.index()]) {
                segment.pose = pose;
            }
            if let PhaseStep::Finished { overflow } = step {
                self.slides[side.index()] = None;
                tracing::debug!(site = %self.id, side = %side, "Slide finished");
                slide_overflow = Some(slide_overflow.map_or(overflow, |o| o.min(overflow)));
            }
        }

        if let Some(overflow) = slide_overflow {
            if self.both_prepared() && !self.is_sliding() {
                if self.try_begin_stitching(gate, signals) {
                    return;
                }
                let mut settle = Phase::new(self.timings.settle());
                match settle.advance(overflow) {
                    PhaseStep::Running => self.settle = Some(settle),
                    PhaseStep::Finished { .. } => self.awaiting_gate = true,
                }
            }
            return;
        }

        if let Some(settle) = self.settle.as_mut() {
            if let PhaseStep::Finished { .. } = settle.advance(dt) {
                self.settle = None;
                self.awaiting_gate = true;
                self.try_begin_stitching(gate, signals);
            }
            return;
        }

        if self.awaiting_gate {
            self.try_begin_stitching(gate, signals);
        }
    }

    /// The single gate from `Activating` into `Stitching`.
    fn try_begin_stitching(
        &mut self,
        gate: &mut dyn AttemptGate,
        signals: &mut Vec<SiteSignal>,
    ) -> bool {
        if self.state() != SiteState::Activating || !self.both_prepared() || self.is_sliding() {
            return false;
        }
        self.awaiting_gate = true;
        if !self.armed {
            return false;
        }

        if !gate.is_attempt_allowed() || !gate.begin_attempt(self.id) {
            if !self.deferral_reported {
                let remaining = gate.remaining_cooldown();
                tracing::debug!(
                    site = %self.id,
                    remaining_ms = millis(remaining),
                    "Stitching deferred: cooldown running or another stitch in flight"
                );
                self.deferral_reported = true;
                signals.push(SiteSignal::AttemptDeferred {
                    remaining_cooldown: remaining,
                });
            }
            return false;
        }

        self.holds_attempt = true;
        self.awaiting_gate = false;
        self.deferral_reported = false;
        self.settle = None;
        self.lifecycle.handle(&LifecycleEvent::AttemptGranted);
        signals.push(SiteSignal::AttemptBegun);

        let lift = Offset::new(0.0, self.layout.thread_height, 0.0);
        self.thread = Some(ThreadStrand::new(
            self.layout.first_anchor + lift,
            self.layout.second_anchor + lift,
        ));

        if let Err(fault) = self.check_required() {
            self.abort(fault, gate, signals);
            return false;
        }

        let start = [Side::Left, Side::Right].map(|side| {
            self.segment(side)
                .map_or_else(|| self.layout.start_pose(side), |s| s.pose)
        });
        let center = midpoint(&self.layout.first_anchor, &self.layout.second_anchor);
        let rest = [
            self.layout.rest_pose(Side::Left),
            self.layout.rest_pose(Side::Right),
        ];
        self.sequence = Some(StitchSequence {
            growth: Phase::new(self.timings.thread()),
            deformation: Deformation::new(start, center, rest, &self.timings),
            reveal: None,
        });
        true
    }

    fn check_required(&self) -> Result<(), SiteFault> {
        for side in [Side::Left, Side::Right] {
            if !self.arena.contains(self.segments[side.index()]) {
                return Err(SiteFault::MissingSegment { side });
            }
        }
        if self.thread.is_none() {
            return Err(SiteFault::MissingThread);
        }
        Ok(())
    }

    fn advance_stitching(
        &mut self,
        dt: Duration,
        gate: &mut dyn AttemptGate,
        signals: &mut Vec<SiteSignal>,
    ) {
        if let Err(fault) = self.check_required() {
            self.abort(fault, gate, signals);
            return;
        }
        let Some(mut sequence) = self.sequence.take() else {
            self.abort(SiteFault::MissingThread, gate, signals);
            return;
        };

        let growth_overflow = if sequence.growth.is_finished() {
            Some(dt)
        } else {
            match sequence.growth.advance(dt) {
                PhaseStep::Running => None,
                PhaseStep::Finished { overflow } => Some(overflow),
            }
        };
        if let Some(thread) = self.thread.as_mut() {
            thread.tip = ease_between(&thread.start, &thread.end, sequence.growth.progress());
        }

        let deform_overflow = sequence.deformation.advance(dt);
        let poses = sequence.deformation.poses();
        for side in [Side::Left, Side::Right] {
            if let Some(segment) = self.arena.get_mut(self.segments[side.index()]) {
                segment.pose = poses[side.index()];
            }
        }

        let mut finished = false;
        if let (Some(grown), Some(deformed)) = (growth_overflow, deform_overflow) {
            let (stage, budget) = match sequence.reveal {
                Some(stage) => (stage, dt),
                None if self.reveal.is_some() => (
                    RevealStage::Delay(Phase::new(self.timings.reveal_delay())),
                    grown.min(deformed),
                ),
                None => (RevealStage::Done, Duration::ZERO),
            };
            let stage = self.advance_reveal(stage, budget);
            finished = matches!(stage, RevealStage::Done);
            sequence.reveal = Some(stage);
        }

        if finished {
            self.close(gate, signals);
        } else {
            self.sequence = Some(sequence);
        }
    }

    fn advance_reveal(&mut self, mut stage: RevealStage, dt: Duration) -> RevealStage {
        let mut budget = dt;
        loop {
            stage = match stage {
                RevealStage::Delay(mut phase) => match phase.advance(budget) {
                    PhaseStep::Running => return RevealStage::Delay(phase),
                    PhaseStep::Finished { overflow } => {
                        budget = overflow;
                        if let Some(reveal) = self.reveal.as_mut() {
                            reveal.visible = true;
                            reveal.opacity = 0.0;
                        }
                        tracing::debug!(site = %self.id, "Stitch visual shown");
                        RevealStage::Fade(Phase::new(self.timings.reveal_fade()))
                    }
                },
                RevealStage::Fade(mut phase) => {
                    let step = phase.advance(budget);
                    if let Some(reveal) = self.reveal.as_mut() {
                        reveal.opacity = phase.progress();
                    }
                    match step {
                        PhaseStep::Running => return RevealStage::Fade(phase),
                        PhaseStep::Finished { .. } => RevealStage::Done,
                    }
                }
                RevealStage::Done => return RevealStage::Done,
            };
        }
    }

    fn close(&mut self, gate: &mut dyn AttemptGate, signals: &mut Vec<SiteSignal>) {
        self.sequence = None;
        if self.holds_attempt {
            gate.end_attempt(self.id);
            self.holds_attempt = false;
        }
        for detector in &mut self.detectors {
            detector.set_enabled(false);
        }
        self.lifecycle.handle(&LifecycleEvent::SequenceFinished);
        tracing::info!(site = %self.id, name = %self.layout.name, "Stitch site closed");
        signals.push(SiteSignal::Closed);
    }

    fn abort(&mut self, fault: SiteFault, gate: &mut dyn AttemptGate, signals: &mut Vec<SiteSignal>) {
        tracing::error!(site = %self.id, fault = %fault, "Stitching aborted, required sub-object missing");
        self.sequence = None;
        self.thread = None;
        if let Some(reveal) = self.reveal.as_mut() {
            *reveal = RevealVisual::default();
        }
        if self.holds_attempt {
            gate.end_attempt(self.id);
            self.holds_attempt = false;
        }
        self.armed = false;
        self.awaiting_gate = true;
        self.deferral_reported = false;
        self.lifecycle.handle(&LifecycleEvent::SequenceAborted);
        signals.push(SiteSignal::Aborted { fault });
    }

    fn rearm(&mut self) {
        if !self.armed {
            tracing::info!(site = %self.id, "Site re-armed");
        }
        self.armed = true;
        self.deferral_reported = false;
    }

    /// Remove a skin segment, as when its scene object is destroyed.
    pub fn destroy_segment(&mut self, side: Side) -> bool {
        self.arena.remove(self.segments[side.index()]).is_some()
    }

    /// Put a destroyed segment back where the site expects it and re-arm the site.
    pub fn restore_segment(&mut self, side: Side) {
        let id = self.segments[side.index()];
        if self.arena.contains(id) {
            return;
        }
        let point = match side {
            Side::Left => PointId::First,
            Side::Right => PointId::Second,
        };
        let prepared = self.points[point.index()].prepared;
        let pose = if prepared {
            self.layout.slide_target(point)
        } else {
            self.layout.start_pose(side)
        };
        self.arena.replace(
            id,
            SkinSegment {
                side,
                pose,
                visible: prepared || !self.layout.hide_segments_initially,
            },
        );
        self.rearm();
    }

    pub fn destroy_thread(&mut self) -> bool {
        self.thread.take().is_some()
    }

    /// Return to the initial state, cancelling any running phase.
    pub fn reset(&mut self, gate: &mut dyn AttemptGate) {
        if self.holds_attempt {
            gate.end_attempt(self.id);
            self.holds_attempt = false;
        }
        let (arena, segments) = build_visuals(&self.layout);
        self.arena = arena;
        self.segments = segments;
        for point in &mut self.points {
            point.prepared = false;
        }
        for detector in &mut self.detectors {
            detector.set_enabled(true);
        }
        self.slides = [None, None];
        self.settle = None;
        self.awaiting_gate = false;
        self.armed = true;
        self.deferral_reported = false;
        self.sequence = None;
        self.thread = None;
        self.reveal = self.layout.has_visualizer.then(RevealVisual::default);
        self.lifecycle.handle(&LifecycleEvent::Reset);
        tracing::info!(site = %self.id, name = %self.layout.name, "Stitch site reset");
    }
}
