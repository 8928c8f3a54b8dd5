// Site lifecycle state machine: Idle -> Activating -> Stitching -> Closed

use statig::prelude::*;

use super::types::{PointId, SiteId, SiteState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    PointPrepared { point: PointId },
    AttemptGranted,
    SequenceFinished,
    SequenceAborted,
    Reset,
}

/// Storage for the lifecycle machine.
///
/// Guards (both points prepared, slides finished, permission granted) are
/// evaluated by the owning `StitchSite` before it feeds an event in; the
/// machine only decides which events each state honours.
pub struct SiteLifecycle {
    site: SiteId,
}

impl SiteLifecycle {
    pub fn new(site: SiteId) -> Self {
        Self { site }
    }
}

#[state_machine(initial = "State::idle()")]
impl SiteLifecycle {
    #[state]
    fn idle(&mut self, event: &LifecycleEvent) -> Outcome<State> {
        match event {
            LifecycleEvent::PointPrepared { point } => {
                tracing::info!(site = %self.site, point = %point, "Site activating");
                Transition(State::activating())
            }
            _ => Handled,
        }
    }

    #[state]
    fn activating(&mut self, event: &LifecycleEvent) -> Outcome<State> {
        match event {
            LifecycleEvent::PointPrepared { point } => {
                tracing::debug!(site = %self.site, point = %point, "Second point prepared");
                Handled
            }
            LifecycleEvent::AttemptGranted => {
                tracing::info!(site = %self.site, "Site stitching");
                Transition(State::stitching())
            }
            LifecycleEvent::Reset => Transition(State::idle()),
            _ => Handled,
        }
    }

    #[state]
    fn stitching(&mut self, event: &LifecycleEvent) -> Outcome<State> {
        match event {
            LifecycleEvent::SequenceFinished => {
                tracing::info!(site = %self.site, "Site closed");
                Transition(State::closed())
            }
            LifecycleEvent::SequenceAborted => {
                tracing::warn!(site = %self.site, "Stitching aborted, site back to activating");
                Transition(State::activating())
            }
            LifecycleEvent::Reset => Transition(State::idle()),
            _ => Handled,
        }
    }

    #[state]
    fn closed(&mut self, event: &LifecycleEvent) -> Outcome<State> {
        match event {
            LifecycleEvent::Reset => Transition(State::idle()),
            _ => Handled,
        }
    }
}

pub fn site_state(machine: &StateMachine<SiteLifecycle>) -> SiteState {
    match machine.state() {
        State::Idle { .. } => SiteState::Idle,
        State::Activating { .. } => SiteState::Activating,
        State::Stitching { .. } => SiteState::Stitching,
        State::Closed { .. } => SiteState::Closed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_happy_path() {
        let mut sm = SiteLifecycle::new(SiteId(0)).state_machine();
        assert_eq!(site_state(&sm), SiteState::Idle);

        sm.handle(&LifecycleEvent::PointPrepared { point: PointId::First });
        assert_eq!(site_state(&sm), SiteState::Activating);

        sm.handle(&LifecycleEvent::PointPrepared { point: PointId::Second });
        assert_eq!(site_state(&sm), SiteState::Activating);

        sm.handle(&LifecycleEvent::AttemptGranted);
        assert_eq!(site_state(&sm), SiteState::Stitching);

        sm.handle(&LifecycleEvent::SequenceFinished);
        assert_eq!(site_state(&sm), SiteState::Closed);
    }

    #[test]
    fn test_closed_ignores_everything_but_reset() {
        let mut sm = SiteLifecycle::new(SiteId(1)).state_machine();
        sm.handle(&LifecycleEvent::PointPrepared { point: PointId::First });
        sm.handle(&LifecycleEvent::AttemptGranted);
        sm.handle(&LifecycleEvent::SequenceFinished);

        for event in [
            LifecycleEvent::PointPrepared { point: PointId::Second },
            LifecycleEvent::AttemptGranted,
            LifecycleEvent::SequenceAborted,
        ] {
            sm.handle(&event);
            assert_eq!(site_state(&sm), SiteState::Closed);
        }

        sm.handle(&LifecycleEvent::Reset);
        assert_eq!(site_state(&sm), SiteState::Idle);
    }

    #[test]
    fn test_abort_returns_to_activating() {
        let mut sm = SiteLifecycle::new(SiteId(2)).state_machine();
        sm.handle(&LifecycleEvent::PointPrepared { point: PointId::Second });
        sm.handle(&LifecycleEvent::AttemptGranted);
        sm.handle(&LifecycleEvent::SequenceAborted);
        assert_eq!(site_state(&sm), SiteState::Activating);
    }

    #[test]
    fn test_idle_does_not_skip_to_stitching() {
        let mut sm = SiteLifecycle::new(SiteId(3)).state_machine();
        sm.handle(&LifecycleEvent::AttemptGranted);
        assert_eq!(site_state(&sm), SiteState::Idle);
    }
}
