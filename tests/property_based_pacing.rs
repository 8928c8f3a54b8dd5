// Property-Based Testing for procedure pacing
// Checks mutual exclusion, cooldown and completion invariants over random detection orders
// and stray completion reports

use proptest::prelude::*;
use std::time::Duration;

use suture_sim::{
    AnimationTimings, AttemptGate, CompletionOutcome, PacingGate, PointId, ProcedureBuilder,
    ProcedureEvent, SiteId, SiteLayout, SiteState, ToolCategory,
};

const STEP: Duration = Duration::from_millis(10);
const SITES: usize = 4;

#[derive(Debug, Clone)]
struct Arrival {
    tick: u32,
    site: usize,
    point: PointId,
}

fn arrival_strategy() -> impl Strategy<Value = Arrival> {
    (0u32..150, 0..SITES, prop_oneof![Just(PointId::First), Just(PointId::Second)])
        .prop_map(|(tick, site, point)| Arrival { tick, site, point })
}

fn quick_timings() -> AnimationTimings {
    AnimationTimings {
        slide_secs: 0.1,
        settle_secs: 0.05,
        thread_secs: 0.1,
        deform_secs: 0.05,
        deform_hold_secs: 0.02,
        reveal_delay_secs: 0.02,
        reveal_fade_secs: 0.05,
        ..AnimationTimings::default()
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// At no tick are two sites stitching, and everything visited on both points closes,
    /// even with completion reports arriving for sites that are still open.
    #[test]
    fn prop_mutual_exclusion_and_eventual_close(
        mut arrivals in prop::collection::vec(arrival_strategy(), 1..24),
        mut reports in prop::collection::vec((0u32..300, 0..SITES), 0..12),
        cooldown in prop_oneof![Just(0.0), Just(0.3), Just(1.0)],
    ) {
        arrivals.sort_by_key(|a| a.tick);
        reports.sort_by_key(|&(tick, _)| tick);
        let layouts: Vec<_> = SiteLayout::row(SITES, 0.1)
            .into_iter()
            .map(|l| l.with_cooldown(cooldown))
            .collect();
        let mut orchestrator = ProcedureBuilder::explicit(layouts)
            .timings(quick_timings())
            .build()
            .unwrap();
        let mut events = orchestrator.subscribe_channel();
        orchestrator.start();

        let mut visited = [[false; 2]; SITES];
        let mut next = 0;
        let mut next_report = 0;
        let mut last_count = 0;
        for tick in 0..3000u32 {
            while next < arrivals.len() && arrivals[next].tick <= tick {
                let arrival = &arrivals[next];
                orchestrator.report_tool(SiteId(arrival.site), arrival.point, ToolCategory::Needle);
                visited[arrival.site][arrival.point.index()] = true;
                next += 1;
            }
            while next_report < reports.len() && reports[next_report].0 <= tick {
                let site = SiteId(reports[next_report].1);
                let closed = orchestrator.site(site).unwrap().state() == SiteState::Closed;
                let outcome = orchestrator.on_stitch_site_completed(site);
                if !closed {
                    prop_assert_eq!(outcome, CompletionOutcome::NotClosed);
                }
                next_report += 1;
            }
            orchestrator.advance(STEP);

            let stitching = orchestrator
                .sites()
                .iter()
                .filter(|s| s.state() == SiteState::Stitching)
                .count();
            prop_assert!(stitching <= 1);
            if let Some(holder) = orchestrator.in_flight() {
                prop_assert_eq!(orchestrator.site(holder).unwrap().state(), SiteState::Stitching);
            }
            let closed = orchestrator
                .sites()
                .iter()
                .filter(|s| s.state() == SiteState::Closed)
                .count();
            prop_assert_eq!(orchestrator.completed_count(), closed);
            prop_assert!(orchestrator.completed_count() >= last_count);
            last_count = orchestrator.completed_count();
        }

        for (index, points) in visited.iter().enumerate() {
            let state = orchestrator.site(SiteId(index)).unwrap().state();
            if points[0] && points[1] {
                prop_assert_eq!(state, SiteState::Closed);
            } else {
                prop_assert_ne!(state, SiteState::Closed);
            }
        }

        let mut fractions = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let ProcedureEvent::ProgressUpdated { fraction } = event {
                fractions.push(fraction);
            }
        }
        prop_assert!(fractions.windows(2).all(|w| w[0] <= w[1]));
        prop_assert_eq!(fractions.len(), orchestrator.completed_count());
    }

    /// Completion reports count a site once, and only after it has closed.
    #[test]
    fn prop_completion_counted_once(steps in prop::collection::vec((0..SITES, any::<bool>()), 1..40)) {
        let layouts: Vec<_> = SiteLayout::row(SITES, 0.1)
            .into_iter()
            .map(|l| l.with_cooldown(0.0))
            .collect();
        let mut orchestrator = ProcedureBuilder::explicit(layouts)
            .timings(AnimationTimings::instant())
            .build()
            .unwrap();
        orchestrator.start();

        for (site, close_first) in steps {
            let site = SiteId(site);
            if close_first {
                for point in PointId::BOTH {
                    orchestrator.report_tool(site, point, ToolCategory::Needle);
                }
                for _ in 0..5 {
                    orchestrator.advance(STEP);
                }
                prop_assert_eq!(orchestrator.site(site).unwrap().state(), SiteState::Closed);
            }

            let closed = orchestrator.site(site).unwrap().state() == SiteState::Closed;
            let outcome = orchestrator.on_stitch_site_completed(site);
            if closed {
                prop_assert!(matches!(
                    outcome,
                    CompletionOutcome::Duplicate | CompletionOutcome::AlreadyComplete
                ));
            } else {
                prop_assert_eq!(outcome, CompletionOutcome::NotClosed);
            }

            let closed_sites = orchestrator
                .sites()
                .iter()
                .filter(|s| s.state() == SiteState::Closed)
                .count();
            prop_assert_eq!(orchestrator.completed_count(), closed_sites);
        }
        prop_assert_eq!(orchestrator.is_complete(), orchestrator.completed_count() == SITES);
    }

    /// Attempts are refused strictly inside the cooldown window and allowed from its end.
    #[test]
    fn prop_cooldown_window(cooldown_ms in 1u64..5000, completed_at_ms in 0u64..10_000, probe_ms in 0u64..10_000) {
        let mut gate = PacingGate::new(Duration::from_millis(cooldown_ms));
        gate.advance(Duration::from_millis(completed_at_ms));
        gate.record_completion();
        gate.advance(Duration::from_millis(probe_ms));

        let allowed = gate.is_attempt_allowed();
        prop_assert_eq!(allowed, probe_ms >= cooldown_ms);
        prop_assert_eq!(
            gate.remaining_cooldown(),
            Duration::from_millis(cooldown_ms.saturating_sub(probe_ms))
        );
    }
}
