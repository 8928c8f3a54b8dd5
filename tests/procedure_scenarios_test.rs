// End-to-end procedure scenarios driven through the public API

use std::sync::{Arc, Mutex};
use std::time::Duration;

use suture_sim::{
    AnimationTimings, CompletionOutcome, PointId, ProcedureBuilder, ProcedureEvent,
    ProcedureOrchestrator, SiteId, SiteLayout, SiteState, ToolBody, ToolCategory,
};

const STEP: Duration = Duration::from_millis(10);

fn recorded_orchestrator(
    layouts: Vec<SiteLayout>,
    sequential: bool,
) -> (ProcedureOrchestrator, Arc<Mutex<Vec<ProcedureEvent>>>) {
    let mut orchestrator = ProcedureBuilder::explicit(layouts)
        .sequential(sequential)
        .build()
        .expect("valid setup");
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    orchestrator.subscribe(move |event| sink.lock().unwrap().push(event.clone()));
    orchestrator.start();
    (orchestrator, log)
}

fn run_until<F>(orchestrator: &mut ProcedureOrchestrator, limit: Duration, done: F) -> bool
where
    F: Fn(&ProcedureOrchestrator) -> bool,
{
    let mut waited = Duration::ZERO;
    while waited < limit {
        if done(orchestrator) {
            return true;
        }
        orchestrator.advance(STEP);
        waited += STEP;
    }
    done(orchestrator)
}

#[test]
fn test_needle_sweep_closes_every_site() {
    let layouts: Vec<_> = SiteLayout::row(4, 0.1)
        .into_iter()
        .map(|l| l.with_cooldown(2.0))
        .collect();
    let (mut orchestrator, log) = recorded_orchestrator(layouts, false);
    let needle = ToolBody::new("VR_Needle", ToolCategory::Needle);

    for index in 0..4 {
        let site = SiteId(index);
        orchestrator.on_volume_entered(site, PointId::First, &needle);
        orchestrator.on_volume_entered(site, PointId::Second, &needle);
    }

    // First close at 2.6s, then one per cooldown + sequence
    assert!(run_until(&mut orchestrator, Duration::from_secs(30), |o| o.is_complete()));
    assert_eq!(orchestrator.completed_count(), 4);
    assert!(orchestrator
        .sites()
        .iter()
        .all(|s| s.state() == SiteState::Closed));

    let events = log.lock().unwrap();
    assert_eq!(events.first(), Some(&ProcedureEvent::ProcedureStarted));
    let counts: Vec<usize> = events
        .iter()
        .filter_map(|e| match e {
            ProcedureEvent::StitchCompleted { completed_count, .. } => Some(*completed_count),
            _ => None,
        })
        .collect();
    assert_eq!(counts, vec![1, 2, 3, 4]);
    assert!(matches!(
        events.last(),
        Some(ProcedureEvent::ProcedureCompleted { .. })
    ));
}

#[test]
fn test_completions_are_spaced_by_cooldown() {
    let layouts: Vec<_> = SiteLayout::row(2, 0.1)
        .into_iter()
        .map(|l| l.with_cooldown(2.0))
        .collect();
    let (mut orchestrator, _log) = recorded_orchestrator(layouts, false);
    let close_times = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&close_times);
    let clock = Arc::new(Mutex::new(Duration::ZERO));
    let reader = Arc::clone(&clock);
    orchestrator.subscribe(move |event| {
        if let ProcedureEvent::SiteClosed { .. } = event {
            sink.lock().unwrap().push(*reader.lock().unwrap());
        }
    });

    for index in 0..2 {
        for point in PointId::BOTH {
            orchestrator.report_tool(SiteId(index), point, ToolCategory::Needle);
        }
    }
    while !orchestrator.is_complete() && orchestrator.now() < Duration::from_secs(30) {
        *clock.lock().unwrap() = orchestrator.now() + STEP;
        orchestrator.advance(STEP);
    }

    let times = close_times.lock().unwrap();
    assert_eq!(times.len(), 2);
    let gap = times[1] - times[0];
    // Second site waits out the 2.0s cooldown, then runs its 1.8s sequence
    assert!(gap >= Duration::from_millis(3800), "gap was {gap:?}");
}

#[test]
fn test_sequential_procedure_only_accepts_current_site() {
    let layouts: Vec<_> = SiteLayout::row(3, 0.1)
        .into_iter()
        .map(|l| l.with_cooldown(0.0))
        .collect();
    let (mut orchestrator, log) = recorded_orchestrator(layouts, true);

    // Reaching the third site early does nothing
    for point in PointId::BOTH {
        assert!(!orchestrator.report_tool(SiteId(2), point, ToolCategory::Needle));
    }

    for index in 0..3 {
        let site = SiteId(index);
        for point in PointId::BOTH {
            assert!(orchestrator.report_tool(site, point, ToolCategory::Needle));
        }
        assert!(run_until(&mut orchestrator, Duration::from_secs(10), |o| {
            o.is_completed(site)
        }));
    }

    assert!(orchestrator.is_complete());
    let enabled: Vec<SiteId> = log
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            ProcedureEvent::SiteEnabled { site } => Some(*site),
            _ => None,
        })
        .collect();
    assert_eq!(enabled, vec![SiteId(1), SiteId(2)]);
}

#[test]
fn test_wrong_tool_and_unknown_site_are_absorbed() {
    let (mut orchestrator, _log) = recorded_orchestrator(SiteLayout::row(2, 0.1), false);
    assert!(!orchestrator.report_tool(SiteId(0), PointId::First, ToolCategory::Other));
    assert!(!orchestrator.report_tool(SiteId(5), PointId::First, ToolCategory::Needle));
    assert!(!orchestrator.report_tool_by_name("StitchSite_9", PointId::First, ToolCategory::Needle));
    assert!(orchestrator.report_tool_by_name("StitchSite_2", PointId::First, ToolCategory::Needle));

    let stats = orchestrator.metrics().get_stats();
    assert_eq!(stats.detections, 1);
    assert_eq!(stats.ignored_detections, 3);
}

#[test]
fn test_duplicate_completion_delivery_is_counted_once() {
    let layouts = vec![SiteLayout::row(1, 0.1).remove(0).with_cooldown(0.0)];
    let mut orchestrator = ProcedureBuilder::explicit(layouts)
        .timings(AnimationTimings::instant())
        .build()
        .unwrap();
    orchestrator.start();

    for point in PointId::BOTH {
        orchestrator.report_tool(SiteId(0), point, ToolCategory::Needle);
    }
    orchestrator.advance(STEP);
    orchestrator.advance(STEP);
    assert!(orchestrator.is_complete());

    // A late re-delivery of the site's close event
    assert_eq!(
        orchestrator.on_stitch_site_completed(SiteId(0)),
        CompletionOutcome::AlreadyComplete
    );
    assert_eq!(orchestrator.completed_count(), 1);
    assert_eq!(orchestrator.progress(), 1.0);
}

#[test]
fn test_reset_allows_a_second_run() {
    let layouts: Vec<_> = SiteLayout::row(2, 0.1)
        .into_iter()
        .map(|l| l.with_cooldown(0.0))
        .collect();
    let mut orchestrator = ProcedureBuilder::explicit(layouts)
        .timings(AnimationTimings::instant())
        .build()
        .unwrap();
    orchestrator.start();

    for _run in 0..2 {
        for index in 0..2 {
            for point in PointId::BOTH {
                orchestrator.report_tool(SiteId(index), point, ToolCategory::Needle);
            }
        }
        assert!(run_until(&mut orchestrator, Duration::from_secs(1), |o| o.is_complete()));
        orchestrator.reset();
        assert_eq!(orchestrator.completed_count(), 0);
        assert!(!orchestrator.is_complete());
    }
}
