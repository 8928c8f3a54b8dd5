// Procedure lifecycle events and their delivery to reactors

use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::site::SiteId;

/// Events published by the orchestrator, in emission order per tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProcedureEvent {
    ProcedureStarted,
    SiteClosed {
        site: SiteId,
    },
    StitchCompleted {
        site: SiteId,
        completed_count: usize,
    },
    ProgressUpdated {
        fraction: f32,
    },
    ProcedureCompleted {
        elapsed: Duration,
    },
    TimeExpired {
        limit: Duration,
    },
    /// Sequential mode unlocked the next site
    SiteEnabled {
        site: SiteId,
    },
}

impl ProcedureEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ProcedureEvent::ProcedureStarted => "procedure_started",
            ProcedureEvent::SiteClosed { .. } => "site_closed",
            ProcedureEvent::StitchCompleted { .. } => "stitch_completed",
            ProcedureEvent::ProgressUpdated { .. } => "progress_updated",
            ProcedureEvent::ProcedureCompleted { .. } => "procedure_completed",
            ProcedureEvent::TimeExpired { .. } => "time_expired",
            ProcedureEvent::SiteEnabled { .. } => "site_enabled",
        }
    }
}

pub type EventCallback = Box<dyn FnMut(&ProcedureEvent) + Send>;

/// Subscriber registry.
///
/// Callbacks run synchronously in registration order; channel subscribers
/// receive clones and are dropped once their receiver goes away.
#[derive(Default)]
pub struct EventBus {
    callbacks: Vec<EventCallback>,
    channels: Vec<mpsc::UnboundedSender<ProcedureEvent>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("callbacks", &self.callbacks.len())
            .field("channels", &self.channels.len())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, callback: impl FnMut(&ProcedureEvent) + Send + 'static) {
        self.callbacks.push(Box::new(callback));
    }

    pub fn subscribe_channel(&mut self) -> mpsc::UnboundedReceiver<ProcedureEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.channels.push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.callbacks.len() + self.channels.len()
    }

    pub fn publish(&mut self, event: ProcedureEvent) {
        tracing::debug!(event = event.name(), "Publishing procedure event");
        for callback in &mut self.callbacks {
            callback(&event);
        }
        self.channels.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_callbacks_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut bus = EventBus::new();
        for tag in ["audio", "banner"] {
            let log = Arc::clone(&log);
            bus.subscribe(move |event| log.lock().unwrap().push(format!("{tag}:{}", event.name())));
        }

        bus.publish(ProcedureEvent::ProcedureStarted);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["audio:procedure_started", "banner:procedure_started"]
        );
    }

    #[test]
    fn test_closed_channels_are_pruned() {
        let mut bus = EventBus::new();
        let mut live = bus.subscribe_channel();
        let dropped = bus.subscribe_channel();
        drop(dropped);

        bus.publish(ProcedureEvent::SiteClosed { site: SiteId(2) });
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(
            live.try_recv().unwrap(),
            ProcedureEvent::SiteClosed { site: SiteId(2) }
        );
    }

    #[test]
    fn test_events_serialize_with_tag() {
        let json = serde_json::to_value(ProcedureEvent::StitchCompleted {
            site: SiteId(1),
            completed_count: 2,
        })
        .unwrap();
        assert_eq!(json["event"], "stitch_completed");
        assert_eq!(json["completed_count"], 2);
    }
}
