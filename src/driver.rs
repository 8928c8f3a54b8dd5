// Tick driver: replays a detection script against an orchestrator

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::Instrument;

use crate::config::secs;
use crate::detector::ToolCategory;
use crate::errors::{ScriptError, SetupError};
use crate::observability::{OperationTimer, ProcedureStats};
use crate::procedure::ProcedureOrchestrator;
use crate::site::{PointId, SiteId, SiteLayout};
use crate::telemetry::create_procedure_span;

fn default_tool() -> ToolCategory {
    ToolCategory::Needle
}

/// One tool arrival, addressed by site name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptedDetection {
    /// Seconds after the procedure started
    pub at_secs: f64,
    pub site: String,
    pub point: PointId,
    #[serde(default = "default_tool")]
    pub tool: ToolCategory,
}

/// Ordered tool arrivals, stored as `[[detection]]` tables in TOML.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionScript {
    #[serde(default, rename = "detection")]
    pub detections: Vec<ScriptedDetection>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct DueDetection {
    at: Duration,
    site: SiteId,
    point: PointId,
    tool: ToolCategory,
}

impl DetectionScript {
    pub fn new(detections: Vec<ScriptedDetection>) -> Result<Self, ScriptError> {
        let mut script = Self { detections };
        script.normalize()?;
        Ok(script)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ScriptError> {
        let mut script: DetectionScript = toml::from_str(content)?;
        script.normalize()?;
        Ok(script)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ScriptError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Visit both points of every site in turn, `spacing_secs` apart.
    ///
    /// With `shuffle` the two points of a site arrive in random order, the
    /// later one up to half a spacing after the first.
    pub fn sweep(layouts: &[SiteLayout], spacing_secs: f64, shuffle: bool) -> Self {
        let spacing = if spacing_secs.is_finite() && spacing_secs > 0.0 {
            spacing_secs
        } else {
            0.0
        };
        let mut rng = rand::rng();
        let mut detections = Vec::with_capacity(layouts.len() * 2);

        for (index, layout) in layouts.iter().enumerate() {
            let at = index as f64 * spacing;
            let (first, second, lag) = if shuffle {
                let lag = if spacing > 0.0 {
                    rng.random_range(0.0..spacing / 2.0)
                } else {
                    0.0
                };
                if rng.random_bool(0.5) {
                    (PointId::Second, PointId::First, lag)
                } else {
                    (PointId::First, PointId::Second, lag)
                }
            } else {
                (PointId::First, PointId::Second, 0.0)
            };
            for (point, at_secs) in [(first, at), (second, at + lag)] {
                detections.push(ScriptedDetection {
                    at_secs,
                    site: layout.name.clone(),
                    point,
                    tool: ToolCategory::Needle,
                });
            }
        }

        let mut script = Self { detections };
        script.sort();
        script
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    fn normalize(&mut self) -> Result<(), ScriptError> {
        if let Some(bad) = self
            .detections
            .iter()
            .find(|d| Duration::try_from_secs_f64(d.at_secs).is_err())
        {
            return Err(ScriptError::InvalidTime { at_secs: bad.at_secs });
        }
        self.sort();
        Ok(())
    }

    fn sort(&mut self) {
        self.detections
            .sort_by(|a, b| a.at_secs.total_cmp(&b.at_secs));
    }

    fn resolve(&self, orchestrator: &ProcedureOrchestrator) -> Result<Vec<DueDetection>, SetupError> {
        self.detections
            .iter()
            .map(|d| {
                let site = orchestrator
                    .site_id(&d.site)
                    .ok_or_else(|| SetupError::UnknownScriptSite { site: d.site.clone() })?;
                Ok(DueDetection {
                    at: secs(d.at_secs),
                    site,
                    point: d.point,
                    tool: d.tool,
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DriverOptions {
    /// Simulated time per tick
    pub tick: Duration,
    /// Stop after this much simulated time even if sites remain open
    pub max_duration: Duration,
    /// Wait for the wall clock between ticks
    pub pace: bool,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            tick: Duration::from_micros(16_667),
            max_duration: Duration::from_secs(120),
            pace: false,
        }
    }
}

/// Summary of one driven run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub elapsed_secs: f64,
    pub completed_count: usize,
    pub total_sites: usize,
    pub completed: bool,
    pub time_expired: bool,
    pub detections_delivered: usize,
    pub metrics: ProcedureStats,
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.completed {
            "completed"
        } else if self.time_expired {
            "time expired"
        } else {
            "incomplete"
        };
        writeln!(f, "Run {} ({status})", self.run_id)?;
        writeln!(f, "  started:   {}", self.started_at.to_rfc3339())?;
        writeln!(f, "  stitches:  {}/{}", self.completed_count, self.total_sites)?;
        writeln!(f, "  elapsed:   {:.2}s", self.elapsed_secs)?;
        writeln!(f, "  detections delivered: {}", self.detections_delivered)?;
        write!(
            f,
            "  attempts:  {} begun, {} deferred, {} aborted",
            self.metrics.attempts_begun, self.metrics.deferred_attempts, self.metrics.aborted_attempts
        )
    }
}

/// Owns an orchestrator and feeds it ticks and scripted detections.
pub struct ProcedureDriver {
    orchestrator: ProcedureOrchestrator,
    options: DriverOptions,
}

impl ProcedureDriver {
    pub fn new(orchestrator: ProcedureOrchestrator, options: DriverOptions) -> Self {
        Self {
            orchestrator,
            options,
        }
    }

    pub fn orchestrator(&self) -> &ProcedureOrchestrator {
        &self.orchestrator
    }

    pub fn orchestrator_mut(&mut self) -> &mut ProcedureOrchestrator {
        &mut self.orchestrator
    }

    pub fn into_inner(self) -> ProcedureOrchestrator {
        self.orchestrator
    }

    /// Drive until the procedure completes or `max_duration` of simulated time passes.
    pub async fn run(&mut self, script: &DetectionScript) -> Result<RunReport, SetupError> {
        let due = script.resolve(&self.orchestrator)?;
        let span = create_procedure_span(
            self.orchestrator.run_id(),
            self.orchestrator.total_sites(),
            self.orchestrator.is_sequential(),
        );
        self.drive(due).instrument(span).await
    }

    async fn drive(&mut self, due: Vec<DueDetection>) -> Result<RunReport, SetupError> {
        let started_at = Utc::now();
        let timer = OperationTimer::new("procedure_run");
        let tick = if self.options.tick.is_zero() {
            DriverOptions::default().tick
        } else {
            self.options.tick
        };

        if !self.orchestrator.is_started() {
            self.orchestrator.start();
        }

        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut delivered = 0;

        loop {
            while let Some(detection) = due.get(delivered) {
                if detection.at > self.orchestrator.elapsed() {
                    break;
                }
                self.orchestrator
                    .report_tool(detection.site, detection.point, detection.tool);
                delivered += 1;
            }

            if self.orchestrator.is_complete() {
                break;
            }
            if self.orchestrator.elapsed() >= self.options.max_duration {
                tracing::warn!(
                    completed = self.orchestrator.completed_count(),
                    total = self.orchestrator.total_sites(),
                    "Driver stopped at max duration"
                );
                break;
            }

            if self.options.pace {
                interval.tick().await;
            } else {
                tokio::task::yield_now().await;
            }
            self.orchestrator.advance(tick);
        }

        timer.finish();
        let metrics = self.orchestrator.metrics();
        metrics.log_stats();

        Ok(RunReport {
            run_id: self.orchestrator.run_id().to_string(),
            started_at,
            elapsed_secs: self.orchestrator.elapsed().as_secs_f64(),
            completed_count: self.orchestrator.completed_count(),
            total_sites: self.orchestrator.total_sites(),
            completed: self.orchestrator.is_complete(),
            time_expired: self.orchestrator.time_expired(),
            detections_delivered: delivered,
            metrics: metrics.get_stats(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_parses_and_sorts_by_time() {
        let script = DetectionScript::from_toml_str(
            r#"
            [[detection]]
            at_secs = 1.5
            site = "StitchSite_2"
            point = "second"

            [[detection]]
            at_secs = 0.0
            site = "StitchSite_1"
            point = "first"
            tool = "suture"
            "#,
        )
        .unwrap();

        assert_eq!(script.len(), 2);
        assert_eq!(script.detections[0].site, "StitchSite_1");
        assert_eq!(script.detections[0].tool, ToolCategory::Suture);
        assert_eq!(script.detections[1].tool, ToolCategory::Needle);
    }

    #[test]
    fn test_negative_time_is_rejected() {
        let result = DetectionScript::from_toml_str(
            r#"
            [[detection]]
            at_secs = -1.0
            site = "StitchSite_1"
            point = "first"
            "#,
        );
        assert!(matches!(result, Err(ScriptError::InvalidTime { .. })));
    }

    #[test]
    fn test_time_beyond_duration_range_is_rejected() {
        let result = DetectionScript::new(vec![ScriptedDetection {
            at_secs: 1e20,
            site: "StitchSite_1".to_string(),
            point: PointId::First,
            tool: ToolCategory::Needle,
        }]);
        assert!(matches!(
            result,
            Err(ScriptError::InvalidTime { at_secs }) if at_secs == 1e20
        ));
    }

    #[test]
    fn test_sweep_visits_both_points_of_every_site() {
        let layouts = SiteLayout::row(3, 0.1);
        let script = DetectionScript::sweep(&layouts, 4.0, true);
        assert_eq!(script.len(), 6);
        for layout in &layouts {
            let mut points: Vec<_> = script
                .detections
                .iter()
                .filter(|d| d.site == layout.name)
                .map(|d| d.point)
                .collect();
            points.sort();
            assert_eq!(points, vec![PointId::First, PointId::Second]);
        }
        assert!(script
            .detections
            .windows(2)
            .all(|pair| pair[0].at_secs <= pair[1].at_secs));
    }
}
