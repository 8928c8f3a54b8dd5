use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{secs, SutureSimConfig};
use crate::driver::{DetectionScript, DriverOptions, ProcedureDriver, RunReport};
use crate::errors::SetupError;
use crate::procedure::{ProcedureBuilder, ProcedureEvent};
use crate::site::SiteLayout;

/// Extra simulated time the driver allows beyond the last expected close
const MAX_DURATION_SLACK_SECS: f64 = 10.0;

pub struct RunCommand {
    pub sites: Option<usize>,
    pub cooldown: Option<f64>,
    pub sequential: bool,
    pub time_limit: Option<f64>,
    pub script: Option<PathBuf>,
    pub shuffle: bool,
    pub realtime: bool,
    pub json: bool,
}

impl RunCommand {
    pub fn new() -> Self {
        Self {
            sites: None,
            cooldown: None,
            sequential: false,
            time_limit: None,
            script: None,
            shuffle: false,
            realtime: false,
            json: false,
        }
    }

    pub fn with_sites(mut self, sites: Option<usize>) -> Self {
        self.sites = sites;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Option<f64>) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_sequential(mut self, sequential: bool) -> Self {
        self.sequential = sequential;
        self
    }

    pub fn with_time_limit(mut self, time_limit: Option<f64>) -> Self {
        self.time_limit = time_limit;
        self
    }

    pub fn with_script(mut self, script: Option<PathBuf>) -> Self {
        self.script = script;
        self
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    /// Layouts for the configured incision, with command-line overrides applied.
    pub fn layouts(&self, config: &SutureSimConfig) -> Result<Vec<SiteLayout>, SetupError> {
        let settings = &config.procedure;
        if !settings.site_spacing.is_finite() {
            return Err(SetupError::InvalidSpacing {
                value: settings.site_spacing,
            });
        }
        let count = self.sites.unwrap_or(settings.site_count);
        let cooldown = self.cooldown.unwrap_or(settings.cooldown_secs);
        Ok(SiteLayout::row(count, settings.site_spacing)
            .into_iter()
            .map(|layout| {
                layout
                    .with_cooldown(cooldown)
                    .with_allowed_tools(settings.tool_categories.iter().copied())
            })
            .collect())
    }

    pub async fn execute(&self, config: &SutureSimConfig) -> Result<RunReport> {
        let layouts = self.layouts(config)?;
        let cooldown = self.cooldown.unwrap_or(config.procedure.cooldown_secs);
        let sequential = self.sequential || config.procedure.sequential_required;
        let time_limit = self.time_limit.or(config.procedure.time_limit_secs);

        let mut orchestrator = ProcedureBuilder::explicit(layouts.clone())
            .sequential(sequential)
            .time_limit_secs(time_limit)
            .timings(config.animation.clone())
            .build()
            .context("Invalid procedure setup")?;

        let per_site = config.animation.full_sequence().as_secs_f64() + cooldown.max(0.0);
        let script = match &self.script {
            Some(path) => DetectionScript::load(path)
                .with_context(|| format!("Failed to load detection script {}", path.display()))?,
            None => DetectionScript::sweep(&layouts, per_site + 0.5, self.shuffle),
        };

        let last_detection = script
            .detections
            .last()
            .map_or(0.0, |d| d.at_secs);
        let max_duration = secs(
            last_detection + per_site * layouts.len() as f64 + MAX_DURATION_SLACK_SECS,
        );

        let mut events = orchestrator.subscribe_channel();
        let quiet = self.json;
        let reactor = tokio::spawn(async move {
            let mut seen = 0usize;
            while let Some(event) = events.recv().await {
                seen += 1;
                tracing::info!(event = event.name(), "Procedure event");
                if !quiet {
                    print_event(&event);
                }
            }
            seen
        });

        if !self.json {
            println!("🪡 Starting procedure with {} sites", layouts.len());
            println!("   cooldown {cooldown:.1}s, sequential: {sequential}");
            println!();
        }

        let mut driver = ProcedureDriver::new(
            orchestrator,
            DriverOptions {
                max_duration: max_duration.max(Duration::from_secs(1)),
                pace: self.realtime,
                ..DriverOptions::default()
            },
        );
        let report = driver.run(&script).await.context("Detection script does not match the procedure")?;
        drop(driver);
        let seen = reactor.await.context("Event reactor task failed")?;
        tracing::debug!(events = seen, "Event reactor finished");

        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            println!();
            println!("{report}");
        }
        Ok(report)
    }
}

impl Default for RunCommand {
    fn default() -> Self {
        Self::new()
    }
}

fn print_event(event: &ProcedureEvent) {
    match event {
        ProcedureEvent::ProcedureStarted => println!("▶️  Procedure started"),
        ProcedureEvent::SiteClosed { site } => println!("🧵 {site} closed"),
        ProcedureEvent::StitchCompleted {
            site,
            completed_count,
        } => println!("✅ Stitch {completed_count} completed at {site}"),
        ProcedureEvent::ProgressUpdated { fraction } => {
            println!("📊 Progress {:.0}%", fraction * 100.0)
        }
        ProcedureEvent::ProcedureCompleted { elapsed } => {
            println!("🎉 Procedure completed in {:.2}s", elapsed.as_secs_f64())
        }
        ProcedureEvent::TimeExpired { limit } => {
            println!("⏰ Time limit of {:.1}s reached", limit.as_secs_f64())
        }
        ProcedureEvent::SiteEnabled { site } => println!("🔓 {site} enabled"),
    }
}
