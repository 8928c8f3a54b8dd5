use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::detector::ToolCategory;

/// Main configuration structure for the suture simulator
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SutureSimConfig {
    /// Procedure layout and pacing
    pub procedure: ProcedureSettings,
    /// Animation phase durations
    pub animation: AnimationTimings,
    /// Logging settings
    pub observability: ObservabilitySettings,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ProcedureSettings {
    /// Number of sites generated along the incision
    pub site_count: usize,
    /// Distance between neighbouring site centres
    pub site_spacing: f32,
    /// Minimum time between a completion and the next attempt
    pub cooldown_secs: f64,
    /// Require sites to be closed in list order
    pub sequential_required: bool,
    /// Optional total time limit for one run
    pub time_limit_secs: Option<f64>,
    /// Tool categories the detectors accept
    pub tool_categories: Vec<ToolCategory>,
}

impl Default for ProcedureSettings {
    fn default() -> Self {
        Self {
            site_count: 4,
            site_spacing: 0.1,
            cooldown_secs: crate::site::DEFAULT_COOLDOWN_SECS,
            sequential_required: false,
            time_limit_secs: None,
            tool_categories: vec![ToolCategory::Needle],
        }
    }
}

/// Durations of the per-site animation phases, in seconds.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AnimationTimings {
    pub slide_secs: f64,
    pub settle_secs: f64,
    pub thread_secs: f64,
    /// Length of each of the pull and relax windows
    pub deform_secs: f64,
    pub deform_hold_secs: f64,
    pub reveal_delay_secs: f64,
    pub reveal_fade_secs: f64,
    /// Fraction of the way each segment is pulled toward the midpoint
    pub pull_strength: f32,
}

impl Default for AnimationTimings {
    fn default() -> Self {
        Self {
            slide_secs: 0.8,
            settle_secs: 0.2,
            thread_secs: 1.0,
            deform_secs: 0.5,
            deform_hold_secs: 0.2,
            reveal_delay_secs: 0.1,
            reveal_fade_secs: 0.5,
            pull_strength: 0.3,
        }
    }
}

impl AnimationTimings {
    /// Every phase zero-length; a stitch then completes within a single tick.
    pub fn instant() -> Self {
        Self {
            slide_secs: 0.0,
            settle_secs: 0.0,
            thread_secs: 0.0,
            deform_secs: 0.0,
            deform_hold_secs: 0.0,
            reveal_delay_secs: 0.0,
            reveal_fade_secs: 0.0,
            ..Self::default()
        }
    }

    pub fn slide(&self) -> Duration {
        secs(self.slide_secs)
    }

    pub fn settle(&self) -> Duration {
        secs(self.settle_secs)
    }

    pub fn thread(&self) -> Duration {
        secs(self.thread_secs)
    }

    pub fn deform(&self) -> Duration {
        secs(self.deform_secs)
    }

    pub fn deform_hold(&self) -> Duration {
        secs(self.deform_hold_secs)
    }

    pub fn reveal_delay(&self) -> Duration {
        secs(self.reveal_delay_secs)
    }

    pub fn reveal_fade(&self) -> Duration {
        secs(self.reveal_fade_secs)
    }

    /// Time from both points detected to the site closing, with no gate wait.
    pub fn full_sequence(&self) -> Duration {
        let growth = self.thread();
        let deformation = self
            .deform()
            .saturating_mul(2)
            .saturating_add(self.deform_hold());
        self.slide()
            .saturating_add(growth.max(deformation))
            .saturating_add(self.reveal_delay())
            .saturating_add(self.reveal_fade())
    }

    /// Named durations, for validation
    pub fn fields(&self) -> [(&'static str, f64); 7] {
        [
            ("slide_secs", self.slide_secs),
            ("settle_secs", self.settle_secs),
            ("thread_secs", self.thread_secs),
            ("deform_secs", self.deform_secs),
            ("deform_hold_secs", self.deform_hold_secs),
            ("reveal_delay_secs", self.reveal_delay_secs),
            ("reveal_fade_secs", self.reveal_fade_secs),
        ]
    }
}

/// Convert configured seconds to a duration.
///
/// Negative and NaN values become zero; values too large for a `Duration`
/// saturate. `ProcedureBuilder::build` rejects both before a run starts.
pub fn secs(value: f64) -> Duration {
    match Duration::try_from_secs_f64(value) {
        Ok(duration) => duration,
        Err(_) if value > 0.0 => Duration::MAX,
        Err(_) => Duration::ZERO,
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilitySettings {
    /// Log level
    pub log_level: String,
    /// Emit JSON log lines instead of the compact format
    pub json_logs: bool,
}

impl Default for ObservabilitySettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

impl SutureSimConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration file (`suture-sim.toml`)
    /// 3. Environment variables (`SUTURE_SIM__SECTION__FIELD`)
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Same as [`SutureSimConfig::load`], reading an explicit file instead of `suture-sim.toml`.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        match path {
            Some(path) => {
                builder = builder.add_source(File::from(path));
            }
            None => {
                if Path::new("suture-sim.toml").exists() {
                    builder = builder.add_source(File::with_name("suture-sim"));
                }
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("SUTURE_SIM")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        let suture_config: SutureSimConfig = config.try_deserialize()?;
        Ok(suture_config)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = self.to_toml()?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}
