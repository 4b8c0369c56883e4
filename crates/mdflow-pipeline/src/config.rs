//! Job configuration and validation.
//!
//! A job file is TOML with a `[job]` table (one [`SimulationJob`]) and an
//! optional `[lock]` table for device arbitration:
//!
//! ```toml
//! [job]
//! job_id = 7
//! system_id = "complex-7"
//! stage = "nvt"
//! time = 100.0
//! trajectory_interval = 10.0
//! restraint_selection = "ca_protein"
//!
//! [lock]
//! lock_dir = "/var/lock/mdflow"
//! ```

use crate::overrides::SystemOverrides;
use mdflow_core::{Constraints, MdError, NonbondedMethod, PlatformPreference, Precision, Result, StageKind};
use mdflow_gpu::LockSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Integration time step without hydrogen mass repartitioning (ps).
pub const DEFAULT_TIMESTEP_PS: f64 = 0.002;

/// Integration time step with hydrogen mass repartitioning (ps).
pub const HMR_TIMESTEP_PS: f64 = 0.004;

/// Steps between Monte Carlo volume moves.
pub const BAROSTAT_FREQUENCY: u32 = 25;

/// Langevin friction coefficient (1/ps).
pub const FRICTION_PER_PS: f64 = 1.0;

/// One stage invocation. Immutable once handed to the pipeline; per-system
/// overrides produce a new value through [`SimulationJob::with_overrides`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulationJob {
    /// Worker-pool job identifier, picks the device on shared hosts
    #[serde(default)]
    pub job_id: u64,

    /// Physical system identifier, names the output files
    pub system_id: String,

    /// Human-readable title for logs and lock audit lines
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    pub stage: StageKind,

    /// Target temperature (K)
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Target pressure (atm), NPT only
    #[serde(default = "default_pressure")]
    pub pressure: f64,

    /// Simulated time (ps), NVT/NPT only
    #[serde(default = "default_time")]
    pub time: f64,

    /// Minimization iteration cap, 0 runs to convergence
    #[serde(default)]
    pub steps: u64,

    /// Atoms held near their starting coordinates
    #[serde(default)]
    pub restraint_selection: String,

    /// Restraint spring constant (kcal/mol/Å²), stage default when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restraint_weight: Option<f64>,

    /// Atoms removed from the dynamics
    #[serde(default)]
    pub freeze_selection: String,

    /// Trajectory sampling interval (ps), 0 disables
    #[serde(default)]
    pub trajectory_interval: f64,

    /// State-log sampling interval (ps), 0 disables
    #[serde(default)]
    pub reporter_interval: f64,

    #[serde(default)]
    pub nonbonded_method: NonbondedMethod,

    /// Non-bonded cutoff (Å)
    #[serde(default = "default_cutoff")]
    pub nonbonded_cutoff: f64,

    /// Translate the system to the box centre before the stage
    #[serde(default)]
    pub center: bool,

    /// Bond lengths held fixed; `hmr` needs at least `HBonds`
    #[serde(default)]
    pub constraints: Constraints,

    /// Hydrogen mass repartitioning
    #[serde(default)]
    pub hmr: bool,

    #[serde(default)]
    pub platform: PlatformPreference,

    #[serde(default)]
    pub precision: Precision,

    /// Output file suffix, stage default when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,

    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Velocity generation seed, entropy when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

fn default_temperature() -> f64 {
    300.0
}

fn default_pressure() -> f64 {
    1.0
}

fn default_time() -> f64 {
    10.0
}

fn default_cutoff() -> f64 {
    10.0
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

impl SimulationJob {
    /// Job with every parameter at its default.
    pub fn new(stage: StageKind, system_id: impl Into<String>) -> Self {
        Self {
            job_id: 0,
            system_id: system_id.into(),
            title: None,
            stage,
            temperature: default_temperature(),
            pressure: default_pressure(),
            time: default_time(),
            steps: 0,
            restraint_selection: String::new(),
            restraint_weight: None,
            freeze_selection: String::new(),
            trajectory_interval: 0.0,
            reporter_interval: 0.0,
            nonbonded_method: NonbondedMethod::default(),
            nonbonded_cutoff: default_cutoff(),
            center: false,
            constraints: Constraints::default(),
            hmr: false,
            platform: PlatformPreference::default(),
            precision: Precision::default(),
            suffix: None,
            output_dir: default_output_dir(),
            seed: None,
        }
    }

    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.system_id)
    }

    /// kcal/(mol·Å²): 5.0 for minimization, 2.0 for dynamics.
    pub fn restraint_weight(&self) -> f64 {
        self.restraint_weight.unwrap_or(match self.stage {
            StageKind::Minimize => 5.0,
            StageKind::Nvt | StageKind::Npt => 2.0,
        })
    }

    pub fn suffix(&self) -> &str {
        self.suffix.as_deref().unwrap_or(self.stage.suffix())
    }

    /// `<system_id>-<suffix>`
    pub fn output_name(&self) -> String {
        format!("{}-{}", self.system_id, self.suffix())
    }

    /// Output files share this path prefix.
    pub fn output_prefix(&self) -> PathBuf {
        self.output_dir.join(self.output_name())
    }

    /// ps
    pub fn timestep(&self) -> f64 {
        if self.hmr {
            HMR_TIMESTEP_PS
        } else {
            DEFAULT_TIMESTEP_PS
        }
    }

    /// Copy with per-system overrides applied.
    pub fn with_overrides(&self, overrides: &SystemOverrides) -> Self {
        let mut job = self.clone();
        if let Some(t) = overrides.temperature {
            job.temperature = t;
        }
        if let Some(p) = overrides.pressure {
            job.pressure = p;
        }
        job
    }

    pub fn validate(&self) -> Result<()> {
        if self.system_id.trim().is_empty() {
            return Err(MdError::config("system_id must not be empty"));
        }
        if !(self.temperature > 0.0) {
            return Err(MdError::config(format!(
                "temperature must be positive, got {}",
                self.temperature
            )));
        }
        if !(self.pressure > 0.0) {
            return Err(MdError::config(format!(
                "pressure must be positive, got {}",
                self.pressure
            )));
        }
        if !(self.time >= 0.0) {
            return Err(MdError::config(format!("time must not be negative, got {}", self.time)));
        }
        if !(self.trajectory_interval >= 0.0) || !(self.reporter_interval >= 0.0) {
            return Err(MdError::config("sampling intervals must not be negative"));
        }
        if !(self.nonbonded_cutoff > 0.0) {
            return Err(MdError::config(format!(
                "nonbonded_cutoff must be positive, got {}",
                self.nonbonded_cutoff
            )));
        }
        if !(self.restraint_weight() >= 0.0) {
            return Err(MdError::config("restraint_weight must not be negative"));
        }
        if self.suffix().is_empty() {
            return Err(MdError::config("suffix must not be empty"));
        }
        if self.hmr && self.constraints == Constraints::None {
            return Err(MdError::config(format!(
                "hmr needs constrained hydrogen bonds for the {} ps time step, set constraints to HBonds or stricter",
                HMR_TIMESTEP_PS
            )));
        }
        Ok(())
    }
}

/// Contents of a job file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobConfig {
    pub job: SimulationJob,

    #[serde(default)]
    pub lock: LockSettings,
}

impl JobConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| MdError::config(format!("invalid job file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.job.validate()?;
        if self.lock.lock_dir.as_os_str().is_empty() {
            return Err(MdError::config("lock.lock_dir must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_defaults() {
        let min = SimulationJob::new(StageKind::Minimize, "lig");
        assert_eq!(min.restraint_weight(), 5.0);
        assert_eq!(min.output_name(), "lig-min");

        let nvt = SimulationJob::new(StageKind::Nvt, "lig");
        assert_eq!(nvt.restraint_weight(), 2.0);
        assert_eq!(nvt.suffix(), "nvt");
        assert_eq!(nvt.timestep(), 0.002);
        assert_eq!(SimulationJob { hmr: true, ..nvt }.timestep(), 0.004);
    }

    #[test]
    fn test_parse_job_file() {
        let config = JobConfig::from_str(
            r#"
            [job]
            job_id = 3
            system_id = "complex"
            stage = "npt"
            pressure = 1.5
            platform = "CPU"
            nonbonded_method = "PME"
            suffix = "prod"

            [lock]
            lock_dir = "/var/tmp"
            release_delay_ms = 0
            "#,
        )
        .unwrap();
        assert_eq!(config.job.stage, StageKind::Npt);
        assert_eq!(config.job.temperature, 300.0);
        assert_eq!(config.job.output_name(), "complex-prod");
        assert_eq!(config.lock.lock_dir, PathBuf::from("/var/tmp"));
        assert_eq!(config.lock.retry_interval_ms, 100);
        assert_eq!(config.job.platform.to_string(), "CPU");
    }

    #[test]
    fn test_lock_table_is_optional() {
        let config = JobConfig::from_str("[job]\nsystem_id = \"s\"\nstage = \"min\"\n").unwrap();
        assert_eq!(config.lock, LockSettings::default());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let base = SimulationJob::new(StageKind::Nvt, "s");
        assert!(base.validate().is_ok());
        assert!(SimulationJob { temperature: 0.0, ..base.clone() }.validate().is_err());
        assert!(SimulationJob { time: -1.0, ..base.clone() }.validate().is_err());
        assert!(SimulationJob { reporter_interval: -0.5, ..base.clone() }.validate().is_err());
        assert!(SimulationJob { nonbonded_cutoff: 0.0, ..base.clone() }.validate().is_err());
        assert!(SimulationJob { restraint_weight: Some(-1.0), ..base.clone() }.validate().is_err());
        assert!(SimulationJob { hmr: true, ..base.clone() }.validate().is_ok());
        assert!(SimulationJob { hmr: true, constraints: Constraints::None, ..base }.validate().is_err());
        assert!(JobConfig::from_str("[job]\nsystem_id = \"s\"\nstage = \"anneal\"\n").is_err());
    }

    #[test]
    fn test_constraints_default_and_parse() {
        let config = JobConfig::from_str("[job]\nsystem_id = \"s\"\nstage = \"nvt\"\n").unwrap();
        assert_eq!(config.job.constraints, Constraints::HBonds);

        let config =
            JobConfig::from_str("[job]\nsystem_id = \"s\"\nstage = \"nvt\"\nconstraints = \"AllBonds\"\n").unwrap();
        assert_eq!(config.job.constraints, Constraints::AllBonds);

        let err = JobConfig::from_str(
            "[job]\nsystem_id = \"s\"\nstage = \"nvt\"\nhmr = true\nconstraints = \"None\"\n",
        )
        .unwrap_err();
        assert!(matches!(err, MdError::ConfigError(_)));
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let job = JobConfig::from_str("[job]\nsystem_id = \"s\"\nstage = \"nvt\"\ntemperture = 310.0\n");
        assert!(job.unwrap_err().to_string().contains("temperture"));

        let lock = JobConfig::from_str("[job]\nsystem_id = \"s\"\nstage = \"nvt\"\n[lock]\nlockdir = \"/tmp\"\n");
        assert!(lock.is_err());

        let table = JobConfig::from_str("[job]\nsystem_id = \"s\"\nstage = \"nvt\"\n[locks]\n");
        assert!(table.is_err());
    }

    #[test]
    fn test_overrides_produce_new_job() {
        let job = SimulationJob::new(StageKind::Npt, "s");
        let resolved = job.with_overrides(&SystemOverrides {
            temperature: Some(310.0),
            pressure: None,
        });
        assert_eq!(resolved.temperature, 310.0);
        assert_eq!(resolved.pressure, 1.0);
        assert_eq!(job.temperature, 300.0);
    }
}
