//! # mdflow-pipeline
//!
//! Staged molecular dynamics: job configuration, the Minimize/NVT/NPT stage
//! pipeline, the reporting scheduler and the append-only run history.
//!
//! ```rust,no_run
//! use mdflow_core::{StageKind, SystemSnapshot};
//! use mdflow_pipeline::{RunHistory, SimulationJob, StagePipeline, StageRecord};
//!
//! let initial = SystemSnapshot::load("complex.json".as_ref())?;
//! let mut history = RunHistory::new();
//! history.append(StageRecord::setup(initial)?)?;
//!
//! let pipeline = StagePipeline::default();
//! for stage in [StageKind::Minimize, StageKind::Nvt, StageKind::Npt] {
//!     pipeline.run(&SimulationJob::new(stage, "complex"), &mut history)?;
//! }
//! # Ok::<(), mdflow_core::MdError>(())
//! ```

pub mod config;
pub mod history;
pub mod overrides;
pub mod reporting;
pub mod stage;

pub use config::{JobConfig, SimulationJob};
pub use history::{RunHistory, StageRecord};
pub use overrides::SystemOverrides;
pub use reporting::{ReportingPlan, Simulation};
pub use stage::{build_force_field, default_registry, StagePipeline};
