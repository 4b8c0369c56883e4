//! # mdflow-core
//!
//! Core types, traits, and errors for staged molecular dynamics runs.
//!
//! - **Types**: stage kinds, back-end kinds, precision modes, box vectors
//! - **System**: back-end independent force-field description and state
//! - **Structure**: the snapshot passed from stage to stage
//! - **Traits**: StructureProvider, Platform, IntegrationContext, Reporter
//! - **Errors**: unified error handling with MdError
//!
//! ```text
//! ┌──────────────┐
//! │ mdflow-core  │  ← types/traits
//! └──────────────┘
//!        ▲
//!   ┌────┴─────────────┐
//! ┌─┴──────────┐ ┌─────┴──────────┐
//! │ mdflow-gpu │ │ mdflow-physics │
//! └─────▲──────┘ └─────▲──────────┘
//!       └──────┬───────┘
//!     ┌────────┴────────┐
//!     │ mdflow-pipeline │
//!     └─────────────────┘
//! ```

pub mod errors;
pub mod selection;
pub mod structure;
pub mod system;
pub mod traits;
pub mod types;

pub use errors::{MdError, Result};
pub use structure::{AtomParameters, Molecule, MoleculeAtom, ParametrizedStructure, SystemSnapshot};
pub use system::{
    DistanceConstraint, Force, ForceFieldSystem, HarmonicBond, LangevinIntegrator, MonteCarloBarostat,
    NonbondedForce, PositionRestraint, State,
};
pub use traits::{IntegrationContext, Platform, PlatformProperties, Reporter, StructureProvider};
pub use types::{
    BackendKind, BoxVectors, Constraints, NonbondedMethod, PlatformPreference, Precision, StageKind,
    StageName, Vec3,
};
