//! # mdflow-physics
//!
//! Host-side compute back-ends for mdflow.
//!
//! - Harmonic bonds, Lennard-Jones, direct-space Coulomb and harmonic
//!   position restraints ([`forces`])
//! - BAOAB Langevin dynamics and Maxwell-Boltzmann velocities ([`dynamics`])
//! - Monte Carlo barostat ([`barostat`])
//! - SHAKE/RATTLE bond constraints ([`constraints`])
//! - Adaptive steepest descent ([`minimizer`])
//! - `Reference` (serial) and `CPU` (rayon) platforms ([`platforms`])

pub mod barostat;
pub mod constraints;
pub mod context;
pub mod dynamics;
pub mod forces;
pub mod minimizer;
pub mod platforms;

pub use constraints::ConstraintSolver;
pub use context::SoftwareContext;
pub use forces::{ForceEvaluator, ForceResult};
pub use platforms::{builtin_platforms, CpuPlatform, ReferencePlatform};
