//! Seams between the stage pipeline and its collaborators.
//!
//! - [`StructureProvider`]: where a stage's input system comes from and how
//!   its output is written back.
//! - [`Platform`] / [`IntegrationContext`]: compute back-ends.
//! - [`Reporter`]: periodic sample sinks driven during integration.

use crate::errors::Result;
use crate::structure::{Molecule, ParametrizedStructure};
use crate::system::{ForceFieldSystem, LangevinIntegrator, State};
use crate::types::{BackendKind, BoxVectors, Precision, Vec3};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Source of topology, parameters and coordinates for one system.
pub trait StructureProvider: Sized {
    /// Chemistry-level topology.
    fn molecule(&self) -> &Molecule;

    /// Parametrized structure with positions, velocities and box.
    fn structure(&self) -> &ParametrizedStructure;

    /// Raw per-system override pairs.
    fn overrides(&self) -> &BTreeMap<String, String>;

    /// Resolves an atom selector to zero-based atom indices.
    fn select(&self, selector: &str) -> Result<BTreeSet<usize>>;

    /// Separates the atoms matched by `selector` from the rest.
    fn split(&self, selector: &str) -> Result<(Self, Self)>;

    fn save(&self, path: &Path) -> Result<()>;

    /// Content digest used to chain stage records.
    fn digest(&self) -> Result<String>;

    /// New snapshot with engine state written back. `None` leaves the
    /// previous velocities/box untouched.
    fn with_state(
        &self,
        positions: Vec<Vec3>,
        velocities: Option<Vec<Vec3>>,
        box_vectors: Option<BoxVectors>,
    ) -> Result<Self>;

    fn positions(&self) -> &[Vec3] {
        &self.structure().positions
    }

    fn velocities(&self) -> Option<&[Vec3]> {
        self.structure().velocities.as_deref()
    }

    fn box_vectors(&self) -> Option<&BoxVectors> {
        self.structure().box_vectors.as_ref()
    }
}

/// Properties applied when a context is created on a platform.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlatformProperties {
    pub precision: Option<Precision>,
    pub device_index: Option<String>,
}

impl PlatformProperties {
    pub fn with_precision(mut self, precision: Precision) -> Self {
        self.precision = Some(precision);
        self
    }

    pub fn with_device(mut self, device_index: Option<String>) -> Self {
        self.device_index = device_index;
        self
    }
}

/// A compute back-end.
pub trait Platform: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Succeeds when the back-end can be used on this host.
    fn instantiate(&self) -> Result<()>;

    /// Succeeds when `properties` (precision, device) can be applied.
    fn check_properties(&self, properties: &PlatformProperties) -> Result<()>;

    fn create_context(
        &self,
        system: &ForceFieldSystem,
        integrator: LangevinIntegrator,
        properties: &PlatformProperties,
    ) -> Result<Box<dyn IntegrationContext>>;
}

/// A live simulation on one platform.
pub trait IntegrationContext: Send {
    fn backend(&self) -> BackendKind;

    /// Name/value pairs describing the platform configuration, for logs.
    fn property_values(&self) -> Vec<(String, String)>;

    fn set_positions(&mut self, positions: &[Vec3]) -> Result<()>;

    /// Restart path: continue from previous velocities.
    fn set_velocities(&mut self, velocities: &[Vec3]) -> Result<()>;

    /// Fresh-start path: draw Maxwell-Boltzmann velocities.
    fn set_velocities_to_temperature(&mut self, temperature: f64, seed: Option<u64>) -> Result<()>;

    fn set_periodic_box(&mut self, box_vectors: BoxVectors) -> Result<()>;

    /// Minimizes until the largest force drops below `tolerance`
    /// (kJ/mol/nm). `max_iterations == 0` means no iteration limit.
    fn minimize(&mut self, tolerance: f64, max_iterations: u64) -> Result<()>;

    fn step(&mut self, steps: u64) -> Result<()>;

    fn state(&self) -> Result<State>;
}

/// Periodic sample sink.
pub trait Reporter {
    fn name(&self) -> &str;

    /// Steps between reports, always > 0.
    fn interval(&self) -> u64;

    fn report(&mut self, state: &State) -> Result<()>;

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}
