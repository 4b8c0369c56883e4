//! Force-field system description handed to a platform.
//!
//! A [`ForceFieldSystem`] is the back-end independent description of what
//! to integrate: particle masses, the list of forces acting on them, and the
//! default periodic box. Platforms turn it into an
//! [`IntegrationContext`](crate::traits::IntegrationContext).

use crate::errors::{MdError, Result};
use crate::types::{BoxVectors, NonbondedMethod, Vec3};
use serde::{Deserialize, Serialize};

/// Boltzmann constant in kJ/(mol·K).
pub const BOLTZMANN_KJ_PER_MOL_K: f64 = 0.008_314_462_618;

/// Coulomb prefactor 1/(4πε₀) in kJ·nm/(mol·e²).
pub const COULOMB_KJ_NM_PER_MOL: f64 = 138.935_458;

/// One bar expressed in kJ/(mol·nm³).
pub const BAR_TO_KJ_PER_MOL_NM3: f64 = 0.060_221_407_6;

/// amu/nm³ to g/mL.
pub const AMU_PER_NM3_TO_G_PER_ML: f64 = 1.660_539e-3;

/// Harmonic bond `k/2 (r - length)²`, `k` in kJ/(mol·nm²).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HarmonicBond {
    pub i: usize,
    pub j: usize,
    pub length: f64,
    pub k: f64,
}

/// Lennard-Jones plus Coulomb between all non-excluded pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NonbondedForce {
    pub method: NonbondedMethod,
    /// Cutoff in nm, ignored for `NoCutoff`.
    pub cutoff: f64,
    pub charges: Vec<f64>,
    pub sigmas: Vec<f64>,
    pub epsilons: Vec<f64>,
    /// Pairs with `i < j` that do not interact (bonded neighbours).
    pub exclusions: Vec<(usize, usize)>,
}

/// `k · d(x, x0)²` toward per-particle reference points, periodic distance
/// when the system has a box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRestraint {
    /// kJ/(mol·nm²)
    pub k: f64,
    pub particles: Vec<(usize, Vec3)>,
}

/// Isotropic Monte Carlo pressure coupling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MonteCarloBarostat {
    /// bar
    pub pressure: f64,
    /// K
    pub temperature: f64,
    /// Steps between volume moves.
    pub frequency: u32,
}

/// Fixed distance between two particles, held by SHAKE/RATTLE.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DistanceConstraint {
    pub i: usize,
    pub j: usize,
    /// nm
    pub length: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Force {
    HarmonicBonds(Vec<HarmonicBond>),
    Nonbonded(NonbondedForce),
    PositionRestraint(PositionRestraint),
    MonteCarloBarostat(MonteCarloBarostat),
}

/// Back-end independent system description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForceFieldSystem {
    masses: Vec<f64>,
    forces: Vec<Force>,
    default_box: Option<BoxVectors>,
    /// Rigid groups scaled together by the barostat.
    molecules: Vec<Vec<usize>>,
    #[serde(default)]
    constraints: Vec<DistanceConstraint>,
}

impl ForceFieldSystem {
    pub fn new(masses: Vec<f64>) -> Self {
        let molecules = (0..masses.len()).map(|i| vec![i]).collect();
        Self {
            masses,
            forces: Vec::new(),
            default_box: None,
            molecules,
            constraints: Vec::new(),
        }
    }

    pub fn particle_count(&self) -> usize {
        self.masses.len()
    }

    pub fn masses(&self) -> &[f64] {
        &self.masses
    }

    pub fn particle_mass(&self, index: usize) -> Option<f64> {
        self.masses.get(index).copied()
    }

    /// Setting a mass to zero removes the particle from the dynamics.
    pub fn set_particle_mass(&mut self, index: usize, mass: f64) -> Result<()> {
        let slot = self.masses.get_mut(index).ok_or_else(|| {
            MdError::validation(format!("particle index {} out of range", index))
        })?;
        *slot = mass;
        Ok(())
    }

    pub fn add_force(&mut self, force: Force) {
        self.forces.push(force);
    }

    pub fn forces(&self) -> &[Force] {
        &self.forces
    }

    pub fn set_default_box(&mut self, box_vectors: Option<BoxVectors>) {
        self.default_box = box_vectors;
    }

    pub fn default_box(&self) -> Option<&BoxVectors> {
        self.default_box.as_ref()
    }

    pub fn set_molecules(&mut self, molecules: Vec<Vec<usize>>) {
        self.molecules = molecules;
    }

    pub fn molecules(&self) -> &[Vec<usize>] {
        &self.molecules
    }

    pub fn add_constraint(&mut self, constraint: DistanceConstraint) -> Result<()> {
        let n = self.masses.len();
        if constraint.i >= n || constraint.j >= n || constraint.i == constraint.j {
            return Err(MdError::validation(format!(
                "constraint ({}, {}) invalid for {} particles",
                constraint.i, constraint.j, n
            )));
        }
        if !(constraint.length > 0.0) {
            return Err(MdError::validation(format!(
                "constraint ({}, {}) has non-positive length {}",
                constraint.i, constraint.j, constraint.length
            )));
        }
        self.constraints.push(constraint);
        Ok(())
    }

    pub fn constraints(&self) -> &[DistanceConstraint] {
        &self.constraints
    }

    pub fn barostat(&self) -> Option<&MonteCarloBarostat> {
        self.forces.iter().find_map(|f| match f {
            Force::MonteCarloBarostat(b) => Some(b),
            _ => None,
        })
    }

    pub fn nonbonded(&self) -> Option<&NonbondedForce> {
        self.forces.iter().find_map(|f| match f {
            Force::Nonbonded(nb) => Some(nb),
            _ => None,
        })
    }

    /// Particles that take part in the dynamics.
    pub fn is_mobile(&self, index: usize) -> bool {
        self.masses.get(index).map_or(false, |m| *m > 0.0)
    }

    /// Three translational degrees of freedom per mobile particle, less one
    /// per constraint that touches a mobile particle.
    pub fn degrees_of_freedom(&self) -> usize {
        let free = 3 * self.masses.iter().filter(|m| **m > 0.0).count();
        let held = self
            .constraints
            .iter()
            .filter(|c| self.is_mobile(c.i) || self.is_mobile(c.j))
            .count();
        free.saturating_sub(held)
    }

    pub fn total_mass(&self) -> f64 {
        self.masses.iter().sum()
    }
}

/// Langevin integrator settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LangevinIntegrator {
    /// K
    pub temperature: f64,
    /// 1/ps
    pub friction: f64,
    /// ps
    pub step_size: f64,
}

impl LangevinIntegrator {
    pub fn new(temperature: f64, friction: f64, step_size: f64) -> Self {
        Self {
            temperature,
            friction,
            step_size,
        }
    }
}

/// Snapshot of an integration context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub step: u64,
    /// ps
    pub time: f64,
    pub positions: Vec<Vec3>,
    pub velocities: Vec<Vec3>,
    pub box_vectors: Option<BoxVectors>,
    /// kJ/mol
    pub potential_energy: f64,
    /// kJ/mol
    pub kinetic_energy: f64,
    /// K
    pub temperature: f64,
    /// g/mL, only for periodic systems
    pub density: Option<f64>,
}

impl State {
    pub fn total_energy(&self) -> f64 {
        self.potential_energy + self.kinetic_energy
    }

    pub fn volume(&self) -> Option<f64> {
        self.box_vectors.map(|b| b.volume())
    }
}

/// Groups particles into connected components of the bond graph.
pub fn connected_components(n: usize, bonds: &[(usize, usize)]) -> Vec<Vec<usize>> {
    let mut parent: Vec<usize> = (0..n).collect();

    fn find(parent: &mut [usize], mut x: usize) -> usize {
        while parent[x] != x {
            parent[x] = parent[parent[x]];
            x = parent[x];
        }
        x
    }

    for &(i, j) in bonds {
        if i >= n || j >= n {
            continue;
        }
        let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
        if ri != rj {
            parent[ri.max(rj)] = ri.min(rj);
        }
    }

    let mut groups: std::collections::BTreeMap<usize, Vec<usize>> = Default::default();
    for i in 0..n {
        let root = find(&mut parent, i);
        groups.entry(root).or_default().push(i);
    }
    groups.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_mass_reduces_degrees_of_freedom() {
        let mut system = ForceFieldSystem::new(vec![12.0, 1.0, 16.0]);
        assert_eq!(system.degrees_of_freedom(), 9);
        system.set_particle_mass(1, 0.0).unwrap();
        assert_eq!(system.degrees_of_freedom(), 6);
        assert!(!system.is_mobile(1));
        assert!(system.set_particle_mass(5, 0.0).is_err());
    }

    #[test]
    fn test_constraints_reduce_degrees_of_freedom() {
        let mut system = ForceFieldSystem::new(vec![16.0, 1.0, 1.0, 0.0, 0.0]);
        system.add_constraint(DistanceConstraint { i: 0, j: 1, length: 0.1 }).unwrap();
        system.add_constraint(DistanceConstraint { i: 0, j: 2, length: 0.1 }).unwrap();
        system.add_constraint(DistanceConstraint { i: 3, j: 4, length: 0.1 }).unwrap();
        assert_eq!(system.degrees_of_freedom(), 7);

        assert!(system.add_constraint(DistanceConstraint { i: 1, j: 1, length: 0.1 }).is_err());
        assert!(system.add_constraint(DistanceConstraint { i: 0, j: 9, length: 0.1 }).is_err());
        assert!(system.add_constraint(DistanceConstraint { i: 0, j: 1, length: 0.0 }).is_err());
    }

    #[test]
    fn test_connected_components() {
        let groups = connected_components(5, &[(0, 1), (3, 4), (1, 2)]);
        assert_eq!(groups, vec![vec![0, 1, 2], vec![3, 4]]);
    }

    #[test]
    fn test_barostat_lookup() {
        let mut system = ForceFieldSystem::new(vec![1.0]);
        assert!(system.barostat().is_none());
        system.add_force(Force::MonteCarloBarostat(MonteCarloBarostat {
            pressure: 1.01325,
            temperature: 300.0,
            frequency: 25,
        }));
        assert_eq!(system.barostat().map(|b| b.frequency), Some(25));
    }
}
