//! Potential energy and forces for a [`ForceFieldSystem`].
//!
//! Units: nm, kJ/mol, kJ/(mol·nm).
//!
//! Non-bonded terms are evaluated per particle against every partner, so
//! each pair is visited twice and the pair energy is halved. That makes the
//! serial and rayon paths produce bit-identical results regardless of
//! thread count.
//!
//! PME and Ewald are evaluated in direct space only: truncated Coulomb at
//! the cutoff with minimum-image displacements.

use mdflow_core::{BoxVectors, Force, ForceFieldSystem, NonbondedMethod, Vec3};
use mdflow_core::system::COULOMB_KJ_NM_PER_MOL;
use rayon::prelude::*;
use std::collections::HashSet;

/// Energy and per-particle forces at one configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ForceResult {
    pub energy: f64,
    pub forces: Vec<Vec3>,
}

impl ForceResult {
    /// Largest force norm over `mobile` particles.
    pub fn max_force(&self, mobile: &[bool]) -> f64 {
        self.forces
            .iter()
            .zip(mobile)
            .filter(|(_, m)| **m)
            .map(|(f, _)| norm(f))
            .fold(0.0, f64::max)
    }
}

#[derive(Debug, Clone)]
struct Nonbonded {
    method: NonbondedMethod,
    cutoff: f64,
    charges: Vec<f64>,
    sigmas: Vec<f64>,
    epsilons: Vec<f64>,
    excluded: HashSet<(usize, usize)>,
}

/// Precompiled force terms.
#[derive(Debug, Clone)]
pub struct ForceEvaluator {
    n: usize,
    bonds: Vec<mdflow_core::HarmonicBond>,
    nonbonded: Option<Nonbonded>,
    restraints: Vec<mdflow_core::PositionRestraint>,
    parallel: bool,
}

impl ForceEvaluator {
    pub fn new(system: &ForceFieldSystem, parallel: bool) -> Self {
        let mut bonds = Vec::new();
        let mut nonbonded = None;
        let mut restraints = Vec::new();

        for force in system.forces() {
            match force {
                Force::HarmonicBonds(b) => bonds.extend_from_slice(b),
                Force::Nonbonded(nb) => {
                    nonbonded = Some(Nonbonded {
                        method: nb.method,
                        cutoff: nb.cutoff,
                        charges: nb.charges.clone(),
                        sigmas: nb.sigmas.clone(),
                        epsilons: nb.epsilons.clone(),
                        excluded: nb
                            .exclusions
                            .iter()
                            .map(|&(i, j)| (i.min(j), i.max(j)))
                            .collect(),
                    })
                }
                Force::PositionRestraint(r) => restraints.push(r.clone()),
                // applied by the integrator
                Force::MonteCarloBarostat(_) => {}
            }
        }

        Self {
            n: system.particle_count(),
            bonds,
            nonbonded,
            restraints,
            parallel,
        }
    }

    pub fn is_parallel(&self) -> bool {
        self.parallel
    }

    pub fn evaluate(&self, positions: &[Vec3], box_vectors: Option<&BoxVectors>) -> ForceResult {
        let mut result = ForceResult {
            energy: 0.0,
            forces: vec![[0.0; 3]; self.n],
        };
        self.add_bonds(positions, &mut result);
        self.add_restraints(positions, box_vectors, &mut result);
        if let Some(nb) = &self.nonbonded {
            self.add_nonbonded(nb, positions, box_vectors, &mut result);
        }
        result
    }

    pub fn energy(&self, positions: &[Vec3], box_vectors: Option<&BoxVectors>) -> f64 {
        self.evaluate(positions, box_vectors).energy
    }

    fn add_bonds(&self, positions: &[Vec3], out: &mut ForceResult) {
        for b in &self.bonds {
            let d = sub(&positions[b.j], &positions[b.i]);
            let r = norm(&d);
            let dr = r - b.length;
            out.energy += 0.5 * b.k * dr * dr;
            if r < 1e-12 {
                continue;
            }
            // F_j = -k (r - r0) d/r
            let scale = -b.k * dr / r;
            for k in 0..3 {
                out.forces[b.j][k] += scale * d[k];
                out.forces[b.i][k] -= scale * d[k];
            }
        }
    }

    fn add_restraints(&self, positions: &[Vec3], box_vectors: Option<&BoxVectors>, out: &mut ForceResult) {
        for restraint in &self.restraints {
            for (i, reference) in &restraint.particles {
                let d = displacement(box_vectors, reference, &positions[*i]);
                out.energy += restraint.k * dot(&d, &d);
                for k in 0..3 {
                    out.forces[*i][k] -= 2.0 * restraint.k * d[k];
                }
            }
        }
    }

    fn add_nonbonded(
        &self,
        nb: &Nonbonded,
        positions: &[Vec3],
        box_vectors: Option<&BoxVectors>,
        out: &mut ForceResult,
    ) {
        let periodic_box = if nb.method.is_periodic() { box_vectors } else { None };
        let cutoff_sq = if nb.method.uses_cutoff() {
            Some(nb.cutoff * nb.cutoff)
        } else {
            None
        };

        let per_particle = |i: usize| -> (f64, Vec3) {
            let mut energy = 0.0;
            let mut force = [0.0; 3];
            for j in 0..self.n {
                if i == j || nb.excluded.contains(&(i.min(j), i.max(j))) {
                    continue;
                }
                // points from j to i
                let d = displacement(periodic_box, &positions[j], &positions[i]);
                let r2 = dot(&d, &d);
                if r2 < 1e-12 || cutoff_sq.map_or(false, |c| r2 > c) {
                    continue;
                }
                let (e, f_over_r) = pair(nb, i, j, r2);
                energy += 0.5 * e;
                for k in 0..3 {
                    force[k] += f_over_r * d[k];
                }
            }
            (energy, force)
        };

        let contributions: Vec<(f64, Vec3)> = if self.parallel {
            (0..self.n).into_par_iter().map(per_particle).collect()
        } else {
            (0..self.n).map(per_particle).collect()
        };

        for (i, (e, f)) in contributions.into_iter().enumerate() {
            out.energy += e;
            for k in 0..3 {
                out.forces[i][k] += f[k];
            }
        }
    }
}

/// Lennard-Jones (Lorentz-Berthelot) plus Coulomb. Returns the pair energy
/// and `-dE/dr / r`.
fn pair(nb: &Nonbonded, i: usize, j: usize, r2: f64) -> (f64, f64) {
    let mut energy = 0.0;
    let mut f_over_r = 0.0;

    let eps = (nb.epsilons[i] * nb.epsilons[j]).sqrt();
    if eps > 0.0 {
        let sigma = 0.5 * (nb.sigmas[i] + nb.sigmas[j]);
        let s6 = (sigma * sigma / r2).powi(3);
        let s12 = s6 * s6;
        energy += 4.0 * eps * (s12 - s6);
        f_over_r += 24.0 * eps * (2.0 * s12 - s6) / r2;
    }

    let qq = nb.charges[i] * nb.charges[j];
    if qq != 0.0 {
        let r = r2.sqrt();
        let e = COULOMB_KJ_NM_PER_MOL * qq / r;
        energy += e;
        f_over_r += e / r2;
    }

    (energy, f_over_r)
}

/// `b - a`, minimum image when a box is given.
pub(crate) fn displacement(box_vectors: Option<&BoxVectors>, a: &Vec3, b: &Vec3) -> Vec3 {
    match box_vectors {
        Some(bv) => bv.minimum_image(a, b),
        None => sub(b, a),
    }
}

pub(crate) fn sub(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

pub(crate) fn dot(a: &Vec3, b: &Vec3) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

pub(crate) fn norm(a: &Vec3) -> f64 {
    dot(a, a).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdflow_core::{HarmonicBond, NonbondedForce, PositionRestraint};

    fn lj_pair(method: NonbondedMethod) -> ForceFieldSystem {
        let mut system = ForceFieldSystem::new(vec![39.9, 39.9]);
        system.add_force(Force::Nonbonded(NonbondedForce {
            method,
            cutoff: 1.0,
            charges: vec![0.5, -0.5],
            sigmas: vec![0.34, 0.34],
            epsilons: vec![0.996, 0.996],
            exclusions: vec![],
        }));
        system
    }

    fn numeric_force(eval: &ForceEvaluator, positions: &[Vec3], bv: Option<&BoxVectors>, i: usize, k: usize) -> f64 {
        let h = 1e-6;
        let mut plus = positions.to_vec();
        let mut minus = positions.to_vec();
        plus[i][k] += h;
        minus[i][k] -= h;
        -(eval.energy(&plus, bv) - eval.energy(&minus, bv)) / (2.0 * h)
    }

    #[test]
    fn test_bond_energy_and_force() {
        let mut system = ForceFieldSystem::new(vec![12.0, 12.0]);
        system.add_force(Force::HarmonicBonds(vec![HarmonicBond { i: 0, j: 1, length: 0.1, k: 1000.0 }]));
        let eval = ForceEvaluator::new(&system, false);
        let res = eval.evaluate(&[[0.0; 3], [0.12, 0.0, 0.0]], None);
        assert!((res.energy - 0.5 * 1000.0 * 0.02 * 0.02).abs() < 1e-12);
        // stretched bond pulls the atoms together
        assert!(res.forces[1][0] < 0.0);
        assert!((res.forces[0][0] + res.forces[1][0]).abs() < 1e-12);
    }

    #[test]
    fn test_nonbonded_forces_match_energy_gradient() {
        let system = lj_pair(NonbondedMethod::NoCutoff);
        let eval = ForceEvaluator::new(&system, false);
        let positions = vec![[0.0, 0.0, 0.0], [0.31, 0.12, -0.05]];
        let res = eval.evaluate(&positions, None);
        for k in 0..3 {
            let expected = numeric_force(&eval, &positions, None, 1, k);
            assert!((res.forces[1][k] - expected).abs() < 1e-4 * expected.abs().max(1.0));
        }
    }

    #[test]
    fn test_cutoff_and_periodic_image() {
        let bv = BoxVectors::orthorhombic(3.0, 3.0, 3.0);
        let positions = vec![[0.1, 0.0, 0.0], [2.7, 0.0, 0.0]];

        let periodic = ForceEvaluator::new(&lj_pair(NonbondedMethod::CutoffPeriodic), false);
        assert!(periodic.energy(&positions, Some(&bv)) != 0.0);

        let nonperiodic = ForceEvaluator::new(&lj_pair(NonbondedMethod::CutoffNonPeriodic), false);
        assert_eq!(nonperiodic.energy(&positions, Some(&bv)), 0.0);
    }

    #[test]
    fn test_exclusions_skip_pair() {
        let mut system = ForceFieldSystem::new(vec![1.0, 1.0]);
        system.add_force(Force::Nonbonded(NonbondedForce {
            method: NonbondedMethod::NoCutoff,
            cutoff: 1.0,
            charges: vec![1.0, 1.0],
            sigmas: vec![0.3, 0.3],
            epsilons: vec![0.5, 0.5],
            exclusions: vec![(1, 0)],
        }));
        let res = ForceEvaluator::new(&system, false).evaluate(&[[0.0; 3], [0.2, 0.0, 0.0]], None);
        assert_eq!(res.energy, 0.0);
    }

    #[test]
    fn test_restraint_pulls_toward_reference() {
        let mut system = ForceFieldSystem::new(vec![12.0]);
        system.add_force(Force::PositionRestraint(PositionRestraint {
            k: 836.8,
            particles: vec![(0, [1.0, 1.0, 1.0])],
        }));
        let res = ForceEvaluator::new(&system, false).evaluate(&[[1.1, 1.0, 1.0]], None);
        assert!((res.energy - 836.8 * 0.01).abs() < 1e-9);
        assert!(res.forces[0][0] < 0.0);
    }

    #[test]
    fn test_parallel_matches_serial() {
        let n = 24;
        let mut system = ForceFieldSystem::new(vec![16.0; n]);
        system.add_force(Force::Nonbonded(NonbondedForce {
            method: NonbondedMethod::Pme,
            cutoff: 0.9,
            charges: (0..n).map(|i| if i % 2 == 0 { 0.4 } else { -0.4 }).collect(),
            sigmas: vec![0.3; n],
            epsilons: vec![0.6; n],
            exclusions: vec![],
        }));
        let bv = BoxVectors::orthorhombic(2.0, 2.0, 2.0);
        let positions: Vec<Vec3> = (0..n)
            .map(|i| {
                let f = i as f64;
                [(f * 0.37) % 2.0, (f * 0.53) % 2.0, (f * 0.71) % 2.0]
            })
            .collect();
        let serial = ForceEvaluator::new(&system, false).evaluate(&positions, Some(&bv));
        let parallel = ForceEvaluator::new(&system, true).evaluate(&positions, Some(&bv));
        assert_eq!(serial, parallel);
    }
}
