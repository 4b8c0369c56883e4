//! SHAKE/RATTLE distance constraints.
//!
//! Positions are corrected along the pre-move bond vectors until every
//! constrained distance matches its target (SHAKE). Velocities, and the
//! minimizer's search direction, lose their component along each bond
//! (RATTLE). Zero-mass particles have zero inverse mass and never move.

use crate::forces::{displacement, dot, sub};
use mdflow_core::{BoxVectors, DistanceConstraint, MdError, Result, Vec3};

/// Relative tolerance on the squared constrained distance.
const POSITION_TOLERANCE: f64 = 1e-10;
/// nm/ps along the bond.
const VELOCITY_TOLERANCE: f64 = 1e-8;
/// kJ/(mol·nm) along the bond.
const FORCE_TOLERANCE: f64 = 1e-6;
const MAX_ITERATIONS: usize = 1000;

#[derive(Debug, Clone, Default)]
pub struct ConstraintSolver {
    constraints: Vec<DistanceConstraint>,
    inv_masses: Vec<f64>,
    /// 1 for mobile particles, 0 for frozen ones.
    unit_weights: Vec<f64>,
}

impl ConstraintSolver {
    /// Constraints between two frozen particles are dropped.
    pub fn new(constraints: &[DistanceConstraint], masses: &[f64]) -> Self {
        let inv_masses: Vec<f64> = masses.iter().map(|&m| if m > 0.0 { 1.0 / m } else { 0.0 }).collect();
        let weight = |i: usize| inv_masses.get(i).copied().unwrap_or(0.0);
        let constraints = constraints
            .iter()
            .copied()
            .filter(|c| weight(c.i) + weight(c.j) > 0.0)
            .collect();
        let unit_weights = inv_masses.iter().map(|&w| if w > 0.0 { 1.0 } else { 0.0 }).collect();
        Self {
            constraints,
            inv_masses,
            unit_weights,
        }
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    /// SHAKE: moves `positions` onto the constraint surface, correcting along
    /// the bond vectors of `reference`. Returns the number of sweeps.
    pub fn apply_positions(
        &self,
        reference: &[Vec3],
        positions: &mut [Vec3],
        box_vectors: Option<&BoxVectors>,
    ) -> Result<usize> {
        if self.is_empty() {
            return Ok(0);
        }
        for sweep in 0..MAX_ITERATIONS {
            let mut done = true;
            for c in &self.constraints {
                let d = displacement(box_vectors, &positions[c.i], &positions[c.j]);
                let target = c.length * c.length;
                let diff = target - dot(&d, &d);
                if diff.abs() <= 2.0 * POSITION_TOLERANCE * target {
                    continue;
                }
                done = false;

                let r = displacement(box_vectors, &reference[c.i], &reference[c.j]);
                let rd = dot(&r, &d);
                if rd < 1e-3 * target {
                    return Err(MdError::numerical(format!(
                        "constraint ({}, {}) rotated too far in one step",
                        c.i, c.j
                    )));
                }
                let (wi, wj) = (self.inv_masses[c.i], self.inv_masses[c.j]);
                let g = diff / (2.0 * (wi + wj) * rd);
                for k in 0..3 {
                    positions[c.i][k] -= g * wi * r[k];
                    positions[c.j][k] += g * wj * r[k];
                }
            }
            if done {
                return Ok(sweep);
            }
        }
        Err(MdError::numerical(format!(
            "SHAKE did not converge within {} sweeps",
            MAX_ITERATIONS
        )))
    }

    /// RATTLE: removes the relative velocity along every constrained bond.
    pub fn apply_velocities(
        &self,
        positions: &[Vec3],
        velocities: &mut [Vec3],
        box_vectors: Option<&BoxVectors>,
    ) -> Result<()> {
        if self.project(positions, velocities, box_vectors, &self.inv_masses, VELOCITY_TOLERANCE) {
            Ok(())
        } else {
            Err(MdError::numerical(format!(
                "RATTLE did not converge within {} sweeps",
                MAX_ITERATIONS
            )))
        }
    }

    /// Projects minimizer forces onto the constraint surface so the step
    /// direction and the convergence test ignore forces along bonds.
    pub fn project_forces(&self, positions: &[Vec3], forces: &mut [Vec3], box_vectors: Option<&BoxVectors>) {
        if !self.project(positions, forces, box_vectors, &self.unit_weights, FORCE_TOLERANCE) {
            log::trace!("Force projection stopped before reaching tolerance");
        }
    }

    fn project(
        &self,
        positions: &[Vec3],
        vectors: &mut [Vec3],
        box_vectors: Option<&BoxVectors>,
        weights: &[f64],
        tolerance: f64,
    ) -> bool {
        if self.is_empty() {
            return true;
        }
        for _ in 0..MAX_ITERATIONS {
            let mut done = true;
            for c in &self.constraints {
                let (wi, wj) = (weights[c.i], weights[c.j]);
                if wi + wj == 0.0 {
                    continue;
                }
                let d = displacement(box_vectors, &positions[c.i], &positions[c.j]);
                let d2 = dot(&d, &d);
                let along = dot(&d, &sub(&vectors[c.j], &vectors[c.i]));
                if along.abs() <= tolerance * d2.sqrt() {
                    continue;
                }
                done = false;
                let k = along / ((wi + wj) * d2);
                for x in 0..3 {
                    vectors[c.i][x] += k * wi * d[x];
                    vectors[c.j][x] -= k * wj * d[x];
                }
            }
            if done {
                return true;
            }
        }
        false
    }
}
