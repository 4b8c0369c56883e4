//! Adaptive steepest-descent energy minimization.
//!
//! Each iteration moves every mobile particle along its force, scaled so the
//! largest displacement equals the current step length. Downhill moves are
//! accepted and grow the step, uphill moves are rejected and shrink it.
//! Under constraints the forces are projected onto the constraint surface
//! and every trial move is SHAKEn back onto it.

use crate::constraints::ConstraintSolver;
use crate::forces::ForceEvaluator;
use mdflow_core::{BoxVectors, MdError, Result, Vec3};

const INITIAL_STEP_NM: f64 = 0.01;
const MAX_STEP_NM: f64 = 0.1;
const MIN_STEP_NM: f64 = 1e-10;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinimizationReport {
    pub iterations: u64,
    pub initial_energy: f64,
    pub final_energy: f64,
    pub max_force: f64,
    pub converged: bool,
}

/// Minimizes `positions` in place until the largest force on a mobile
/// particle drops below `tolerance` (kJ/mol/nm). `max_iterations == 0` runs
/// until convergence or until the step length underflows.
pub fn steepest_descent(
    evaluator: &ForceEvaluator,
    constraints: &ConstraintSolver,
    positions: &mut [Vec3],
    mobile: &[bool],
    box_vectors: Option<&BoxVectors>,
    tolerance: f64,
    max_iterations: u64,
) -> Result<MinimizationReport> {
    if !constraints.is_empty() {
        let reference = positions.to_vec();
        constraints.apply_positions(&reference, positions, box_vectors)?;
    }
    let mut current = evaluator.evaluate(positions, box_vectors);
    constraints.project_forces(positions, &mut current.forces, box_vectors);
    let initial_energy = current.energy;
    if !initial_energy.is_finite() {
        return Err(MdError::numerical(format!(
            "non-finite initial energy {}",
            initial_energy
        )));
    }

    let mut step = INITIAL_STEP_NM;
    let mut iterations = 0u64;
    let mut max_force = current.max_force(mobile);

    while max_force >= tolerance {
        if max_iterations > 0 && iterations >= max_iterations {
            break;
        }
        if step < MIN_STEP_NM {
            log::debug!("Minimizer step underflow at max force {:.3}", max_force);
            break;
        }
        iterations += 1;

        let scale = step / max_force;
        let mut trial: Vec<Vec3> = positions
            .iter()
            .zip(&current.forces)
            .zip(mobile)
            .map(|((x, f), &m)| {
                if m {
                    [x[0] + scale * f[0], x[1] + scale * f[1], x[2] + scale * f[2]]
                } else {
                    *x
                }
            })
            .collect();
        if constraints.apply_positions(positions, &mut trial, box_vectors).is_err() {
            step *= 0.5;
            continue;
        }

        let mut candidate = evaluator.evaluate(&trial, box_vectors);
        if candidate.energy.is_finite() && candidate.energy < current.energy {
            positions.copy_from_slice(&trial);
            constraints.project_forces(positions, &mut candidate.forces, box_vectors);
            current = candidate;
            max_force = current.max_force(mobile);
            step = (step * 1.2).min(MAX_STEP_NM);
        } else {
            step *= 0.5;
        }
    }

    let report = MinimizationReport {
        iterations,
        initial_energy,
        final_energy: current.energy,
        max_force,
        converged: max_force < tolerance,
    };
    log::debug!("Minimization finished: {:?}", report);
    Ok(report)
}
