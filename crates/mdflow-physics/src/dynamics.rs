//! Langevin dynamics and thermal velocity generation.
//!
//! The integrator uses the BAOAB splitting: half kick, half drift,
//! Ornstein-Uhlenbeck thermostat, half drift, half kick. Zero-mass
//! particles are skipped entirely so frozen atoms never move. With
//! constraints, velocities are RATTLEd after each kick and positions are
//! SHAKEn after the drifts.

use crate::constraints::ConstraintSolver;
use crate::forces::{ForceEvaluator, ForceResult};
use mdflow_core::system::BOLTZMANN_KJ_PER_MOL_K;
use mdflow_core::{BoxVectors, LangevinIntegrator, MdError, Result, Vec3};
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

/// Maxwell-Boltzmann velocities (nm/ps) at `temperature`. Zero-mass
/// particles get zero velocity. No centre-of-mass motion is removed.
pub fn maxwell_boltzmann(masses: &[f64], temperature: f64, rng: &mut StdRng) -> Result<Vec<Vec3>> {
    let kt = BOLTZMANN_KJ_PER_MOL_K * temperature.max(0.0);
    let normal = unit_normal()?;
    Ok(masses
        .iter()
        .map(|&m| {
            if m <= 0.0 {
                return [0.0; 3];
            }
            let sigma = (kt / m).sqrt();
            [
                sigma * normal.sample(rng),
                sigma * normal.sample(rng),
                sigma * normal.sample(rng),
            ]
        })
        .collect())
}

/// Kinetic energy in kJ/mol.
pub fn kinetic_energy(masses: &[f64], velocities: &[Vec3]) -> f64 {
    masses
        .iter()
        .zip(velocities)
        .map(|(m, v)| 0.5 * m * (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]))
        .sum()
}

/// Instantaneous temperature from kinetic energy and degrees of freedom.
pub fn temperature(kinetic: f64, degrees_of_freedom: usize) -> f64 {
    if degrees_of_freedom == 0 {
        0.0
    } else {
        2.0 * kinetic / (degrees_of_freedom as f64 * BOLTZMANN_KJ_PER_MOL_K)
    }
}

fn unit_normal() -> Result<Normal<f64>> {
    Normal::new(0.0, 1.0).map_err(|e| MdError::internal(format!("normal distribution: {}", e)))
}

/// One Langevin integrator bound to a fixed set of masses.
#[derive(Debug, Clone)]
pub struct LangevinStepper {
    params: LangevinIntegrator,
    inv_masses: Vec<f64>,
    noise_scale: Vec<f64>,
    c1: f64,
    normal: Normal<f64>,
    constraints: ConstraintSolver,
}

impl LangevinStepper {
    pub fn new(params: LangevinIntegrator, masses: &[f64]) -> Result<Self> {
        if !(params.step_size > 0.0) {
            return Err(MdError::config(format!(
                "integrator step size must be positive, got {}",
                params.step_size
            )));
        }
        let c1 = (-params.friction * params.step_size).exp();
        let kt = BOLTZMANN_KJ_PER_MOL_K * params.temperature;
        let c2 = ((1.0 - c1 * c1) * kt).sqrt();
        Ok(Self {
            params,
            inv_masses: masses.iter().map(|&m| if m > 0.0 { 1.0 / m } else { 0.0 }).collect(),
            noise_scale: masses.iter().map(|&m| if m > 0.0 { c2 / m.sqrt() } else { 0.0 }).collect(),
            c1,
            normal: unit_normal()?,
            constraints: ConstraintSolver::default(),
        })
    }

    pub fn with_constraints(mut self, constraints: ConstraintSolver) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn params(&self) -> &LangevinIntegrator {
        &self.params
    }

    /// Advances one step. `current` holds forces at `positions` and is
    /// replaced by the forces at the new positions.
    pub fn step(
        &self,
        evaluator: &ForceEvaluator,
        positions: &mut [Vec3],
        velocities: &mut [Vec3],
        box_vectors: Option<&BoxVectors>,
        current: &mut ForceResult,
        rng: &mut StdRng,
    ) -> Result<()> {
        let dt = self.params.step_size;
        let half = 0.5 * dt;

        self.kick(velocities, &current.forces, half);
        self.constraints.apply_velocities(positions, velocities, box_vectors)?;

        let before = (!self.constraints.is_empty()).then(|| positions.to_vec());
        for (i, inv_m) in self.inv_masses.iter().enumerate() {
            if *inv_m == 0.0 {
                continue;
            }
            let (x, v) = (&mut positions[i], &mut velocities[i]);
            for k in 0..3 {
                x[k] += half * v[k];
                v[k] = self.c1 * v[k] + self.noise_scale[i] * self.normal.sample(rng);
                x[k] += half * v[k];
            }
        }

        if let Some(before) = before {
            let drifted = positions.to_vec();
            self.constraints.apply_positions(&before, positions, box_vectors)?;
            for (i, inv_m) in self.inv_masses.iter().enumerate() {
                if *inv_m == 0.0 {
                    continue;
                }
                for k in 0..3 {
                    velocities[i][k] += (positions[i][k] - drifted[i][k]) / dt;
                }
            }
        }

        *current = evaluator.evaluate(positions, box_vectors);

        self.kick(velocities, &current.forces, half);
        self.constraints.apply_velocities(positions, velocities, box_vectors)
    }

    fn kick(&self, velocities: &mut [Vec3], forces: &[Vec3], dt: f64) {
        for (i, inv_m) in self.inv_masses.iter().enumerate() {
            if *inv_m == 0.0 {
                continue;
            }
            for k in 0..3 {
                velocities[i][k] += dt * forces[i][k] * inv_m;
            }
        }
    }
}
