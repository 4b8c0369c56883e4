//! Integration context shared by the software back-ends.

use crate::barostat::BarostatState;
use crate::constraints::ConstraintSolver;
use crate::dynamics::{self, LangevinStepper};
use crate::forces::{ForceEvaluator, ForceResult};
use crate::minimizer;
use mdflow_core::system::AMU_PER_NM3_TO_G_PER_ML;
use mdflow_core::{
    BackendKind, BoxVectors, ForceFieldSystem, IntegrationContext, LangevinIntegrator, MdError,
    Result, State, Vec3,
};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Live simulation on the Reference or CPU back-end.
pub struct SoftwareContext {
    backend: BackendKind,
    masses: Vec<f64>,
    mobile: Vec<bool>,
    degrees_of_freedom: usize,
    total_mass: f64,
    evaluator: ForceEvaluator,
    stepper: LangevinStepper,
    constraints: ConstraintSolver,
    /// Whether `positions` already satisfy the constraints.
    constrained: bool,
    barostat: Option<BarostatState>,
    positions: Vec<Vec3>,
    velocities: Vec<Vec3>,
    box_vectors: Option<BoxVectors>,
    forces: Option<ForceResult>,
    step: u64,
    rng: StdRng,
}

impl SoftwareContext {
    pub fn new(
        backend: BackendKind,
        system: &ForceFieldSystem,
        integrator: LangevinIntegrator,
        parallel: bool,
    ) -> Result<Self> {
        let n = system.particle_count();
        let box_vectors = system.default_box().copied();
        let barostat = match (system.barostat(), box_vectors) {
            (Some(settings), Some(bv)) => Some(BarostatState::new(
                *settings,
                system.molecules().to_vec(),
                bv.volume(),
            )),
            (Some(_), None) => {
                return Err(MdError::config("barostat requires a periodic box"));
            }
            (None, _) => None,
        };

        let constraints = ConstraintSolver::new(system.constraints(), system.masses());
        Ok(Self {
            backend,
            masses: system.masses().to_vec(),
            mobile: (0..n).map(|i| system.is_mobile(i)).collect(),
            degrees_of_freedom: system.degrees_of_freedom(),
            total_mass: system.total_mass(),
            evaluator: ForceEvaluator::new(system, parallel),
            stepper: LangevinStepper::new(integrator, system.masses())?.with_constraints(constraints.clone()),
            constrained: constraints.is_empty(),
            constraints,
            barostat,
            positions: vec![[0.0; 3]; n],
            velocities: vec![[0.0; 3]; n],
            box_vectors,
            forces: None,
            step: 0,
            rng: StdRng::from_entropy(),
        })
    }

    fn check_len(&self, what: &str, len: usize) -> Result<()> {
        if len != self.masses.len() {
            return Err(MdError::validation(format!(
                "{} has {} entries, system has {} particles",
                what,
                len,
                self.masses.len()
            )));
        }
        Ok(())
    }

    /// Puts freshly set positions on the constraint surface.
    fn enforce_constraints(&mut self) -> Result<()> {
        if !self.constrained {
            let reference = self.positions.clone();
            self.constraints
                .apply_positions(&reference, &mut self.positions, self.box_vectors.as_ref())?;
            self.forces = None;
            self.constrained = true;
        }
        Ok(())
    }

    fn current_forces(&mut self) -> ForceResult {
        match self.forces.take() {
            Some(f) => f,
            None => self.evaluator.evaluate(&self.positions, self.box_vectors.as_ref()),
        }
    }
}

impl IntegrationContext for SoftwareContext {
    fn backend(&self) -> BackendKind {
        self.backend
    }

    fn property_values(&self) -> Vec<(String, String)> {
        if self.evaluator.is_parallel() {
            vec![("Threads".to_string(), rayon::current_num_threads().to_string())]
        } else {
            Vec::new()
        }
    }

    fn set_positions(&mut self, positions: &[Vec3]) -> Result<()> {
        self.check_len("positions", positions.len())?;
        self.positions = positions.to_vec();
        self.forces = None;
        self.constrained = self.constraints.is_empty();
        Ok(())
    }

    fn set_velocities(&mut self, velocities: &[Vec3]) -> Result<()> {
        self.check_len("velocities", velocities.len())?;
        self.velocities = velocities
            .iter()
            .zip(&self.mobile)
            .map(|(v, &m)| if m { *v } else { [0.0; 3] })
            .collect();
        Ok(())
    }

    fn set_velocities_to_temperature(&mut self, temperature: f64, seed: Option<u64>) -> Result<()> {
        if let Some(seed) = seed {
            self.rng = StdRng::seed_from_u64(seed);
        }
        self.velocities = dynamics::maxwell_boltzmann(&self.masses, temperature, &mut self.rng)?;
        Ok(())
    }

    fn set_periodic_box(&mut self, box_vectors: BoxVectors) -> Result<()> {
        if !(box_vectors.volume() > 0.0) {
            return Err(MdError::validation("periodic box has zero volume"));
        }
        self.box_vectors = Some(box_vectors);
        self.forces = None;
        Ok(())
    }

    fn minimize(&mut self, tolerance: f64, max_iterations: u64) -> Result<()> {
        let report = minimizer::steepest_descent(
            &self.evaluator,
            &self.constraints,
            &mut self.positions,
            &self.mobile,
            self.box_vectors.as_ref(),
            tolerance,
            max_iterations,
        )?;
        if !report.converged {
            log::debug!(
                "{} minimization stopped after {} iterations, max force {:.3}",
                self.backend,
                report.iterations,
                report.max_force
            );
        }
        self.forces = None;
        self.constrained = true;
        Ok(())
    }

    fn step(&mut self, steps: u64) -> Result<()> {
        self.enforce_constraints()?;
        let mut forces = self.current_forces();
        for _ in 0..steps {
            self.stepper.step(
                &self.evaluator,
                &mut self.positions,
                &mut self.velocities,
                self.box_vectors.as_ref(),
                &mut forces,
                &mut self.rng,
            )?;
            self.step += 1;

            if let (Some(barostat), Some(bv)) = (self.barostat.as_mut(), self.box_vectors.as_mut()) {
                if barostat.is_due(self.step)
                    && barostat.attempt(&self.evaluator, &mut self.positions, bv, &mut self.rng)
                {
                    forces = self.evaluator.evaluate(&self.positions, Some(&*bv));
                }
            }

            if !forces.energy.is_finite() {
                return Err(MdError::numerical(format!(
                    "potential energy became {} at step {}",
                    forces.energy, self.step
                )));
            }
        }
        self.forces = Some(forces);
        Ok(())
    }

    fn state(&self) -> Result<State> {
        let potential_energy = match &self.forces {
            Some(f) => f.energy,
            None => self.evaluator.energy(&self.positions, self.box_vectors.as_ref()),
        };
        let kinetic_energy = dynamics::kinetic_energy(&self.masses, &self.velocities);
        let density = self
            .box_vectors
            .map(|b| self.total_mass / b.volume() * AMU_PER_NM3_TO_G_PER_ML);

        Ok(State {
            step: self.step,
            time: self.step as f64 * self.stepper.params().step_size,
            positions: self.positions.clone(),
            velocities: self.velocities.clone(),
            box_vectors: self.box_vectors,
            potential_energy,
            kinetic_energy,
            temperature: dynamics::temperature(kinetic_energy, self.degrees_of_freedom),
            density,
        })
    }
}
