//! Monte Carlo barostat: isotropic volume moves accepted with the NPT
//! Metropolis criterion. Molecules (connected bond components) move as rigid
//! bodies; their centroids are scaled with the box.

use crate::forces::ForceEvaluator;
use mdflow_core::system::{BAR_TO_KJ_PER_MOL_NM3, BOLTZMANN_KJ_PER_MOL_K};
use mdflow_core::{BoxVectors, MonteCarloBarostat, Vec3};
use rand::rngs::StdRng;
use rand::Rng;

#[derive(Debug, Clone)]
pub struct BarostatState {
    settings: MonteCarloBarostat,
    molecules: Vec<Vec<usize>>,
    max_volume_change: f64,
    attempted: u32,
    accepted: u32,
}

impl BarostatState {
    pub fn new(settings: MonteCarloBarostat, molecules: Vec<Vec<usize>>, volume: f64) -> Self {
        Self {
            settings,
            molecules,
            max_volume_change: 0.01 * volume,
            attempted: 0,
            accepted: 0,
        }
    }

    pub fn frequency(&self) -> u32 {
        self.settings.frequency
    }

    /// Whether a volume move is due after `step` completed steps.
    pub fn is_due(&self, step: u64) -> bool {
        self.settings.frequency > 0 && step > 0 && step % self.settings.frequency as u64 == 0
    }

    /// Attempts one volume move. Returns `true` when accepted, in which case
    /// `positions` and `box_vectors` are updated in place.
    pub fn attempt(
        &mut self,
        evaluator: &ForceEvaluator,
        positions: &mut Vec<Vec3>,
        box_vectors: &mut BoxVectors,
        rng: &mut StdRng,
    ) -> bool {
        let volume = box_vectors.volume();
        let delta = self.max_volume_change * (2.0 * rng.gen::<f64>() - 1.0);
        let new_volume = volume + delta;
        self.attempted += 1;

        let mut accepted = false;
        if new_volume > 0.0 {
            let scale = (new_volume / volume).cbrt();
            let trial_box = box_vectors.scaled(scale);
            let trial = self.scale_molecules(positions, scale);

            let old_energy = evaluator.energy(positions, Some(box_vectors));
            let new_energy = evaluator.energy(&trial, Some(&trial_box));
            let kt = BOLTZMANN_KJ_PER_MOL_K * self.settings.temperature;
            let pressure = self.settings.pressure * BAR_TO_KJ_PER_MOL_NM3;
            let w = (new_energy - old_energy) + pressure * delta
                - self.molecules.len() as f64 * kt * (new_volume / volume).ln();

            if w <= 0.0 || rng.gen::<f64>() < (-w / kt).exp() {
                *positions = trial;
                *box_vectors = trial_box;
                self.accepted += 1;
                accepted = true;
            }
        }

        if self.attempted >= 10 {
            let rate = self.accepted as f64 / self.attempted as f64;
            if rate < 0.25 {
                self.max_volume_change /= 1.1;
            } else if rate > 0.75 {
                self.max_volume_change = (self.max_volume_change * 1.1).min(0.3 * volume);
            }
            self.attempted = 0;
            self.accepted = 0;
        }
        accepted
    }

    fn scale_molecules(&self, positions: &[Vec3], scale: f64) -> Vec<Vec3> {
        let mut out = positions.to_vec();
        for molecule in &self.molecules {
            if molecule.is_empty() {
                continue;
            }
            let n = molecule.len() as f64;
            let mut centroid = [0.0; 3];
            for &i in molecule {
                for k in 0..3 {
                    centroid[k] += positions[i][k] / n;
                }
            }
            for &i in molecule {
                for k in 0..3 {
                    out[i][k] += (scale - 1.0) * centroid[k];
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdflow_core::ForceFieldSystem;
    use rand::SeedableRng;

    #[test]
    fn test_rigid_molecule_keeps_internal_geometry() {
        let state = BarostatState::new(
            MonteCarloBarostat { pressure: 1.0, temperature: 300.0, frequency: 25 },
            vec![vec![0, 1], vec![2]],
            8.0,
        );
        let positions = vec![[1.0, 1.0, 1.0], [1.1, 1.0, 1.0], [0.5, 0.5, 0.5]];
        let scaled = state.scale_molecules(&positions, 1.1);
        assert!((scaled[1][0] - scaled[0][0] - 0.1).abs() < 1e-12);
        assert!((scaled[2][0] - 0.55).abs() < 1e-12);
    }

    #[test]
    fn test_ideal_gas_moves_change_box() {
        // no interactions: acceptance driven purely by P dV and N kT ln V
        let system = ForceFieldSystem::new(vec![1.0; 50]);
        let eval = ForceEvaluator::new(&system, false);
        let mut state = BarostatState::new(
            MonteCarloBarostat { pressure: 1.0, temperature: 300.0, frequency: 25 },
            (0..50).map(|i| vec![i]).collect(),
            27.0,
        );
        let mut positions: Vec<Vec3> = (0..50).map(|i| [0.05 * i as f64, 1.0, 1.0]).collect();
        let mut bv = BoxVectors::orthorhombic(3.0, 3.0, 3.0);
        let mut rng = StdRng::seed_from_u64(11);

        let accepted = (0..40)
            .filter(|_| state.attempt(&eval, &mut positions, &mut bv, &mut rng))
            .count();
        assert!(accepted > 0);
        assert!((bv.volume() - 27.0).abs() > 1e-9);
    }

    #[test]
    fn test_due_every_frequency_steps() {
        let state = BarostatState::new(
            MonteCarloBarostat { pressure: 1.0, temperature: 300.0, frequency: 25 },
            vec![],
            1.0,
        );
        assert!(!state.is_due(0));
        assert!(!state.is_due(24));
        assert!(state.is_due(25));
        assert!(state.is_due(50));
    }
}
