//! Stage pipeline: runs one Minimize, NVT or NPT stage against an input
//! snapshot and produces the next [`StageRecord`].
//!
//! The pipeline holds no state between calls. Run-level ordering
//! (SETUP → MINIMIZATION → NVT → NPT) is the caller's business; each call
//! only checks that the inputs it needs are present.

use crate::config::{SimulationJob, BAROSTAT_FREQUENCY, FRICTION_PER_PS};
use crate::history::{RunHistory, StageRecord};
use crate::overrides::SystemOverrides;
use crate::reporting::{ProgressReporter, ReportingPlan, Simulation, StateDataReporter, TrajectoryReporter};
use mdflow_core::system::connected_components;
use mdflow_core::{
    BackendKind, BoxVectors, Constraints, DistanceConstraint, Force, ForceFieldSystem,
    IntegrationContext, LangevinIntegrator, MdError, MonteCarloBarostat, NonbondedForce,
    NonbondedMethod, PlatformProperties, PositionRestraint, Result, StageKind, StructureProvider,
    Vec3,
};
use mdflow_gpu::{negotiate, DeviceArbiter, LeaseRequest, PlatformRegistry};
use std::path::PathBuf;
use std::time::Instant;

/// kcal/(mol·Å²) to kJ/(mol·nm²)
pub const KCAL_PER_A2_TO_KJ_PER_NM2: f64 = 418.4;

/// atm to bar
pub const ATM_TO_BAR: f64 = 1.01325;

pub const ANGSTROM_TO_NM: f64 = 0.1;

/// Loose tolerance of the Reference clash-removal pass (kJ/mol/nm).
pub const PREPASS_TOLERANCE: f64 = 1e5;

/// Tolerance of the main minimization (kJ/mol/nm).
pub const MINIMIZE_TOLERANCE: f64 = 10.0;

/// Hydrogen mass after repartitioning (amu).
pub const HMR_HYDROGEN_MASS: f64 = 4.0;

/// Registry with the host back-ends every build ships.
pub fn default_registry() -> PlatformRegistry {
    PlatformRegistry::with_platforms(mdflow_physics::builtin_platforms())
}

/// Log text accumulated while a stage runs.
#[derive(Debug, Default)]
struct StageLog {
    text: String,
}

impl StageLog {
    fn line(&mut self, line: impl std::fmt::Display) {
        let line = line.to_string();
        log::debug!("{}", line);
        self.text.push_str(&line);
        self.text.push('\n');
    }
}

fn host_summary() -> String {
    let host = std::fs::read_to_string("/proc/sys/kernel/hostname")
        .map(|h| h.trim().to_string())
        .ok()
        .or_else(|| std::env::var("HOSTNAME").ok())
        .unwrap_or_else(|| "unknown".to_string());
    format!(
        "os={} arch={} host={}",
        std::env::consts::OS,
        std::env::consts::ARCH,
        host
    )
}

/// Translation taking the geometric centre of `positions` to the box centre.
fn recenter(positions: &mut [Vec3], box_center: Vec3) {
    if positions.is_empty() {
        return;
    }
    let n = positions.len() as f64;
    let mut centroid = [0.0; 3];
    for p in positions.iter() {
        for k in 0..3 {
            centroid[k] += p[k] / n;
        }
    }
    let shift = [
        box_center[0] - centroid[0],
        box_center[1] - centroid[1],
        box_center[2] - centroid[2],
    ];
    for p in positions.iter_mut() {
        for k in 0..3 {
            p[k] += shift[k];
        }
    }
}

/// Shifts each molecule by whole box vectors so its centroid lies in the
/// primary cell. Molecules stay intact.
fn wrap_molecules(positions: &mut [Vec3], molecules: &[Vec<usize>], box_vectors: &BoxVectors) {
    for molecule in molecules {
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
        let wrapped = box_vectors.wrap(&centroid);
        let shift = [
            wrapped[0] - centroid[0],
            wrapped[1] - centroid[1],
            wrapped[2] - centroid[2],
        ];
        if shift == [0.0; 3] {
            continue;
        }
        for &i in molecule {
            for k in 0..3 {
                positions[i][k] += shift[k];
            }
        }
    }
}

/// Distance constraints for `mode`, taken from the topology bonds. Angle
/// constraints use the bonds' rest lengths and the angle at `positions`.
fn constraint_set<S: StructureProvider>(
    mode: Constraints,
    input: &S,
    positions: &[Vec3],
) -> Vec<DistanceConstraint> {
    let atoms = &input.molecule().atoms;
    let bonds = &input.structure().bonds;
    let is_h = |i: usize| atoms[i].element == 1;

    let mut out: Vec<DistanceConstraint> = bonds
        .iter()
        .filter(|b| match mode {
            Constraints::None => false,
            Constraints::HBonds => is_h(b.i) || is_h(b.j),
            Constraints::HAngles | Constraints::AllBonds => true,
        })
        .map(|b| DistanceConstraint { i: b.i, j: b.j, length: b.length })
        .collect();

    if mode == Constraints::HAngles {
        let mut neighbours: Vec<Vec<(usize, f64)>> = vec![Vec::new(); atoms.len()];
        for b in bonds {
            neighbours[b.i].push((b.j, b.length));
            neighbours[b.j].push((b.i, b.length));
        }
        for (center, list) in neighbours.iter().enumerate() {
            for (x, &(a, ra)) in list.iter().enumerate() {
                for &(b, rb) in &list[x + 1..] {
                    let h_x_h = is_h(a) && is_h(b);
                    let h_o_x = atoms[center].element == 8 && (is_h(a) || is_h(b));
                    if !(h_x_h || h_o_x) {
                        continue;
                    }
                    let u: Vec<f64> = (0..3).map(|k| positions[a][k] - positions[center][k]).collect();
                    let v: Vec<f64> = (0..3).map(|k| positions[b][k] - positions[center][k]).collect();
                    let (nu, nv) = (
                        u.iter().map(|x| x * x).sum::<f64>().sqrt(),
                        v.iter().map(|x| x * x).sum::<f64>().sqrt(),
                    );
                    if nu == 0.0 || nv == 0.0 {
                        continue;
                    }
                    let cos = u.iter().zip(&v).map(|(p, q)| p * q).sum::<f64>() / (nu * nv);
                    let length = (ra * ra + rb * rb - 2.0 * ra * rb * cos.clamp(-1.0, 1.0)).sqrt();
                    out.push(DistanceConstraint { i: a.min(b), j: a.max(b), length });
                }
            }
        }
    }
    out
}

/// Moves mass from heavy atoms onto their bonded hydrogens.
fn repartition_hydrogen_mass<S: StructureProvider>(input: &S, masses: &mut [f64]) -> Result<()> {
    let atoms = &input.molecule().atoms;
    for bond in &input.structure().bonds {
        let (h, heavy) = match (atoms[bond.i].element, atoms[bond.j].element) {
            (1, e) if e != 1 => (bond.i, bond.j),
            (e, 1) if e != 1 => (bond.j, bond.i),
            _ => continue,
        };
        let transfer = HMR_HYDROGEN_MASS - masses[h];
        masses[h] = HMR_HYDROGEN_MASS;
        masses[heavy] -= transfer;
        if masses[heavy] <= 0.0 {
            return Err(MdError::validation(format!(
                "hydrogen mass repartitioning leaves atom {} with mass {}",
                heavy, masses[heavy]
            )));
        }
    }
    Ok(())
}

/// Builds the force-field system for `job` from `input` at `positions`
/// (the stage's starting coordinates, after any recentering).
pub fn build_force_field<S: StructureProvider>(
    job: &SimulationJob,
    input: &S,
    positions: &[Vec3],
) -> Result<ForceFieldSystem> {
    let structure = input.structure();
    let box_vectors = input.box_vectors().copied();

    let mut masses: Vec<f64> = structure.atoms.iter().map(|a| a.mass).collect();
    if job.hmr {
        repartition_hydrogen_mass(input, &mut masses)?;
    }
    let mut system = ForceFieldSystem::new(masses);

    let bonded_pairs: Vec<(usize, usize)> = structure.bonds.iter().map(|b| (b.i, b.j)).collect();
    system.set_molecules(connected_components(system.particle_count(), &bonded_pairs));
    system.set_default_box(box_vectors);

    if !structure.bonds.is_empty() {
        system.add_force(Force::HarmonicBonds(structure.bonds.clone()));
    }

    // vacuum systems never use a cutoff scheme
    let method = if box_vectors.is_some() {
        job.nonbonded_method
    } else {
        NonbondedMethod::NoCutoff
    };
    system.add_force(Force::Nonbonded(NonbondedForce {
        method,
        cutoff: job.nonbonded_cutoff * ANGSTROM_TO_NM,
        charges: structure.atoms.iter().map(|a| a.charge).collect(),
        sigmas: structure.atoms.iter().map(|a| a.sigma).collect(),
        epsilons: structure.atoms.iter().map(|a| a.epsilon).collect(),
        exclusions: bonded_pairs,
    }));

    if job.stage == StageKind::Npt {
        if box_vectors.is_none() {
            return Err(MdError::config("NPT simulation without box vectors"));
        }
        system.add_force(Force::MonteCarloBarostat(MonteCarloBarostat {
            pressure: job.pressure * ATM_TO_BAR,
            temperature: job.temperature,
            frequency: BAROSTAT_FREQUENCY,
        }));
    }

    let restrained = input.select(&job.restraint_selection)?;
    if !restrained.is_empty() {
        system.add_force(Force::PositionRestraint(PositionRestraint {
            k: job.restraint_weight() * KCAL_PER_A2_TO_KJ_PER_NM2,
            particles: restrained.iter().map(|&i| (i, positions[i])).collect(),
        }));
    }

    for constraint in constraint_set(job.constraints, input, positions) {
        system.add_constraint(constraint)?;
    }

    for i in input.select(&job.freeze_selection)? {
        system.set_particle_mass(i, 0.0)?;
    }

    Ok(system)
}

/// Runs stages, optionally under device arbitration.
#[derive(Debug, Clone)]
pub struct StagePipeline {
    registry: PlatformRegistry,
    arbiter: Option<DeviceArbiter>,
}

impl Default for StagePipeline {
    fn default() -> Self {
        Self::new(default_registry())
    }
}

impl StagePipeline {
    pub fn new(registry: PlatformRegistry) -> Self {
        Self {
            registry,
            arbiter: None,
        }
    }

    pub fn with_arbiter(mut self, arbiter: Option<DeviceArbiter>) -> Self {
        self.arbiter = arbiter;
        self
    }

    pub fn registry(&self) -> &PlatformRegistry {
        &self.registry
    }

    pub fn arbiter(&self) -> Option<&DeviceArbiter> {
        self.arbiter.as_ref()
    }

    /// Runs the job's stage on the history's latest snapshot and appends the
    /// resulting record. Nothing is appended on failure.
    pub fn run<S: StructureProvider>(&self, job: &SimulationJob, history: &mut RunHistory<S>) -> Result<()> {
        let input = history.latest_snapshot().ok_or_else(|| {
            MdError::validation("run history is empty; record the initial system first")
        })?;
        let record = self.run_guarded(job, input)?;
        history.append(record)
    }

    /// Executes the stage, holding a device lease when an arbiter is set.
    /// Failures come back as [`MdError::SimulationFailed`].
    pub fn run_guarded<S: StructureProvider>(&self, job: &SimulationJob, input: &S) -> Result<StageRecord<S>> {
        let result = match &self.arbiter {
            Some(arbiter) => {
                let request = LeaseRequest::new(job.job_id, job.title());
                arbiter.run_exclusive(&request, |lease| self.execute(job, input, Some(lease.device_id())))
            }
            None => self
                .execute(job, input, None)
                .map_err(|e| MdError::simulation_failed(job.job_id.to_string(), e)),
        };
        if let Err(e) = &result {
            log::error!("{} stage of {} failed: {}", job.stage, job.system_id, e);
        }
        result
    }

    /// Executes one stage without arbitration. `device` pins a GPU-class
    /// back-end to a leased device.
    pub fn execute<S: StructureProvider>(
        &self,
        job: &SimulationJob,
        input: &S,
        device: Option<&str>,
    ) -> Result<StageRecord<S>> {
        let started = Instant::now();
        let input_digest = input.digest()?;
        let mut log = StageLog::default();

        let overrides = SystemOverrides::from_map(input.overrides())?;
        let job = job.with_overrides(&overrides);
        job.validate()?;

        log.line(format!("{} stage for {} ({})", job.stage.stage_name(), job.title(), job.output_name()));
        log.line("Parameters:");
        for line in serde_json::to_string_pretty(&job)?.lines() {
            log.line(line);
        }
        if !overrides.is_empty() {
            log.line(format!("System overrides: {:?}", overrides));
        }
        log.line(format!("Host: {}", host_summary()));

        let mut positions = input.positions().to_vec();
        let box_vectors = input.box_vectors().copied();
        if job.center {
            if let Some(bv) = &box_vectors {
                recenter(&mut positions, bv.center());
                log.line("Centered system in periodic box");
            }
        }

        let system = build_force_field(&job, input, &positions)?;
        log.line(format!(
            "Nonbonded method: {}",
            system.nonbonded().map_or(NonbondedMethod::NoCutoff, |nb| nb.method)
        ));
        log.line(format!(
            "Constraints: {} ({} distances)",
            job.constraints,
            system.constraints().len()
        ));

        let choice = negotiate(&self.registry, job.platform, job.precision, device)?;
        let properties = choice.properties();
        let timestep = job.timestep();
        let integrator = LangevinIntegrator::new(job.temperature, FRICTION_PER_PS, timestep);

        let mut context = choice.platform.create_context(&system, integrator, &properties)?;
        log.line(format!("Platform: {}", context.backend()));
        if let Some(p) = choice.precision {
            log.line(format!("  Precision = {}", p));
        }
        if let Some(d) = &choice.device_index {
            log.line(format!("  DeviceIndex = {}", d));
        }
        for (name, value) in context.property_values() {
            log.line(format!("  {} = {}", name, value));
        }
        context.set_positions(&positions)?;
        if let Some(bv) = box_vectors {
            context.set_periodic_box(bv)?;
        }

        let (snapshot, trajectory) = match job.stage {
            StageKind::Minimize => {
                let mut minimized =
                    self.minimize(&job, &system, integrator, &positions, &mut *context, &mut log)?;
                if let Some(bv) = system.default_box() {
                    wrap_molecules(&mut minimized, system.molecules(), bv);
                }
                (input.with_state(minimized, None, None)?, None)
            }
            StageKind::Nvt | StageKind::Npt => {
                match input.velocities() {
                    Some(v) => {
                        context.set_velocities(v)?;
                        log.line("Restarting from previous velocities");
                    }
                    None => {
                        context.set_velocities_to_temperature(job.temperature, job.seed)?;
                        log.line(format!("Velocities drawn at {} K", job.temperature));
                    }
                }
                let (mut state, trajectory) = self.integrate(&job, context, &mut log)?;
                if let Some(bv) = &state.box_vectors {
                    wrap_molecules(&mut state.positions, system.molecules(), bv);
                }
                (
                    input.with_state(state.positions, Some(state.velocities), state.box_vectors)?,
                    trajectory,
                )
            }
        };

        log.line(format!("Stage finished in {:.1} s", started.elapsed().as_secs_f64()));
        log::info!("{} stage of {} completed", job.stage.stage_name(), job.system_id);
        StageRecord::new(job.stage.stage_name(), log.text, snapshot, trajectory, Some(input_digest))
    }

    fn minimize(
        &self,
        job: &SimulationJob,
        system: &ForceFieldSystem,
        integrator: LangevinIntegrator,
        positions: &[Vec3],
        context: &mut dyn IntegrationContext,
        log: &mut StageLog,
    ) -> Result<Vec<Vec3>> {
        let reference = self.registry.instantiate(BackendKind::Reference).map_err(|e| {
            MdError::NoPlatform(format!("Reference back-end needed for clash removal: {}", e))
        })?;
        let mut prepass = reference.create_context(system, integrator, &PlatformProperties::default())?;
        prepass.set_positions(positions)?;
        if let Some(bv) = system.default_box() {
            prepass.set_periodic_box(*bv)?;
        }
        log.line(format!("Initial energy: {:.4} kJ/mol", prepass.state()?.potential_energy));

        prepass.minimize(PREPASS_TOLERANCE, 0)?;
        let intermediate = prepass.state()?.positions;

        context.set_positions(&intermediate)?;
        context.minimize(MINIMIZE_TOLERANCE, job.steps)?;
        let state = context.state()?;
        log.line(format!("Minimized energy: {:.4} kJ/mol", state.potential_energy));
        Ok(state.positions)
    }

    fn integrate(
        &self,
        job: &SimulationJob,
        context: Box<dyn IntegrationContext>,
        log: &mut StageLog,
    ) -> Result<(mdflow_core::State, Option<PathBuf>)> {
        let timestep = job.timestep();
        let plan = ReportingPlan::new(job.time, timestep, job.trajectory_interval, job.reporter_interval);
        log.line(format!("Time step: {} ps", timestep));
        log.line(format!(
            "Running {} ps ({} steps) at {} K",
            job.time, plan.total_steps, job.temperature
        ));
        log.line(format!("Total trajectory frames: {}", plan.total_frames));

        let mut simulation = Simulation::new(context);
        let mut trajectory = None;
        if plan.log_every.is_some() || plan.trajectory_every.is_some() {
            std::fs::create_dir_all(&job.output_dir)?;
        }
        let prefix = job.output_prefix().to_string_lossy().into_owned();
        if let Some(every) = plan.log_every {
            let reporter = StateDataReporter::create(&PathBuf::from(format!("{}.log", prefix)), every)?;
            log.line(format!("State log: {} every {} steps", reporter.path().display(), every));
            simulation.add_reporter(Box::new(reporter));
            simulation.add_reporter(Box::new(ProgressReporter::new(every, plan.total_steps)));
        }
        if let Some(every) = plan.trajectory_every {
            let reporter = TrajectoryReporter::create(&PathBuf::from(format!("{}.traj.jsonl", prefix)), every)?;
            log.line(format!("Trajectory: {} every {} steps", reporter.path().display(), every));
            trajectory = Some(reporter.path().to_path_buf());
            simulation.add_reporter(Box::new(reporter));
        }

        simulation.step(plan.total_steps)?;
        let context = simulation.finish()?;
        let state = context.state()?;
        log.line(format!(
            "Final potential energy: {:.4} kJ/mol, temperature {:.2} K",
            state.potential_energy, state.temperature
        ));
        Ok((state, trajectory))
    }
}
