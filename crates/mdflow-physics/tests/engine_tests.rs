//! End-to-end checks of the software back-ends through the `Platform` trait.

use mdflow_core::system::connected_components;
use mdflow_core::{
    BoxVectors, Force, ForceFieldSystem, HarmonicBond, IntegrationContext, LangevinIntegrator, MonteCarloBarostat,
    NonbondedForce, NonbondedMethod, Platform, PlatformProperties, Vec3,
};
use mdflow_physics::{CpuPlatform, ReferencePlatform};

/// Dimers on a cubic lattice in a 2.4 nm box.
fn dimer_box() -> (ForceFieldSystem, Vec<Vec3>) {
    let mut positions = Vec::new();
    let mut bonds = Vec::new();
    for a in 0..3 {
        for b in 0..3 {
            for c in 0..3 {
                let base = [0.4 + 0.8 * a as f64, 0.4 + 0.8 * b as f64, 0.4 + 0.8 * c as f64];
                let i = positions.len();
                positions.push(base);
                positions.push([base[0] + 0.12, base[1], base[2]]);
                bonds.push(HarmonicBond { i, j: i + 1, length: 0.12, k: 3000.0 });
            }
        }
    }
    let n = positions.len();
    let mut system = ForceFieldSystem::new(vec![14.0; n]);
    system.set_molecules(connected_components(
        n,
        &bonds.iter().map(|b| (b.i, b.j)).collect::<Vec<_>>(),
    ));
    system.add_force(Force::Nonbonded(NonbondedForce {
        method: NonbondedMethod::Pme,
        cutoff: 1.0,
        charges: (0..n).map(|i| if i % 2 == 0 { 0.3 } else { -0.3 }).collect(),
        sigmas: vec![0.32; n],
        epsilons: vec![0.7; n],
        exclusions: bonds.iter().map(|b| (b.i, b.j)).collect(),
    }));
    system.add_force(Force::HarmonicBonds(bonds));
    system.set_default_box(Some(BoxVectors::orthorhombic(2.4, 2.4, 2.4)));
    (system, positions)
}

#[test]
fn test_reference_and_cpu_agree_on_energy() {
    env_logger::builder().is_test(true).try_init().ok();

    let (system, positions) = dimer_box();
    let integrator = LangevinIntegrator::new(300.0, 1.0, 0.002);
    let props = PlatformProperties::default();

    let mut reference = ReferencePlatform.create_context(&system, integrator, &props).unwrap();
    let mut cpu = CpuPlatform.create_context(&system, integrator, &props).unwrap();
    reference.set_positions(&positions).unwrap();
    cpu.set_positions(&positions).unwrap();

    let e_ref = reference.state().unwrap().potential_energy;
    let e_cpu = cpu.state().unwrap().potential_energy;
    assert_eq!(e_ref, e_cpu);
    assert!(!cpu.property_values().is_empty());
}

#[test]
fn test_npt_run_moves_box_and_stays_finite() {
    env_logger::builder().is_test(true).try_init().ok();

    let (mut system, positions) = dimer_box();
    system.add_force(Force::MonteCarloBarostat(MonteCarloBarostat {
        pressure: 1.01325,
        temperature: 300.0,
        frequency: 25,
    }));
    let mut ctx = CpuPlatform
        .create_context(&system, LangevinIntegrator::new(300.0, 1.0, 0.002), &PlatformProperties::default())
        .unwrap();
    ctx.set_positions(&positions).unwrap();
    ctx.minimize(10.0, 200).unwrap();
    ctx.set_velocities_to_temperature(300.0, Some(2024)).unwrap();
    ctx.step(500).unwrap();

    let state = ctx.state().unwrap();
    assert_eq!(state.step, 500);
    assert!(state.potential_energy.is_finite());
    let volume = state.volume().unwrap();
    assert!((volume - 2.4f64.powi(3)).abs() > 1e-12, "20 volume moves should change the box");
}
