//! The always-available software back-ends.
//!
//! Both run in double precision on the host; neither takes a precision mode
//! or a device index.

use crate::context::SoftwareContext;
use mdflow_core::{
    BackendKind, ForceFieldSystem, IntegrationContext, LangevinIntegrator, MdError, Platform,
    PlatformProperties, Precision, Result,
};
use std::sync::Arc;

fn check_host_properties(kind: BackendKind, properties: &PlatformProperties) -> Result<()> {
    match properties.precision {
        None | Some(Precision::Double) => {}
        Some(p) => return Err(MdError::precision(kind.name(), p.name())),
    }
    if let Some(device) = &properties.device_index {
        return Err(MdError::config(format!(
            "{} platform does not take a device index (got {})",
            kind, device
        )));
    }
    Ok(())
}

/// Serial evaluation, the last resort of `Auto`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferencePlatform;

impl Platform for ReferencePlatform {
    fn kind(&self) -> BackendKind {
        BackendKind::Reference
    }

    fn instantiate(&self) -> Result<()> {
        Ok(())
    }

    fn check_properties(&self, properties: &PlatformProperties) -> Result<()> {
        check_host_properties(self.kind(), properties)
    }

    fn create_context(
        &self,
        system: &ForceFieldSystem,
        integrator: LangevinIntegrator,
        properties: &PlatformProperties,
    ) -> Result<Box<dyn IntegrationContext>> {
        self.check_properties(properties)?;
        Ok(Box::new(SoftwareContext::new(self.kind(), system, integrator, false)?))
    }
}

/// Non-bonded evaluation spread over the rayon thread pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuPlatform;

impl Platform for CpuPlatform {
    fn kind(&self) -> BackendKind {
        BackendKind::Cpu
    }

    fn instantiate(&self) -> Result<()> {
        if rayon::current_num_threads() == 0 {
            return Err(MdError::unsupported_platform("CPU", "no worker threads"));
        }
        Ok(())
    }

    fn check_properties(&self, properties: &PlatformProperties) -> Result<()> {
        check_host_properties(self.kind(), properties)
    }

    fn create_context(
        &self,
        system: &ForceFieldSystem,
        integrator: LangevinIntegrator,
        properties: &PlatformProperties,
    ) -> Result<Box<dyn IntegrationContext>> {
        self.check_properties(properties)?;
        log::debug!(
            "CPU platform using {} threads for {} particles",
            rayon::current_num_threads(),
            system.particle_count()
        );
        Ok(Box::new(SoftwareContext::new(self.kind(), system, integrator, true)?))
    }
}

/// Back-ends available on every host.
pub fn builtin_platforms() -> Vec<Arc<dyn Platform>> {
    vec![Arc::new(CpuPlatform), Arc::new(ReferencePlatform)]
}
