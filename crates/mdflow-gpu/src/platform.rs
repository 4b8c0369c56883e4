//! Compute back-end registry and platform/precision negotiation.
//!
//! `Auto` walks [`BackendKind::FALLBACK_ORDER`] and takes the first back-end
//! that instantiates; on a GPU-class back-end it then walks
//! [`Precision::AUTO_ORDER`]. An explicit preference never falls back.

use mdflow_core::{BackendKind, MdError, Platform, PlatformPreference, PlatformProperties, Precision, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// At most one platform per back-end kind.
#[derive(Clone, Default)]
pub struct PlatformRegistry {
    platforms: BTreeMap<BackendKind, Arc<dyn Platform>>,
}

impl PlatformRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_platforms<I>(platforms: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn Platform>>,
    {
        let mut registry = Self::empty();
        for p in platforms {
            registry.register(p);
        }
        registry
    }

    /// Registers `platform`, replacing any previous one of the same kind.
    pub fn register(&mut self, platform: Arc<dyn Platform>) -> Option<Arc<dyn Platform>> {
        let kind = platform.kind();
        let previous = self.platforms.insert(kind, platform);
        if previous.is_some() {
            log::debug!("Replaced {} platform registration", kind);
        }
        previous
    }

    pub fn get(&self, kind: BackendKind) -> Option<&Arc<dyn Platform>> {
        self.platforms.get(&kind)
    }

    pub fn kinds(&self) -> Vec<BackendKind> {
        self.platforms.keys().copied().collect()
    }

    /// Looks up and instantiates `kind`.
    pub fn instantiate(&self, kind: BackendKind) -> Result<Arc<dyn Platform>> {
        let platform = self
            .get(kind)
            .ok_or_else(|| MdError::unsupported_platform(kind.name(), "not registered"))?;
        platform.instantiate()?;
        Ok(Arc::clone(platform))
    }

    /// Whether each back-end instantiates, in fallback order.
    pub fn availability(&self) -> Vec<(BackendKind, Result<()>)> {
        BackendKind::FALLBACK_ORDER
            .iter()
            .map(|&kind| (kind, self.instantiate(kind).map(|_| ())))
            .collect()
    }
}

impl fmt::Debug for PlatformRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformRegistry")
            .field("platforms", &self.kinds())
            .finish()
    }
}

/// Resolved back-end for one job.
#[derive(Clone)]
pub struct PlatformChoice {
    pub platform: Arc<dyn Platform>,
    /// Only set on GPU-class back-ends.
    pub precision: Option<Precision>,
    pub device_index: Option<String>,
}

impl PlatformChoice {
    pub fn backend(&self) -> BackendKind {
        self.platform.kind()
    }

    pub fn properties(&self) -> PlatformProperties {
        PlatformProperties {
            precision: self.precision,
            device_index: self.device_index.clone(),
        }
    }
}

impl fmt::Debug for PlatformChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformChoice")
            .field("backend", &self.backend())
            .field("precision", &self.precision)
            .field("device_index", &self.device_index)
            .finish()
    }
}

/// Resolves `preference` against `registry`.
///
/// `requested_precision` applies to an explicit GPU preference only; `Auto`
/// negotiates its own. `leased_device` pins GPU execution to the device the
/// arbiter handed out.
pub fn negotiate(
    registry: &PlatformRegistry,
    preference: PlatformPreference,
    requested_precision: Precision,
    leased_device: Option<&str>,
) -> Result<PlatformChoice> {
    let device = leased_device.map(str::to_string);
    match preference {
        PlatformPreference::Backend(kind) => {
            let platform = registry.instantiate(kind).map_err(|e| match e {
                MdError::UnsupportedPlatform { .. } => e,
                other => MdError::unsupported_platform(kind.name(), other.to_string()),
            })?;
            if !kind.is_gpu() {
                return Ok(PlatformChoice {
                    platform,
                    precision: None,
                    device_index: None,
                });
            }
            let props = PlatformProperties::default()
                .with_precision(requested_precision)
                .with_device(device.clone());
            platform
                .check_properties(&props)
                .map_err(|_| MdError::precision(kind.name(), requested_precision.name()))?;
            Ok(PlatformChoice {
                platform,
                precision: Some(requested_precision),
                device_index: device,
            })
        }
        PlatformPreference::Auto => {
            let (kind, platform) = first_available(registry)?;
            if !kind.is_gpu() {
                return Ok(PlatformChoice {
                    platform,
                    precision: None,
                    device_index: None,
                });
            }
            for precision in Precision::AUTO_ORDER {
                let props = PlatformProperties::default()
                    .with_precision(precision)
                    .with_device(device.clone());
                match platform.check_properties(&props) {
                    Ok(()) => {
                        return Ok(PlatformChoice {
                            platform,
                            precision: Some(precision),
                            device_index: device,
                        })
                    }
                    Err(e) => log::debug!("{} rejected {} precision: {}", kind, precision, e),
                }
            }
            Err(MdError::precision(kind.name(), "any"))
        }
    }
}

fn first_available(registry: &PlatformRegistry) -> Result<(BackendKind, Arc<dyn Platform>)> {
    let mut last_error = String::from("no platforms registered");
    for kind in BackendKind::FALLBACK_ORDER {
        match registry.instantiate(kind) {
            Ok(platform) => {
                log::debug!("Auto platform selection picked {}", kind);
                return Ok((kind, platform));
            }
            Err(e) => {
                log::debug!("{} unavailable: {}", kind, e);
                last_error = e.to_string();
            }
        }
    }
    Err(MdError::NoPlatform(last_error))
}
