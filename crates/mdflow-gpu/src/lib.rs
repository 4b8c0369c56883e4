//! # mdflow-gpu
//!
//! Device-facing side of a stage run: decides whether this host needs
//! cross-process device arbitration, hands out exclusive device leases,
//! and resolves a platform preference into a concrete back-end.

pub mod device_lock;
pub mod environment;
pub mod platform;

pub use device_lock::{DeviceArbiter, DeviceLease, LeaseRequest, LockSettings};
pub use environment::ExecutionEnvironment;
pub use platform::{negotiate, PlatformChoice, PlatformRegistry};
