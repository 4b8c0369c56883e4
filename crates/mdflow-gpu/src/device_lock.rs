//! Cross-process GPU device arbitration.
//!
//! Jobs sharing one host take an exclusive advisory lock (`flock`) on a
//! per-device lock file before touching the device. The first-choice device
//! is `devices[job_id % devices.len()]`; under contention the job sleeps a
//! fixed interval and retries the *same* device until it wins.
//!
//! The kernel releases `flock` locks when the owning process exits, so a job
//! killed by the worker pool's wall-clock timeout never strands its device.
//! Lines appended to the lock file are an audit trail only; nothing reads
//! them back.
//!
//! # Example
//! ```rust,no_run
//! use mdflow_gpu::device_lock::{DeviceArbiter, LeaseRequest, LockSettings};
//!
//! let arbiter = DeviceArbiter::new(vec!["0".into(), "1".into()], LockSettings::default())?;
//! let request = LeaseRequest::new(5, "complex-5");
//! let device = arbiter.run_exclusive(&request, |lease| Ok(lease.device_id().to_string()))?;
//! assert_eq!(device, "1");
//! # Ok::<(), mdflow_core::MdError>(())
//! ```

use mdflow_core::{MdError, Result};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Sleep between attempts on a contended device.
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 100;

/// Hold after a successful body before unlocking, lets the driver tear
/// the context down before the next job grabs the device.
pub const DEFAULT_RELEASE_DELAY_MS: u64 = 2000;

/// Lock-file placement and timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LockSettings {
    /// Directory holding `<device-id>.txt` lock files
    pub lock_dir: PathBuf,
    pub retry_interval_ms: u64,
    pub release_delay_ms: u64,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            lock_dir: PathBuf::from("/tmp"),
            retry_interval_ms: DEFAULT_RETRY_INTERVAL_MS,
            release_delay_ms: DEFAULT_RELEASE_DELAY_MS,
        }
    }
}

impl LockSettings {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn release_delay(&self) -> Duration {
        Duration::from_millis(self.release_delay_ms)
    }
}

/// Who is asking for a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseRequest {
    pub job_id: u64,
    pub system_title: String,
}

impl LeaseRequest {
    pub fn new(job_id: u64, system_title: impl Into<String>) -> Self {
        Self {
            job_id,
            system_title: system_title.into(),
        }
    }
}

/// Exclusive ownership of one device. Dropping the lease unlocks it.
#[derive(Debug)]
pub struct DeviceLease {
    device_id: String,
    lock_path: PathBuf,
    file: Option<File>,
    contention_retries: u64,
}

impl DeviceLease {
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// How many times `acquire` found the device busy before winning.
    pub fn contention_retries(&self) -> u64 {
        self.contention_retries
    }

    /// Unlocks and closes the lock file.
    pub fn release(mut self) -> Result<()> {
        self.unlock()
            .map_err(|e| MdError::lock(&self.device_id, format!("unlock failed: {}", e)))
    }

    fn unlock(&mut self) -> io::Result<()> {
        match self.file.take() {
            Some(file) => {
                let res = unlock_file(&file);
                log::debug!("Released device {} ({})", self.device_id, self.lock_path.display());
                res
            }
            None => Ok(()),
        }
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        if let Err(e) = self.unlock() {
            log::error!("Failed to unlock device {}: {}", self.device_id, e);
        }
    }
}

/// Assigns jobs to a fixed pool of device ids.
#[derive(Debug, Clone)]
pub struct DeviceArbiter {
    devices: Vec<String>,
    settings: LockSettings,
}

impl DeviceArbiter {
    pub fn new(devices: Vec<String>, settings: LockSettings) -> Result<Self> {
        if devices.is_empty() {
            return Err(MdError::config("device arbiter needs at least one device"));
        }
        Ok(Self { devices, settings })
    }

    pub fn devices(&self) -> &[String] {
        &self.devices
    }

    pub fn settings(&self) -> &LockSettings {
        &self.settings
    }

    /// First-choice (and only) device for `job_id`.
    pub fn device_for(&self, job_id: u64) -> &str {
        let idx = (job_id % self.devices.len() as u64) as usize;
        &self.devices[idx]
    }

    pub fn lock_path(&self, device_id: &str) -> PathBuf {
        self.settings.lock_dir.join(format!("{}.txt", device_id))
    }

    /// Blocks until the job's device is free. Contention and permission
    /// errors are retried forever; any other I/O error is fatal.
    pub fn acquire(&self, request: &LeaseRequest) -> Result<DeviceLease> {
        let device = self.device_for(request.job_id).to_string();
        let mut retries = 0u64;
        loop {
            match self.attempt(request, &device, retries)? {
                Some(lease) => {
                    if retries > 0 {
                        log::info!(
                            "Job {} acquired device {} after {} retries",
                            request.job_id,
                            device,
                            retries
                        );
                    }
                    return Ok(lease);
                }
                None => {
                    if retries == 0 {
                        log::info!("Device {} busy, job {} waiting", device, request.job_id);
                    }
                    retries += 1;
                    std::thread::sleep(self.settings.retry_interval());
                }
            }
        }
    }

    /// Single non-blocking attempt.
    pub fn try_acquire(&self, request: &LeaseRequest) -> Result<Option<DeviceLease>> {
        let device = self.device_for(request.job_id).to_string();
        self.attempt(request, &device, 0)
    }

    /// Runs `body` while holding the job's device. The lease is released on
    /// every exit path; a failing body comes back as
    /// [`MdError::SimulationFailed`].
    pub fn run_exclusive<T, F>(&self, request: &LeaseRequest, body: F) -> Result<T>
    where
        F: FnOnce(&DeviceLease) -> Result<T>,
    {
        let job = request.job_id.to_string();
        log::warn!("Local cluster device arbitration in use for job {}", job);

        let lease = self
            .acquire(request)
            .map_err(|e| MdError::simulation_failed(&job, e))?;

        match body(&lease) {
            Ok(value) => {
                let delay = self.settings.release_delay();
                if !delay.is_zero() {
                    std::thread::sleep(delay);
                }
                lease
                    .release()
                    .map_err(|e| MdError::simulation_failed(&job, e))?;
                Ok(value)
            }
            Err(e) => {
                let device = lease.device_id().to_string();
                drop(lease);
                log::error!("Job {} failed on device {}: {}", job, device, e);
                Err(MdError::simulation_failed(job, e))
            }
        }
    }

    fn attempt(
        &self,
        request: &LeaseRequest,
        device: &str,
        retries: u64,
    ) -> Result<Option<DeviceLease>> {
        let path = self.lock_path(device);
        let file = match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                log::debug!("Permission denied opening {}: retrying", path.display());
                return Ok(None);
            }
            Err(e) => {
                return Err(MdError::lock(
                    device,
                    format!("cannot open {}: {}", path.display(), e),
                ))
            }
        };

        match try_lock_file(&file) {
            Ok(true) => {}
            Ok(false) => return Ok(None),
            Err(e) => return Err(MdError::lock(device, format!("flock failed: {}", e))),
        }

        let mut lease = DeviceLease {
            device_id: device.to_string(),
            lock_path: path,
            file: Some(file),
            contention_retries: retries,
        };
        self.write_audit_line(&mut lease, request)?;
        Ok(Some(lease))
    }

    fn write_audit_line(&self, lease: &mut DeviceLease, request: &LeaseRequest) -> Result<()> {
        let line = format!(
            "system={} job={} devices=[{}] device={} pid={} at={}\n",
            request.system_title,
            request.job_id,
            self.devices.join(","),
            lease.device_id,
            std::process::id(),
            chrono::Utc::now().to_rfc3339()
        );
        if let Some(file) = lease.file.as_mut() {
            file.write_all(line.as_bytes())
                .and_then(|_| file.flush())
                .map_err(|e| MdError::lock(&lease.device_id, format!("audit write failed: {}", e)))?;
        }
        Ok(())
    }
}

#[cfg(unix)]
fn try_lock_file(file: &File) -> io::Result<bool> {
    use std::os::unix::io::AsRawFd;

    // SAFETY: the descriptor is owned by `file` and stays open for the call.
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        return Ok(true);
    }
    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(code) if code == libc::EWOULDBLOCK || code == libc::EAGAIN || code == libc::EACCES => {
            Ok(false)
        }
        _ => Err(err),
    }
}

#[cfg(unix)]
fn unlock_file(file: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    // SAFETY: as above.
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn try_lock_file(_file: &File) -> io::Result<bool> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "device locking requires flock",
    ))
}

#[cfg(not(unix))]
fn unlock_file(_file: &File) -> io::Result<()> {
    Ok(())
}
