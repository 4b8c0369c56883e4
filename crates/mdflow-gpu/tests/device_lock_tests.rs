//! Device arbitration integration tests.
//!
//! Threads stand in for worker processes: each `flock` is taken on its own
//! open file description, so two threads conflict exactly like two
//! processes would.

use mdflow_core::MdError;
use mdflow_gpu::device_lock::{DeviceArbiter, LeaseRequest, LockSettings};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn arbiter(dir: &Path, pool: usize) -> DeviceArbiter {
    let settings = LockSettings {
        lock_dir: dir.to_path_buf(),
        retry_interval_ms: 5,
        release_delay_ms: 0,
    };
    let devices = (0..pool).map(|d| d.to_string()).collect();
    DeviceArbiter::new(devices, settings).unwrap()
}

#[test]
fn test_at_most_one_job_per_device() {
    env_logger::builder().is_test(true).try_init().ok();

    let dir = tempfile::tempdir().unwrap();
    let pool = 3;
    let arb = Arc::new(arbiter(dir.path(), pool));
    let active: Arc<Vec<AtomicUsize>> = Arc::new((0..pool).map(|_| AtomicUsize::new(0)).collect());
    let violations = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..12u64)
        .map(|job| {
            let arb = Arc::clone(&arb);
            let active = Arc::clone(&active);
            let violations = Arc::clone(&violations);
            thread::spawn(move || {
                arb.run_exclusive(&LeaseRequest::new(job, format!("sys-{job}")), |lease| {
                    let slot: usize = lease.device_id().parse().unwrap();
                    if active[slot].fetch_add(1, Ordering::SeqCst) != 0 {
                        violations.fetch_add(1, Ordering::SeqCst);
                    }
                    thread::sleep(Duration::from_millis(15));
                    active[slot].fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap().unwrap();
    }
    assert_eq!(violations.load(Ordering::SeqCst), 0);
}

#[test]
fn test_same_device_jobs_wait_instead_of_hopping() {
    env_logger::builder().is_test(true).try_init().ok();

    let dir = tempfile::tempdir().unwrap();
    let arb = Arc::new(arbiter(dir.path(), 2));
    assert_eq!(arb.device_for(0), arb.device_for(2));

    let first = arb.acquire(&LeaseRequest::new(0, "first")).unwrap();
    let acquired = Arc::new(AtomicBool::new(false));

    let waiter = {
        let arb = Arc::clone(&arb);
        let acquired = Arc::clone(&acquired);
        thread::spawn(move || {
            let lease = arb.acquire(&LeaseRequest::new(2, "second")).unwrap();
            acquired.store(true, Ordering::SeqCst);
            (lease.device_id().to_string(), lease.contention_retries())
        })
    };

    thread::sleep(Duration::from_millis(100));
    assert!(!acquired.load(Ordering::SeqCst), "second job must wait for device 0");

    first.release().unwrap();
    let (device, retries) = waiter.join().unwrap();
    assert_eq!(device, "0");
    assert!(retries > 0);
}

#[test]
fn test_lease_released_when_body_panics() {
    let dir = tempfile::tempdir().unwrap();
    let arb = arbiter(dir.path(), 1);

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        arb.run_exclusive(&LeaseRequest::new(0, "boom"), |_| -> mdflow_core::Result<()> {
            panic!("integrator exploded")
        })
    }));
    assert!(outcome.is_err());
    assert!(arb.try_acquire(&LeaseRequest::new(0, "next")).unwrap().is_some());
}

#[test]
fn test_lease_released_when_body_fails() {
    let dir = tempfile::tempdir().unwrap();
    let arb = arbiter(dir.path(), 1);

    let err = arb
        .run_exclusive(&LeaseRequest::new(3, "bad"), |_| -> mdflow_core::Result<()> {
            Err(MdError::config("NPT simulation without box vectors"))
        })
        .unwrap_err();
    assert!(err.user_message().contains("without box vectors"));
    assert!(arb.try_acquire(&LeaseRequest::new(3, "next")).unwrap().is_some());
}

#[cfg(unix)]
#[test]
fn test_unreadable_lock_file_is_retried_until_readable() {
    use std::fs::{self, Permissions};
    use std::os::unix::fs::PermissionsExt;

    env_logger::builder().is_test(true).try_init().ok();

    let dir = tempfile::tempdir().unwrap();
    let arb = arbiter(dir.path(), 1);
    let path = arb.lock_path("0");
    fs::write(&path, "").unwrap();
    fs::set_permissions(&path, Permissions::from_mode(0o000)).unwrap();

    let unlock = {
        let path = path.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(60));
            fs::set_permissions(&path, Permissions::from_mode(0o644)).unwrap();
        })
    };
    let lease = arb.acquire(&LeaseRequest::new(0, "locked-out")).unwrap();
    unlock.join().unwrap();

    assert_eq!(lease.device_id(), "0");
    // file modes do not stop root, whose first open succeeds
    if unsafe { libc::geteuid() } != 0 {
        assert!(lease.contention_retries() > 0);
    }
    lease.release().unwrap();
    assert!(fs::read_to_string(&path).unwrap().contains("system=locked-out job=0"));
}
