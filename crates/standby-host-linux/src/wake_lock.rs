//! Kernel wake lock through sysfs

use standby_host_api::{HostError, HostResult, WakeLock};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const SYSFS_POWER: &str = "/sys/power";
pub const WAKE_LOCK_NAME: &str = "standbyd";

/// Writes the lock name to `wake_lock` / `wake_unlock`
#[derive(Debug, Clone)]
pub struct SysfsWakeLock {
    name: String,
    lock_path: PathBuf,
    unlock_path: PathBuf,
}

impl SysfsWakeLock {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_power_dir(SYSFS_POWER, name)
    }

    pub fn with_power_dir(dir: impl AsRef<Path>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lock_path: dir.as_ref().join("wake_lock"),
            unlock_path: dir.as_ref().join("wake_unlock"),
        }
    }

    /// Whether the kernel exposes the wake lock interface
    pub fn is_supported(&self) -> bool {
        self.lock_path.exists() && self.unlock_path.exists()
    }

    fn write(&self, path: &Path) -> HostResult<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(|e| HostError::WakeLock(format!("{}: {}", path.display(), e)))?;
        file.write_all(self.name.as_bytes())?;
        Ok(())
    }
}

impl WakeLock for SysfsWakeLock {
    fn acquire(&self) -> HostResult<()> {
        self.write(&self.lock_path)?;
        debug!(name = %self.name, "Wake lock acquired");
        Ok(())
    }

    fn release(&self) -> HostResult<()> {
        self.write(&self.unlock_path)?;
        debug!(name = %self.name, "Wake lock released");
        Ok(())
    }
}

/// Stand-in for systems without autosleep wake locks
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopWakeLock;

impl WakeLock for NoopWakeLock {
    fn acquire(&self) -> HostResult<()> {
        Ok(())
    }

    fn release(&self) -> HostResult<()> {
        Ok(())
    }
}

/// The sysfs wake lock when the kernel supports it, a no-op otherwise
pub fn detect_wake_lock() -> Box<dyn WakeLock> {
    let lock = SysfsWakeLock::new(WAKE_LOCK_NAME);
    if lock.is_supported() {
        info!("Using sysfs wake lock");
        Box::new(lock)
    } else {
        info!("Kernel wake locks unavailable, transitions run without one");
        Box::new(NoopWakeLock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_writes_lock_name() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("wake_lock"), "").unwrap();
        fs::write(dir.path().join("wake_unlock"), "").unwrap();

        let lock = SysfsWakeLock::with_power_dir(dir.path(), "standbyd-test");
        assert!(lock.is_supported());
        lock.acquire().unwrap();
        lock.release().unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("wake_lock")).unwrap(), "standbyd-test");
        assert_eq!(fs::read_to_string(dir.path().join("wake_unlock")).unwrap(), "standbyd-test");
    }

    #[test]
    fn test_unsupported_dir() {
        let dir = tempfile::tempdir().unwrap();
        let lock = SysfsWakeLock::with_power_dir(dir.path(), "standbyd");
        assert!(!lock.is_supported());
        assert!(matches!(lock.acquire(), Err(HostError::WakeLock(_))));
    }
}
