//! Process table read from procfs

use standby_host_api::{HostError, HostResult, ProcessDirectory};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

const PROC_ROOT: &str = "/proc";

/// `ProcessDirectory` over `/proc/<pid>/cmdline`, falling back to `comm`
/// for processes without a command line (kernel threads)
#[derive(Debug, Clone)]
pub struct ProcFsDirectory {
    root: PathBuf,
}

impl ProcFsDirectory {
    pub fn new() -> Self {
        Self::with_root(PROC_ROOT)
    }

    /// Read a procfs-shaped tree somewhere else
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Default for ProcFsDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessDirectory for ProcFsDirectory {
    fn running_processes(&self) -> HostResult<HashMap<i32, String>> {
        let entries = fs::read_dir(&self.root).map_err(|e| {
            HostError::ProcessDirectory(format!("{}: {}", self.root.display(), e))
        })?;

        let mut processes = HashMap::new();
        for entry in entries.flatten() {
            let Some(pid) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<i32>().ok())
            else {
                continue;
            };
            // processes can exit while we walk the table
            match process_name(&entry.path()) {
                Some(name) => {
                    processes.insert(pid, name);
                }
                None => trace!(pid, "Process vanished or has no name"),
            }
        }

        debug!(count = processes.len(), "Read process table");
        Ok(processes)
    }
}

fn process_name(dir: &Path) -> Option<String> {
    let from_cmdline = fs::read(dir.join("cmdline")).ok().and_then(|raw| {
        let argv0 = raw.split(|b| *b == 0).next()?;
        let argv0 = String::from_utf8_lossy(argv0);
        let name = argv0.rsplit('/').next()?.trim();
        (!name.is_empty()).then(|| name.to_string())
    });
    from_cmdline.or_else(|| {
        let comm = fs::read_to_string(dir.join("comm")).ok()?;
        let comm = comm.trim();
        (!comm.is_empty()).then(|| comm.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_process(root: &Path, pid: &str, cmdline: &[u8], comm: &str) {
        let dir = root.join(pid);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("cmdline"), cmdline).unwrap();
        fs::write(dir.join("comm"), comm).unwrap();
    }

    #[test]
    fn test_reads_fake_proc() {
        let root = tempfile::tempdir().unwrap();
        fake_process(root.path(), "42", b"/usr/bin/syncd\0--daemon\0", "syncd\n");
        fake_process(root.path(), "7", b"", "kworker/0:1\n");
        fs::create_dir_all(root.path().join("self")).unwrap();

        let processes = ProcFsDirectory::with_root(root.path()).running_processes().unwrap();
        assert_eq!(processes.len(), 2);
        assert_eq!(processes[&42], "syncd");
        assert_eq!(processes[&7], "kworker/0:1");
    }

    #[test]
    fn test_missing_root() {
        let result = ProcFsDirectory::with_root("/nonexistent/proc").running_processes();
        assert!(matches!(result, Err(HostError::ProcessDirectory(_))));
    }
}
