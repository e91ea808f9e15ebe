//! Host memory and swap inspection via procfs.

use std::path::{Path, PathBuf};

use crate::error::{io_err, GuardError};

/// What the Resource Guard needs to know about the host.
pub trait HostMemory {
    /// Total physical memory in MiB.
    fn total_memory_mb(&self) -> Result<u64, GuardError>;
    /// Paths of currently active swap areas.
    fn active_swaps(&self) -> Result<Vec<PathBuf>, GuardError>;
}

/// Reads `meminfo` and `swaps` under a procfs root (normally `/proc`).
#[derive(Debug, Clone)]
pub struct ProcHost {
    root: PathBuf,
}

impl ProcHost {
    pub fn new() -> Self {
        Self::at("/proc")
    }

    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Default for ProcHost {
    fn default() -> Self {
        Self::new()
    }
}

impl HostMemory for ProcHost {
    fn total_memory_mb(&self) -> Result<u64, GuardError> {
        let path = self.root.join("meminfo");
        let contents = read(&path)?;
        parse_mem_total_kb(&contents)
            .map(|kb| kb / 1024)
            .ok_or(GuardError::Unparseable {
                what: "MemTotal",
                path,
            })
    }

    fn active_swaps(&self) -> Result<Vec<PathBuf>, GuardError> {
        let path = self.root.join("swaps");
        match std::fs::read_to_string(&path) {
            Ok(contents) => Ok(parse_swaps(&contents)),
            // Kernels without swap support have no /proc/swaps.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(vec![]),
            Err(e) => Err(io_err(path, e)),
        }
    }
}

fn read(path: &Path) -> Result<String, GuardError> {
    std::fs::read_to_string(path).map_err(|e| io_err(path, e))
}

/// `MemTotal:       16318412 kB` → `16318412`.
pub fn parse_mem_total_kb(meminfo: &str) -> Option<u64> {
    meminfo.lines().find_map(|line| {
        let rest = line.strip_prefix("MemTotal:")?;
        rest.split_whitespace().next()?.parse().ok()
    })
}

/// Filenames from `/proc/swaps`, skipping the header. The kernel escapes
/// spaces in paths as `\040`.
pub fn parse_swaps(swaps: &str) -> Vec<PathBuf> {
    swaps
        .lines()
        .skip(1)
        .filter_map(|line| line.split_whitespace().next())
        .map(|name| PathBuf::from(name.replace("\\040", " ")))
        .collect()
}
