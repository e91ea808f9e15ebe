//! Resource Guard: temporary swap for memory-constrained builds.
//!
//! Policy:
//! - enough memory → nothing to do;
//! - swap already active at the configured path → reuse it, never remove it;
//! - an inactive swap file at the path → `swapon` it for the build and
//!   `swapoff` it afterwards, never delete it; if it will not activate, build
//!   without swap and leave the file alone;
//! - otherwise allocate with `fallocate`, falling back to `dd`, then
//!   `mkswap` + `swapon`, and tear it down again in `release`.
//!
//! Allocation problems are logged and the build proceeds without swap; the
//! deploy outcome never depends on the guard.

use std::path::{Path, PathBuf};

use launchpad_core::SwapResource;

use crate::error::{io_err, GuardError};
use crate::meminfo::HostMemory;
use crate::runner::{CommandRunner, CommandSpec};

/// Acquire/release pair for build capacity.
pub trait CapacityGuard {
    /// Make sure the build has enough memory; returns the swap in use, if any.
    fn ensure_build_capacity(&mut self, min_memory_mb: u64, swap_size_bytes: u64)
        -> Option<SwapResource>;

    /// Tear down `resource` if this run created it. Failures are logged.
    fn release_build_capacity(&mut self, resource: &SwapResource);
}

/// Swap-file implementation of [`CapacityGuard`].
pub struct SwapGuard<'a> {
    runner: &'a dyn CommandRunner,
    host: &'a dyn HostMemory,
    path: PathBuf,
    held: Option<SwapResource>,
}

impl<'a> SwapGuard<'a> {
    pub fn new(runner: &'a dyn CommandRunner, host: &'a dyn HostMemory, path: &Path) -> Self {
        Self {
            runner,
            host,
            path: path.to_path_buf(),
            held: None,
        }
    }

    fn allocate(&self, size_bytes: u64) -> Result<(), GuardError> {
        let path = self.path.display().to_string();
        let fast = CommandSpec::new("fallocate")
            .arg("-l")
            .arg(size_bytes.to_string())
            .arg(&path);
        if let Err(err) = self.runner.run(&fast) {
            tracing::warn!(error = %err, "fallocate failed, falling back to dd");
            remove_file_if_present(&self.path)?;
            let mib = size_bytes.div_ceil(1024 * 1024);
            let slow = CommandSpec::new("dd").args([
                "if=/dev/zero".to_string(),
                format!("of={path}"),
                "bs=1M".to_string(),
                format!("count={mib}"),
            ]);
            self.runner.run(&slow)?;
        }

        restrict_permissions(&self.path)?;
        self.runner.run(&CommandSpec::new("mkswap").arg(&path))?;
        self.runner.run(&CommandSpec::new("swapon").arg(&path))?;
        Ok(())
    }
}

impl SwapGuard<'_> {
    fn activate_existing(&mut self) -> Option<SwapResource> {
        let path = self.path.display().to_string();
        if let Err(err) = self.runner.run(&CommandSpec::new("swapon").arg(&path)) {
            tracing::warn!(error = %err, path = %path, "existing swap file will not activate; building without swap");
            return None;
        }
        tracing::info!(path = %path, "existing swap file activated for the build");
        let borrowed = SwapResource {
            path: self.path.clone(),
            size_bytes: existing_size(&self.path),
            created_by_this_run: false,
            activated_by_this_run: true,
        };
        self.held = Some(borrowed.clone());
        Some(borrowed)
    }
}

impl CapacityGuard for SwapGuard<'_> {
    fn ensure_build_capacity(
        &mut self,
        min_memory_mb: u64,
        swap_size_bytes: u64,
    ) -> Option<SwapResource> {
        if let Some(held) = &self.held {
            return Some(held.clone());
        }

        let total_mb = match self.host.total_memory_mb() {
            Ok(mb) => mb,
            Err(err) => {
                tracing::warn!(error = %err, "cannot read host memory; building without swap");
                return None;
            }
        };
        if total_mb >= min_memory_mb {
            tracing::debug!(total_mb, min_memory_mb, "host memory sufficient, no swap needed");
            return None;
        }

        match self.host.active_swaps() {
            Ok(swaps) if swaps.iter().any(|s| s == &self.path) => {
                tracing::info!(path = %self.path.display(), "reusing existing swap");
                let existing = SwapResource {
                    path: self.path.clone(),
                    size_bytes: existing_size(&self.path),
                    created_by_this_run: false,
                    activated_by_this_run: false,
                };
                self.held = Some(existing.clone());
                return Some(existing);
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(error = %err, "cannot list active swap; building without swap");
                return None;
            }
        }

        // Someone else's file, currently switched off. Borrow it, never replace it.
        if self.path.exists() {
            return self.activate_existing();
        }

        match self.allocate(swap_size_bytes) {
            Ok(()) => {
                tracing::info!(
                    path = %self.path.display(),
                    size_bytes = swap_size_bytes,
                    total_mb,
                    "temporary swap enabled"
                );
                let created = SwapResource {
                    path: self.path.clone(),
                    size_bytes: swap_size_bytes,
                    created_by_this_run: true,
                    activated_by_this_run: true,
                };
                self.held = Some(created.clone());
                Some(created)
            }
            Err(err) => {
                tracing::warn!(error = %err, "swap allocation failed; building without swap");
                if let Err(err) = remove_file_if_present(&self.path) {
                    tracing::warn!(error = %err, "failed to remove partial swap file");
                }
                None
            }
        }
    }

    fn release_build_capacity(&mut self, resource: &SwapResource) {
        if self.held.as_ref() == Some(resource) {
            self.held = None;
        }
        if !resource.activated_by_this_run && !resource.created_by_this_run {
            tracing::debug!(path = %resource.path.display(), "leaving pre-existing swap in place");
            return;
        }

        let path = resource.path.display().to_string();
        if let Err(err) = self.runner.run(&CommandSpec::new("swapoff").arg(&path)) {
            tracing::warn!(error = %err, path = %path, "swapoff failed");
        }
        if !resource.created_by_this_run {
            tracing::info!(path = %path, "pre-existing swap file switched off again");
            return;
        }
        match remove_file_if_present(&resource.path) {
            Ok(()) => tracing::info!(path = %path, "temporary swap removed"),
            Err(err) => tracing::warn!(error = %err, path = %path, "failed to delete swap file"),
        }
    }
}

fn existing_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

fn remove_file_if_present(path: &Path) -> Result<(), GuardError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_err(path, e)),
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<(), GuardError> {
    use std::os::unix::fs::PermissionsExt;
    if !path.exists() {
        return Ok(());
    }
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<(), GuardError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meminfo::ProcHost;
    use crate::testing::ScriptedRunner;
    use tempfile::TempDir;

    const GIB: u64 = 1024 * 1024 * 1024;

    struct Host {
        proc_root: TempDir,
        swap_path: PathBuf,
    }

    fn host(total_kb: u64, swap_active: bool) -> Host {
        let proc_root = TempDir::new().expect("tempdir");
        let swap_path = proc_root.path().join("swapfile");
        std::fs::write(
            proc_root.path().join("meminfo"),
            format!("MemTotal: {total_kb} kB\n"),
        )
        .expect("meminfo");
        let mut swaps = "Filename Type Size Used Priority\n".to_string();
        if swap_active {
            swaps.push_str(&format!("{} file 2097148 0 -2\n", swap_path.display()));
            std::fs::write(&swap_path, b"existing swap").expect("swapfile");
        }
        std::fs::write(proc_root.path().join("swaps"), swaps).expect("swaps");
        Host {
            proc_root,
            swap_path,
        }
    }

    #[test]
    fn enough_memory_needs_nothing() {
        let h = host(4 * 1024 * 1024, false);
        let runner = ScriptedRunner::new();
        let proc_host = ProcHost::at(h.proc_root.path());
        let mut guard = SwapGuard::new(&runner, &proc_host, &h.swap_path);

        assert_eq!(guard.ensure_build_capacity(2048, 2 * GIB), None);
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn low_memory_allocates_and_release_removes() {
        let h = host(1024 * 1024, false);
        let runner = ScriptedRunner::new();
        let proc_host = ProcHost::at(h.proc_root.path());
        let mut guard = SwapGuard::new(&runner, &proc_host, &h.swap_path);

        let swap = guard.ensure_build_capacity(2048, 2 * GIB).expect("swap");
        assert!(swap.created_by_this_run);
        assert_eq!(swap.size_bytes, 2 * GIB);
        assert_eq!(runner.count("fallocate -l 2147483648"), 1);
        assert_eq!(runner.count("mkswap"), 1);
        assert_eq!(runner.count("swapon"), 1);
        assert_eq!(runner.count("dd "), 0);

        guard.release_build_capacity(&swap);
        assert_eq!(runner.count("swapoff"), 1);
        assert!(!h.swap_path.exists());
    }

    #[test]
    fn fallocate_failure_falls_back_to_dd() {
        let h = host(1024 * 1024, false);
        let runner = ScriptedRunner::new().fail_when("fallocate");
        let proc_host = ProcHost::at(h.proc_root.path());
        let mut guard = SwapGuard::new(&runner, &proc_host, &h.swap_path);

        let swap = guard.ensure_build_capacity(2048, 2 * GIB).expect("swap");
        assert!(swap.created_by_this_run);
        assert_eq!(runner.count("dd if=/dev/zero"), 1);
        assert_eq!(runner.count("count=2048"), 1);
    }

    #[test]
    fn both_allocations_failing_yields_no_swap() {
        let h = host(1024 * 1024, false);
        let runner = ScriptedRunner::new().fail_when("fallocate").fail_when("dd ");
        let proc_host = ProcHost::at(h.proc_root.path());
        let mut guard = SwapGuard::new(&runner, &proc_host, &h.swap_path);

        assert_eq!(guard.ensure_build_capacity(2048, 2 * GIB), None);
        assert_eq!(runner.count("mkswap"), 0);
        assert!(!h.swap_path.exists());
    }

    #[test]
    fn pre_existing_swap_is_reused_and_never_removed() {
        let h = host(1024 * 1024, true);
        let runner = ScriptedRunner::new();
        let proc_host = ProcHost::at(h.proc_root.path());
        let mut guard = SwapGuard::new(&runner, &proc_host, &h.swap_path);

        let swap = guard.ensure_build_capacity(2048, 2 * GIB).expect("swap");
        assert!(!swap.created_by_this_run);
        guard.release_build_capacity(&swap);

        assert!(runner.calls().is_empty(), "no allocation and no swapoff");
        assert_eq!(std::fs::read(&h.swap_path).expect("still there"), b"existing swap");
    }

    #[test]
    fn ensure_twice_does_not_double_allocate() {
        let h = host(1024 * 1024, false);
        let runner = ScriptedRunner::new();
        let proc_host = ProcHost::at(h.proc_root.path());
        let mut guard = SwapGuard::new(&runner, &proc_host, &h.swap_path);

        let first = guard.ensure_build_capacity(2048, 2 * GIB).expect("first");
        let second = guard.ensure_build_capacity(2048, 2 * GIB).expect("second");
        assert_eq!(first, second);
        assert_eq!(runner.count("swapon"), 1);

        guard.release_build_capacity(&first);
        guard.release_build_capacity(&first);
        assert!(!h.swap_path.exists());
    }

    #[test]
    fn inactive_operator_swap_is_borrowed_and_survives() {
        let h = host(1024 * 1024, false);
        std::fs::write(&h.swap_path, b"operator swap").expect("inactive file");
        let runner = ScriptedRunner::new();
        let proc_host = ProcHost::at(h.proc_root.path());
        let mut guard = SwapGuard::new(&runner, &proc_host, &h.swap_path);

        let swap = guard.ensure_build_capacity(2048, 2 * GIB).expect("swap");
        assert!(!swap.created_by_this_run);
        assert!(swap.activated_by_this_run);
        guard.release_build_capacity(&swap);

        assert_eq!(runner.count("fallocate"), 0);
        assert_eq!(runner.count("mkswap"), 0);
        assert_eq!(runner.count("swapon"), 1);
        assert_eq!(runner.count("swapoff"), 1);
        assert_eq!(std::fs::read(&h.swap_path).expect("still there"), b"operator swap");
    }

    #[test]
    fn inactive_file_that_will_not_activate_is_left_alone() {
        let h = host(1024 * 1024, false);
        std::fs::write(&h.swap_path, b"not a swap area").expect("file");
        let runner = ScriptedRunner::new().fail_when("swapon");
        let proc_host = ProcHost::at(h.proc_root.path());
        let mut guard = SwapGuard::new(&runner, &proc_host, &h.swap_path);

        assert_eq!(guard.ensure_build_capacity(2048, 2 * GIB), None);
        assert_eq!(runner.count("fallocate"), 0);
        assert_eq!(std::fs::read(&h.swap_path).expect("still there"), b"not a swap area");
    }

    #[test]
    fn swapon_failure_cleans_up_the_file() {
        let h = host(1024 * 1024, false);
        let runner = ScriptedRunner::new().fail_when("swapon");
        let proc_host = ProcHost::at(h.proc_root.path());
        let mut guard = SwapGuard::new(&runner, &proc_host, &h.swap_path);

        assert_eq!(guard.ensure_build_capacity(2048, 2 * GIB), None);
        assert!(!h.swap_path.exists());
    }
}
