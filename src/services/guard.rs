//! Pre-flight checks run before any work starts.
//!
//! The disk check is advisory: space is not reserved, so a job may still run
//! out of room between the check and its writes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use sysinfo::Disks;

use crate::error::PipelineError;
use crate::services::tools::MediaTools;

/// Capacity of the volume holding a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskUsage {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

impl DiskUsage {
    pub fn used_percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        let used = self.total_bytes.saturating_sub(self.available_bytes);
        used as f64 / self.total_bytes as f64 * 100.0
    }
}

pub trait SystemProbe: Send + Sync {
    /// `None` when the volume cannot be determined.
    fn disk_usage(&self, path: &Path) -> Option<DiskUsage>;
}

/// Reads mounted volumes through sysinfo.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostProbe;

impl SystemProbe for HostProbe {
    fn disk_usage(&self, path: &Path) -> Option<DiskUsage> {
        let path = existing_ancestor(path);
        let path_str = path.to_string_lossy();
        let disks = Disks::new_with_refreshed_list();

        // Longest matching mount point is the most specific volume.
        let mut best: Option<(&sysinfo::Disk, usize)> = None;
        for disk in disks.list() {
            let mount_point = disk.mount_point().to_string_lossy();
            if path_str.starts_with(mount_point.as_ref()) {
                let len = mount_point.len();
                if best.map_or(true, |(_, best_len)| len > best_len) {
                    best = Some((disk, len));
                }
            }
        }

        best.map(|(disk, _)| DiskUsage {
            total_bytes: disk.total_space(),
            available_bytes: disk.available_space(),
        })
    }
}

/// Output directories may not exist yet; measure the nearest parent that does.
fn existing_ancestor(path: &Path) -> PathBuf {
    let mut current = Some(path);
    while let Some(p) = current {
        if let Ok(canonical) = p.canonicalize() {
            return canonical;
        }
        current = p.parent();
    }
    path.to_path_buf()
}

pub struct Guard {
    probe: Arc<dyn SystemProbe>,
    tools: Arc<dyn MediaTools>,
    min_free_bytes: u64,
}

impl Guard {
    pub fn new(probe: Arc<dyn SystemProbe>, tools: Arc<dyn MediaTools>, min_free_bytes: u64) -> Self {
        Self {
            probe,
            tools,
            min_free_bytes,
        }
    }

    /// Fails when free space under `path` is below the configured minimum.
    /// An undeterminable volume passes with a warning.
    pub fn check_disk_space(&self, path: &Path) -> Result<(), PipelineError> {
        match self.probe.disk_usage(path) {
            Some(usage) if usage.available_bytes < self.min_free_bytes => {
                log::error!(
                    "Insufficient disk space at {}: {} bytes free, {} required",
                    path.display(),
                    usage.available_bytes,
                    self.min_free_bytes
                );
                Err(PipelineError::InsufficientDiskSpace {
                    available: usage.available_bytes,
                    required: self.min_free_bytes,
                })
            }
            Some(usage) => {
                log::debug!(
                    "Disk space OK at {}: {}MB free",
                    path.display(),
                    usage.available_bytes / (1024 * 1024)
                );
                Ok(())
            }
            None => {
                log::warn!("Could not determine disk space for {}", path.display());
                Ok(())
            }
        }
    }

    pub async fn check_tools(&self) -> Result<(), PipelineError> {
        if self.tools.is_available().await {
            Ok(())
        } else {
            Err(PipelineError::ToolUnavailable("ffmpeg".to_string()))
        }
    }

    pub async fn preflight(&self, path: &Path) -> Result<(), PipelineError> {
        self.check_disk_space(path)?;
        self.check_tools().await
    }

    pub fn disk_usage_percent(&self, path: &Path) -> f64 {
        self.probe
            .disk_usage(path)
            .map(|u| u.used_percent())
            .unwrap_or(0.0)
    }

    pub async fn tools_available(&self) -> bool {
        self.tools.is_available().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FakeTools, FixedProbe};

    fn guard(usage: Option<DiskUsage>, tools_available: bool) -> Guard {
        let tools = FakeTools::new();
        tools.set_available(tools_available);
        Guard::new(Arc::new(FixedProbe(usage)), Arc::new(tools), 1024 * 1024 * 1024)
    }

    #[test]
    fn used_percent() {
        let usage = DiskUsage {
            total_bytes: 200,
            available_bytes: 50,
        };
        assert_eq!(usage.used_percent(), 75.0);
    }

    #[test]
    fn low_space_is_rejected() {
        let g = guard(
            Some(DiskUsage {
                total_bytes: 10 << 30,
                available_bytes: 512 << 20,
            }),
            true,
        );
        let err = g.check_disk_space(Path::new("/media")).unwrap_err();
        assert!(matches!(err, PipelineError::InsufficientDiskSpace { .. }));
    }

    #[test]
    fn unknown_volume_passes() {
        assert!(guard(None, true).check_disk_space(Path::new("/nowhere")).is_ok());
    }

    #[tokio::test]
    async fn missing_tools_fail_preflight() {
        let g = guard(None, false);
        assert!(matches!(
            g.preflight(Path::new("/media")).await,
            Err(PipelineError::ToolUnavailable(_))
        ));
    }

    #[test]
    fn host_probe_finds_root_volume() {
        let dir = tempfile::tempdir().unwrap();
        if let Some(usage) = HostProbe.disk_usage(dir.path()) {
            assert!(usage.total_bytes >= usage.available_bytes);
        }
    }
}
