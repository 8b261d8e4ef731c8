use std::path::{Path, PathBuf};

use crate::error::VmError;

/// Creates a VM's writable disk on top of its base image.
#[allow(async_fn_in_trait)] // no Send bound needed, everything runs on the caller's task
pub trait DiskAllocator {
    async fn allocate(&self, base_image: &Path, disk_path: &Path, size: &str)
    -> Result<(), VmError>;
}

/// `qemu-img create -f qcow2 -F qcow2 -b <base> <disk> <size>`
#[derive(Debug, Clone)]
pub struct QemuImg {
    binary: PathBuf,
}

impl QemuImg {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for QemuImg {
    fn default() -> Self {
        Self::new("qemu-img")
    }
}

impl DiskAllocator for QemuImg {
    async fn allocate(
        &self,
        base_image: &Path,
        disk_path: &Path,
        size: &str,
    ) -> Result<(), VmError> {
        if let Some(parent) = disk_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                VmError::io(format!("creating directory {}", parent.display()), e)
            })?;
        }

        let output = tokio::process::Command::new(&self.binary)
            .args(["create", "-f", "qcow2", "-F", "qcow2", "-b"])
            .arg(base_image)
            .arg(disk_path)
            .arg(size)
            .output()
            .await
            .map_err(|e| VmError::io(format!("running {}", self.binary.display()), e))?;

        if !output.status.success() {
            let _ = tokio::fs::remove_file(disk_path).await;
            return Err(VmError::ExternalCommand {
                command: "qemu-img create".into(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        tracing::info!(path = %disk_path.display(), size, "created qcow2 disk");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_binary_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let tool = QemuImg::new(dir.path().join("no-such-qemu-img"));
        let err = tool
            .allocate(&dir.path().join("base.img"), &dir.path().join("disk.qcow2"), "1G")
            .await
            .unwrap_err();
        assert!(matches!(err, VmError::Io { .. }));
    }

    #[tokio::test]
    async fn failing_tool_reports_stderr() {
        let dir = tempfile::tempdir().unwrap();
        // `false` ignores its arguments and exits 1.
        let tool = QemuImg::new("false");
        let err = tool
            .allocate(&dir.path().join("base.img"), &dir.path().join("disk.qcow2"), "1G")
            .await
            .unwrap_err();
        assert!(matches!(err, VmError::ExternalCommand { .. }));
        assert!(!dir.path().join("disk.qcow2").exists());
    }
}
