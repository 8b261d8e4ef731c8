//! VM lifecycle orchestration.
//!
//! `Absent -> Created -> {Running, Stopped} -> Absent`. Every operation
//! re-reads the config record and the process table, so the CLI holds no
//! state between invocations.

use std::path::PathBuf;

use facet::Facet;

use crate::config::{self, CreateDefaults, Settings, VmConfig};
use crate::disk::{DiskAllocator, QemuImg};
use crate::error::VmError;
use crate::image::{HttpImageSource, ImageSource};
use crate::paths::VmPaths;
use crate::provision::{CreateOptions, Provisioner};
use crate::state;
use crate::store::ConfigStore;
use crate::supervisor::ProcessSupervisor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started(u32),
    /// Nothing launched; the existing hypervisor keeps running.
    AlreadyRunning(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    NotRunning,
}

/// Snapshot of one VM, as shown by `status` and `list --long`.
#[derive(Debug, Clone, PartialEq, Facet)]
pub struct VmStatus {
    pub name: String,
    pub state: String,
    pub pid: Option<u32>,
    pub config: VmConfig,
}

pub struct LifecycleManager<S = HttpImageSource, D = QemuImg> {
    store: ConfigStore,
    supervisor: ProcessSupervisor,
    images: S,
    disks: D,
    defaults: CreateDefaults,
}

impl LifecycleManager {
    /// Production wiring: HTTP image fetch, `qemu-img`, and the configured hypervisor.
    pub fn from_settings(settings: &Settings) -> Self {
        let paths = VmPaths::new(settings.vm_dir());
        let supervisor = ProcessSupervisor::new(paths.clone(), &settings.hypervisor)
            .with_stop_timeout(settings.stop_timeout());
        Self::new(
            paths,
            supervisor,
            HttpImageSource,
            QemuImg::new(&settings.qemu_img),
            settings.defaults.clone(),
        )
    }
}

impl<S: ImageSource, D: DiskAllocator> LifecycleManager<S, D> {
    pub fn new(
        paths: VmPaths,
        supervisor: ProcessSupervisor,
        images: S,
        disks: D,
        defaults: CreateDefaults,
    ) -> Self {
        Self {
            store: ConfigStore::new(paths),
            supervisor,
            images,
            disks,
            defaults,
        }
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub fn paths(&self) -> &VmPaths {
        self.store.paths()
    }

    // ── create ──────────────────────────────────────────────

    pub async fn create(
        &self,
        name: &str,
        os_label: &str,
        opts: &CreateOptions,
    ) -> Result<VmConfig, VmError> {
        config::validate_name(name)?;
        if opts.replace
            && let Ok(existing) = self.store.load(name)
            && let Some(pid) = self.supervisor.find(&existing)
        {
            return Err(VmError::VmRunning {
                name: name.to_string(),
                pid,
            });
        }

        Provisioner::new(&self.store, &self.images, &self.disks, &self.defaults)
            .create(name, os_label, opts)
            .await
    }

    // ── start / stop ────────────────────────────────────────

    pub async fn start(&self, name: &str) -> Result<StartOutcome, VmError> {
        config::validate_name(name)?;
        let config = self.store.load(name)?;

        if let Some(pid) = self.supervisor.find(&config) {
            tracing::info!(name, pid, "VM already running");
            return Ok(StartOutcome::AlreadyRunning(pid));
        }

        for (artifact, path) in [
            ("base image", config.base_image_path()),
            ("disk", config.disk_path()),
        ] {
            if !path.exists() {
                return Err(VmError::PartialArtifact {
                    name: name.to_string(),
                    artifact: artifact.to_string(),
                    path: path.display().to_string(),
                });
            }
        }

        let handle = self.supervisor.start(&config).await?;

        let marker = self.paths().booted_marker(name);
        if let Err(e) = std::fs::write(&marker, b"") {
            tracing::warn!(name, path = %marker.display(), error = %e, "failed to write booted marker");
        }

        Ok(StartOutcome::Started(handle.pid))
    }

    pub async fn stop(&self, name: &str) -> Result<StopOutcome, VmError> {
        config::validate_name(name)?;
        let config = self.store.load(name)?;
        if self.supervisor.stop(&config).await? {
            Ok(StopOutcome::Stopped)
        } else {
            tracing::info!(name, "VM is not running");
            Ok(StopOutcome::NotRunning)
        }
    }

    pub fn is_running(&self, name: &str) -> Result<bool, VmError> {
        config::validate_name(name)?;
        let config = self.store.load(name)?;
        Ok(self.supervisor.is_running(&config))
    }

    // ── delete ──────────────────────────────────────────────

    /// Remove the record, then the VM directory. A running VM is refused
    /// unless `force`, which stops it first. A record that does not parse
    /// is still removed; one that names a different VM is not.
    pub async fn delete(&self, name: &str, force: bool) -> Result<(), VmError> {
        config::validate_name(name)?;
        match self.store.load(name) {
            Ok(config) => {
                if let Some(pid) = self.supervisor.find(&config) {
                    if !force {
                        return Err(VmError::VmRunning {
                            name: name.to_string(),
                            pid,
                        });
                    }
                    tracing::info!(name, pid, "stopping VM before delete");
                    self.supervisor.stop(&config).await?;
                }
            }
            // An unreadable record must still be removable.
            Err(VmError::ConfigParse { path, message }) => {
                tracing::warn!(name, path = %path, message = %message, "deleting VM with unreadable config");
            }
            Err(e) => return Err(e),
        }

        self.store.delete(name)?;

        let vm_dir = self.paths().vm_dir(name);
        match std::fs::remove_dir_all(&vm_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(VmError::io(format!("removing {}", vm_dir.display()), e)),
        }

        tracing::info!(name, "VM deleted");
        Ok(())
    }

    // ── queries ─────────────────────────────────────────────

    pub fn list(&self) -> Result<Vec<String>, VmError> {
        self.store.list()
    }

    pub fn status(&self, name: &str) -> Result<VmStatus, VmError> {
        config::validate_name(name)?;
        let config = self.store.load(name)?;
        let (state, pid) = state::detect_state(self.paths(), &self.supervisor, &config);
        Ok(VmStatus {
            name: name.to_string(),
            state: state.as_str().to_string(),
            pid,
            config,
        })
    }

    /// Status of every VM. Records that fail to load are logged and skipped.
    pub fn list_status(&self) -> Result<Vec<VmStatus>, VmError> {
        let mut out = Vec::new();
        for name in self.store.list()? {
            match self.status(&name) {
                Ok(status) => out.push(status),
                Err(e) => tracing::warn!(name, error = %e, "skipping unreadable VM"),
            }
        }
        Ok(out)
    }

    /// Path of the hypervisor log for an existing VM.
    pub fn log_path(&self, name: &str) -> Result<PathBuf, VmError> {
        config::validate_name(name)?;
        if !self.store.exists(name) {
            return Err(VmError::NotFound {
                name: name.to_string(),
            });
        }
        Ok(self.paths().hypervisor_log_path(name))
    }
}
