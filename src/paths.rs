use std::path::{Path, PathBuf};

/// Default VM root: `~/.local/share/cirrus/vms/`
pub fn default_vm_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("cirrus")
        .join("vms")
}

/// Default global settings file: `~/.config/cirrus/settings.toml`
pub fn default_settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("cirrus")
        .join("settings.toml")
}

/// Deterministic artifact layout under an explicit VM root.
///
/// Every VM gets its own directory `<root>/<name>/`; nothing here touches
/// the filesystem.
#[derive(Debug, Clone)]
pub struct VmPaths {
    root: PathBuf,
}

impl VmPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Per-VM directory: `<root>/<name>/`
    pub fn vm_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Config record: `<root>/<name>/vm.toml`
    pub fn config_path(&self, name: &str) -> PathBuf {
        self.vm_dir(name).join("vm.toml")
    }

    /// Downloaded base image.
    pub fn base_image_path(&self, name: &str) -> PathBuf {
        self.vm_dir(name).join("base.img")
    }

    /// In-flight download target, renamed over `base.img` on success.
    pub fn partial_image_path(&self, name: &str) -> PathBuf {
        self.vm_dir(name).join("base.img.part")
    }

    /// Writable qcow2 overlay disk.
    pub fn disk_path(&self, name: &str) -> PathBuf {
        self.vm_dir(name).join("disk.qcow2")
    }

    pub fn pid_path(&self, name: &str) -> PathBuf {
        self.vm_dir(name).join("hypervisor.pid")
    }

    pub fn hypervisor_log_path(&self, name: &str) -> PathBuf {
        self.vm_dir(name).join("hypervisor.log")
    }

    /// Marker written on the first successful start.
    pub fn booted_marker(&self, name: &str) -> PathBuf {
        self.vm_dir(name).join("booted")
    }

    /// Where `create --replace` parks the old VM until the new one is built.
    /// The leading dot keeps it out of `list`.
    pub fn replaced_dir(&self, name: &str) -> PathBuf {
        self.root.join(format!(".{name}.replaced"))
    }

    /// Operations log shared by all VMs under this root.
    pub fn ops_log_path(&self) -> PathBuf {
        self.root.join("cirrus.log")
    }
}
