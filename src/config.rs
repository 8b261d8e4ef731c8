use std::path::{Path, PathBuf};

use facet::Facet;

use crate::error::VmError;
use crate::paths;
use crate::util::parse_size;

// ── VM record ─────────────────────────────────────────────

/// One persisted VM, stored as `<vm_dir>/<name>/vm.toml`.
///
/// Scalar fields come first so the TOML document keeps them above the
/// first table header.
#[derive(Debug, Clone, PartialEq, Facet)]
pub struct VmConfig {
    pub name: String,
    /// RFC 3339, UTC.
    pub created_at: String,
    /// Pre-built seed disk attached at boot, if any.
    #[facet(default)]
    #[facet(skip_serializing_if = Option::is_none)]
    pub seed_image: Option<String>,
    pub image: ImageRecord,
    pub disk: DiskRecord,
    #[facet(default)]
    pub resources: ResourcesConfig,
    #[facet(default)]
    pub network: NetworkConfig,
    #[facet(default)]
    pub display: DisplayConfig,
    #[facet(default)]
    pub identity: IdentityConfig,
}

#[derive(Debug, Clone, PartialEq, Facet)]
pub struct ImageRecord {
    pub os_family: String,
    pub release_codename: String,
    pub source_url: String,
    pub base_path: String,
}

#[derive(Debug, Clone, PartialEq, Facet)]
pub struct DiskRecord {
    pub path: String,
    #[facet(default = "20G")]
    pub size: String,
}

#[derive(Debug, Clone, PartialEq, Facet)]
#[facet(default)]
pub struct ResourcesConfig {
    #[facet(default = 2048)]
    pub memory_mb: u64,
    #[facet(default = 2)]
    pub cpus: u32,
}

impl Default for ResourcesConfig {
    fn default() -> Self {
        Self {
            memory_mb: 2048,
            cpus: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Facet)]
pub struct PortForward {
    pub host: u16,
    pub guest: u16,
}

impl std::str::FromStr for PortForward {
    type Err = VmError;

    /// Parses `HOST:GUEST`, e.g. `8080:80`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || VmError::Validation {
            message: format!("port forward must look like HOST:GUEST (got '{s}')"),
        };
        let (host, guest) = s.split_once(':').ok_or_else(invalid)?;
        let host: u16 = host.trim().parse().map_err(|_| invalid())?;
        let guest: u16 = guest.trim().parse().map_err(|_| invalid())?;
        if host == 0 || guest == 0 {
            return Err(invalid());
        }
        Ok(Self { host, guest })
    }
}

#[derive(Debug, Clone, PartialEq, Facet)]
#[facet(default)]
pub struct NetworkConfig {
    #[facet(default = 2222)]
    pub ssh_port: u16,
    #[facet(default)]
    pub forwards: Vec<PortForward>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            ssh_port: 2222,
            forwards: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Facet)]
#[facet(default)]
pub struct DisplayConfig {
    #[facet(default)]
    pub gui: bool,
    #[facet(default = "kvm")]
    pub accel: String,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            gui: false,
            accel: "kvm".into(),
        }
    }
}

/// Guest identity. Stored for reference only; nothing here generates a seed.
#[derive(Debug, Clone, Default, PartialEq, Facet)]
#[facet(default)]
pub struct IdentityConfig {
    #[facet(default)]
    pub hostname: String,
    #[facet(default)]
    pub username: String,
    /// TOML has no null, so an unset password is left out of the record.
    #[facet(default)]
    #[facet(skip_serializing_if = Option::is_none)]
    pub password: Option<String>,
}

impl VmConfig {
    pub fn disk_path(&self) -> &Path {
        Path::new(&self.disk.path)
    }

    pub fn base_image_path(&self) -> &Path {
        Path::new(&self.image.base_path)
    }

    /// Hostname, or the VM name when unset.
    pub fn hostname(&self) -> &str {
        if self.identity.hostname.is_empty() {
            &self.name
        } else {
            &self.identity.hostname
        }
    }

    /// Parse a record from TOML. `path` is only used for error messages.
    pub fn from_toml(contents: &str, path: &Path) -> Result<Self, VmError> {
        facet_toml::from_str(contents).map_err(|e| VmError::ConfigParse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    pub fn to_toml(&self) -> Result<String, VmError> {
        facet_toml::to_string(self).map_err(|e| VmError::Validation {
            message: format!("serializing config for '{}': {e}", self.name),
        })
    }
}

// ── validation ────────────────────────────────────────────

/// Names must match `[A-Za-z0-9_-]+`; they double as directory names.
pub fn validate_name(name: &str) -> Result<(), VmError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(VmError::InvalidName {
            name: name.to_string(),
        });
    }
    Ok(())
}

pub fn validate_config(config: &VmConfig) -> Result<(), VmError> {
    validate_name(&config.name)?;
    parse_size(&config.disk.size)?;

    if config.resources.cpus < 1 {
        return Err(VmError::Validation {
            message: "cpus must be at least 1".into(),
        });
    }
    if config.resources.memory_mb < 256 {
        return Err(VmError::Validation {
            message: "memory_mb must be at least 256".into(),
        });
    }
    if config.network.ssh_port == 0 {
        return Err(VmError::Validation {
            message: "ssh_port must be non-zero".into(),
        });
    }

    let mut used = std::collections::HashSet::new();
    used.insert(config.network.ssh_port);
    for fwd in &config.network.forwards {
        if !used.insert(fwd.host) {
            return Err(VmError::Validation {
                message: format!("host port {} is forwarded more than once", fwd.host),
            });
        }
    }

    Ok(())
}

// ── global settings ───────────────────────────────────────

/// Optional `settings.toml`: where VMs live, which binaries to run, and
/// the defaults applied to `create`.
#[derive(Debug, Clone, Facet)]
#[facet(default)]
pub struct Settings {
    /// Empty means the platform default (see [`paths::default_vm_dir`]).
    #[facet(default)]
    pub vm_dir: String,
    #[facet(default = "qemu-system-x86_64")]
    pub hypervisor: String,
    #[facet(default = "qemu-img")]
    pub qemu_img: String,
    #[facet(default = 30)]
    pub stop_timeout_s: u64,
    #[facet(default)]
    pub defaults: CreateDefaults,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            vm_dir: String::new(),
            hypervisor: "qemu-system-x86_64".into(),
            qemu_img: "qemu-img".into(),
            stop_timeout_s: 30,
            defaults: CreateDefaults::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Facet)]
#[facet(default)]
pub struct CreateDefaults {
    #[facet(default = "20G")]
    pub disk_size: String,
    #[facet(default = 2048)]
    pub memory_mb: u64,
    #[facet(default = 2)]
    pub cpus: u32,
    #[facet(default = 2222)]
    pub ssh_port: u16,
}

impl Default for CreateDefaults {
    fn default() -> Self {
        Self {
            disk_size: "20G".into(),
            memory_mb: 2048,
            cpus: 2,
            ssh_port: 2222,
        }
    }
}

impl Settings {
    /// Resolved VM root directory.
    pub fn vm_dir(&self) -> PathBuf {
        if self.vm_dir.is_empty() {
            paths::default_vm_dir()
        } else {
            PathBuf::from(&self.vm_dir)
        }
    }

    pub fn stop_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.stop_timeout_s)
    }
}

fn validate_settings(settings: &Settings) -> Result<(), VmError> {
    if settings.hypervisor.trim().is_empty() {
        return Err(VmError::Validation {
            message: "hypervisor must not be empty".into(),
        });
    }
    if settings.qemu_img.trim().is_empty() {
        return Err(VmError::Validation {
            message: "qemu_img must not be empty".into(),
        });
    }
    parse_size(&settings.defaults.disk_size)?;
    if settings.defaults.cpus < 1 {
        return Err(VmError::Validation {
            message: "defaults.cpus must be at least 1".into(),
        });
    }
    if settings.defaults.memory_mb < 256 {
        return Err(VmError::Validation {
            message: "defaults.memory_mb must be at least 256".into(),
        });
    }
    Ok(())
}

/// Load global settings. A missing file yields the defaults.
pub fn load_settings(path: &Path) -> Result<Settings, VmError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no settings file, using defaults");
            return Ok(Settings::default());
        }
        Err(source) => {
            return Err(VmError::SettingsLoad {
                path: path.display().to_string(),
                source,
            });
        }
    };

    let settings: Settings = facet_toml::from_str(&contents).map_err(|e| VmError::ConfigParse {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    validate_settings(&settings)?;
    Ok(settings)
}
