use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};

use crate::catalog;
use crate::config::{
    self, CreateDefaults, DiskRecord, DisplayConfig, IdentityConfig, ImageRecord, NetworkConfig,
    PortForward, ResourcesConfig, VmConfig,
};
use crate::disk::DiskAllocator;
use crate::error::VmError;
use crate::image::ImageSource;
use crate::store::ConfigStore;

/// Per-VM overrides for `create`. Unset fields fall back to [`CreateDefaults`].
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub disk_size: Option<String>,
    pub memory_mb: Option<u64>,
    pub cpus: Option<u32>,
    pub ssh_port: Option<u16>,
    pub forwards: Vec<PortForward>,
    pub gui: bool,
    pub accel: Option<String>,
    pub hostname: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub seed_image: Option<String>,
    /// Re-create over an existing record. The caller checks the VM is not running.
    pub replace: bool,
}

pub struct Provisioner<'a, S, D> {
    store: &'a ConfigStore,
    images: &'a S,
    disks: &'a D,
    defaults: &'a CreateDefaults,
}

impl<'a, S: ImageSource, D: DiskAllocator> Provisioner<'a, S, D> {
    pub fn new(
        store: &'a ConfigStore,
        images: &'a S,
        disks: &'a D,
        defaults: &'a CreateDefaults,
    ) -> Self {
        Self {
            store,
            images,
            disks,
            defaults,
        }
    }

    /// Build the record `create` would write, without touching the filesystem.
    pub fn plan(
        &self,
        name: &str,
        os_label: &str,
        opts: &CreateOptions,
    ) -> Result<VmConfig, VmError> {
        config::validate_name(name)?;

        let entry = catalog::resolve(os_label).map_err(|e| match e {
            VmError::UnknownOs { label, .. } => VmError::UnknownOs {
                name: name.to_string(),
                label,
            },
            other => other,
        })?;

        let paths = self.store.paths();
        let config = VmConfig {
            name: name.to_string(),
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            seed_image: opts.seed_image.clone().filter(|s| !s.is_empty()),
            image: ImageRecord {
                os_family: entry.family.to_string(),
                release_codename: entry.codename.to_string(),
                source_url: entry.url.to_string(),
                base_path: paths.base_image_path(name).display().to_string(),
            },
            disk: DiskRecord {
                path: paths.disk_path(name).display().to_string(),
                size: opts
                    .disk_size
                    .clone()
                    .unwrap_or_else(|| self.defaults.disk_size.clone()),
            },
            resources: ResourcesConfig {
                memory_mb: opts.memory_mb.unwrap_or(self.defaults.memory_mb),
                cpus: opts.cpus.unwrap_or(self.defaults.cpus),
            },
            network: NetworkConfig {
                ssh_port: opts.ssh_port.unwrap_or(self.defaults.ssh_port),
                forwards: opts.forwards.clone(),
            },
            display: DisplayConfig {
                gui: opts.gui,
                accel: opts
                    .accel
                    .clone()
                    .unwrap_or_else(|| DisplayConfig::default().accel),
            },
            identity: IdentityConfig {
                hostname: opts.hostname.clone().unwrap_or_default(),
                username: opts.username.clone().unwrap_or_default(),
                password: opts.password.clone(),
            },
        };

        config::validate_config(&config)?;
        Ok(config)
    }

    /// Create a VM: fetch its base image, allocate its overlay disk, then
    /// persist the record. No record is written if any earlier step fails.
    ///
    /// With `replace`, the old VM is moved aside first and put back if the
    /// new one cannot be built.
    pub async fn create(
        &self,
        name: &str,
        os_label: &str,
        opts: &CreateOptions,
    ) -> Result<VmConfig, VmError> {
        config::validate_name(name)?;
        let replacing = self.store.exists(name);
        if replacing && !opts.replace {
            return Err(VmError::AlreadyExists {
                name: name.to_string(),
            });
        }

        let config = self.plan(name, os_label, opts)?;
        let previous = if replacing {
            Some(self.set_aside(name).await?)
        } else {
            self.clear_leftovers(name).await?;
            None
        };

        tracing::info!(
            name,
            os = os_label,
            url = %config.image.source_url,
            "provisioning VM"
        );

        let result = self.provision(name, &config).await;
        if let Some(previous) = previous {
            match &result {
                Ok(()) => discard(name, &previous).await,
                Err(_) => self.restore(name, &previous).await?,
            }
        }
        result?;

        tracing::info!(name, "VM created");
        Ok(config)
    }

    async fn provision(&self, name: &str, config: &VmConfig) -> Result<(), VmError> {
        self.images
            .fetch(name, &config.image.source_url, config.base_image_path())
            .await?;
        self.disks
            .allocate(config.base_image_path(), config.disk_path(), &config.disk.size)
            .await?;
        self.store.save(name, config)
    }

    /// Remove whatever an earlier create left in the VM directory.
    async fn clear_leftovers(&self, name: &str) -> Result<(), VmError> {
        let vm_dir = self.store.paths().vm_dir(name);
        if vm_dir.exists() {
            tracing::warn!(name, path = %vm_dir.display(), "removing leftovers of an earlier create");
            remove_tree(&vm_dir).await?;
        }
        Ok(())
    }

    /// Move the existing VM directory out of the way, record included.
    async fn set_aside(&self, name: &str) -> Result<PathBuf, VmError> {
        let paths = self.store.paths();
        let vm_dir = paths.vm_dir(name);
        let parked = paths.replaced_dir(name);

        if parked.exists() {
            tracing::warn!(name, path = %parked.display(), "removing copy left by an earlier replace");
            remove_tree(&parked).await?;
        }
        tokio::fs::rename(&vm_dir, &parked).await.map_err(|e| {
            VmError::io(
                format!("moving {} to {}", vm_dir.display(), parked.display()),
                e,
            )
        })?;
        tracing::debug!(name, path = %parked.display(), "old VM set aside");
        Ok(parked)
    }

    /// Put the old VM back after a failed replace.
    async fn restore(&self, name: &str, parked: &Path) -> Result<(), VmError> {
        let vm_dir = self.store.paths().vm_dir(name);
        if vm_dir.exists() {
            remove_tree(&vm_dir).await?;
        }
        tokio::fs::rename(parked, &vm_dir).await.map_err(|e| {
            VmError::io(
                format!("restoring {} from {}", vm_dir.display(), parked.display()),
                e,
            )
        })?;
        tracing::warn!(name, "replace failed, previous VM restored");
        Ok(())
    }
}

async fn discard(name: &str, parked: &Path) {
    if let Err(e) = remove_tree(parked).await {
        tracing::warn!(name, error = %e, "could not remove replaced VM");
    }
}

async fn remove_tree(path: &Path) -> Result<(), VmError> {
    tokio::fs::remove_dir_all(path)
        .await
        .map_err(|e| VmError::io(format!("removing {}", path.display()), e))
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};

    use super::*;
    use crate::paths::VmPaths;

    #[derive(Default)]
    struct FakeImages {
        fail: Cell<bool>,
        fetched: RefCell<Vec<String>>,
    }

    impl ImageSource for FakeImages {
        async fn fetch(&self, name: &str, url: &str, dest: &Path) -> Result<(), VmError> {
            self.fetched.borrow_mut().push(url.to_string());
            if self.fail.get() {
                return Err(VmError::DownloadFailed {
                    name: name.to_string(),
                    message: "connection reset".into(),
                    source: None,
                });
            }
            std::fs::create_dir_all(dest.parent().unwrap()).unwrap();
            std::fs::write(dest, b"base").unwrap();
            Ok(())
        }
    }

    struct FakeDisks;

    impl DiskAllocator for FakeDisks {
        async fn allocate(&self, base: &Path, disk: &Path, _size: &str) -> Result<(), VmError> {
            assert!(base.exists(), "disk allocated before base image was fetched");
            std::fs::write(disk, b"qcow2").unwrap();
            Ok(())
        }
    }

    fn setup() -> (tempfile::TempDir, ConfigStore, CreateDefaults) {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(VmPaths::new(dir.path()));
        (dir, store, CreateDefaults::default())
    }

    #[tokio::test]
    async fn create_ubuntu_noble() {
        let (dir, store, defaults) = setup();
        let images = FakeImages::default();
        let prov = Provisioner::new(&store, &images, &FakeDisks, &defaults);

        let config = prov
            .create("testvm1", "Ubuntu 24.04", &CreateOptions::default())
            .await
            .unwrap();

        assert_eq!(config.name, "testvm1");
        assert_eq!(config.image.os_family, "ubuntu");
        assert_eq!(config.image.release_codename, "noble");
        assert!(config.image.source_url.contains("noble-server-cloudimg-amd64.img"));
        assert_eq!(config.disk.size, "20G");
        assert!(dir.path().join("testvm1/base.img").exists());
        assert!(dir.path().join("testvm1/disk.qcow2").exists());
        assert_eq!(store.load("testvm1").unwrap(), config);
        assert!(chrono::DateTime::parse_from_rfc3339(&config.created_at).is_ok());
    }

    #[tokio::test]
    async fn options_override_defaults() {
        let (_dir, store, defaults) = setup();
        let images = FakeImages::default();
        let prov = Provisioner::new(&store, &images, &FakeDisks, &defaults);
        let opts = CreateOptions {
            disk_size: Some("40G".into()),
            memory_mb: Some(4096),
            cpus: Some(4),
            ssh_port: Some(2200),
            forwards: vec![PortForward {
                host: 8080,
                guest: 80,
            }],
            hostname: Some("box".into()),
            ..Default::default()
        };

        let config = prov.create("web", "debian 12", &opts).await.unwrap();
        assert_eq!(config.disk.size, "40G");
        assert_eq!(config.resources.memory_mb, 4096);
        assert_eq!(config.resources.cpus, 4);
        assert_eq!(config.network.ssh_port, 2200);
        assert_eq!(config.network.forwards.len(), 1);
        assert_eq!(config.hostname(), "box");
        assert_eq!(config.image.release_codename, "bookworm");
    }

    #[tokio::test]
    async fn invalid_name_leaves_nothing() {
        let (dir, store, defaults) = setup();
        let images = FakeImages::default();
        let prov = Provisioner::new(&store, &images, &FakeDisks, &defaults);

        let err = prov
            .create("bad name", "Ubuntu 24.04", &CreateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, VmError::InvalidName { .. }));
        assert!(store.list().unwrap().is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert!(images.fetched.borrow().is_empty());
    }

    #[tokio::test]
    async fn unknown_os_carries_vm_name() {
        let (_dir, store, defaults) = setup();
        let images = FakeImages::default();
        let prov = Provisioner::new(&store, &images, &FakeDisks, &defaults);

        let err = prov
            .create("vm", "Unknown OS 99", &CreateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            VmError::UnknownOs { ref name, ref label } if name == "vm" && label == "Unknown OS 99"
        ));
        assert!(!store.exists("vm"));
    }

    #[tokio::test]
    async fn second_create_is_rejected() {
        let (_dir, store, defaults) = setup();
        let images = FakeImages::default();
        let prov = Provisioner::new(&store, &images, &FakeDisks, &defaults);

        let first = prov
            .create("dup", "Ubuntu 24.04", &CreateOptions::default())
            .await
            .unwrap();
        let err = prov
            .create("dup", "Debian 12", &CreateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, VmError::AlreadyExists { ref name } if name == "dup"));
        assert_eq!(store.load("dup").unwrap(), first);
        assert_eq!(images.fetched.borrow().len(), 1);
    }

    #[tokio::test]
    async fn replace_overwrites_record() {
        let (_dir, store, defaults) = setup();
        let images = FakeImages::default();
        let prov = Provisioner::new(&store, &images, &FakeDisks, &defaults);

        prov.create("vm", "Ubuntu 24.04", &CreateOptions::default())
            .await
            .unwrap();
        let opts = CreateOptions {
            replace: true,
            ..Default::default()
        };
        let config = prov.create("vm", "Debian 12", &opts).await.unwrap();
        assert_eq!(store.load("vm").unwrap().image.os_family, "debian");
        assert_eq!(config.image.os_family, "debian");
    }

    #[tokio::test]
    async fn failed_replace_keeps_previous_vm() {
        let (dir, store, defaults) = setup();
        let images = FakeImages::default();
        let prov = Provisioner::new(&store, &images, &FakeDisks, &defaults);

        let original = prov
            .create("vm", "Ubuntu 24.04", &CreateOptions::default())
            .await
            .unwrap();
        std::fs::write(dir.path().join("vm/booted"), b"").unwrap();

        images.fail.set(true);
        let opts = CreateOptions {
            replace: true,
            ..Default::default()
        };
        let err = prov.create("vm", "Debian 12", &opts).await.unwrap_err();
        assert!(matches!(err, VmError::DownloadFailed { .. }));

        assert_eq!(store.load("vm").unwrap(), original);
        assert!(dir.path().join("vm/base.img").exists());
        assert!(dir.path().join("vm/disk.qcow2").exists());
        assert!(dir.path().join("vm/booted").exists());
        assert!(!dir.path().join(".vm.replaced").exists());
        assert_eq!(store.list().unwrap(), vec!["vm"]);
    }

    #[tokio::test]
    async fn successful_replace_drops_old_artifacts() {
        let (dir, store, defaults) = setup();
        let images = FakeImages::default();
        let prov = Provisioner::new(&store, &images, &FakeDisks, &defaults);

        prov.create("vm", "Ubuntu 24.04", &CreateOptions::default())
            .await
            .unwrap();
        std::fs::write(dir.path().join("vm/booted"), b"").unwrap();

        let opts = CreateOptions {
            replace: true,
            ..Default::default()
        };
        prov.create("vm", "Debian 12", &opts).await.unwrap();
        assert!(!dir.path().join("vm/booted").exists());
        assert!(!dir.path().join(".vm.replaced").exists());
    }

    #[tokio::test]
    async fn failed_download_writes_no_record() {
        let (_dir, store, defaults) = setup();
        let images = FakeImages {
            fail: Cell::new(true),
            ..Default::default()
        };
        let prov = Provisioner::new(&store, &images, &FakeDisks, &defaults);

        let err = prov
            .create("vm", "Ubuntu 24.04", &CreateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, VmError::DownloadFailed { ref name, .. } if name == "vm"));
        assert!(!store.exists("vm"));
        assert!(store.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn leftovers_of_interrupted_create_are_cleared() {
        let (dir, store, defaults) = setup();
        let vm_dir = dir.path().join("vm");
        std::fs::create_dir_all(&vm_dir).unwrap();
        std::fs::write(vm_dir.join("base.img.part"), b"half").unwrap();

        let images = FakeImages::default();
        let prov = Provisioner::new(&store, &images, &FakeDisks, &defaults);
        prov.create("vm", "Ubuntu 24.04", &CreateOptions::default())
            .await
            .unwrap();

        assert!(!vm_dir.join("base.img.part").exists());
        assert_eq!(std::fs::read(vm_dir.join("base.img")).unwrap(), b"base");
    }

    #[tokio::test]
    async fn invalid_options_are_rejected_before_fetch() {
        let (_dir, store, defaults) = setup();
        let images = FakeImages::default();
        let prov = Provisioner::new(&store, &images, &FakeDisks, &defaults);
        let opts = CreateOptions {
            memory_mb: Some(64),
            ..Default::default()
        };

        let err = prov.create("vm", "Ubuntu 24.04", &opts).await.unwrap_err();
        assert!(matches!(err, VmError::Validation { .. }));
        assert!(images.fetched.borrow().is_empty());
    }
}
