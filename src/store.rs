//! Durable per-VM config records.
//!
//! Each VM owns `<vm_dir>/<name>/vm.toml`. Writes go to `vm.toml.tmp` and
//! are renamed into place, so a reader never sees a half-written record and
//! a crash mid-write leaves the previous record intact.

use crate::config::{self, VmConfig};
use crate::error::VmError;
use crate::paths::VmPaths;
use crate::util;

#[derive(Debug, Clone)]
pub struct ConfigStore {
    paths: VmPaths,
}

impl ConfigStore {
    pub fn new(paths: VmPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &VmPaths {
        &self.paths
    }

    /// False for names that could not have been stored.
    pub fn exists(&self, name: &str) -> bool {
        config::validate_name(name).is_ok() && self.paths.config_path(name).is_file()
    }

    /// Names of all stored VMs, sorted. A missing root is an empty store.
    pub fn list(&self) -> Result<Vec<String>, VmError> {
        let root = self.paths.root();
        let entries = match std::fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(VmError::io(
                    format!("reading VM directory {}", root.display()),
                    e,
                ));
            }
        };

        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter_map(|e| e.file_name().to_str().map(String::from))
            .filter(|name| self.exists(name))
            .collect();

        names.sort();
        Ok(names)
    }

    /// Load a record. Every call parses into a fresh struct, so defaults are
    /// re-applied per record and nothing carries over between loads.
    pub fn load(&self, name: &str) -> Result<VmConfig, VmError> {
        config::validate_name(name)?;
        let path = self.paths.config_path(name);
        let contents = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(VmError::NotFound {
                    name: name.to_string(),
                });
            }
            Err(e) => return Err(VmError::io(format!("reading config {}", path.display()), e)),
        };

        let config = VmConfig::from_toml(&contents, &path)?;
        if config.name != name {
            return Err(VmError::NameMismatch {
                name: name.to_string(),
                found: config.name,
                path: path.display().to_string(),
            });
        }
        Ok(config)
    }

    /// Write a record with atomic replace semantics.
    pub fn save(&self, name: &str, config: &VmConfig) -> Result<(), VmError> {
        config::validate_name(name)?;
        if config.name != name {
            return Err(VmError::Validation {
                message: format!("cannot store '{}' under the name '{name}'", config.name),
            });
        }

        let path = self.paths.config_path(name);
        let contents = config.to_toml()?;

        let write_err = |source: std::io::Error| VmError::ConfigWrite {
            path: path.display().to_string(),
            source,
        };

        std::fs::create_dir_all(self.paths.vm_dir(name)).map_err(write_err)?;
        util::write_atomic(&path, contents.as_bytes()).map_err(write_err)?;

        tracing::debug!(name, path = %path.display(), "config saved");
        Ok(())
    }

    /// Remove a record. Deleting a record that does not exist is not an error.
    pub fn delete(&self, name: &str) -> Result<(), VmError> {
        config::validate_name(name)?;
        let path = self.paths.config_path(name);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!(name, "config removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(VmError::io(format!("removing config {}", path.display()), e)),
        }
    }
}
