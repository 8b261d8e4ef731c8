use std::path::{Path, PathBuf};

use crate::config::Settings;
use crate::error::VmError;

/// Resolve `program` the way a shell would: paths containing `/` are used
/// as-is, bare names are searched in `PATH`.
pub fn find_program(program: &str) -> Option<PathBuf> {
    if program.contains('/') {
        let path = PathBuf::from(program);
        return is_executable(&path).then_some(path);
    }
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
}

/// Every required tool, with where it was found.
pub fn probe(settings: &Settings) -> Vec<(String, Option<PathBuf>)> {
    [settings.qemu_img.as_str(), settings.hypervisor.as_str()]
        .into_iter()
        .map(|program| (program.to_string(), find_program(program)))
        .collect()
}

/// Fails with every missing tool listed, not just the first.
pub fn check(settings: &Settings) -> Result<(), VmError> {
    let missing: Vec<String> = probe(settings)
        .into_iter()
        .filter(|(_, found)| found.is_none())
        .map(|(program, _)| program)
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        tracing::debug!(?missing, "required tools not found");
        Err(VmError::MissingDependencies { missing })
    }
}
