//! Observed VM state.
//!
//! Nothing here is persisted. The state is reconstructed on every
//! invocation from the config record, the `booted` marker and the process
//! table.

use std::fmt;

use crate::config::VmConfig;
use crate::paths::VmPaths;
use crate::supervisor::ProcessSupervisor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    /// No config record.
    Absent,
    /// Record and artifacts exist; the VM has never been started.
    Created,
    /// A live hypervisor process owns the VM's disk.
    Running,
    /// Started at least once, no hypervisor now.
    Stopped,
}

impl VmState {
    pub fn as_str(self) -> &'static str {
        match self {
            VmState::Absent => "absent",
            VmState::Created => "created",
            VmState::Running => "running",
            VmState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current state of a stored VM, plus the hypervisor PID when running.
pub fn detect_state(
    paths: &VmPaths,
    supervisor: &ProcessSupervisor,
    config: &VmConfig,
) -> (VmState, Option<u32>) {
    if let Some(pid) = supervisor.find(config) {
        return (VmState::Running, Some(pid));
    }
    let state = if paths.booted_marker(&config.name).exists() {
        VmState::Stopped
    } else {
        VmState::Created
    };
    (state, None)
}
