//! Hypervisor process management.
//!
//! `start` records the launched PID in `hypervisor.pid`. `stop` and
//! `is_running` trust that PID only while the process it names still has
//! the VM's disk path on its command line; otherwise they fall back to
//! scanning the process table for that disk path. The fallback covers PID
//! files lost to an unclean shutdown.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use sysinfo::{Pid, Process, ProcessStatus, Signal, System};

use crate::config::VmConfig;
use crate::error::VmError;
use crate::paths::VmPaths;
use crate::util;

const POLL_INTERVAL: Duration = Duration::from_millis(200);
const KILL_TIMEOUT: Duration = Duration::from_secs(5);

/// A launched hypervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessHandle {
    pub pid: u32,
}

#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    paths: VmPaths,
    binary: PathBuf,
    stop_timeout: Duration,
    launch_grace: Duration,
}

impl ProcessSupervisor {
    pub fn new(paths: VmPaths, binary: impl Into<PathBuf>) -> Self {
        Self {
            paths,
            binary: binary.into(),
            stop_timeout: Duration::from_secs(30),
            launch_grace: Duration::from_millis(500),
        }
    }

    /// How long to wait after SIGTERM before escalating to SIGKILL.
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// How long a fresh process must survive to count as launched.
    pub fn with_launch_grace(mut self, grace: Duration) -> Self {
        self.launch_grace = grace;
        self
    }

    /// Hypervisor arguments for `config`.
    pub fn build_args(&self, config: &VmConfig) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-name".into(),
            config.name.clone(),
            "-machine".into(),
            "q35".into(),
        ];

        let accel = config.display.accel.trim();
        if !accel.is_empty() {
            args.extend(["-accel".into(), accel.to_string()]);
            if accel == "kvm" {
                args.extend(["-cpu".into(), "host".into()]);
            }
        }

        args.extend([
            "-m".into(),
            config.resources.memory_mb.to_string(),
            "-smp".into(),
            config.resources.cpus.to_string(),
            "-drive".into(),
            format!(
                "file={},format=qcow2,if=virtio",
                escape_opt(&config.disk.path)
            ),
        ]);

        if let Some(seed) = config.seed_image.as_deref().filter(|s| !s.is_empty()) {
            args.extend([
                "-drive".into(),
                format!("file={},format=raw,if=virtio,readonly=on", escape_opt(seed)),
            ]);
        }

        let mut nic = format!(
            "user,model=virtio-net-pci,hostfwd=tcp::{}-:22",
            config.network.ssh_port
        );
        for fwd in &config.network.forwards {
            nic.push_str(&format!(",hostfwd=tcp::{}-:{}", fwd.host, fwd.guest));
        }

        args.extend([
            "-boot".into(),
            "c".into(),
            "-nic".into(),
            nic,
            "-display".into(),
            if config.display.gui { "gtk" } else { "none" }.into(),
        ]);

        args
    }

    /// Launch the hypervisor detached from the caller.
    ///
    /// The process gets its own process group so terminal signals aimed at
    /// the CLI do not reach it, and its output is appended to
    /// `hypervisor.log`.
    pub async fn start(&self, config: &VmConfig) -> Result<ProcessHandle, VmError> {
        use std::os::unix::process::CommandExt;

        let name = config.name.as_str();
        if let Some(pid) = self.find(config) {
            return Err(VmError::VmRunning {
                name: name.to_string(),
                pid,
            });
        }

        let log_path = self.paths.hypervisor_log_path(name);
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|e| VmError::io(format!("opening {}", log_path.display()), e))?;
        let log_err = log
            .try_clone()
            .map_err(|e| VmError::io(format!("opening {}", log_path.display()), e))?;

        let args = self.build_args(config);
        tracing::debug!(name, binary = %self.binary.display(), ?args, "launching hypervisor");

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(log)
            .stderr(log_err)
            .process_group(0)
            .spawn()
            .map_err(|e| VmError::LaunchFailed {
                name: name.to_string(),
                message: format!("cannot run {}: {e}", self.binary.display()),
            })?;

        tokio::time::sleep(self.launch_grace).await;

        match child.try_wait() {
            Ok(None) => {}
            Ok(Some(status)) => {
                let tail = util::tail_lines(&log_path, 5);
                let message = if tail.is_empty() {
                    format!("hypervisor exited immediately ({status})")
                } else {
                    format!("hypervisor exited immediately ({status}):\n{tail}")
                };
                return Err(VmError::LaunchFailed {
                    name: name.to_string(),
                    message,
                });
            }
            Err(e) => {
                return Err(VmError::LaunchFailed {
                    name: name.to_string(),
                    message: format!("cannot query hypervisor state: {e}"),
                });
            }
        }

        let pid = child.id();
        let pid_path = self.paths.pid_path(name);
        util::write_atomic(&pid_path, pid.to_string().as_bytes()).map_err(|e| {
            VmError::io(format!("writing PID file {}", pid_path.display()), e)
        })?;

        tracing::info!(name, pid, "hypervisor started");
        Ok(ProcessHandle { pid })
    }

    /// Terminate the VM's hypervisor. Returns `false` if nothing was running.
    pub async fn stop(&self, config: &VmConfig) -> Result<bool, VmError> {
        let name = config.name.as_str();
        let Some(pid) = self.find(config) else {
            self.remove_pid_file(name);
            return Ok(false);
        };

        tracing::info!(name, pid, "sending SIGTERM to hypervisor");
        send_signal(pid, Signal::Term);

        if !self.wait_for_exit(config, pid, self.stop_timeout).await {
            tracing::warn!(name, pid, "hypervisor ignored SIGTERM, sending SIGKILL");
            send_signal(pid, Signal::Kill);
            if !self.wait_for_exit(config, pid, KILL_TIMEOUT).await {
                return Err(VmError::ExternalCommand {
                    command: "kill".into(),
                    message: format!("hypervisor pid {pid} for VM '{name}' did not exit"),
                });
            }
        }

        self.remove_pid_file(name);
        tracing::info!(name, pid, "hypervisor stopped");
        Ok(true)
    }

    pub fn is_running(&self, config: &VmConfig) -> bool {
        self.find(config).is_some()
    }

    /// PID of the VM's live hypervisor, if any.
    pub fn find(&self, config: &VmConfig) -> Option<u32> {
        let name = config.name.as_str();
        let disk = config.disk.path.as_str();
        let sys = System::new_all();

        if let Some(pid) = self.read_pid_file(name) {
            if process_matches(&sys, pid, disk) {
                return Some(pid);
            }
            tracing::debug!(name, pid, "PID file is stale");
            self.remove_pid_file(name);
        }

        let pid = scan_for_disk(&sys, disk)?;
        tracing::warn!(name, pid, "found hypervisor by command-line match, re-recording PID");
        let pid_path = self.paths.pid_path(name);
        if pid_path.parent().is_some_and(Path::is_dir) {
            let _ = util::write_atomic(&pid_path, pid.to_string().as_bytes());
        }
        Some(pid)
    }

    async fn wait_for_exit(&self, config: &VmConfig, pid: u32, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let sys = System::new_all();
            if !process_matches(&sys, pid, &config.disk.path) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    fn read_pid_file(&self, name: &str) -> Option<u32> {
        let contents = std::fs::read_to_string(self.paths.pid_path(name)).ok()?;
        contents.trim().parse().ok()
    }

    fn remove_pid_file(&self, name: &str) {
        let _ = std::fs::remove_file(self.paths.pid_path(name));
    }
}

/// QEMU option values use `,` as a separator; a literal comma is `,,`.
fn escape_opt(value: &str) -> String {
    value.replace(',', ",,")
}

fn is_live(process: &Process) -> bool {
    !matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead)
}

/// Matches the disk path as written by `build_args` (commas doubled) or raw.
fn references_disk(process: &Process, disk: &str) -> bool {
    if disk.is_empty() {
        return false;
    }
    let escaped = escape_opt(disk);
    process.cmd().iter().any(|arg| {
        let arg = arg.to_string_lossy();
        arg.contains(disk) || arg.contains(escaped.as_str())
    })
}

fn process_matches(sys: &System, pid: u32, disk: &str) -> bool {
    sys.process(Pid::from_u32(pid))
        .is_some_and(|p| is_live(p) && references_disk(p, disk))
}

/// Lowest matching PID, so a thread never wins over its process.
fn scan_for_disk(sys: &System, disk: &str) -> Option<u32> {
    let own = std::process::id();
    sys.processes()
        .iter()
        .filter(|(pid, p)| pid.as_u32() != own && is_live(p) && references_disk(p, disk))
        .map(|(pid, _)| pid.as_u32())
        .min()
}

fn send_signal(pid: u32, signal: Signal) {
    let sys = System::new_all();
    match sys.process(Pid::from_u32(pid)) {
        Some(process) => {
            if process.kill_with(signal) != Some(true) {
                tracing::warn!(pid, ?signal, "failed to signal hypervisor");
            }
        }
        None => tracing::debug!(pid, "process vanished before it could be signalled"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PortForward;
    use crate::config::tests::sample_config;

    fn supervisor(dir: &tempfile::TempDir) -> ProcessSupervisor {
        ProcessSupervisor::new(VmPaths::new(dir.path()), "qemu-system-x86_64")
    }

    fn arg_after<'a>(args: &'a [String], flag: &str) -> Vec<&'a str> {
        args.windows(2)
            .filter(|w| w[0] == flag)
            .map(|w| w[1].as_str())
            .collect()
    }

    #[test]
    fn args_carry_resources_and_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = sample_config("web");
        config.resources.memory_mb = 4096;
        config.resources.cpus = 4;

        let args = supervisor(&dir).build_args(&config);
        assert_eq!(arg_after(&args, "-m"), vec!["4096"]);
        assert_eq!(arg_after(&args, "-smp"), vec!["4"]);
        assert_eq!(arg_after(&args, "-boot"), vec!["c"]);
        assert_eq!(arg_after(&args, "-accel"), vec!["kvm"]);
        assert_eq!(arg_after(&args, "-cpu"), vec!["host"]);
        assert_eq!(arg_after(&args, "-display"), vec!["none"]);
        assert_eq!(
            arg_after(&args, "-drive"),
            vec!["file=/tmp/vms/web/disk.qcow2,format=qcow2,if=virtio"]
        );
    }

    #[test]
    fn args_include_port_forwards() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = sample_config("web");
        config.network.ssh_port = 2200;
        config.network.forwards = vec![
            PortForward {
                host: 8080,
                guest: 80,
            },
            PortForward {
                host: 8443,
                guest: 443,
            },
        ];

        let args = supervisor(&dir).build_args(&config);
        assert_eq!(
            arg_after(&args, "-nic"),
            vec![
                "user,model=virtio-net-pci,hostfwd=tcp::2200-:22,hostfwd=tcp::8080-:80,hostfwd=tcp::8443-:443"
            ]
        );
    }

    #[test]
    fn args_gui_tcg_and_seed() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = sample_config("desk");
        config.display.gui = true;
        config.display.accel = "tcg".into();
        config.seed_image = Some("/srv/seed.img".into());

        let args = supervisor(&dir).build_args(&config);
        assert_eq!(arg_after(&args, "-display"), vec!["gtk"]);
        assert_eq!(arg_after(&args, "-accel"), vec!["tcg"]);
        assert!(arg_after(&args, "-cpu").is_empty());
        let drives = arg_after(&args, "-drive");
        assert_eq!(drives.len(), 2);
        assert_eq!(drives[1], "file=/srv/seed.img,format=raw,if=virtio,readonly=on");
    }

    #[test]
    fn commas_in_paths_are_escaped() {
        assert_eq!(escape_opt("/vms/a,b/disk.qcow2"), "/vms/a,,b/disk.qcow2");
    }

    #[test]
    fn nothing_running_for_fresh_vm() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = sample_config("idle");
        config.disk.path = dir.path().join("idle/disk.qcow2").display().to_string();
        assert!(!supervisor(&dir).is_running(&config));
    }

    #[tokio::test]
    async fn stop_without_process_returns_false() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = sample_config("idle");
        config.disk.path = dir.path().join("idle/disk.qcow2").display().to_string();
        assert!(!supervisor(&dir).stop(&config).await.unwrap());
    }

    #[test]
    fn stale_pid_file_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(&dir);
        let mut config = sample_config("stale");
        config.disk.path = dir.path().join("stale/disk.qcow2").display().to_string();

        // Our own PID is alive but its command line does not mention the disk.
        let pid_path = dir.path().join("stale/hypervisor.pid");
        std::fs::create_dir_all(pid_path.parent().unwrap()).unwrap();
        std::fs::write(&pid_path, std::process::id().to_string()).unwrap();

        assert_eq!(sup.find(&config), None);
        assert!(!pid_path.exists());
    }

    #[tokio::test]
    async fn missing_binary_is_launch_failed() {
        let dir = tempfile::tempdir().unwrap();
        let sup = ProcessSupervisor::new(VmPaths::new(dir.path()), dir.path().join("no-qemu"));
        let mut config = sample_config("vm");
        config.disk.path = dir.path().join("vm/disk.qcow2").display().to_string();
        std::fs::create_dir_all(dir.path().join("vm")).unwrap();

        let err = sup.start(&config).await.unwrap_err();
        assert!(matches!(err, VmError::LaunchFailed { ref name, .. } if name == "vm"));
        assert!(!dir.path().join("vm/hypervisor.pid").exists());
    }
}
