use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

fn cirrus() -> assert_cmd::Command {
    let mut cmd: assert_cmd::Command = cargo_bin_cmd!("cirrus").into();
    cmd.env_remove("CIRRUS_VM_DIR").env_remove("RUST_LOG");
    cmd
}

/// A VM root plus a settings file whose tools always exist, so lifecycle
/// commands get past the dependency check.
struct Env {
    dir: tempfile::TempDir,
}

impl Env {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("settings.toml"),
            "hypervisor = \"sh\"\nqemu_img = \"sh\"\n",
        )
        .unwrap();
        Self { dir }
    }

    fn vm_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("vms")
    }

    fn cmd(&self) -> assert_cmd::Command {
        let mut cmd = cirrus();
        cmd.arg("--vm-dir")
            .arg(self.vm_dir())
            .arg("--settings")
            .arg(self.dir.path().join("settings.toml"));
        cmd
    }

    fn write_record(&self, name: &str) {
        let vm = self.vm_dir().join(name);
        std::fs::create_dir_all(&vm).unwrap();
        std::fs::write(
            vm.join("vm.toml"),
            format!(
                r#"name = "{name}"
created_at = "2026-01-01T00:00:00Z"

[image]
os_family = "ubuntu"
release_codename = "noble"
source_url = "https://cloud-images.ubuntu.com/noble/current/noble-server-cloudimg-amd64.img"
base_path = "{base}"

[disk]
path = "{disk}"
"#,
                base = vm.join("base.img").display(),
                disk = vm.join("disk.qcow2").display(),
            ),
        )
        .unwrap();
    }
}

#[test]
fn help_works() {
    cirrus()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("cloud images"));
}

#[test]
fn list_empty_root() {
    let env = Env::new();
    env.cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[test]
fn list_json_empty_root() {
    let env = Env::new();
    env.cmd()
        .args(["list", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[]"));
}

#[test]
fn list_shows_records_sorted() {
    let env = Env::new();
    for name in ["gamma", "alpha", "beta"] {
        env.write_record(name);
    }
    env.cmd()
        .arg("list")
        .assert()
        .success()
        .stdout("alpha\nbeta\ngamma\n");
}

#[test]
fn vm_dir_from_environment() {
    let env = Env::new();
    env.write_record("from-env");
    cirrus()
        .env("CIRRUS_VM_DIR", env.vm_dir())
        .arg("--settings")
        .arg(env.dir.path().join("settings.toml"))
        .arg("list")
        .assert()
        .success()
        .stdout("from-env\n");
}

#[test]
fn os_lists_catalog() {
    cirrus()
        .arg("os")
        .assert()
        .success()
        .stdout(predicate::str::contains("Ubuntu 24.04"))
        .stdout(predicate::str::contains("noble"));
}

#[test]
fn os_filter() {
    cirrus()
        .args(["os", "debian"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Debian 12"))
        .stdout(predicate::str::contains("Ubuntu").not());
}

#[test]
fn status_of_created_vm() {
    let env = Env::new();
    env.write_record("web");
    env.cmd()
        .args(["status", "web"])
        .assert()
        .success()
        .stdout(predicate::str::contains("created"))
        .stdout(predicate::str::contains("ubuntu noble"));
}

#[test]
fn status_json() {
    let env = Env::new();
    env.write_record("web");
    env.cmd()
        .args(["status", "web", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"state\""))
        .stdout(predicate::str::contains("\"created\""))
        .stdout(predicate::str::contains("\"noble\""));
}

#[test]
fn status_unknown_vm_fails() {
    let env = Env::new();
    env.cmd()
        .args(["status", "ghost"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("VM 'ghost' not found"));
}

#[test]
fn delete_unknown_vm_fails() {
    let env = Env::new();
    env.cmd()
        .args(["delete", "ghost"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn stop_unknown_vm_fails() {
    let env = Env::new();
    env.cmd()
        .args(["stop", "ghost"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn stop_created_vm_is_informational() {
    let env = Env::new();
    env.write_record("idle");
    env.cmd()
        .args(["stop", "idle"])
        .assert()
        .success()
        .stdout(predicate::str::contains("not running"));
}

#[test]
fn delete_removes_vm() {
    let env = Env::new();
    env.write_record("old");
    env.cmd().args(["delete", "old"]).assert().success();
    assert!(!env.vm_dir().join("old").exists());
    env.cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[test]
fn start_with_missing_artifacts_fails() {
    let env = Env::new();
    env.write_record("half");
    env.cmd()
        .args(["start", "half"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing base image"));
}

#[test]
fn create_rejects_invalid_name() {
    let env = Env::new();
    env.cmd()
        .args(["create", "bad/name", "Ubuntu 24.04"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid VM name"));
    assert!(!env.vm_dir().join("bad").exists());
}

#[test]
fn create_rejects_unknown_os() {
    let env = Env::new();
    env.cmd()
        .args(["create", "vm1", "Unknown OS 99"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown OS 'Unknown OS 99'"));
    assert!(!env.vm_dir().join("vm1").exists());
}

#[test]
fn create_existing_vm_fails() {
    let env = Env::new();
    env.write_record("dup");
    env.cmd()
        .args(["create", "dup", "Ubuntu 24.04"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn missing_tools_fail_lifecycle_commands() {
    let dir = tempfile::tempdir().unwrap();
    let settings = dir.path().join("settings.toml");
    std::fs::write(
        &settings,
        "hypervisor = \"/nonexistent/qemu-system-x86_64\"\nqemu_img = \"/nonexistent/qemu-img\"\n",
    )
    .unwrap();
    cirrus()
        .arg("--vm-dir")
        .arg(dir.path().join("vms"))
        .arg("--settings")
        .arg(&settings)
        .args(["start", "anything"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing required tools"));
}

#[test]
fn log_of_unknown_vm_fails() {
    let env = Env::new();
    env.cmd()
        .args(["log", "ghost"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn lifecycle_commands_write_ops_log() {
    let env = Env::new();
    env.write_record("logged");
    env.cmd().args(["stop", "logged"]).assert().success();
    assert!(env.vm_dir().join("cirrus.log").exists());
}
