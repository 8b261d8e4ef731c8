use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::PortForward;
use crate::provision::CreateOptions;

#[derive(Parser, Debug)]
#[command(
    name = "cirrus",
    version,
    about = "Manage QEMU virtual machines built from cloud images"
)]
pub struct Cli {
    /// Directory holding one subdirectory per VM
    #[arg(long, global = true, env = "CIRRUS_VM_DIR")]
    pub vm_dir: Option<PathBuf>,

    /// Path to settings file [default: ~/.config/cirrus/settings.toml]
    #[arg(long, global = true)]
    pub settings: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List VMs
    List {
        /// Show state, PID and resources
        #[arg(short, long)]
        long: bool,

        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// Create a VM from a catalog image
    Create(CreateArgs),

    /// Start a VM's hypervisor in the background
    Start { name: String },

    /// Stop a running VM
    Stop { name: String },

    /// Delete a VM and all of its files
    Delete {
        name: String,

        /// Stop the VM first if it is running
        #[arg(short, long)]
        force: bool,
    },

    /// Show a VM's state and configuration
    Status {
        name: String,

        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// List available OS images
    Os {
        /// Filter by name, family or codename
        query: Option<String>,
    },

    /// Print a VM's hypervisor log
    Log { name: String },

    /// Check that qemu-img and the hypervisor are installed
    Check,

    /// Interactive menu
    Menu,
}

#[derive(clap::Args, Debug)]
pub struct CreateArgs {
    /// VM name (letters, digits, '-' and '_')
    pub name: String,

    /// OS label as shown by `cirrus os`, e.g. "Ubuntu 24.04"
    pub os: String,

    /// Virtual disk size, e.g. 20G
    #[arg(long)]
    pub disk_size: Option<String>,

    /// Memory in MiB
    #[arg(long)]
    pub memory: Option<u64>,

    #[arg(long)]
    pub cpus: Option<u32>,

    /// Host port forwarded to guest SSH
    #[arg(long)]
    pub ssh_port: Option<u16>,

    /// Extra TCP forward HOST:GUEST (repeatable)
    #[arg(long = "forward", value_name = "HOST:GUEST")]
    pub forwards: Vec<PortForward>,

    /// Show a graphical display
    #[arg(long)]
    pub gui: bool,

    /// QEMU accelerator (kvm, tcg, ...)
    #[arg(long)]
    pub accel: Option<String>,

    #[arg(long)]
    pub hostname: Option<String>,

    #[arg(long)]
    pub username: Option<String>,

    #[arg(long)]
    pub password: Option<String>,

    /// Pre-built seed disk to attach at boot
    #[arg(long)]
    pub seed_image: Option<String>,

    /// Re-create over an existing stopped VM (kept if the new one fails)
    #[arg(long)]
    pub replace: bool,
}

impl From<CreateArgs> for CreateOptions {
    fn from(args: CreateArgs) -> Self {
        CreateOptions {
            disk_size: args.disk_size,
            memory_mb: args.memory,
            cpus: args.cpus,
            ssh_port: args.ssh_port,
            forwards: args.forwards,
            gui: args.gui,
            accel: args.accel,
            hostname: args.hostname,
            username: args.username,
            password: args.password,
            seed_image: args.seed_image,
            replace: args.replace,
        }
    }
}

impl Command {
    /// Commands that change VM state get the operations log and a dependency check.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Command::Create(_)
                | Command::Start { .. }
                | Command::Stop { .. }
                | Command::Delete { .. }
                | Command::Menu
        )
    }
}
