use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum VmError {
    #[error("invalid VM name '{name}'")]
    #[diagnostic(
        code(cirrus::invalid_name),
        help("names may only contain letters, digits, '-' and '_'")
    )]
    InvalidName { name: String },

    #[error("VM '{name}' already exists")]
    #[diagnostic(
        code(cirrus::already_exists),
        help("delete it first, or pass --replace to re-create a stopped VM")
    )]
    AlreadyExists { name: String },

    #[error("VM '{name}' not found")]
    #[diagnostic(code(cirrus::not_found), help("run `cirrus list` to see known VMs"))]
    NotFound { name: String },

    #[error("unknown OS '{label}'{}", vm_suffix(.name))]
    #[diagnostic(code(cirrus::unknown_os), help("run `cirrus os` to list available images"))]
    UnknownOs { name: String, label: String },

    #[error("failed to download base image for VM '{name}': {message}")]
    #[diagnostic(code(cirrus::download_failed))]
    DownloadFailed {
        name: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("failed to launch hypervisor for VM '{name}': {message}")]
    #[diagnostic(code(cirrus::launch_failed))]
    LaunchFailed { name: String, message: String },

    #[error("VM '{name}' is running (pid {pid})")]
    #[diagnostic(
        code(cirrus::vm_running),
        help("stop it first with `cirrus stop`, or pass --force")
    )]
    VmRunning { name: String, pid: u32 },

    #[error("VM '{name}' is missing {artifact} at {path}")]
    #[diagnostic(
        code(cirrus::partial_artifact),
        help("the VM was not fully created; delete it and create it again")
    )]
    PartialArtifact {
        name: String,
        artifact: String,
        path: String,
    },

    #[error("failed to parse config from {path}: {message}")]
    ConfigParse { path: String, message: String },

    #[error("record at {path} belongs to VM '{found}', not '{name}'")]
    #[diagnostic(code(cirrus::name_mismatch))]
    NameMismatch {
        name: String,
        found: String,
        path: String,
    },

    #[error("failed to write config to {path}")]
    ConfigWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to load settings from {path}")]
    SettingsLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} failed: {message}")]
    ExternalCommand { command: String, message: String },

    #[error("missing required tools: {}", .missing.join(", "))]
    #[diagnostic(
        code(cirrus::missing_dependencies),
        help("install QEMU (qemu-system-x86_64 and qemu-img) or point settings.toml at them")
    )]
    MissingDependencies { missing: Vec<String> },

    #[error("cancelled")]
    Cancelled,
}

fn vm_suffix(name: &str) -> String {
    if name.is_empty() {
        String::new()
    } else {
        format!(" for VM '{name}'")
    }
}

impl VmError {
    /// Short machine-readable kind, used in JSON output and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            VmError::InvalidName { .. } => "InvalidName",
            VmError::AlreadyExists { .. } => "AlreadyExists",
            VmError::NotFound { .. } => "NotFound",
            VmError::UnknownOs { .. } => "UnknownOS",
            VmError::DownloadFailed { .. } => "DownloadFailed",
            VmError::LaunchFailed { .. } => "LaunchFailed",
            VmError::VmRunning { .. } => "VMRunning",
            VmError::PartialArtifact { .. } => "PartialArtifact",
            VmError::ConfigParse { .. } => "ConfigParse",
            VmError::NameMismatch { .. } => "NameMismatch",
            VmError::ConfigWrite { .. } => "ConfigWrite",
            VmError::SettingsLoad { .. } => "SettingsLoad",
            VmError::Validation { .. } => "Validation",
            VmError::Io { .. } => "Io",
            VmError::ExternalCommand { .. } => "ExternalCommand",
            VmError::MissingDependencies { .. } => "MissingDependencies",
            VmError::Cancelled => "Cancelled",
        }
    }

    /// Build an `Io` error with a context message.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        VmError::Io {
            context: context.into(),
            source,
        }
    }
}
