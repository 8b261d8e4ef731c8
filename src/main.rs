use clap::Parser;

use cirrus::catalog;
use cirrus::cli::{Cli, Command};
use cirrus::config::{self, Settings};
use cirrus::deps;
use cirrus::error::VmError;
use cirrus::lifecycle::{LifecycleManager, StartOutcome, StopOutcome};
use cirrus::logging;
use cirrus::paths;
use cirrus::ui;

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    let ops_log = logging::init(cli.verbose);

    let settings = load_settings(&cli)?;
    let manager = LifecycleManager::from_settings(&settings);

    if cli.command.is_mutating() {
        deps::check(&settings)?;
        let log_path = manager.paths().ops_log_path();
        if let Err(e) = ops_log.open(&log_path) {
            tracing::warn!(path = %log_path.display(), error = %e, "operations log unavailable");
        }
        tracing::debug!(command = ?cli.command, "running command");
    }

    if let Err(e) = run(cli.command, &settings, &manager).await {
        tracing::debug!(kind = e.kind(), error = %e, "command failed");
        return Err(e.into());
    }
    Ok(())
}

async fn run(
    command: Command,
    settings: &Settings,
    manager: &LifecycleManager,
) -> Result<(), VmError> {
    match command {
        Command::List { long, json } => {
            if json {
                let statuses = manager.list_status()?;
                println!("{}", to_json(&statuses)?);
            } else if long {
                let statuses = manager.list_status()?;
                if statuses.is_empty() {
                    ui::info("no VMs");
                } else {
                    ui::print_status_table(&statuses);
                }
            } else {
                for name in manager.list()? {
                    println!("{name}");
                }
            }
        }
        Command::Create(args) => {
            let name = args.name.clone();
            let os = args.os.clone();
            let config = manager.create(&name, &os, &args.into()).await?;
            ui::success(format!(
                "created '{}' ({} {}, disk {})",
                config.name,
                config.image.os_family,
                config.image.release_codename,
                config.disk.size
            ));
            ui::info(format!("start it with `cirrus start {}`", config.name));
        }
        Command::Start { name } => match manager.start(&name).await? {
            StartOutcome::Started(pid) => {
                let ssh_port = manager.store().load(&name)?.network.ssh_port;
                ui::success(format!("started '{name}' (pid {pid})"));
                ui::info(format!("ssh -p {ssh_port} <user>@localhost"));
            }
            StartOutcome::AlreadyRunning(pid) => {
                ui::info(format!("'{name}' is already running (pid {pid})"));
            }
        },
        Command::Stop { name } => match manager.stop(&name).await? {
            StopOutcome::Stopped => ui::success(format!("stopped '{name}'")),
            StopOutcome::NotRunning => ui::info(format!("'{name}' is not running")),
        },
        Command::Delete { name, force } => {
            manager.delete(&name, force).await?;
            ui::success(format!("deleted '{name}'"));
        }
        Command::Status { name, json } => {
            let status = manager.status(&name)?;
            if json {
                println!("{}", to_json(&status)?);
            } else {
                ui::print_status(&status);
            }
        }
        Command::Os { query } => {
            let entries = catalog::filter(query.as_deref());
            if entries.is_empty() {
                ui::warn("no matching OS images");
            } else {
                ui::print_catalog(&entries);
            }
        }
        Command::Log { name } => {
            let path = manager.log_path(&name)?;
            match std::fs::read_to_string(&path) {
                Ok(contents) => print!("{contents}"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    ui::info(format!("'{name}' has no hypervisor log yet"));
                }
                Err(e) => {
                    return Err(VmError::io(format!("reading {}", path.display()), e));
                }
            }
        }
        Command::Check => {
            for (program, found) in deps::probe(settings) {
                match found {
                    Some(path) => ui::success(format!("{program}: {}", path.display())),
                    None => ui::warn(format!("{program}: not found")),
                }
            }
            deps::check(settings)?;
        }
        Command::Menu => cirrus::menu::run(manager).await?,
    }

    Ok(())
}

/// Settings file, then flag overrides.
fn load_settings(cli: &Cli) -> Result<Settings, VmError> {
    let path = cli
        .settings
        .clone()
        .unwrap_or_else(paths::default_settings_path);
    let mut settings = config::load_settings(&path)?;
    if let Some(dir) = &cli.vm_dir {
        settings.vm_dir = dir.display().to_string();
    }
    tracing::debug!(vm_dir = %settings.vm_dir().display(), "settings loaded");
    Ok(settings)
}

fn to_json<'a, T: facet::Facet<'a>>(value: &T) -> Result<String, VmError> {
    facet_json::to_string(value).map_err(|e| VmError::Validation {
        message: format!("JSON serialization failed: {e}"),
    })
}
