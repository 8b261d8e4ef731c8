//! Interactive front end over the lifecycle operations.

use std::fmt;

use inquire::validator::Validation;
use inquire::{Confirm, CustomType, Select, Text};

use crate::catalog;
use crate::config;
use crate::error::VmError;
use crate::lifecycle::{LifecycleManager, StartOutcome, StopOutcome};
use crate::provision::CreateOptions;
use crate::ui;
use crate::util::parse_size;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    List,
    Create,
    Start,
    Stop,
    Delete,
    Quit,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::List => "List VMs",
            Action::Create => "Create a VM",
            Action::Start => "Start a VM",
            Action::Stop => "Stop a VM",
            Action::Delete => "Delete a VM",
            Action::Quit => "Quit",
        })
    }
}

const ACTIONS: &[Action] = &[
    Action::List,
    Action::Create,
    Action::Start,
    Action::Stop,
    Action::Delete,
    Action::Quit,
];

pub async fn run(manager: &LifecycleManager) -> Result<(), VmError> {
    loop {
        println!();
        let action = top_level_choice(
            Select::new("What do you want to do?", ACTIONS.to_vec()).prompt(),
        )?;

        // Errors from one action are shown and the menu continues.
        let result = match action {
            Action::List => list(manager),
            Action::Create => create(manager).await,
            Action::Start => start(manager).await,
            Action::Stop => stop(manager).await,
            Action::Delete => delete(manager).await,
            Action::Quit => return Ok(()),
        };

        match result {
            Ok(()) => {}
            Err(VmError::Cancelled) => ui::info("cancelled"),
            Err(e) => ui::warn(e),
        }
    }
}

fn list(manager: &LifecycleManager) -> Result<(), VmError> {
    let statuses = manager.list_status()?;
    if statuses.is_empty() {
        ui::info("no VMs yet");
    } else {
        ui::print_status_table(&statuses);
    }
    Ok(())
}

async fn create(manager: &LifecycleManager) -> Result<(), VmError> {
    let name = Text::new("VM name:")
        .with_validator(|input: &str| {
            Ok(match config::validate_name(input) {
                Ok(()) => Validation::Valid,
                Err(e) => Validation::Invalid(e.to_string().into()),
            })
        })
        .prompt()
        .map_err(map_inquire_err)?;

    let entry = Select::new("OS image:", catalog::entries().to_vec())
        .with_help_message("Type to filter")
        .prompt()
        .map_err(map_inquire_err)?;

    let disk_size = Text::new("Disk size:")
        .with_default("20G")
        .with_validator(|input: &str| {
            Ok(match parse_size(input) {
                Ok(_) => Validation::Valid,
                Err(e) => Validation::Invalid(e.to_string().into()),
            })
        })
        .prompt()
        .map_err(map_inquire_err)?;

    let memory_mb: u64 = CustomType::new("Memory (MiB):")
        .with_default(2048)
        .with_error_message("Please enter a valid number")
        .with_validator(|val: &u64| {
            Ok(if *val >= 256 {
                Validation::Valid
            } else {
                Validation::Invalid("Must be at least 256".into())
            })
        })
        .prompt()
        .map_err(map_inquire_err)?;

    let cpus: u32 = CustomType::new("CPUs:")
        .with_default(2)
        .with_error_message("Please enter a valid number")
        .with_validator(|val: &u32| {
            Ok(if *val >= 1 {
                Validation::Valid
            } else {
                Validation::Invalid("Must be at least 1".into())
            })
        })
        .prompt()
        .map_err(map_inquire_err)?;

    let opts = CreateOptions {
        disk_size: Some(disk_size),
        memory_mb: Some(memory_mb),
        cpus: Some(cpus),
        ..Default::default()
    };

    let config = manager.create(&name, entry.label, &opts).await?;
    ui::success(format!(
        "created '{}' ({} {})",
        config.name, config.image.os_family, config.image.release_codename
    ));
    Ok(())
}

fn pick_vm(manager: &LifecycleManager, prompt: &str) -> Result<Option<String>, VmError> {
    let names = manager.list()?;
    if names.is_empty() {
        ui::info("no VMs yet");
        return Ok(None);
    }
    Select::new(prompt, names)
        .prompt()
        .map(Some)
        .map_err(map_inquire_err)
}

async fn start(manager: &LifecycleManager) -> Result<(), VmError> {
    let Some(name) = pick_vm(manager, "Start which VM?")? else {
        return Ok(());
    };
    match manager.start(&name).await? {
        StartOutcome::Started(pid) => ui::success(format!("started '{name}' (pid {pid})")),
        StartOutcome::AlreadyRunning(pid) => {
            ui::info(format!("'{name}' is already running (pid {pid})"))
        }
    }
    Ok(())
}

async fn stop(manager: &LifecycleManager) -> Result<(), VmError> {
    let Some(name) = pick_vm(manager, "Stop which VM?")? else {
        return Ok(());
    };
    match manager.stop(&name).await? {
        StopOutcome::Stopped => ui::success(format!("stopped '{name}'")),
        StopOutcome::NotRunning => ui::info(format!("'{name}' is not running")),
    }
    Ok(())
}

async fn delete(manager: &LifecycleManager) -> Result<(), VmError> {
    let Some(name) = pick_vm(manager, "Delete which VM?")? else {
        return Ok(());
    };

    let confirmed = Confirm::new(&format!("Delete '{name}' and all of its disks?"))
        .with_default(false)
        .prompt()
        .map_err(map_inquire_err)?;
    if !confirmed {
        return Err(VmError::Cancelled);
    }

    let force = if manager.is_running(&name)? {
        Confirm::new(&format!("'{name}' is running. Stop it first?"))
            .with_default(false)
            .prompt()
            .map_err(map_inquire_err)?
    } else {
        false
    };

    manager.delete(&name, force).await?;
    ui::success(format!("deleted '{name}'"));
    Ok(())
}

/// Esc or Ctrl-C at the top prompt leaves the menu the same way Quit does.
fn top_level_choice(choice: Result<Action, inquire::InquireError>) -> Result<Action, VmError> {
    match choice.map_err(map_inquire_err) {
        Err(VmError::Cancelled) => Ok(Action::Quit),
        other => other,
    }
}

fn map_inquire_err(e: inquire::InquireError) -> VmError {
    match e {
        inquire::InquireError::OperationCanceled | inquire::InquireError::OperationInterrupted => {
            VmError::Cancelled
        }
        other => VmError::Validation {
            message: format!("prompt error: {other}"),
        },
    }
}
