//! Colored terminal output for the CLI and menu.

use console::style;

use crate::catalog::CatalogEntry;
use crate::lifecycle::VmStatus;
use crate::util;

pub fn success(msg: impl std::fmt::Display) {
    println!("{} {msg}", style("✓").green().bold());
}

pub fn info(msg: impl std::fmt::Display) {
    println!("{} {msg}", style("•").cyan());
}

pub fn warn(msg: impl std::fmt::Display) {
    eprintln!("{} {msg}", style("!").yellow().bold());
}

pub fn state_label(state: &str) -> String {
    match state {
        "running" => style(state).green().to_string(),
        "stopped" => style(state).yellow().to_string(),
        _ => style(state).dim().to_string(),
    }
}

pub fn print_status_table(statuses: &[VmStatus]) {
    println!(
        "{:<20} {:<9} {:<8} {:<20} {:>6} {:>4} {:>6}",
        style("NAME").bold(),
        style("STATE").bold(),
        style("PID").bold(),
        style("OS").bold(),
        style("MEM").bold(),
        style("CPU").bold(),
        style("SSH").bold(),
    );
    for s in statuses {
        let os = format!("{} {}", s.config.image.os_family, s.config.image.release_codename);
        let state = state_label(&s.state);
        // Pad the raw text, not the styled string with its escape codes.
        let pad = 9usize.saturating_sub(s.state.len());
        println!(
            "{:<20} {state}{:pad$} {:<8} {:<20} {:>6} {:>4} {:>6}",
            s.name,
            "",
            s.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".into()),
            os,
            s.config.resources.memory_mb,
            s.config.resources.cpus,
            s.config.network.ssh_port,
        );
    }
}

pub fn print_status(s: &VmStatus) {
    let c = &s.config;
    println!("{}", style(&s.name).bold());
    println!("  state:    {}", state_label(&s.state));
    if let Some(pid) = s.pid {
        println!("  pid:      {pid}");
    }
    println!(
        "  os:       {} {}",
        c.image.os_family, c.image.release_codename
    );
    println!("  hostname: {}", c.hostname());
    println!("  created:  {}", c.created_at);
    println!(
        "  disk:     {} ({})",
        c.disk.path,
        util::parse_size(&c.disk.size)
            .map(util::format_size)
            .unwrap_or_else(|_| c.disk.size.clone())
    );
    println!(
        "  memory:   {} MiB, {} CPU(s)",
        c.resources.memory_mb, c.resources.cpus
    );
    let mut ports = format!("ssh -> {}", c.network.ssh_port);
    for fwd in &c.network.forwards {
        ports.push_str(&format!(", {} -> {}", fwd.host, fwd.guest));
    }
    println!("  ports:    {ports}");
    if let Some(seed) = &c.seed_image {
        println!("  seed:     {seed}");
    }
}

pub fn print_catalog(entries: &[&CatalogEntry]) {
    for e in entries {
        println!(
            "{:<20} {}",
            style(e.label).bold(),
            style(format!("{}/{}", e.family, e.codename)).dim()
        );
    }
}
