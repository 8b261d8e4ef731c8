use std::fmt;

use crate::error::VmError;

/// One selectable OS image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogEntry {
    pub label: &'static str,
    pub family: &'static str,
    pub codename: &'static str,
    pub url: &'static str,
}

impl fmt::Display for CatalogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label)
    }
}

// ── Built-in catalog ─────────────────────────────────────

const CATALOG: &[CatalogEntry] = &[
    CatalogEntry {
        label: "Ubuntu 24.04",
        family: "ubuntu",
        codename: "noble",
        url: "https://cloud-images.ubuntu.com/noble/current/noble-server-cloudimg-amd64.img",
    },
    CatalogEntry {
        label: "Ubuntu 22.04",
        family: "ubuntu",
        codename: "jammy",
        url: "https://cloud-images.ubuntu.com/jammy/current/jammy-server-cloudimg-amd64.img",
    },
    CatalogEntry {
        label: "Ubuntu 20.04",
        family: "ubuntu",
        codename: "focal",
        url: "https://cloud-images.ubuntu.com/focal/current/focal-server-cloudimg-amd64.img",
    },
    CatalogEntry {
        label: "Debian 12",
        family: "debian",
        codename: "bookworm",
        url: "https://cloud.debian.org/images/cloud/bookworm/latest/debian-12-generic-amd64.qcow2",
    },
    CatalogEntry {
        label: "Debian 11",
        family: "debian",
        codename: "bullseye",
        url: "https://cloud.debian.org/images/cloud/bullseye/latest/debian-11-generic-amd64.qcow2",
    },
    CatalogEntry {
        label: "Fedora 43",
        family: "fedora",
        codename: "43",
        url: "https://download.fedoraproject.org/pub/fedora/linux/releases/43/Cloud/x86_64/images/Fedora-Cloud-Base-Generic-43-1.6.x86_64.qcow2",
    },
    CatalogEntry {
        label: "Rocky Linux 9",
        family: "rocky",
        codename: "9",
        url: "https://dl.rockylinux.org/pub/rocky/9/images/x86_64/Rocky-9-GenericCloud-Base.latest.x86_64.qcow2",
    },
    CatalogEntry {
        label: "AlmaLinux 9",
        family: "almalinux",
        codename: "9",
        url: "https://repo.almalinux.org/almalinux/9/cloud/x86_64/images/AlmaLinux-9-GenericCloud-latest.x86_64.qcow2",
    },
    CatalogEntry {
        label: "CentOS Stream 9",
        family: "centos",
        codename: "stream9",
        url: "https://cloud.centos.org/centos/9-stream/x86_64/images/CentOS-Stream-GenericCloud-9-latest.x86_64.qcow2",
    },
    CatalogEntry {
        label: "openSUSE Leap 15.6",
        family: "opensuse",
        codename: "leap-15.6",
        url: "https://download.opensuse.org/distribution/leap/15.6/appliances/openSUSE-Leap-15.6-Minimal-VM.x86_64-Cloud.qcow2",
    },
    CatalogEntry {
        label: "Arch Linux",
        family: "arch",
        codename: "latest",
        url: "https://geo.mirror.pkgbuild.com/images/latest/Arch-Linux-x86_64-cloudimg.qcow2",
    },
    CatalogEntry {
        label: "Alpine Linux 3.21",
        family: "alpine",
        codename: "3.21",
        url: "https://dl-cdn.alpinelinux.org/alpine/v3.21/releases/cloud/nocloud_alpine-3.21.3-x86_64-bios-cloudinit-r0.qcow2",
    },
];

/// All entries, in menu order.
pub fn entries() -> &'static [CatalogEntry] {
    CATALOG
}

/// Look up an entry by label. Exact match wins; otherwise a case-insensitive
/// match is accepted so `ubuntu 24.04` works on the command line.
pub fn resolve(label: &str) -> Result<&'static CatalogEntry, VmError> {
    let label = label.trim();
    CATALOG
        .iter()
        .find(|e| e.label == label)
        .or_else(|| CATALOG.iter().find(|e| e.label.eq_ignore_ascii_case(label)))
        .ok_or_else(|| VmError::UnknownOs {
            name: String::new(),
            label: label.to_string(),
        })
}

// ── Filtering ────────────────────────────────────────────

pub fn filter(query: Option<&str>) -> Vec<&'static CatalogEntry> {
    match query {
        None | Some("") => CATALOG.iter().collect(),
        Some(q) => {
            let q_lower = q.to_lowercase();
            CATALOG
                .iter()
                .filter(|e| {
                    e.label.to_lowercase().contains(&q_lower)
                        || e.family.contains(&q_lower)
                        || e.codename.contains(&q_lower)
                })
                .collect()
        }
    }
}

// ── Tests ────────────────────────────────────────────────
