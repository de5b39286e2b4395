//! Runtime snapshot of the current process
//!
//! Collects what a container runtime would have configured for this
//! process (user, capabilities, rlimits, mounts, ID mappings, sysctls) into
//! an OCI runtime-spec shaped document. Tests run the snapshot inside a
//! container and compare it with the configuration they expect.
//!
//! Every list is produced in a fixed order so two snapshots of the same
//! environment serialize identically.

mod proc;

pub use proc::{decode_capabilities, parse_mountinfo, CAPABILITIES, RLIMITS};

use crate::builder::idmap::parse_id_map;
use crate::error::{StowageError, StowageResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::IsTerminal;
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

/// Runtime-spec version the snapshot follows
pub const OCI_VERSION: &str = "1.2.0";

/// Top-level document written by `stowage-testreport`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spec: Option<Spec>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Spec {
    pub oci_version: String,
    pub process: Process,
    pub hostname: String,
    pub mounts: Vec<Mount>,
    pub linux: Linux,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Process {
    pub terminal: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub console_size: Option<ConsoleSize>,
    pub user: User,
    pub args: Vec<String>,
    pub env: Vec<String>,
    pub cwd: String,
    pub capabilities: Capabilities,
    pub rlimits: Vec<Rlimit>,
    pub no_new_privileges: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oom_score_adj: Option<i32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleSize {
    pub height: u16,
    pub width: u16,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub uid: u32,
    pub gid: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub additional_gids: Vec<u32>,
}

/// Capability names held in each set, in kernel bit order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub bounding: Vec<String>,
    pub effective: Vec<String>,
    pub inheritable: Vec<String>,
    pub permitted: Vec<String>,
    pub ambient: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rlimit {
    #[serde(rename = "type")]
    pub kind: String,
    pub hard: u64,
    pub soft: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    pub destination: String,
    #[serde(rename = "type")]
    pub fs_type: String,
    pub source: String,
    pub options: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Linux {
    pub uid_mappings: Vec<LinuxIdMapping>,
    pub gid_mappings: Vec<LinuxIdMapping>,
    pub sysctl: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinuxIdMapping {
    #[serde(rename = "containerID")]
    pub container_id: u32,
    #[serde(rename = "hostID")]
    pub host_id: u32,
    pub size: u32,
}

impl TestReport {
    /// Snapshot the calling process
    pub fn collect() -> StowageResult<Self> {
        let spec = Spec {
            oci_version: OCI_VERSION.to_string(),
            process: collect_process()?,
            hostname: proc::hostname()?,
            mounts: collect_mounts(Path::new("/proc/self/mountinfo"))?,
            linux: collect_linux()?,
        };
        Ok(Self { spec: Some(spec) })
    }
}

fn collect_process() -> StowageResult<Process> {
    let terminal = std::io::stdin().is_terminal();
    let console_size = if terminal { proc::console_size()? } else { None };

    let status_path = Path::new("/proc/self/status");
    let status = read(status_path)?;

    Ok(Process {
        terminal,
        console_size,
        user: proc::user()?,
        args: std::env::args().collect(),
        env: std::env::vars_os()
            .map(|(k, v)| format!("{}={}", k.to_string_lossy(), v.to_string_lossy()))
            .collect(),
        cwd: std::env::current_dir()
            .map_err(|e| StowageError::io("determining current working directory", e))?
            .display()
            .to_string(),
        capabilities: capabilities_from_status(status_path, &status)?,
        rlimits: proc::rlimits()?,
        no_new_privileges: proc::no_new_privileges()?,
        oom_score_adj: read_oom_score_adj(Path::new("/proc/self/oom_score_adj"))?,
    })
}

fn collect_mounts(path: &Path) -> StowageResult<Vec<Mount>> {
    parse_mountinfo(path, &read(path)?)
}

fn collect_linux() -> StowageResult<Linux> {
    Ok(Linux {
        uid_mappings: read_id_mappings(Path::new("/proc/self/uid_map"))?,
        gid_mappings: read_id_mappings(Path::new("/proc/self/gid_map"))?,
        sysctl: read_sysctls(Path::new("/proc/sys"))?,
    })
}

fn read(path: &Path) -> StowageResult<String> {
    std::fs::read_to_string(path).map_err(|e| StowageError::io(format!("reading {}", path.display()), e))
}

/// Decode the `Cap*` masks of a `/proc/<pid>/status` file
pub fn capabilities_from_status(path: &Path, status: &str) -> StowageResult<Capabilities> {
    let mut caps = Capabilities::default();
    for line in status.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let set = match key {
            "CapInh" => &mut caps.inheritable,
            "CapPrm" => &mut caps.permitted,
            "CapEff" => &mut caps.effective,
            "CapBnd" => &mut caps.bounding,
            "CapAmb" => &mut caps.ambient,
            _ => continue,
        };
        let mask = u64::from_str_radix(value.trim(), 16).map_err(|e| StowageError::Snapshot {
            path: path.to_path_buf(),
            reason: format!("parsing {} mask {:?}: {}", key, value.trim(), e),
        })?;
        *set = decode_capabilities(mask);
    }
    Ok(caps)
}

/// Read `oom_score_adj`; zero is reported as unset
pub fn read_oom_score_adj(path: &Path) -> StowageResult<Option<i32>> {
    let content = read(path)?;
    let fields: Vec<&str> = content.split_whitespace().collect();
    if fields.len() != 1 {
        return Err(StowageError::Snapshot {
            path: path.to_path_buf(),
            reason: format!("expected to find only one field in {:?}", content),
        });
    }
    let score: i32 = fields[0].parse().map_err(|e| StowageError::Snapshot {
        path: path.to_path_buf(),
        reason: format!("parsing {:?}: {}", fields[0], e),
    })?;
    Ok((score != 0).then_some(score))
}

fn read_id_mappings(path: &Path) -> StowageResult<Vec<LinuxIdMapping>> {
    let maps = parse_id_map(&read(path)?).map_err(|e| StowageError::Snapshot {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(maps
        .into_iter()
        .map(|m| LinuxIdMapping {
            container_id: m.container_id,
            host_id: m.host_id,
            size: m.size,
        })
        .collect())
}

/// Read every sysctl under `root`, keyed by dotted name
///
/// Entries the process may not read are skipped.
pub fn read_sysctls(root: &Path) -> StowageResult<BTreeMap<String, String>> {
    let mut sysctls = BTreeMap::new();

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!("Skipping sysctl walk error: {}", e);
                continue;
            }
        };
        if entry.file_type().is_dir() {
            continue;
        }

        let value = match std::fs::read(entry.path()) {
            Ok(value) => value,
            Err(e) if is_unreadable(&e) => continue,
            Err(e) => return Err(StowageError::io(format!("reading sysctl {}", entry.path().display()), e)),
        };

        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        let key = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join(".");
        sysctls.insert(key, sysctl_value(&value));
    }

    Ok(sysctls)
}

fn is_unreadable(e: &std::io::Error) -> bool {
    matches!(
        e.raw_os_error(),
        Some(libc::EACCES | libc::EINVAL | libc::EIO | libc::EPERM | libc::ENOENT | libc::EOPNOTSUPP)
    )
}

/// Strip the trailing newline unless the value spans several lines
fn sysctl_value(raw: &[u8]) -> String {
    let value = String::from_utf8_lossy(raw);
    let trimmed = value.trim_end_matches(['\r', '\n']);
    if trimmed.contains(['\r', '\n']) {
        value.into_owned()
    } else {
        trimmed.to_string()
    }
}
