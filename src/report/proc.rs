//! Process attributes read through libc and procfs

use super::{ConsoleSize, Mount, Rlimit, User};
use crate::error::{StowageError, StowageResult};
use std::path::Path;

/// Capability names indexed by kernel bit number
pub const CAPABILITIES: &[&str] = &[
    "CAP_CHOWN",
    "CAP_DAC_OVERRIDE",
    "CAP_DAC_READ_SEARCH",
    "CAP_FOWNER",
    "CAP_FSETID",
    "CAP_KILL",
    "CAP_SETGID",
    "CAP_SETUID",
    "CAP_SETPCAP",
    "CAP_LINUX_IMMUTABLE",
    "CAP_NET_BIND_SERVICE",
    "CAP_NET_BROADCAST",
    "CAP_NET_ADMIN",
    "CAP_NET_RAW",
    "CAP_IPC_LOCK",
    "CAP_IPC_OWNER",
    "CAP_SYS_MODULE",
    "CAP_SYS_RAWIO",
    "CAP_SYS_CHROOT",
    "CAP_SYS_PTRACE",
    "CAP_SYS_PACCT",
    "CAP_SYS_ADMIN",
    "CAP_SYS_BOOT",
    "CAP_SYS_NICE",
    "CAP_SYS_RESOURCE",
    "CAP_SYS_TIME",
    "CAP_SYS_TTY_CONFIG",
    "CAP_MKNOD",
    "CAP_LEASE",
    "CAP_AUDIT_WRITE",
    "CAP_AUDIT_CONTROL",
    "CAP_SETFCAP",
    "CAP_MAC_OVERRIDE",
    "CAP_MAC_ADMIN",
    "CAP_SYSLOG",
    "CAP_WAKE_ALARM",
    "CAP_BLOCK_SUSPEND",
    "CAP_AUDIT_READ",
    "CAP_PERFMON",
    "CAP_BPF",
    "CAP_CHECKPOINT_RESTORE",
];

/// Resource limits reported, in output order
pub const RLIMITS: &[(&str, libc::__rlimit_resource_t)] = &[
    ("RLIMIT_AS", libc::RLIMIT_AS),
    ("RLIMIT_CORE", libc::RLIMIT_CORE),
    ("RLIMIT_CPU", libc::RLIMIT_CPU),
    ("RLIMIT_DATA", libc::RLIMIT_DATA),
    ("RLIMIT_FSIZE", libc::RLIMIT_FSIZE),
    ("RLIMIT_LOCKS", libc::RLIMIT_LOCKS),
    ("RLIMIT_MEMLOCK", libc::RLIMIT_MEMLOCK),
    ("RLIMIT_MSGQUEUE", libc::RLIMIT_MSGQUEUE),
    ("RLIMIT_NICE", libc::RLIMIT_NICE),
    ("RLIMIT_NOFILE", libc::RLIMIT_NOFILE),
    ("RLIMIT_NPROC", libc::RLIMIT_NPROC),
    ("RLIMIT_RSS", libc::RLIMIT_RSS),
    ("RLIMIT_RTPRIO", libc::RLIMIT_RTPRIO),
    ("RLIMIT_RTTIME", libc::RLIMIT_RTTIME),
    ("RLIMIT_SIGPENDING", libc::RLIMIT_SIGPENDING),
    ("RLIMIT_STACK", libc::RLIMIT_STACK),
];

/// Names of the capabilities set in `mask`, lowest bit first
///
/// Bits beyond the known list are ignored.
pub fn decode_capabilities(mask: u64) -> Vec<String> {
    CAPABILITIES
        .iter()
        .enumerate()
        .filter(|(bit, _)| mask & (1u64 << bit) != 0)
        .map(|(_, name)| name.to_string())
        .collect()
}

pub(super) fn hostname() -> StowageResult<String> {
    let mut buf = [0u8; 256];
    // SAFETY: the buffer is valid for its full length
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
    if rc != 0 {
        return Err(StowageError::io("reading hostname", std::io::Error::last_os_error()));
    }
    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    Ok(String::from_utf8_lossy(&buf[..len]).into_owned())
}

pub(super) fn console_size() -> StowageResult<Option<ConsoleSize>> {
    // SAFETY: winsize is plain data and TIOCGWINSZ only writes into it
    let mut ws: libc::winsize = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::ioctl(libc::STDIN_FILENO, libc::TIOCGWINSZ, &mut ws) };
    if rc != 0 {
        return Err(StowageError::io(
            "reading size of terminal on stdin",
            std::io::Error::last_os_error(),
        ));
    }
    Ok(Some(ConsoleSize {
        height: ws.ws_row,
        width: ws.ws_col,
    }))
}

pub(super) fn user() -> StowageResult<User> {
    // SAFETY: getuid/getgid cannot fail; getgroups is sized by its first call
    let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };

    let count = unsafe { libc::getgroups(0, std::ptr::null_mut()) };
    if count < 0 {
        return Err(StowageError::io(
            "reading supplemental groups list",
            std::io::Error::last_os_error(),
        ));
    }
    let mut groups: Vec<libc::gid_t> = vec![0; count as usize];
    let count = unsafe { libc::getgroups(count, groups.as_mut_ptr()) };
    if count < 0 {
        return Err(StowageError::io(
            "reading supplemental groups list",
            std::io::Error::last_os_error(),
        ));
    }
    groups.truncate(count as usize);

    Ok(User {
        uid,
        gid,
        additional_gids: groups,
    })
}

/// Limits that are not unlimited in both soft and hard values
pub(super) fn rlimits() -> StowageResult<Vec<Rlimit>> {
    let mut limits = Vec::new();
    for &(name, resource) in RLIMITS {
        let mut rlim = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        // SAFETY: rlim is a valid out pointer
        if unsafe { libc::getrlimit(resource, &mut rlim) } != 0 {
            return Err(StowageError::io(
                format!("reading {} limit", name),
                std::io::Error::last_os_error(),
            ));
        }
        if rlim.rlim_cur == libc::RLIM_INFINITY && rlim.rlim_max == libc::RLIM_INFINITY {
            continue;
        }
        limits.push(Rlimit {
            kind: name.to_string(),
            hard: rlim.rlim_max as u64,
            soft: rlim.rlim_cur as u64,
        });
    }
    Ok(limits)
}

pub(super) fn no_new_privileges() -> StowageResult<bool> {
    let zero: libc::c_ulong = 0;
    // SAFETY: PR_GET_NO_NEW_PRIVS takes no pointers
    let rc = unsafe { libc::prctl(libc::PR_GET_NO_NEW_PRIVS, zero, zero, zero, zero) };
    if rc < 0 {
        return Err(StowageError::io(
            "reading no-new-privs bit",
            std::io::Error::last_os_error(),
        ));
    }
    Ok(rc != 0)
}

/// Parse a `/proc/<pid>/mountinfo` table
pub fn parse_mountinfo(path: &Path, content: &str) -> StowageResult<Vec<Mount>> {
    let bad = |line: &str, reason: &str| StowageError::Snapshot {
        path: path.to_path_buf(),
        reason: format!("{} in line {:?}", reason, line),
    };

    let mut mounts = Vec::new();
    for line in content.lines().filter(|l| !l.trim().is_empty()) {
        let (pre, post) = line
            .split_once(" - ")
            .ok_or_else(|| bad(line, "missing separator"))?;
        let pre: Vec<&str> = pre.split(' ').collect();
        let post: Vec<&str> = post.split(' ').collect();
        if pre.len() < 6 || post.len() < 2 {
            return Err(bad(line, "too few fields"));
        }

        mounts.push(Mount {
            destination: unescape(pre[4]),
            fs_type: post[0].to_string(),
            source: unescape(post[1]),
            options: pre[5].split(',').map(str::to_string).collect(),
        });
    }
    Ok(mounts)
}

/// Decode the `\NNN` octal escapes procfs uses for whitespace
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let octal = bytes.get(i + 1..i + 4).filter(|d| d.iter().all(|b| (b'0'..=b'7').contains(b)));
        if let (b'\\', Some(digits)) = (bytes[i], octal) {
            let value = digits.iter().fold(0u32, |acc, d| acc * 8 + u32::from(d - b'0'));
            if let Ok(byte) = u8::try_from(value) {
                out.push(byte);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
