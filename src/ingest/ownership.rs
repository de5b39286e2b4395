//! Ownership of ingested content
//!
//! `--chown` names are resolved against the target's `/etc/passwd` and
//! `/etc/group`, never the host's. All owners here are in the container's
//! ID namespace until [`OwnerPolicy::host_owner`] translates them.

use crate::builder::{IdMappings, Owner};
use crate::error::{StowageError, StowageResult};
use std::fs;
use std::path::Path;

/// A user or group given by number or by name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdRef {
    Id(u32),
    Name(String),
}

impl IdRef {
    fn parse(value: &str) -> Self {
        match value.parse::<u32>() {
            Ok(id) => IdRef::Id(id),
            Err(_) => IdRef::Name(value.to_string()),
        }
    }
}

/// Parsed `--chown user[:group]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChownSpec {
    pub user: IdRef,
    pub group: Option<IdRef>,
    raw: String,
}

impl ChownSpec {
    pub fn parse(value: &str) -> StowageResult<Self> {
        let invalid = |reason: &str| StowageError::InvalidChown {
            value: value.to_string(),
            reason: reason.to_string(),
        };

        let (user, group) = match value.split_once(':') {
            Some((user, group)) => (user, Some(group)),
            None => (value, None),
        };
        if user.is_empty() {
            return Err(invalid("missing user"));
        }
        if group.is_some_and(|g| g.is_empty() || g.contains(':')) {
            return Err(invalid("expected user[:group]"));
        }

        Ok(Self {
            user: IdRef::parse(user),
            group: group.map(IdRef::parse),
            raw: value.to_string(),
        })
    }

    /// Resolve names using the account databases under `rootfs`
    ///
    /// Without a group, a named user's primary group is used; a numeric
    /// user without a group gets the same number as its group.
    pub fn resolve(&self, rootfs: &Path) -> StowageResult<Owner> {
        let (uid, primary_gid) = match &self.user {
            IdRef::Id(uid) => (*uid, *uid),
            IdRef::Name(name) => {
                let passwd = read_db(rootfs, "etc/passwd")?;
                lookup_user(&passwd, name).ok_or_else(|| StowageError::InvalidChown {
                    value: self.raw.clone(),
                    reason: format!("no user {:?} in the container's /etc/passwd", name),
                })?
            }
        };

        let gid = match &self.group {
            None => primary_gid,
            Some(IdRef::Id(gid)) => *gid,
            Some(IdRef::Name(name)) => {
                let group = read_db(rootfs, "etc/group")?;
                lookup_group(&group, name).ok_or_else(|| StowageError::InvalidChown {
                    value: self.raw.clone(),
                    reason: format!("no group {:?} in the container's /etc/group", name),
                })?
            }
        };

        Ok(Owner { uid, gid })
    }
}

fn read_db(rootfs: &Path, relative: &str) -> StowageResult<String> {
    let path = rootfs.join(relative);
    match fs::read_to_string(&path) {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(StowageError::io(format!("reading {}", path.display()), e)),
    }
}

/// `name:x:uid:gid:...` -> (uid, gid)
fn lookup_user(passwd: &str, name: &str) -> Option<(u32, u32)> {
    passwd.lines().find_map(|line| {
        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() >= 4 && fields[0] == name {
            Some((fields[2].parse().ok()?, fields[3].parse().ok()?))
        } else {
            None
        }
    })
}

/// `name:x:gid:members` -> gid
fn lookup_group(group: &str, name: &str) -> Option<u32> {
    group.lines().find_map(|line| {
        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() >= 3 && fields[0] == name {
            fields[2].parse().ok()
        } else {
            None
        }
    })
}

/// How ingested entries get their owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnerPolicy {
    /// Every entry belongs to this container owner
    Fixed(Owner),
    /// Keep the source's owner, read through the source container's mappings
    Preserve(IdMappings),
    /// Entries belong to container root
    Root,
}

impl OwnerPolicy {
    /// Pick the policy: an explicit chown wins, content from another
    /// builder keeps its owners, anything else belongs to root.
    pub fn select(chown: Option<Owner>, from_builder: Option<&IdMappings>) -> Self {
        match (chown, from_builder) {
            (Some(owner), _) => OwnerPolicy::Fixed(owner),
            (None, Some(maps)) => OwnerPolicy::Preserve(maps.clone()),
            (None, None) => OwnerPolicy::Root,
        }
    }

    /// Owner inside the target container for a source entry owned by
    /// `source_host` on the host
    pub fn container_owner(&self, source_host: Owner) -> StowageResult<Owner> {
        match self {
            OwnerPolicy::Fixed(owner) => Ok(*owner),
            OwnerPolicy::Preserve(maps) => maps.to_container(source_host),
            OwnerPolicy::Root => Ok(Owner::ROOT),
        }
    }

    /// Owner for directories created to hold the destination
    pub fn directory_owner(&self) -> Owner {
        match self {
            OwnerPolicy::Fixed(owner) => *owner,
            _ => Owner::ROOT,
        }
    }
}
