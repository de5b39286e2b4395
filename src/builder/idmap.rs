//! Host <-> container user namespace ID translation

use crate::error::{StowageError, StowageResult};
use serde::{Deserialize, Serialize};

/// One contiguous range of a uid_map/gid_map table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdMap {
    /// First ID inside the container namespace
    pub container_id: u32,
    /// First ID on the host
    pub host_id: u32,
    /// Number of IDs in the range
    pub size: u32,
}

impl IdMap {
    fn to_host(&self, id: u32) -> Option<u32> {
        let offset = id.checked_sub(self.container_id)?;
        if offset < self.size {
            self.host_id.checked_add(offset)
        } else {
            None
        }
    }

    fn to_container(&self, id: u32) -> Option<u32> {
        let offset = id.checked_sub(self.host_id)?;
        if offset < self.size {
            self.container_id.checked_add(offset)
        } else {
            None
        }
    }
}

/// UID and GID mapping tables of a working container
///
/// Empty tables mean the container shares the host's ID space.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdMappings {
    pub uid_map: Vec<IdMap>,
    pub gid_map: Vec<IdMap>,
}

/// A uid/gid pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Owner {
    pub uid: u32,
    pub gid: u32,
}

impl Owner {
    pub const ROOT: Owner = Owner { uid: 0, gid: 0 };
}

fn lookup(
    maps: &[IdMap],
    id: u32,
    kind: &'static str,
    f: impl Fn(&IdMap, u32) -> Option<u32>,
) -> StowageResult<u32> {
    if maps.is_empty() {
        return Ok(id);
    }
    maps.iter()
        .find_map(|m| f(m, id))
        .ok_or(StowageError::IdNotMapped { kind, id })
}

impl IdMappings {
    pub fn new(uid_map: Vec<IdMap>, gid_map: Vec<IdMap>) -> Self {
        Self { uid_map, gid_map }
    }

    /// Translate a container-namespace owner to host IDs
    pub fn to_host(&self, owner: Owner) -> StowageResult<Owner> {
        Ok(Owner {
            uid: lookup(&self.uid_map, owner.uid, "uid", IdMap::to_host)?,
            gid: lookup(&self.gid_map, owner.gid, "gid", IdMap::to_host)?,
        })
    }

    /// Translate a host owner to container-namespace IDs
    pub fn to_container(&self, owner: Owner) -> StowageResult<Owner> {
        Ok(Owner {
            uid: lookup(&self.uid_map, owner.uid, "uid", IdMap::to_container)?,
            gid: lookup(&self.gid_map, owner.gid, "gid", IdMap::to_container)?,
        })
    }
}

/// Parse a `/proc/<pid>/uid_map` style table: `container host size` per line
pub fn parse_id_map(content: &str) -> StowageResult<Vec<IdMap>> {
    let mut maps = Vec::new();
    for line in content.lines().filter(|l| !l.trim().is_empty()) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 3 {
            return Err(StowageError::Internal(format!(
                "badly formatted ID map line {:?}: expected exactly three fields",
                line
            )));
        }
        let parse = |s: &str| {
            s.parse::<u32>().map_err(|e| {
                StowageError::Internal(format!("parsing {:?} in ID map line {:?}: {}", s, line, e))
            })
        };
        maps.push(IdMap {
            container_id: parse(fields[0])?,
            host_id: parse(fields[1])?,
            size: parse(fields[2])?,
        });
    }
    Ok(maps)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rootless() -> IdMappings {
        IdMappings::new(
            vec![
                IdMap { container_id: 0, host_id: 1000, size: 1 },
                IdMap { container_id: 1, host_id: 100000, size: 65536 },
            ],
            vec![
                IdMap { container_id: 0, host_id: 1000, size: 1 },
                IdMap { container_id: 1, host_id: 100000, size: 65536 },
            ],
        )
    }

    #[test]
    fn identity_passes_through() {
        let maps = IdMappings::default();
        let owner = Owner { uid: 42, gid: 7 };
        assert_eq!(maps.to_host(owner).unwrap(), owner);
        assert_eq!(maps.to_container(owner).unwrap(), owner);
    }

    #[test]
    fn root_maps_to_invoking_user() {
        let maps = rootless();
        assert_eq!(maps.to_host(Owner::ROOT).unwrap(), Owner { uid: 1000, gid: 1000 });
        assert_eq!(
            maps.to_host(Owner { uid: 33, gid: 33 }).unwrap(),
            Owner { uid: 100032, gid: 100032 }
        );
    }

    #[test]
    fn host_to_container() {
        let maps = rootless();
        assert_eq!(
            maps.to_container(Owner { uid: 100032, gid: 1000 }).unwrap(),
            Owner { uid: 33, gid: 0 }
        );
    }

    #[test]
    fn unmapped_id_is_error() {
        let maps = rootless();
        let err = maps.to_host(Owner { uid: 70000, gid: 0 }).unwrap_err();
        assert!(matches!(err, StowageError::IdNotMapped { kind: "uid", id: 70000 }));
    }

    #[test]
    fn parse_proc_map() {
        let maps = parse_id_map("         0       1000          1\n         1     100000      65536\n").unwrap();
        assert_eq!(maps.len(), 2);
        assert_eq!(maps[1], IdMap { container_id: 1, host_id: 100000, size: 65536 });
        assert!(parse_id_map("0 1000").is_err());
    }
}
