//! Podman-backed image store
//!
//! Pulls, creates, mounts and removes working containers through the
//! `podman` CLI. Mounting a rootless container requires running inside
//! `podman unshare`.

use crate::builder::{Builder, IdMap, IdMappings};
use crate::error::{StowageError, StowageResult};
use crate::store::record::BuilderRecords;
use crate::store::{stream_child_output, ImageStore, PullOptions};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Stderr fragments podman prints when a reference does not resolve
const IMAGE_NOT_FOUND_MARKERS: &[&str] = &[
    "manifest unknown",
    "name unknown",
    "repository does not exist",
    "requested access to the resource is denied",
    "no such image",
];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectContainer {
    id: String,
    name: String,
    #[serde(default)]
    image_name: Option<String>,
    #[serde(default)]
    config: Option<InspectConfig>,
    #[serde(default)]
    host_config: Option<InspectHostConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectConfig {
    #[serde(default)]
    working_dir: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InspectHostConfig {
    #[serde(rename = "IDMappings", default)]
    id_mappings: Option<InspectIdMappings>,
}

/// `container:host:size` entries as podman reports them
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectIdMappings {
    #[serde(default)]
    uid_map: Option<Vec<String>>,
    #[serde(default)]
    gid_map: Option<Vec<String>>,
}

impl InspectContainer {
    fn id_mappings(&self) -> StowageResult<IdMappings> {
        let Some(maps) = self.host_config.as_ref().and_then(|h| h.id_mappings.as_ref()) else {
            return Ok(IdMappings::default());
        };
        Ok(IdMappings::new(
            parse_inspect_id_map(maps.uid_map.as_deref().unwrap_or_default())?,
            parse_inspect_id_map(maps.gid_map.as_deref().unwrap_or_default())?,
        ))
    }
}

fn parse_inspect_id_map(entries: &[String]) -> StowageResult<Vec<IdMap>> {
    entries
        .iter()
        .map(|entry| {
            let bad = || StowageError::command_exec(
                "podman container inspect",
                format!("badly formatted ID mapping {:?}: expected container:host:size", entry),
            );
            let fields: Vec<u32> = entry
                .split(':')
                .map(|f| f.trim().parse::<u32>())
                .collect::<Result<Vec<u32>, _>>()
                .map_err(|_| bad())?;
            match fields[..] {
                [container_id, host_id, size] => Ok(IdMap { container_id, host_id, size }),
                _ => Err(bad()),
            }
        })
        .collect()
}

/// Image store backed by the podman CLI
pub struct PodmanStore {
    podman: String,
    records: BuilderRecords,
}

impl PodmanStore {
    /// Create a store using `podman` from PATH and the default records dir
    pub fn new() -> Self {
        Self::with_binary("podman", BuilderRecords::new())
    }

    pub fn with_binary(podman: impl Into<String>, records: BuilderRecords) -> Self {
        Self {
            podman: podman.into(),
            records,
        }
    }

    /// Execute a Podman command and return the output
    async fn exec(&self, args: &[&str]) -> StowageResult<std::process::Output> {
        debug!("Executing: {} {:?}", self.podman, args);

        Command::new(&self.podman)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| StowageError::command_failed(format!("{} {:?}", self.podman, args), e))
    }

    async fn inspect(&self, name: &str) -> StowageResult<InspectContainer> {
        let output = self
            .exec(&["container", "inspect", "--format", "json", name])
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.to_lowercase().contains("no such container") {
                return Err(StowageError::ContainerUnknown(name.to_string()));
            }
            return Err(StowageError::command_exec("podman container inspect", stderr));
        }

        let mut containers: Vec<InspectContainer> = serde_json::from_slice(&output.stdout)?;
        if containers.is_empty() {
            return Err(StowageError::ContainerUnknown(name.to_string()));
        }
        Ok(containers.remove(0))
    }

    fn pull_args(image: &str, options: &PullOptions) -> Vec<String> {
        let mut args = vec!["pull".to_string()];

        if !options.tls_verify {
            args.push("--tls-verify=false".to_string());
        }
        if let Some(ref dir) = options.cert_dir {
            args.push("--cert-dir".to_string());
            args.push(dir.display().to_string());
        }
        if let Some(ref creds) = options.creds {
            args.push("--creds".to_string());
            args.push(creds.clone());
        }
        if let Some(ref authfile) = options.authfile {
            args.push("--authfile".to_string());
            args.push(authfile.display().to_string());
        }
        if let Some(ref policy) = options.signature_policy {
            args.push("--signature-policy".to_string());
            args.push(policy.display().to_string());
        }
        for key in &options.decryption_keys {
            args.push("--decryption-key".to_string());
            args.push(key.clone());
        }
        if !options.report_progress {
            args.push("--quiet".to_string());
        }

        args.push(image.to_string());
        args
    }
}

impl Default for PodmanStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Name for the temporary working container created from `image`
pub(crate) fn working_container_name(image: &str) -> String {
    let without_digest = image.split('@').next().unwrap_or(image);
    let last = without_digest.rsplit('/').next().unwrap_or(without_digest);
    let base = last.split(':').next().unwrap_or(last);
    let base: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect();
    let base = if base.is_empty() { "scratch".to_string() } else { base };
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-working-container-{}", base, &suffix[..8])
}

pub(crate) fn classify_pull_failure(image: &str, stderr: &str) -> StowageError {
    let lowered = stderr.to_lowercase();
    if IMAGE_NOT_FOUND_MARKERS.iter().any(|m| lowered.contains(m)) {
        StowageError::ImageNotFound {
            image: image.to_string(),
            reason: stderr.trim().to_string(),
        }
    } else {
        StowageError::ImagePull {
            image: image.to_string(),
            reason: stderr.trim().to_string(),
        }
    }
}

#[async_trait]
impl ImageStore for PodmanStore {
    async fn open_existing(&self, name: &str) -> StowageResult<Builder> {
        let inspected = self.inspect(name).await?;

        let mut builder = match self.records.load(&inspected.id).await? {
            Some(builder) => builder,
            None => {
                let mut builder = Builder::new(inspected.name.clone(), inspected.id.clone());
                builder.from_image = inspected.image_name.clone();
                if let Some(workdir) = inspected
                    .config
                    .as_ref()
                    .and_then(|c| c.working_dir.clone())
                    .filter(|w| !w.is_empty())
                {
                    builder.workdir = workdir;
                }
                builder.id_mappings = inspected.id_mappings()?;
                builder
            }
        };
        builder.container = inspected.name;

        debug!("Opened container {} ({})", builder.container, builder.short_id());
        Ok(builder)
    }

    async fn pull(&self, image: &str, options: &PullOptions) -> StowageResult<Builder> {
        info!("Pulling image: {}", image);

        let args = Self::pull_args(image, options);
        debug!("Executing: {} {:?}", self.podman, args);

        let mut child = Command::new(&self.podman)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| StowageError::command_failed(format!("{} pull {}", self.podman, image), e))?;

        let report = options.report_progress;
        let output = stream_child_output(&mut child, &move |line: String| {
            if report {
                eprintln!("{}", line);
            }
        })
        .await;

        let status = child
            .wait()
            .await
            .map_err(|e| StowageError::command_failed(format!("{} pull {}", self.podman, image), e))?;

        if !status.success() {
            return Err(classify_pull_failure(image, &output.join("\n")));
        }

        let name = working_container_name(image);
        let output = self
            .exec(&["create", "--name", &name, image, "true"])
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(StowageError::command_exec("podman create", stderr));
        }

        let mut builder = match self.open_existing(&name).await {
            Ok(builder) => builder,
            Err(e) => {
                match self.exec(&["rm", "-f", &name]).await {
                    Ok(out) if out.status.success() => debug!("Removed unusable container {}", name),
                    Ok(out) => warn!(
                        "Failed to remove container {}: {}",
                        name,
                        String::from_utf8_lossy(&out.stderr).trim()
                    ),
                    Err(rm) => warn!("Failed to remove container {}: {}", name, rm),
                }
                return Err(e);
            }
        };
        builder.from_image = Some(image.to_string());
        info!("Created working container {} from {}", name, image);
        Ok(builder)
    }

    async fn mount(&self, builder: &Builder) -> StowageResult<PathBuf> {
        let output = self.exec(&["mount", &builder.container_id]).await?;

        if output.status.success() {
            let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
            debug!("Mounted {} at {}", builder.container, path);
            Ok(PathBuf::from(path))
        } else {
            Err(StowageError::Mount {
                container: builder.container.clone(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    async fn unmount(&self, builder: &Builder) -> StowageResult<()> {
        let output = self.exec(&["unmount", &builder.container_id]).await?;

        if output.status.success() {
            debug!("Unmounted {}", builder.container);
            Ok(())
        } else {
            Err(StowageError::Unmount {
                container: builder.container.clone(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    async fn delete(&self, builder: &Builder) -> StowageResult<()> {
        debug!("Removing container: {}", builder.container);

        let output = self.exec(&["rm", "-f", &builder.container_id]).await?;

        if !output.status.success() {
            // Ignore error if container doesn't exist
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stderr.contains("no such container") {
                return Err(StowageError::command_exec("podman rm", stderr));
            }
        }

        self.records.delete(&builder.container_id).await
    }

    async fn save(&self, builder: &Builder) -> StowageResult<()> {
        self.records
            .save(builder)
            .await
            .map_err(|e| StowageError::Save {
                container: builder.container.clone(),
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use tempfile::TempDir;

    /// Write an executable shell script that stands in for podman
    fn fake_podman(dir: &Path, body: &str) -> String {
        let path = dir.join("podman");
        std::fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    #[test]
    fn working_container_names() {
        let name = working_container_name("docker.io/library/busybox:1.36");
        assert!(name.starts_with("busybox-working-container-"));

        let name = working_container_name("quay.io/fedora/fedora@sha256:abcd");
        assert!(name.starts_with("fedora-working-container-"));

        assert_ne!(working_container_name("alpine"), working_container_name("alpine"));
    }

    #[test]
    fn pull_failure_classification() {
        let err = classify_pull_failure(
            "quay.io/nope/nope",
            "Error: initializing source: reading manifest latest: manifest unknown",
        );
        assert!(matches!(err, StowageError::ImageNotFound { .. }));
        assert!(!err.is_retryable());

        let err = classify_pull_failure("busybox", "Error: read tcp: connection reset by peer");
        assert!(matches!(err, StowageError::ImagePull { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn pull_args_carry_registry_options() {
        let options = PullOptions {
            tls_verify: false,
            cert_dir: Some(PathBuf::from("/etc/certs")),
            creds: Some("user:pass".to_string()),
            decryption_keys: vec!["key.pem".to_string()],
            report_progress: false,
            ..Default::default()
        };
        let args = PodmanStore::pull_args("busybox", &options);
        assert_eq!(args.first().map(String::as_str), Some("pull"));
        assert_eq!(args.last().map(String::as_str), Some("busybox"));
        assert!(args.contains(&"--tls-verify=false".to_string()));
        assert!(args.windows(2).any(|w| w[0] == "--cert-dir" && Path::new(&w[1]) == Path::new("/etc/certs")));
        assert!(args.windows(2).any(|w| w[0] == "--decryption-key" && w[1] == "key.pem"));
        assert!(args.contains(&"--quiet".to_string()));
    }

    #[test]
    fn inspect_output_parses() {
        let json = r#"[{"Id":"f00dfeed","Name":"web-working-container","ImageName":"docker.io/library/nginx:latest","Config":{"WorkingDir":"/usr/share/nginx"}}]"#;
        let parsed: Vec<InspectContainer> = serde_json::from_str(json).unwrap();
        assert_eq!(parsed[0].id, "f00dfeed");
        assert_eq!(
            parsed[0].config.as_ref().and_then(|c| c.working_dir.as_deref()),
            Some("/usr/share/nginx")
        );
    }

    #[test]
    fn inspect_id_mappings_parse() {
        let json = r#"[{"Id":"f00dfeed","Name":"web","HostConfig":{"IDMappings":{"UidMap":["0:100000:65536"],"GidMap":["0:100000:1000","1000:1000:1"]}}}]"#;
        let parsed: Vec<InspectContainer> = serde_json::from_str(json).unwrap();
        let maps = parsed[0].id_mappings().unwrap();
        assert_eq!(maps.uid_map, vec![IdMap { container_id: 0, host_id: 100000, size: 65536 }]);
        assert_eq!(maps.gid_map.len(), 2);
        assert_eq!(maps.gid_map[1], IdMap { container_id: 1000, host_id: 1000, size: 1 });

        let json = r#"[{"Id":"f00dfeed","Name":"web","HostConfig":{"IDMappings":{"UidMap":null,"GidMap":null}}}]"#;
        let parsed: Vec<InspectContainer> = serde_json::from_str(json).unwrap();
        assert_eq!(parsed[0].id_mappings().unwrap(), IdMappings::default());
    }

    #[test]
    fn malformed_id_mapping_rejected() {
        assert!(parse_inspect_id_map(&["0:100000".to_string()]).is_err());
        assert!(parse_inspect_id_map(&["0:x:1".to_string()]).is_err());
    }

    #[tokio::test]
    async fn open_existing_reads_id_mappings() {
        let dir = TempDir::new().unwrap();
        let podman = fake_podman(
            dir.path(),
            r#"cat <<'JSON'
[{"Id":"f00dfeed","Name":"web","Config":{"WorkingDir":"/srv"},"HostConfig":{"IDMappings":{"UidMap":["0:100000:65536"],"GidMap":["0:200000:65536"]}}}]
JSON
"#,
        );
        let store = PodmanStore::with_binary(podman, BuilderRecords::with_dir(dir.path().join("builders")));

        let builder = store.open_existing("web").await.unwrap();
        assert_eq!(builder.workdir, "/srv");
        assert_eq!(builder.id_mappings.uid_map, vec![IdMap { container_id: 0, host_id: 100000, size: 65536 }]);
        assert_eq!(builder.id_mappings.gid_map, vec![IdMap { container_id: 0, host_id: 200000, size: 65536 }]);
    }

    #[tokio::test]
    async fn pull_removes_container_it_cannot_open() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("calls.log");
        let podman = fake_podman(
            dir.path(),
            &format!(
                r#"echo "$@" >> '{}'
case "$1" in
  pull|create|rm) exit 0 ;;
  *) echo "Error: storage is corrupt" >&2; exit 125 ;;
esac
"#,
                log.display()
            ),
        );
        let store = PodmanStore::with_binary(podman, BuilderRecords::with_dir(dir.path().join("builders")));

        let options = PullOptions {
            report_progress: false,
            ..Default::default()
        };
        let err = store.pull("busybox", &options).await.unwrap_err();
        assert!(matches!(err.root(), StowageError::CommandExecution { .. }));

        let calls = std::fs::read_to_string(&log).unwrap();
        let lines: Vec<&str> = calls.lines().collect();
        assert!(lines[0].starts_with("pull"));
        assert!(lines[1].starts_with("create --name busybox-working-container-"));
        assert!(lines[2].starts_with("container inspect"));
        assert!(lines[3].starts_with("rm -f busybox-working-container-"));
    }
}
