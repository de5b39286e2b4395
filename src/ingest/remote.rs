//! Fetching http(s) sources
//!
//! Remote content is downloaded to a temporary file first so the checksum
//! can be verified before anything lands in the container. Remote
//! archives are never extracted.

use crate::error::{StowageError, StowageResult};
use crate::ingest::options::RetryPolicy;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, SystemTime};
use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use ureq::tls::{Certificate, RootCerts, TlsConfig};

/// Name used when a URL path has no final segment
const FALLBACK_NAME: &str = "download";

/// Transport settings for downloads
#[derive(Debug, Clone, Default)]
pub struct RemoteSettings {
    pub tls_verify: bool,
    /// Directory of PEM certificates trusted instead of the defaults
    pub cert_dir: Option<PathBuf>,
}

/// A fully downloaded source
pub struct Download {
    pub file: NamedTempFile,
    /// File name taken from the URL path
    pub name: String,
    /// From the Last-Modified header
    pub modified: Option<SystemTime>,
    /// Hex SHA-256 of the body
    pub sha256: String,
}

/// Download `url`, retrying transport failures per `retry`
pub fn fetch(
    url: &str,
    settings: &RemoteSettings,
    checksum: Option<&str>,
    retry: RetryPolicy,
    cancel: &CancellationToken,
) -> StowageResult<Download> {
    let agent = build_agent(settings)?;
    let attempts = retry.max_attempts();

    let mut attempt = 1;
    loop {
        if cancel.is_cancelled() {
            return Err(StowageError::Cancelled);
        }
        match fetch_once(&agent, url) {
            Ok(download) => {
                if let Some(expected) = checksum {
                    if download.sha256 != expected {
                        return Err(StowageError::ChecksumMismatch {
                            url: url.to_string(),
                            expected: format!("sha256:{}", expected),
                            actual: format!("sha256:{}", download.sha256),
                        });
                    }
                }
                return Ok(download);
            }
            Err(e) if e.is_retryable() && attempt < attempts => {
                warn!(
                    "Download of {} failed (attempt {}/{}): {}; retrying in {:?}",
                    url, attempt, attempts, e, retry.delay
                );
                if !sleep_unless_cancelled(retry.delay, cancel) {
                    return Err(StowageError::Cancelled);
                }
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn build_agent(settings: &RemoteSettings) -> StowageResult<ureq::Agent> {
    let mut tls = TlsConfig::builder().disable_verification(!settings.tls_verify);
    if let Some(ref dir) = settings.cert_dir {
        let certs = load_certificates(dir)?;
        if !certs.is_empty() {
            tls = tls.root_certs(RootCerts::new_with_certs(&certs));
        }
    }

    let config = ureq::Agent::config_builder()
        .tls_config(tls.build())
        .http_status_as_error(true)
        .build();
    Ok(ureq::Agent::new_with_config(config))
}

/// Read every `.crt`/`.pem` file in `dir`
fn load_certificates(dir: &Path) -> StowageResult<Vec<Certificate<'static>>> {
    let entries = fs::read_dir(dir)
        .map_err(|e| StowageError::io(format!("reading certificate dir {}", dir.display()), e))?;

    let mut certs = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let is_cert = path
            .extension()
            .is_some_and(|ext| ext == "crt" || ext == "pem");
        if !is_cert {
            continue;
        }
        let pem = fs::read(&path)
            .map_err(|e| StowageError::io(format!("reading certificate {}", path.display()), e))?;
        match Certificate::from_pem(&pem) {
            Ok(cert) => certs.push(cert),
            Err(e) => warn!("Skipping certificate {}: {}", path.display(), e),
        }
    }
    debug!("Loaded {} certificates from {}", certs.len(), dir.display());
    Ok(certs)
}

fn fetch_once(agent: &ureq::Agent, url: &str) -> StowageResult<Download> {
    info!("Downloading {}", url);

    let response = agent.get(url).call().map_err(|e| match e {
        ureq::Error::StatusCode(status) if (400..500).contains(&status) => StowageError::HttpStatus {
            url: url.to_string(),
            status,
        },
        other => StowageError::Download {
            url: url.to_string(),
            reason: other.to_string(),
        },
    })?;

    let modified = response
        .headers()
        .get("last-modified")
        .and_then(|v| v.to_str().ok())
        .and_then(parse_http_date);

    let mut file = NamedTempFile::new().map_err(|e| StowageError::io("creating download file", e))?;
    let mut hasher = Sha256::new();
    let mut reader = response.into_body().into_reader();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(StowageError::Download {
                    url: url.to_string(),
                    reason: e.to_string(),
                })
            }
        };
        hasher.update(&buf[..n]);
        file.write_all(&buf[..n])
            .map_err(|e| StowageError::io(format!("writing download of {}", url), e))?;
    }
    file.flush()
        .map_err(|e| StowageError::io(format!("writing download of {}", url), e))?;

    Ok(Download {
        file,
        name: url_file_name(url),
        modified,
        sha256: hex::encode(hasher.finalize()),
    })
}

/// Sleep for `delay`, waking early on cancellation; false when cancelled
fn sleep_unless_cancelled(delay: Duration, cancel: &CancellationToken) -> bool {
    let step = Duration::from_millis(50);
    let mut remaining = delay;
    while !remaining.is_zero() {
        if cancel.is_cancelled() {
            return false;
        }
        let nap = remaining.min(step);
        thread::sleep(nap);
        remaining -= nap;
    }
    !cancel.is_cancelled()
}

fn parse_http_date(value: &str) -> Option<SystemTime> {
    chrono::DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|t| SystemTime::from(t.with_timezone(&chrono::Utc)))
}

/// Last path segment of a URL, ignoring query and fragment
pub fn url_file_name(url: &str) -> String {
    let without_scheme = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    let without_query = without_scheme
        .split(['?', '#'])
        .next()
        .unwrap_or(without_scheme);
    match without_query.split_once('/') {
        Some((_, path)) => path
            .rsplit('/')
            .find(|segment| !segment.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| FALLBACK_NAME.to_string()),
        None => FALLBACK_NAME.to_string(),
    }
}
