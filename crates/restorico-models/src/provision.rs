//! Idempotent weight provisioning.
//!
//! A weight file that already exists is never fetched or touched again.
//! Missing files are downloaded to `<name>.part`, checked against their
//! pinned digest if any, then renamed into place.

use crate::fetch::{FetchError, Fetcher};
use crate::manifest::WeightSource;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("cannot create model directory {path}: {source}")]
    CreateDir {
        path: String,
        source: std::io::Error,
    },
    #[error("downloading {name} from {url}: {source}")]
    Fetch {
        name: String,
        url: String,
        source: FetchError,
    },
    #[error("checksum mismatch for {name}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        name: String,
        expected: String,
        actual: String,
    },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// What provisioning did for one weight file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    AlreadyPresent,
    Downloaded { bytes: u64 },
}

#[derive(Debug, Clone)]
pub struct Provisioned {
    pub name: String,
    pub path: PathBuf,
    pub action: Action,
}

/// Integrity state of one weight file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Integrity {
    Missing,
    /// Present, but the manifest pins no digest to compare against.
    Unpinned,
    Verified,
    Mismatch { actual: String },
}

/// Make sure every source exists in `dir`, fetching the missing ones.
pub async fn ensure_weights<F: Fetcher>(
    dir: &Path,
    sources: &[WeightSource],
    fetcher: &F,
) -> Result<Vec<Provisioned>, ProvisionError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|source| ProvisionError::CreateDir {
            path: dir.display().to_string(),
            source,
        })?;

    let mut report = Vec::with_capacity(sources.len());
    for source in sources {
        let path = dir.join(&source.name);
        if tokio::fs::try_exists(&path).await? {
            tracing::debug!(name = %source.name, path = %path.display(), "weight file present");
            report.push(Provisioned {
                name: source.name.clone(),
                path,
                action: Action::AlreadyPresent,
            });
            continue;
        }

        tracing::info!(name = %source.name, url = %source.url, "Downloading {}...", source.name);
        let bytes = download(&path, source, fetcher).await?;
        tracing::info!(name = %source.name, bytes, "weight file ready");

        report.push(Provisioned {
            name: source.name.clone(),
            path,
            action: Action::Downloaded { bytes },
        });
    }

    Ok(report)
}

/// Fetch one source into `path` via a `.part` file.
async fn download<F: Fetcher>(
    path: &Path,
    source: &WeightSource,
    fetcher: &F,
) -> Result<u64, ProvisionError> {
    let part = part_path(path);
    remove_if_exists(&part).await?;

    let bytes = match fetcher.fetch(&source.url, &part).await {
        Ok(bytes) => bytes,
        Err(err) => {
            remove_if_exists(&part).await?;
            return Err(ProvisionError::Fetch {
                name: source.name.clone(),
                url: source.url.clone(),
                source: err,
            });
        }
    };

    match &source.sha256 {
        Some(expected) => {
            let actual = sha256_file_async(&part).await?;
            if &actual != expected {
                remove_if_exists(&part).await?;
                return Err(ProvisionError::ChecksumMismatch {
                    name: source.name.clone(),
                    expected: expected.clone(),
                    actual,
                });
            }
            tracing::debug!(name = %source.name, "sha256 verified");
        }
        None => {
            tracing::warn!(
                name = %source.name,
                "no sha256 pinned in manifest; download kept without integrity check"
            );
        }
    }

    tokio::fs::rename(&part, path).await?;
    Ok(bytes)
}

/// Hash present weight files and compare them with their pinned digests.
pub fn verify_weights(dir: &Path, sources: &[WeightSource]) -> Result<Vec<(String, Integrity)>, ProvisionError> {
    let mut out = Vec::with_capacity(sources.len());
    for source in sources {
        let path = dir.join(&source.name);
        let integrity = if !path.exists() {
            Integrity::Missing
        } else {
            match &source.sha256 {
                None => Integrity::Unpinned,
                Some(expected) => {
                    let actual = sha256_file(&path)?;
                    if &actual == expected {
                        Integrity::Verified
                    } else {
                        Integrity::Mismatch { actual }
                    }
                }
            }
        };
        tracing::debug!(name = %source.name, ?integrity, "verified weight file");
        out.push((source.name.clone(), integrity));
    }
    Ok(out)
}

/// Lowercase hex SHA-256 of a file.
pub fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect())
}

async fn sha256_file_async(path: &Path) -> std::io::Result<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || sha256_file(&path))
        .await
        .map_err(std::io::Error::other)?
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    path.with_file_name(name)
}

async fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
