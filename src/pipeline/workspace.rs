//! Request lifecycle: ids, the per-request working directory, and the staged
//! output directory.
//!
//! Both directories are guards. The working directory is a `TempDir` and is
//! removed when the workspace drops. The output directory is built under
//! `<output-root>/.staging/<id>` and removed on drop unless
//! [`StagedOutput::commit`] has published it with one rename to
//! `<output-root>/<id>`. Every exit path, including a converter timeout or a
//! cancelled future, therefore leaves nothing behind but finished offers.

use crate::error::{OfferError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

/// Collision-resistant request identifier: `<prefix>_<uuid-v4-simple>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(String);

impl RequestId {
    pub fn generate(prefix: &str) -> Self {
        Self(format!("{prefix}_{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Scratch directory of one request. Removed on drop.
#[derive(Debug)]
pub struct RequestWorkspace {
    dir: TempDir,
}

impl RequestWorkspace {
    pub fn create(work_root: &Path, id: &RequestId) -> Result<Self> {
        std::fs::create_dir_all(work_root)
            .map_err(|e| OfferError::io("create directory", work_root, e))?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("{id}-"))
            .tempdir_in(work_root)
            .map_err(|e| OfferError::io("create working directory", work_root, e))?;
        debug!(request_id = %id, dir = %dir.path().display(), "Working directory created");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Output directory under construction. Invisible to [`list_offers`] until committed.
#[derive(Debug)]
pub struct StagedOutput {
    staging: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl StagedOutput {
    pub fn create(output_root: &Path, staging_root: &Path, id: &RequestId) -> Result<Self> {
        std::fs::create_dir_all(staging_root)
            .map_err(|e| OfferError::io("create directory", staging_root, e))?;
        let staging = staging_root.join(id.as_str());
        std::fs::create_dir(&staging).map_err(|e| OfferError::io("create directory", &staging, e))?;
        Ok(Self {
            staging,
            target: output_root.join(id.as_str()),
            committed: false,
        })
    }

    /// Where outputs are written while the request runs.
    pub fn path(&self) -> &Path {
        &self.staging
    }

    /// Where the directory will live once committed.
    pub fn final_path(&self) -> &Path {
        &self.target
    }

    /// Map a path inside the staging directory to its published location.
    pub fn published(&self, staged: &Path) -> PathBuf {
        match staged.strip_prefix(&self.staging) {
            Ok(rest) => self.target.join(rest),
            Err(_) => staged.to_path_buf(),
        }
    }

    /// Publish the directory. After this it is no longer removed on drop.
    pub fn commit(mut self) -> Result<PathBuf> {
        if self.target.exists() {
            return Err(OfferError::io(
                "publish output directory",
                &self.target,
                std::io::Error::from(std::io::ErrorKind::AlreadyExists),
            ));
        }
        std::fs::rename(&self.staging, &self.target)
            .map_err(|e| OfferError::io("publish output directory", &self.target, e))?;
        self.committed = true;
        Ok(self.target.clone())
    }
}

impl Drop for StagedOutput {
    fn drop(&mut self) {
        if self.committed || !self.staging.exists() {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.staging) {
            warn!(dir = %self.staging.display(), error = %e, "Failed to remove staged output");
        }
    }
}

/// One finalized offer folder.
#[derive(Debug, Clone, Serialize)]
pub struct OfferListing {
    pub name: String,
    pub path: PathBuf,
    pub created: Option<DateTime<Utc>>,
    /// Paths relative to the folder, sorted.
    pub files: Vec<String>,
}

/// Finalized offers under `output_root`, newest first.
///
/// Dot-directories (staging) and stray files are skipped. A missing root
/// means no offers yet.
pub fn list_offers(output_root: &Path) -> Result<Vec<OfferListing>> {
    let entries = match std::fs::read_dir(output_root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(OfferError::io("read directory", output_root, e)),
    };

    let mut offers = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| OfferError::io("read directory", output_root, e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let path = entry.path();
        if name.starts_with('.') || !path.is_dir() {
            continue;
        }
        let created = entry
            .metadata()
            .ok()
            .and_then(|m| m.created().or_else(|_| m.modified()).ok())
            .map(DateTime::<Utc>::from);
        let mut files = Vec::new();
        collect_files(&path, &path, &mut files)?;
        files.sort();
        offers.push(OfferListing {
            name,
            path,
            created,
            files,
        });
    }
    offers.sort_by(|a, b| b.created.cmp(&a.created).then_with(|| a.name.cmp(&b.name)));
    Ok(offers)
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) -> Result<()> {
    let entries = std::fs::read_dir(dir).map_err(|e| OfferError::io("read directory", dir, e))?;
    for entry in entries {
        let path = entry.map_err(|e| OfferError::io("read directory", dir, e))?.path();
        if path.is_dir() {
            collect_files(root, &path, out)?;
        } else if let Ok(rel) = path.strip_prefix(root) {
            out.push(rel.to_string_lossy().replace('\\', "/"));
        }
    }
    Ok(())
}
