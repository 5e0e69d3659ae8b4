//! Temporary upload workspace
//!
//! Inputs are staged into the temp directory before extraction. A staged file
//! is leased while a stage reads it; `cleanup_expired` skips leased files, and
//! the lease check and the removal happen under one lock so cleanup never
//! deletes a file a stage has just started reading.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

use crate::config::CoreConfig;

type LeaseSet = Arc<Mutex<HashSet<PathBuf>>>;

fn lock(set: &LeaseSet) -> MutexGuard<'_, HashSet<PathBuf>> {
    set.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A staged file in use; dropping the lease makes it eligible for cleanup
#[derive(Debug)]
pub struct Lease {
    path: PathBuf,
    leased: LeaseSet,
}

impl Lease {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        lock(&self.leased).remove(&self.path);
    }
}

/// Directory of temporary uploads with age-based cleanup
#[derive(Debug, Clone)]
pub struct TempWorkspace {
    dir: PathBuf,
    max_age: Duration,
    leased: LeaseSet,
}

impl TempWorkspace {
    pub fn new(dir: impl Into<PathBuf>, max_age: Duration) -> Self {
        Self {
            dir: dir.into(),
            max_age,
            leased: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn from_config(core: &CoreConfig) -> Self {
        Self::new(
            core.tmp_dir.clone(),
            Duration::from_secs(core.temp_max_age_hours * 3600),
        )
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Fresh path for a staged file: `upload_<hex>.<ext>`, or
    /// `input_<hex>.txt` when the source has no extension
    pub fn staging_path(&self, extension: Option<&str>) -> PathBuf {
        let id = Uuid::new_v4().simple().to_string();
        let name = match extension.filter(|e| !e.is_empty()) {
            Some(ext) => format!("upload_{}.{}", id, ext.to_lowercase()),
            None => format!("input_{}.txt", id),
        };
        self.dir.join(name)
    }

    /// Register `path` as in use
    pub fn lease(&self, path: impl Into<PathBuf>) -> Lease {
        let path = path.into();
        lock(&self.leased).insert(path.clone());
        Lease {
            path,
            leased: Arc::clone(&self.leased),
        }
    }

    pub fn is_leased(&self, path: &Path) -> bool {
        lock(&self.leased).contains(path)
    }

    /// Copy `source` into the workspace and lease the copy
    pub async fn stage(&self, source: &Path) -> Result<Lease> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create temp dir {}", self.dir.display()))?;

        let extension = source.extension().map(|e| e.to_string_lossy().into_owned());
        let target = self.staging_path(extension.as_deref());
        let lease = self.lease(target.clone());

        tokio::fs::copy(source, &target)
            .await
            .with_context(|| format!("Failed to stage {}", source.display()))?;

        tracing::debug!("Staged {} as {}", source.display(), target.display());
        Ok(lease)
    }

    /// Remove files older than `max_age` that are not leased
    ///
    /// Returns the number of files removed.
    pub async fn cleanup_expired(&self) -> Result<usize> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read temp dir {}", self.dir.display()))
            }
        };

        let now = SystemTime::now();
        let mut removed = 0;

        while let Some(entry) = entries.next_entry().await? {
            let metadata = match entry.metadata().await {
                Ok(m) if m.is_file() => m,
                _ => continue,
            };

            let age = metadata
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or_default();
            if age < self.max_age {
                continue;
            }

            let path = entry.path();
            let leased = lock(&self.leased);
            if leased.contains(&path) {
                tracing::debug!("Skipping leased file {}", path.display());
                continue;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!("Failed to remove {}: {}", path.display(), e),
            }
        }

        if removed > 0 {
            tracing::info!("Removed {} expired temp files", removed);
        }
        Ok(removed)
    }

    /// Remove a staged file right after processing
    pub async fn release_and_remove(&self, lease: Lease) -> Result<()> {
        let path = lease.path.clone();
        drop(lease);

        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
        }
    }
}
