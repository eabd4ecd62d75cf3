//! Atomic persistence of capture artifact families.
//!
//! Each capture persists as a family of files sharing one basename: the raw
//! content (`B.txt`), basic metadata (`B_metadata.json`), and — when the
//! enrichment path is enabled — full analysis (`B_enhanced_metadata.json`),
//! protocol (`B_context_protocol.json`) and a condensed rendering
//! (`B_condensed.txt`).
//!
//! Every write lands in a temporary sibling first and is renamed into place,
//! so a partial file is never visible under its final name. Name collisions
//! are resolved by suffixing the stem with a timestamp — existing files are
//! never overwritten or merged. All filesystem mutation is serialized by a
//! per-instance lock.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, SystemTime};

use chrono::Local;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::analyzer::ContextAnalyzer;
use crate::config::Config;
use crate::error::CaptureError;
use crate::parser::CaptureMetadata;
use crate::protocol;

/// Companion suffixes substituted for the `.txt` suffix of the raw filename.
const METADATA_SUFFIX: &str = "_metadata.json";
const ENHANCED_SUFFIX: &str = "_enhanced_metadata.json";
const PROTOCOL_SUFFIX: &str = "_context_protocol.json";
const CONDENSED_SUFFIX: &str = "_condensed.txt";

/// Outcome of a successful save.
#[derive(Debug, Clone)]
pub struct SaveReceipt {
    /// Filename actually used, after collision resolution.
    pub filename: String,
    pub path: PathBuf,
    pub message: String,
}

/// Owns the mapping from logical filename to on-disk path for one output
/// directory. The only component permitted to mutate that mapping.
pub struct StorageManager {
    output_dir: PathBuf,
    max_bytes: usize,
    io_lock: Arc<Mutex<()>>,
    enrichment_tasks: StdMutex<Vec<JoinHandle<()>>>,
    analyzer: Option<Arc<ContextAnalyzer>>,
}

impl StorageManager {
    pub fn new(config: &Config, analyzer: Option<Arc<ContextAnalyzer>>) -> Self {
        let manager = Self {
            output_dir: config.output_directory.clone(),
            max_bytes: config.max_content_bytes(),
            io_lock: Arc::new(Mutex::new(())),
            enrichment_tasks: StdMutex::new(Vec::new()),
            analyzer,
        };
        if config.auto_create_directory {
            manager.ensure_output_directory();
        }
        manager
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Create the output directory if needed. Returns whether it exists.
    pub fn ensure_output_directory(&self) -> bool {
        match fs::create_dir_all(&self.output_dir) {
            Ok(()) => true,
            Err(e) => {
                error!(dir = %self.output_dir.display(), error = %e, "could not create output directory");
                false
            }
        }
    }

    /// Persist raw content. Size-gated before any I/O; collision-resolved;
    /// atomically written.
    pub async fn save_raw(&self, content: &str, filename: &str) -> Result<SaveReceipt, CaptureError> {
        self.check_size(content)?;

        let _guard = self.io_lock.lock().await;
        if !self.ensure_output_directory() {
            return Err(CaptureError::Persistence(
                "could not create output directory".to_string(),
            ));
        }

        let resolved = self.resolve_collision(filename);
        let path = self.output_dir.join(&resolved);
        atomic_write(&path, content.as_bytes())?;

        debug!(file = %path.display(), bytes = content.len(), "raw capture saved");
        Ok(SaveReceipt {
            filename: resolved,
            message: format!("Saved to: {}", path.display()),
            path,
        })
    }

    /// Persist raw content plus its basic metadata companion.
    pub async fn save_with_metadata(
        &self,
        content: &str,
        filename: &str,
        metadata: &CaptureMetadata,
    ) -> Result<SaveReceipt, CaptureError> {
        let receipt = self.save_raw(content, filename).await?;

        let _guard = self.io_lock.lock().await;
        let metadata_path = self.output_dir.join(companion(&receipt.filename, METADATA_SUFFIX));
        write_json(&metadata_path, metadata)?;

        Ok(SaveReceipt {
            message: format!("Saved content and metadata: {}", receipt.path.display()),
            ..receipt
        })
    }

    /// Persist raw + metadata synchronously, then queue background
    /// enrichment. Returns as soon as the raw save has succeeded; enrichment
    /// failures are observable only through logs and artifact absence.
    pub async fn save_enhanced(
        &self,
        content: &str,
        filename: &str,
        metadata: &CaptureMetadata,
    ) -> Result<SaveReceipt, CaptureError> {
        let receipt = self.save_with_metadata(content, filename, metadata).await?;

        if let Some(analyzer) = &self.analyzer {
            let handle = spawn_enrichment(
                Arc::clone(analyzer),
                Arc::clone(&self.io_lock),
                self.output_dir.clone(),
                receipt.filename.clone(),
                content.to_string(),
                metadata.clone(),
            );
            let mut tasks = self
                .enrichment_tasks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            tasks.retain(|h| !h.is_finished());
            tasks.push(handle);
        }

        Ok(receipt)
    }

    /// Raw capture files in the output directory, newest first. Companion
    /// files are excluded.
    pub fn list_artifacts(&self) -> Vec<PathBuf> {
        let entries = match fs::read_dir(&self.output_dir) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let mut files: Vec<(PathBuf, SystemTime)> = entries
            .flatten()
            .filter_map(|entry| {
                let path = entry.path();
                let name = path.file_name()?.to_str()?;
                if !name.ends_with(".txt") || name.ends_with(CONDENSED_SUFFIX) {
                    return None;
                }
                let modified = entry.metadata().ok()?.modified().ok()?;
                Some((path, modified))
            })
            .collect();

        files.sort_by(|a, b| b.1.cmp(&a.1));
        files.into_iter().map(|(path, _)| path).collect()
    }

    /// Remove raw files older than `age`, along with their companions.
    /// Returns the number of raw files removed.
    pub async fn purge_older_than(&self, age: Duration) -> Result<usize, CaptureError> {
        let _guard = self.io_lock.lock().await;
        let cutoff = SystemTime::now()
            .checked_sub(age)
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let mut removed = 0usize;
        for path in self.list_artifacts() {
            let Ok(meta) = fs::metadata(&path) else { continue };
            let Ok(modified) = meta.modified() else { continue };
            if modified >= cutoff {
                continue;
            }

            fs::remove_file(&path)?;
            removed += 1;

            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                for suffix in [
                    METADATA_SUFFIX,
                    ENHANCED_SUFFIX,
                    PROTOCOL_SUFFIX,
                    CONDENSED_SUFFIX,
                ] {
                    let sibling = self.output_dir.join(companion(name, suffix));
                    if sibling.exists() {
                        let _ = fs::remove_file(&sibling);
                    }
                }
            }
        }

        info!(removed, "retention sweep complete");
        Ok(removed)
    }

    /// Await in-flight enrichment tasks. Called after the monitor has
    /// stopped, so no new work can be queued behind us.
    pub async fn shutdown(&self) {
        let tasks: Vec<JoinHandle<()>> = {
            let mut guard = self
                .enrichment_tasks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            guard.drain(..).collect()
        };
        for task in tasks {
            let _ = task.await;
        }
    }

    fn check_size(&self, content: &str) -> Result<(), CaptureError> {
        if content.len() > self.max_bytes {
            return Err(CaptureError::SizeLimitExceeded {
                size: content.len(),
                limit: self.max_bytes,
            });
        }
        Ok(())
    }

    /// Resolve a filename collision by suffixing the stem with a
    /// second-precision timestamp, then a counter if even that collides
    /// (same logical name twice within one second).
    fn resolve_collision(&self, filename: &str) -> String {
        if !self.output_dir.join(filename).exists() {
            return filename.to_string();
        }

        let (stem, ext) = match filename.rsplit_once('.') {
            Some((stem, ext)) => (stem, ext),
            None => (filename, "txt"),
        };
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let candidate = format!("{}_{}.{}", stem, timestamp, ext);
        if !self.output_dir.join(&candidate).exists() {
            return candidate;
        }

        let mut counter = 1u32;
        loop {
            let candidate = format!("{}_{}_{}.{}", stem, timestamp, counter, ext);
            if !self.output_dir.join(&candidate).exists() {
                return candidate;
            }
            counter += 1;
        }
    }
}

/// Derive a companion filename by substituting the `.txt` suffix.
fn companion(raw_filename: &str, suffix: &str) -> String {
    match raw_filename.strip_suffix(".txt") {
        Some(stem) => format!("{}{}", stem, suffix),
        None => format!("{}{}", raw_filename, suffix),
    }
}

/// Write to a hidden temporary sibling, then rename into place.
fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), CaptureError> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| CaptureError::Persistence(format!("bad path: {}", path.display())))?;
    let tmp = path.with_file_name(format!(".{}.tmp", file_name));
    fs::write(&tmp, bytes)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), CaptureError> {
    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| CaptureError::Persistence(e.to_string()))?;
    atomic_write(path, &json)
}

/// Background enrichment for one saved capture. Fire-and-forget relative to
/// the save call, but tracked so shutdown can drain it. Failures here never
/// invalidate the already-persisted raw file.
fn spawn_enrichment(
    analyzer: Arc<ContextAnalyzer>,
    io_lock: Arc<Mutex<()>>,
    output_dir: PathBuf,
    raw_filename: String,
    content: String,
    metadata: CaptureMetadata,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let report = Arc::clone(&analyzer).analyze(&content, &metadata).await;
        let protocol = protocol::from_report(&analyzer, &content, &report);
        let condensed = protocol::render_condensed(&protocol);

        let _guard = io_lock.lock().await;
        let result: Result<(), CaptureError> = (|| {
            write_json(&output_dir.join(companion(&raw_filename, ENHANCED_SUFFIX)), &report)?;
            write_json(&output_dir.join(companion(&raw_filename, PROTOCOL_SUFFIX)), &protocol)?;
            atomic_write(
                &output_dir.join(companion(&raw_filename, CONDENSED_SUFFIX)),
                condensed.as_bytes(),
            )?;
            Ok(())
        })();

        match result {
            Ok(()) => debug!(file = %raw_filename, "enrichment artifacts written"),
            Err(e) => error!(file = %raw_filename, error = %e, "background enrichment failed"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::CaseParser;

    fn config_for(dir: &Path) -> Config {
        let mut config = Config::default();
        config.output_directory = dir.to_path_buf();
        config.max_file_size_mb = 1;
        config
    }

    fn metadata(content: &str) -> CaptureMetadata {
        CaseParser::new().extract_metadata(content)
    }

    #[tokio::test]
    async fn raw_save_lands_under_final_name() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageManager::new(&config_for(dir.path()), None);
        let receipt = storage.save_raw("hello", "ICM_123456789.txt").await.unwrap();
        assert_eq!(receipt.filename, "ICM_123456789.txt");
        assert_eq!(fs::read_to_string(&receipt.path).unwrap(), "hello");
        // No stray temp files left behind.
        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().all(|n| !n.ends_with(".tmp")));
    }

    #[tokio::test]
    async fn duplicate_names_never_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageManager::new(&config_for(dir.path()), None);

        let first = storage.save_raw("first", "Case_2505160020000588.txt").await.unwrap();
        let second = storage.save_raw("second", "Case_2505160020000588.txt").await.unwrap();
        let third = storage.save_raw("third", "Case_2505160020000588.txt").await.unwrap();

        assert_eq!(first.filename, "Case_2505160020000588.txt");
        assert_ne!(second.filename, first.filename);
        assert_ne!(third.filename, second.filename);
        assert_eq!(fs::read_to_string(&first.path).unwrap(), "first");
        assert_eq!(fs::read_to_string(&second.path).unwrap(), "second");
        assert_eq!(fs::read_to_string(&third.path).unwrap(), "third");
    }

    #[tokio::test]
    async fn oversized_content_rejected_before_io() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageManager::new(&config_for(dir.path()), None);
        let oversized = "x".repeat(2 * 1024 * 1024);
        let err = storage.save_raw(&oversized, "ICM_123456789.txt").await.unwrap_err();
        assert!(matches!(err, CaptureError::SizeLimitExceeded { .. }));
        assert!(storage.list_artifacts().is_empty());
    }

    #[tokio::test]
    async fn metadata_companion_written() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageManager::new(&config_for(dir.path()), None);
        let content = "ICM 635658889 incident";
        storage
            .save_with_metadata(content, "ICM_635658889.txt", &metadata(content))
            .await
            .unwrap();

        let meta_path = dir.path().join("ICM_635658889_metadata.json");
        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(meta_path).unwrap()).unwrap();
        assert_eq!(json["icm_id"], "635658889");
        assert_eq!(json["contains_incident"], true);
    }

    #[tokio::test]
    async fn enhanced_save_produces_enrichment_family() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_for(dir.path());
        let analyzer = Arc::new(ContextAnalyzer::new(&config));
        let storage = StorageManager::new(&config, Some(analyzer));

        let content = "ICM 635658889 outage\nerror: connection refused\ncustomer impact high";
        storage
            .save_enhanced(content, "ICM_635658889.txt", &metadata(content))
            .await
            .unwrap();
        storage.shutdown().await;

        assert!(dir.path().join("ICM_635658889.txt").exists());
        assert!(dir.path().join("ICM_635658889_metadata.json").exists());
        assert!(dir.path().join("ICM_635658889_enhanced_metadata.json").exists());
        assert!(dir.path().join("ICM_635658889_context_protocol.json").exists());
        assert!(dir.path().join("ICM_635658889_condensed.txt").exists());

        let protocol: serde_json::Value = serde_json::from_str(
            &fs::read_to_string(dir.path().join("ICM_635658889_context_protocol.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(protocol["protocol_version"], "1.0");
        assert_eq!(protocol["case_identifiers"]["icm_id"], "635658889");
    }

    #[tokio::test]
    async fn list_excludes_companions_and_sorts_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageManager::new(&config_for(dir.path()), None);
        storage.save_raw("a", "ICM_111111111.txt").await.unwrap();
        storage.save_raw("b", "ICM_222222222.txt").await.unwrap();
        fs::write(dir.path().join("ICM_111111111_condensed.txt"), "x").unwrap();
        fs::write(dir.path().join("ICM_111111111_metadata.json"), "{}").unwrap();

        let listed = storage.list_artifacts();
        assert_eq!(listed.len(), 2);
        assert!(listed
            .iter()
            .all(|p| !p.to_string_lossy().contains("_condensed")));
    }

    #[tokio::test]
    async fn purge_removes_old_families() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageManager::new(&config_for(dir.path()), None);
        let content = "Case: 2505160020000588";
        storage
            .save_with_metadata(content, "Case_2505160020000588.txt", &metadata(content))
            .await
            .unwrap();

        // Nothing is old enough yet.
        let removed = storage
            .purge_older_than(Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(removed, 0);

        // Wait out mtime granularity, then sweep with a cutoff in the past.
        tokio::time::sleep(Duration::from_millis(1200)).await;
        let removed = storage.purge_older_than(Duration::from_secs(1)).await.unwrap();
        assert_eq!(removed, 1);
        assert!(!dir.path().join("Case_2505160020000588.txt").exists());
        assert!(!dir.path().join("Case_2505160020000588_metadata.json").exists());
    }
}
