//! Buffer polling loop.
//!
//! One dedicated background task polls the shared-buffer seam, deduplicates
//! content, runs identifier extraction, and hands valid captures to the
//! persistence layer. Start and stop are idempotent; a stop signal is
//! observed within one poll interval. Every fault inside a cycle is caught
//! and logged — the loop never terminates itself.
//!
//! Deduplication uses a bounded set of content hashes. When the set grows
//! past its capacity it is cleared wholesale rather than evicted entry by
//! entry; a value seen before the clear may be reprocessed once afterwards,
//! which is an accepted tradeoff for the simpler structure.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::clipboard::ClipboardSource;
use crate::config::Config;
use crate::parser::{validate_ids, CaptureMetadata, CaseParser};
use crate::storage::StorageManager;

/// Dedup cache capacity. Exceeding it clears the whole cache.
const DEDUP_CAPACITY: usize = 100;

/// Result record handed to the capture callback for every processed capture,
/// success or failure. Suppressed captures (invalid, oversized, duplicate)
/// never reach the callback.
#[derive(Debug, Clone, Serialize)]
pub struct CaptureOutcome {
    pub success: bool,
    pub message: String,
    pub filename: Option<String>,
    pub content: String,
    pub metadata: Option<CaptureMetadata>,
    pub timestamp: DateTime<Utc>,
}

pub type CaptureCallback = Arc<dyn Fn(CaptureOutcome) + Send + Sync>;

/// One-shot diagnostic of the current buffer content.
#[derive(Debug, Clone, Serialize)]
pub struct InspectionReport {
    pub has_content: bool,
    pub content_length: usize,
    pub is_valid_case_data: bool,
    pub extracted_icm_id: Option<String>,
    pub extracted_case_id: Option<String>,
    pub generated_filename: Option<String>,
    pub validation_errors: Vec<String>,
    pub preview: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatus {
    pub monitoring: bool,
    pub last_check: Option<DateTime<Utc>>,
    pub polling_interval: f64,
    pub output_directory: String,
}

struct Shared {
    running: AtomicBool,
    last_check: StdMutex<Option<DateTime<Utc>>>,
}

/// Polls the buffer seam and drives the capture pipeline.
pub struct ClipboardMonitor {
    config: Config,
    storage: Arc<StorageManager>,
    source: Arc<dyn ClipboardSource>,
    callback: Option<CaptureCallback>,
    shared: Arc<Shared>,
    control: StdMutex<Control>,
}

#[derive(Default)]
struct Control {
    stop_tx: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

impl ClipboardMonitor {
    pub fn new(
        config: Config,
        storage: Arc<StorageManager>,
        source: Arc<dyn ClipboardSource>,
        callback: Option<CaptureCallback>,
    ) -> Self {
        Self {
            config,
            storage,
            source,
            callback,
            shared: Arc::new(Shared {
                running: AtomicBool::new(false),
                last_check: StdMutex::new(None),
            }),
            control: StdMutex::new(Control::default()),
        }
    }

    /// Launch the background poll loop. Starting while already running is a
    /// no-op returning success.
    pub fn start(&self) -> bool {
        let mut control = self
            .control
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if self.shared.running.load(Ordering::SeqCst) {
            return true;
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let worker = Worker {
            config: self.config.clone(),
            storage: Arc::clone(&self.storage),
            source: Arc::clone(&self.source),
            callback: self.callback.clone(),
            shared: Arc::clone(&self.shared),
            parser: CaseParser::new(),
        };

        self.shared.running.store(true, Ordering::SeqCst);
        control.stop_tx = Some(stop_tx);
        control.handle = Some(tokio::spawn(worker.run(stop_rx)));
        info!("buffer monitoring started");
        true
    }

    /// Signal the loop to stop and join it, bounded by one poll interval
    /// plus a grace period. Stopping while idle is a no-op.
    pub async fn stop(&self) {
        let (stop_tx, handle) = {
            let mut control = self
                .control
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            (control.stop_tx.take(), control.handle.take())
        };

        let Some(stop_tx) = stop_tx else { return };
        let _ = stop_tx.send(true);

        if let Some(handle) = handle {
            let grace = Duration::from_secs_f64(self.config.polling_interval) + Duration::from_secs(2);
            if tokio::time::timeout(grace, handle).await.is_err() {
                warn!("monitor task did not stop within the grace period");
            }
        }

        self.shared.running.store(false, Ordering::SeqCst);
        info!("buffer monitoring stopped");
    }

    pub fn is_monitoring(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> MonitorStatus {
        MonitorStatus {
            monitoring: self.is_monitoring(),
            last_check: *self
                .shared
                .last_check
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
            polling_interval: self.config.polling_interval,
            output_directory: self.storage.output_dir().display().to_string(),
        }
    }

    /// One-shot diagnostic of whatever the buffer currently holds.
    pub fn inspect_once(&self) -> InspectionReport {
        match self.source.read() {
            Ok(Some(content)) => inspect_text(&CaseParser::new(), &content),
            Ok(None) => InspectionReport {
                has_content: false,
                content_length: 0,
                is_valid_case_data: false,
                extracted_icm_id: None,
                extracted_case_id: None,
                generated_filename: None,
                validation_errors: Vec::new(),
                preview: None,
                message: "No buffer content".to_string(),
            },
            Err(e) => InspectionReport {
                has_content: false,
                content_length: 0,
                is_valid_case_data: false,
                extracted_icm_id: None,
                extracted_case_id: None,
                generated_filename: None,
                validation_errors: Vec::new(),
                preview: None,
                message: format!("Buffer read failed: {}", e),
            },
        }
    }
}

/// Extraction diagnostic over arbitrary text, including the strict
/// digit-length validation that the main pipeline gate skips.
pub fn inspect_text(parser: &CaseParser, content: &str) -> InspectionReport {
    let ids = parser.extract_case_ids(content);
    let is_valid = ids.is_valid();
    let filename = parser.generate_filename(&ids);
    let preview: String = content.chars().take(200).collect();
    let preview = if content.chars().count() > 200 {
        format!("{}...", preview)
    } else {
        preview
    };

    InspectionReport {
        has_content: true,
        content_length: content.len(),
        is_valid_case_data: is_valid,
        validation_errors: validate_ids(ids.icm_id.as_deref(), ids.case_id.as_deref()),
        extracted_icm_id: ids.icm_id,
        extracted_case_id: ids.case_id,
        generated_filename: filename,
        preview: Some(preview),
        message: if is_valid {
            "Valid case data found".to_string()
        } else {
            "No valid case data found".to_string()
        },
    }
}

/// State owned by the background loop task.
struct Worker {
    config: Config,
    storage: Arc<StorageManager>,
    source: Arc<dyn ClipboardSource>,
    callback: Option<CaptureCallback>,
    shared: Arc<Shared>,
    parser: CaseParser,
}

impl Worker {
    async fn run(self, mut stop_rx: watch::Receiver<bool>) {
        let interval = Duration::from_secs_f64(self.config.polling_interval);
        let max_bytes = self.config.max_content_bytes();
        let mut last_content = String::new();
        let mut seen: HashSet<String> = HashSet::new();

        loop {
            self.poll_cycle(&mut last_content, &mut seen, max_bytes).await;

            *self
                .shared
                .last_check
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Utc::now());

            tokio::select! {
                _ = stop_rx.changed() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            if *stop_rx.borrow() {
                break;
            }
        }

        self.shared.running.store(false, Ordering::SeqCst);
    }

    /// One poll cycle. Every fault is absorbed here so the loop always
    /// proceeds to the next sleep.
    async fn poll_cycle(
        &self,
        last_content: &mut String,
        seen: &mut HashSet<String>,
        max_bytes: usize,
    ) {
        let content = match self.source.read() {
            Ok(Some(content)) => content,
            Ok(None) => return,
            Err(e) => {
                error!(error = %e, "buffer read failed, skipping cycle");
                return;
            }
        };

        if content == *last_content {
            return;
        }

        // Oversized content is skipped without updating the last accepted
        // value, so a shrunken or replaced buffer is picked up next poll.
        if content.len() > max_bytes {
            warn!(
                bytes = content.len(),
                limit = max_bytes,
                "buffer content too large, skipping"
            );
            return;
        }

        let digest = format!("{:x}", Sha256::digest(content.as_bytes()));
        if !seen.contains(&digest) {
            seen.insert(digest);
            self.process_content(&content).await;
            if seen.len() > DEDUP_CAPACITY {
                seen.clear();
            }
        }

        *last_content = content;
    }

    async fn process_content(&self, content: &str) {
        debug!(bytes = content.len(), "processing buffer content");

        if !self.parser.is_valid_case_data(content) {
            debug!("no case identifiers found, skipping");
            return;
        }

        let ids = self.parser.extract_case_ids(content);
        let Some(filename) = self.parser.generate_filename(&ids) else {
            warn!("could not derive filename from identifiers");
            return;
        };
        info!(filename = %filename, "case data detected");

        let metadata = self.parser.extract_metadata(content);
        let save_result = if self.config.context_processing_enabled {
            self.storage.save_enhanced(content, &filename, &metadata).await
        } else {
            self.storage.save_with_metadata(content, &filename, &metadata).await
        };

        let outcome = match save_result {
            Ok(receipt) => {
                info!(file = %receipt.filename, "case data saved");
                CaptureOutcome {
                    success: true,
                    message: receipt.message,
                    filename: Some(receipt.filename),
                    content: content.to_string(),
                    metadata: Some(metadata),
                    timestamp: Utc::now(),
                }
            }
            Err(e) => {
                error!(error = %e, "failed to save case data");
                CaptureOutcome {
                    success: false,
                    message: e.to_string(),
                    filename: Some(filename),
                    content: content.to_string(),
                    metadata: Some(metadata),
                    timestamp: Utc::now(),
                }
            }
        };

        if let Some(callback) = &self.callback {
            callback(outcome);
        }
    }
}
