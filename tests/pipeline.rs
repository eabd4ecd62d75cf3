//! End-to-end pipeline tests: buffer source → monitor → parser → storage →
//! background enrichment, against a real temporary directory.

use std::fs;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;

use caseclip::analyzer::ContextAnalyzer;
use caseclip::clipboard::ClipboardSource;
use caseclip::config::Config;
use caseclip::error::CaptureError;
use caseclip::monitor::{CaptureCallback, CaptureOutcome, ClipboardMonitor};
use caseclip::storage::StorageManager;

/// Buffer source fed from a shared slot, so tests can change the "copied"
/// value between polls.
#[derive(Clone)]
struct SlotBuffer {
    slot: Arc<Mutex<Option<String>>>,
}

impl SlotBuffer {
    fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
        }
    }

    fn set(&self, value: &str) {
        *self.slot.lock().unwrap() = Some(value.to_string());
    }
}

impl ClipboardSource for SlotBuffer {
    fn read(&self) -> Result<Option<String>, CaptureError> {
        Ok(self.slot.lock().unwrap().clone())
    }
}

fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.output_directory = dir.path().to_path_buf();
    config.polling_interval = 0.01;
    config
}

fn collecting_callback() -> (Arc<Mutex<Vec<CaptureOutcome>>>, CaptureCallback) {
    let outcomes: Arc<Mutex<Vec<CaptureOutcome>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&outcomes);
    (outcomes, Arc::new(move |o| sink.lock().unwrap().push(o)))
}

async fn wait_for<F: Fn() -> bool>(cond: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cond()
}

#[tokio::test]
async fn enhanced_capture_persists_full_artifact_family() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);

    let analyzer = Arc::new(ContextAnalyzer::new(&config));
    let storage = Arc::new(StorageManager::new(&config, Some(analyzer)));
    let buffer = SlotBuffer::new();
    let (outcomes, callback) = collecting_callback();

    let monitor = ClipboardMonitor::new(
        config,
        Arc::clone(&storage),
        Arc::new(buffer.clone()),
        Some(callback),
    );
    monitor.start();

    buffer.set(
        "ICM 635658889 - Critical incident\n\
         Support Request Number: 2505160020000588\n\
         error: connection refused on server: web01\n\
         customer impact: 40 users affected\n\
         action: escalate to networking",
    );

    assert!(
        wait_for(|| !outcomes.lock().unwrap().is_empty(), Duration::from_secs(5)).await,
        "capture should be processed"
    );
    monitor.stop().await;
    storage.shutdown().await;

    let outcomes = outcomes.lock().unwrap();
    assert!(outcomes[0].success);
    assert_eq!(
        outcomes[0].filename.as_deref(),
        Some("635658889_2505160020000588.txt")
    );

    let base = dir.path();
    assert!(base.join("635658889_2505160020000588.txt").exists());
    assert!(base.join("635658889_2505160020000588_metadata.json").exists());
    assert!(base
        .join("635658889_2505160020000588_enhanced_metadata.json")
        .exists());
    assert!(base
        .join("635658889_2505160020000588_context_protocol.json")
        .exists());
    assert!(base.join("635658889_2505160020000588_condensed.txt").exists());

    // Raw file is byte-identical to the capture.
    let raw = fs::read_to_string(base.join("635658889_2505160020000588.txt")).unwrap();
    assert!(raw.starts_with("ICM 635658889"));

    // Protocol carries tags and a primary issue.
    let protocol: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(base.join("635658889_2505160020000588_context_protocol.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(protocol["case_identifiers"]["case_id"], "2505160020000588");
    let tags: Vec<String> = protocol["tags"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t.as_str().unwrap().to_string())
        .collect();
    assert!(tags.contains(&"error".to_string()));
    assert!(tags.contains(&"customer-facing".to_string()));
    assert_ne!(protocol["key_facts"]["primary_issue"], "");

    // Condensed rendering is human-readable.
    let condensed =
        fs::read_to_string(base.join("635658889_2505160020000588_condensed.txt")).unwrap();
    assert!(condensed.contains("SUPPORT CONTEXT PROTOCOL"));
    assert!(condensed.contains("escalate to networking"));
}

#[tokio::test]
async fn repeated_identifier_pairs_resolve_to_distinct_files() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let storage = Arc::new(StorageManager::new(&config, None));
    let buffer = SlotBuffer::new();
    let (outcomes, callback) = collecting_callback();

    let monitor = ClipboardMonitor::new(
        config,
        Arc::clone(&storage),
        Arc::new(buffer.clone()),
        Some(callback),
    );
    monitor.start();

    buffer.set("ICM 123456789 first note about the incident");
    assert!(wait_for(|| outcomes.lock().unwrap().len() == 1, Duration::from_secs(5)).await);

    // Different content, same identifier, so the same logical filename.
    buffer.set("ICM 123456789 second note with more detail");
    assert!(wait_for(|| outcomes.lock().unwrap().len() == 2, Duration::from_secs(5)).await);

    monitor.stop().await;

    let raw_files: Vec<String> = fs::read_dir(dir.path())
        .unwrap()
        .flatten()
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.ends_with(".txt") && !n.ends_with("_condensed.txt"))
        .collect();
    assert_eq!(raw_files.len(), 2);
    assert!(raw_files.contains(&"ICM_123456789.txt".to_string()));
    // The second save got a timestamp-suffixed name; the first is untouched.
    assert!(raw_files.iter().any(|n| n != "ICM_123456789.txt"));
    let first = fs::read_to_string(dir.path().join("ICM_123456789.txt")).unwrap();
    assert!(first.contains("first note"));
}

#[tokio::test]
async fn metadata_only_path_skips_enrichment_artifacts() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.context_processing_enabled = false;

    let storage = Arc::new(StorageManager::new(&config, None));
    let buffer = SlotBuffer::new();
    let (outcomes, callback) = collecting_callback();

    let monitor = ClipboardMonitor::new(
        config,
        Arc::clone(&storage),
        Arc::new(buffer.clone()),
        Some(callback),
    );
    monitor.start();

    buffer.set("Case: 2505160020000588 routine follow-up");
    assert!(wait_for(|| !outcomes.lock().unwrap().is_empty(), Duration::from_secs(5)).await);
    monitor.stop().await;
    storage.shutdown().await;

    assert!(dir.path().join("Case_2505160020000588.txt").exists());
    assert!(dir.path().join("Case_2505160020000588_metadata.json").exists());
    assert!(!dir
        .path()
        .join("Case_2505160020000588_enhanced_metadata.json")
        .exists());
    assert!(!dir
        .path()
        .join("Case_2505160020000588_context_protocol.json")
        .exists());
}

#[tokio::test]
async fn capture_metadata_reflects_content() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.context_processing_enabled = false;

    let storage = Arc::new(StorageManager::new(&config, None));
    let buffer = SlotBuffer::new();
    let (outcomes, callback) = collecting_callback();

    let monitor = ClipboardMonitor::new(
        config,
        Arc::clone(&storage),
        Arc::new(buffer.clone()),
        Some(callback),
    );
    monitor.start();

    buffer.set("ICM 987654321 - Critical incident needs support");
    assert!(wait_for(|| !outcomes.lock().unwrap().is_empty(), Duration::from_secs(5)).await);
    monitor.stop().await;

    let metadata: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(dir.path().join("ICM_987654321_metadata.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(metadata["icm_id"], "987654321");
    assert_eq!(metadata["case_id"], serde_json::Value::Null);
    assert_eq!(metadata["contains_incident"], true);
    assert_eq!(metadata["contains_critical"], true);
    assert_eq!(metadata["contains_support"], true);
    assert_eq!(metadata["line_count"], 1);
}
