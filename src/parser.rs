//! Case identifier extraction.
//!
//! Pulls ICM incident IDs (9 digits) and support case IDs (13+ digits) out of
//! free-form captured text. Case IDs are tried through an ordered fallback
//! chain from the most specific label to a bare digit run; the first stage
//! that matches wins and later stages are never consulted.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Identifiers extracted from one capture. Immutable once extracted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseIdentifiers {
    pub icm_id: Option<String>,
    pub case_id: Option<String>,
}

impl CaseIdentifiers {
    pub fn is_valid(&self) -> bool {
        self.icm_id.is_some() || self.case_id.is_some()
    }
}

/// Basic metadata derived once per capture, never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureMetadata {
    pub timestamp: DateTime<Utc>,
    pub text_length: usize,
    pub line_count: usize,
    pub icm_id: Option<String>,
    pub case_id: Option<String>,
    pub contains_incident: bool,
    pub contains_critical: bool,
    pub contains_support: bool,
}

/// Extractor holding the compiled ID patterns. Construct once and share.
pub struct CaseParser {
    icm: Regex,
    /// Case ID fallback chain, tried in order. Stage order matters: later
    /// stages are intentionally more permissive.
    case_chain: Vec<Regex>,
}

impl Default for CaseParser {
    fn default() -> Self {
        Self::new()
    }
}

impl CaseParser {
    pub fn new() -> Self {
        let compile = |p: &str| Regex::new(p).expect("hardcoded pattern compiles");
        Self {
            icm: compile(r"(?i)ICM.*?(\d{9})"),
            case_chain: vec![
                compile(r"(?i)Support Request Number:\s*(\d{13,})"),
                compile(r"(?i)Case[:\s#]*(\d{13,})"),
                compile(r"(?i)CRI[:\s]*(\d{13,})"),
                compile(r"\b(\d{13,})\b"),
            ],
        }
    }

    /// Extract ICM and support case IDs from captured text.
    pub fn extract_case_ids(&self, text: &str) -> CaseIdentifiers {
        let icm_id = self
            .icm
            .captures(text)
            .map(|c| c[1].to_string());

        let case_id = self
            .case_chain
            .iter()
            .find_map(|p| p.captures(text).map(|c| c[1].to_string()));

        CaseIdentifiers { icm_id, case_id }
    }

    /// True iff the text carries at least one identifier.
    pub fn is_valid_case_data(&self, text: &str) -> bool {
        if text.is_empty() {
            return false;
        }
        self.extract_case_ids(text).is_valid()
    }

    /// Deterministic filename for an identifier pair. `None` when neither ID
    /// is present (the capture is discarded).
    pub fn generate_filename(&self, ids: &CaseIdentifiers) -> Option<String> {
        match (&ids.icm_id, &ids.case_id) {
            (Some(icm), Some(case)) => Some(format!("{}_{}.txt", icm, case)),
            (Some(icm), None) => Some(format!("ICM_{}.txt", icm)),
            (None, Some(case)) => Some(format!("Case_{}.txt", case)),
            (None, None) => None,
        }
    }

    /// Derive basic capture metadata: size, line count, extracted IDs, and
    /// coarse keyword flags.
    pub fn extract_metadata(&self, text: &str) -> CaptureMetadata {
        let ids = self.extract_case_ids(text);
        let lower = text.to_lowercase();
        CaptureMetadata {
            timestamp: Utc::now(),
            text_length: text.len(),
            line_count: text.lines().count(),
            icm_id: ids.icm_id,
            case_id: ids.case_id,
            contains_incident: lower.contains("incident"),
            contains_critical: lower.contains("critical"),
            contains_support: lower.contains("support"),
        }
    }
}

/// Strict digit-length validation, separate from extraction. Returns
/// human-readable violations; empty means valid. Diagnostic paths only —
/// the main pipeline gates on [`CaseParser::is_valid_case_data`].
pub fn validate_ids(icm_id: Option<&str>, case_id: Option<&str>) -> Vec<String> {
    let mut errors = Vec::new();

    match icm_id {
        None | Some("") => errors.push("ICM ID not found".to_string()),
        Some(id) => {
            if id.len() != 9 || !id.chars().all(|c| c.is_ascii_digit()) {
                errors.push("ICM ID must be 9 digits".to_string());
            }
        }
    }

    match case_id {
        None | Some("") => errors.push("Case ID not found".to_string()),
        Some(id) => {
            if id.len() < 13 || !id.chars().all(|c| c.is_ascii_digit()) {
                errors.push("Case ID must be at least 13 digits".to_string());
            }
        }
    }

    errors
}
