//! Chunk-based contextual analysis of captured case text.
//!
//! The analyzer splits a capture into overlapping windows, classifies each
//! window, extracts entities and key phrases, and aggregates a document-level
//! summary, key information, and tag set. Classification is an explicit
//! ordered keyword-precedence list evaluated in fixed order — the first
//! matching category wins.
//!
//! Whole-document analysis runs under the configured deadline; exceeding it
//! yields a partial result with the `error` field set rather than a failure.
//! In performance mode chunks are analyzed concurrently on a small bounded
//! worker pool, each bounded by its own timeout; a timed-out chunk is dropped
//! from the result and logged.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::warn;

use crate::chunk::{split_text, ContentChunk};
use crate::config::Config;
use crate::error::CaptureError;
use crate::parser::{CaseIdentifiers, CaptureMetadata, CaseParser};

/// Bounded pool for concurrent per-chunk analysis.
const CHUNK_WORKERS: usize = 2;
/// Hard deadline for one chunk on the concurrent path.
const CHUNK_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-chunk content classification, in evaluation precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    ErrorInformation,
    CriticalInformation,
    ResolutionInformation,
    ProblemDescription,
    CustomerInformation,
    TemporalInformation,
    ConfigurationInformation,
    GeneralInformation,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::ErrorInformation => "error_information",
            ContentType::CriticalInformation => "critical_information",
            ContentType::ResolutionInformation => "resolution_information",
            ContentType::ProblemDescription => "problem_description",
            ContentType::CustomerInformation => "customer_information",
            ContentType::TemporalInformation => "temporal_information",
            ContentType::ConfigurationInformation => "configuration_information",
            ContentType::GeneralInformation => "general_information",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityLevel {
    High,
    Medium,
    Normal,
    Low,
}

impl PriorityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriorityLevel::High => "high",
            PriorityLevel::Medium => "medium",
            PriorityLevel::Normal => "normal",
            PriorityLevel::Low => "low",
        }
    }
}

/// Ordered classification rules. Earlier entries outrank later ones.
const CONTENT_TYPE_RULES: &[(ContentType, &[&str])] = &[
    (
        ContentType::ErrorInformation,
        &["error", "exception", "failed", "failure"],
    ),
    (
        ContentType::CriticalInformation,
        &["critical", "urgent", "emergency"],
    ),
    (
        ContentType::ResolutionInformation,
        &["resolution", "solution", "fix", "resolved"],
    ),
    (
        ContentType::ProblemDescription,
        &["symptom", "issue", "problem"],
    ),
    (
        ContentType::CustomerInformation,
        &["customer", "client", "user"],
    ),
    (
        ContentType::TemporalInformation,
        &["timeline", "schedule", "date", "time"],
    ),
    (
        ContentType::ConfigurationInformation,
        &["configuration", "settings", "setup"],
    ),
];

/// Ordered priority lookup. Default is `Normal` when nothing matches.
const PRIORITY_RULES: &[(PriorityLevel, &[&str])] = &[
    (
        PriorityLevel::High,
        &["critical", "urgent", "emergency", "outage", "down", "failed"],
    ),
    (
        PriorityLevel::Medium,
        &["important", "significant", "major", "escalation"],
    ),
    (
        PriorityLevel::Low,
        &["minor", "cosmetic", "enhancement", "suggestion"],
    ),
];

/// Fixed urgency vocabulary surfaced in the protocol's priority summary.
const URGENCY_KEYWORDS: &[&str] = &[
    "urgent",
    "asap",
    "immediate",
    "emergency",
    "critical",
    "outage",
    "down",
    "not working",
];

/// Entity extracted from a chunk, with surrounding context for review.
#[derive(Debug, Clone, Serialize)]
pub struct Entity {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub value: String,
    pub context: String,
}

/// Analysis of one content chunk.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkAnalysis {
    pub chunk_id: usize,
    pub length: usize,
    pub word_count: usize,
    pub line_count: usize,
    pub contains_case_ids: bool,
    pub extracted_ids: CaseIdentifiers,
    pub content_type: ContentType,
    pub priority_level: PriorityLevel,
    pub key_phrases: Vec<String>,
    pub entities: Vec<Entity>,
}

/// A chunk paired with its analysis.
#[derive(Debug, Clone, Serialize)]
pub struct AnalyzedChunk {
    #[serde(flatten)]
    pub chunk: ContentChunk,
    pub analysis: ChunkAnalysis,
}

/// Document-level aggregate over all analyzed chunks.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ContextSummary {
    pub total_chunks: usize,
    pub total_length: usize,
    pub content_types: BTreeMap<String, usize>,
    pub priority_distribution: BTreeMap<String, usize>,
    pub key_topics: Vec<(String, usize)>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SystemInformation {
    pub operating_system: Vec<String>,
    pub versions: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CustomerImpact {
    pub severity: String,
    pub affected_users: Vec<String>,
}

impl Default for CustomerImpact {
    fn default() -> Self {
        Self {
            severity: "unknown".to_string(),
            affected_users: Vec::new(),
        }
    }
}

/// Key information distilled from the whole capture.
#[derive(Debug, Clone, Serialize)]
pub struct KeyInformation {
    pub case_identifiers: CaseIdentifiers,
    pub error_messages: Vec<String>,
    pub timestamps: Vec<String>,
    pub system_information: SystemInformation,
    pub customer_impact: CustomerImpact,
    pub resolution_steps: Vec<String>,
}

/// Full analysis artifact persisted as `_enhanced_metadata.json`.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub metadata: CaptureMetadata,
    pub chunks: Vec<AnalyzedChunk>,
    pub context_summary: ContextSummary,
    pub tags: Vec<String>,
    pub key_information: KeyInformation,
    pub processed_at: DateTime<Utc>,
    pub processing_time_ms: u64,
    pub error: Option<String>,
}

/// Compiled pattern set shared by chunk and document analysis.
struct AnalyzerPatterns {
    errors: Vec<Regex>,
    timestamps: Vec<Regex>,
    entities: Vec<(&'static str, Regex)>,
    key_phrases: Vec<Regex>,
    operating_systems: Vec<Regex>,
    versions: Vec<Regex>,
    affected_users: Vec<Regex>,
    resolutions: Vec<Regex>,
    issues: Vec<Regex>,
    systems: Vec<Regex>,
    actions: Vec<Regex>,
}

impl AnalyzerPatterns {
    fn new() -> Self {
        let compile = |p: &str| Regex::new(p).expect("hardcoded pattern compiles");
        let compile_all = |ps: &[&str]| ps.iter().map(|p| compile(p)).collect::<Vec<_>>();
        Self {
            errors: compile_all(&[
                r"(?i)error[:\s]+([^\n]+)",
                r"(?i)exception[:\s]+([^\n]+)",
                r"(?i)failed[:\s]+([^\n]+)",
                r"(?i)unable to[:\s]+([^\n]+)",
            ]),
            timestamps: compile_all(&[
                r"\d{4}-\d{2}-\d{2}\s+\d{2}:\d{2}:\d{2}",
                r"\d{2}/\d{2}/\d{4}\s+\d{2}:\d{2}:\d{2}",
                r"\d{4}/\d{2}/\d{2}\s+\d{2}:\d{2}:\d{2}",
            ]),
            entities: vec![
                ("ip_address", compile(r"\b(?:\d{1,3}\.){3}\d{1,3}\b")),
                ("url", compile(r#"https?://[^\s<>"]+"#)),
                ("file_path", compile(r#"[A-Za-z]:\\[^\s<>"]+"#)),
                (
                    "email",
                    compile(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b"),
                ),
                ("server_name", compile(r"\b[A-Za-z0-9-]+\.[A-Za-z0-9.-]+\b")),
                (
                    "guid",
                    compile(
                        r"\b[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}\b",
                    ),
                ),
            ],
            key_phrases: compile_all(&[
                r"(?i)error\s+\w+",
                r"(?i)exception\s+\w+",
                r"(?i)failed\s+to\s+\w+",
                r"(?i)unable\s+to\s+\w+",
                r"(?i)timeout\s+\w+",
                r"(?i)connection\s+\w+",
                r"(?i)authentication\s+\w+",
                r"(?i)authorization\s+\w+",
                r"(?i)performance\s+\w+",
                r"(?i)latency\s+\w+",
                r"(?i)memory\s+\w+",
                r"(?i)cpu\s+\w+",
                r"(?i)disk\s+\w+",
                r"(?i)network\s+\w+",
            ]),
            operating_systems: compile_all(&[
                r"(?i)windows\s+\d+",
                r"(?i)linux\s+\w+",
                r"(?i)ubuntu\s+\d+",
                r"(?i)centos\s+\d+",
                r"(?i)red\s+hat\s+\d+",
            ]),
            versions: compile_all(&[
                r"(?i)version\s+\d+\.\d+\.\d+",
                r"(?i)v\d+\.\d+\.\d+",
                r"(?i)build\s+\d+",
            ]),
            affected_users: compile_all(&[
                r"(?i)(\d+)\s+users?\s+affected",
                r"(?i)affecting\s+(\d+)\s+users?",
                r"(?i)(\d+)\s+customers?\s+impacted",
            ]),
            resolutions: compile_all(&[
                r"(?i)resolution[:\s]+([^\n]+)",
                r"(?i)solution[:\s]+([^\n]+)",
                r"(?i)fix[:\s]+([^\n]+)",
                r"(?i)workaround[:\s]+([^\n]+)",
            ]),
            issues: compile_all(&[
                r"(?i)issue[:\s]+([^\n]+)",
                r"(?i)problem[:\s]+([^\n]+)",
                r"(?i)error[:\s]+([^\n]+)",
                r"(?i)unable to[:\s]+([^\n]+)",
            ]),
            systems: compile_all(&[
                r"(?i)server[:\s]+([^\s\n]+)",
                r"(?i)application[:\s]+([^\s\n]+)",
                r"(?i)service[:\s]+([^\s\n]+)",
                r"(?i)database[:\s]+([^\s\n]+)",
                r"(?i)system[:\s]+([^\s\n]+)",
            ]),
            actions: compile_all(&[
                r"(?i)action[:\s]+([^\n]+)",
                r"(?i)todo[:\s]+([^\n]+)",
                r"(?i)next step[:\s]+([^\n]+)",
                r"(?i)follow up[:\s]+([^\n]+)",
                r"(?i)escalate[:\s]+([^\n]+)",
            ]),
        }
    }
}

/// Contextual analyzer over captured case text. Construct once from config
/// and share behind an `Arc` — background enrichment tasks clone the handle.
pub struct ContextAnalyzer {
    chunk_size: usize,
    chunk_overlap: usize,
    timeout: Duration,
    performance_mode: bool,
    parser: CaseParser,
    patterns: AnalyzerPatterns,
}

impl ContextAnalyzer {
    pub fn new(config: &Config) -> Self {
        Self {
            chunk_size: config.chunk_size(),
            chunk_overlap: config.chunk_overlap(),
            timeout: Duration::from_secs_f64(config.context_processing_timeout),
            performance_mode: config.performance_mode,
            parser: CaseParser::new(),
            patterns: AnalyzerPatterns::new(),
        }
    }

    /// Analyze a capture under the configured deadline.
    ///
    /// Never fails: on deadline expiry the report carries whatever completed
    /// plus an `error` marker. The raw save has already happened by the time
    /// this runs, so a partial report costs nothing durable.
    pub async fn analyze(self: Arc<Self>, content: &str, metadata: &CaptureMetadata) -> AnalysisReport {
        let started = Instant::now();
        let mut report = AnalysisReport {
            metadata: metadata.clone(),
            chunks: Vec::new(),
            context_summary: ContextSummary::default(),
            tags: Vec::new(),
            key_information: KeyInformation {
                case_identifiers: self.parser.extract_case_ids(content),
                error_messages: Vec::new(),
                timestamps: Vec::new(),
                system_information: SystemInformation::default(),
                customer_impact: CustomerImpact::default(),
                resolution_steps: Vec::new(),
            },
            processed_at: Utc::now(),
            processing_time_ms: 0,
            error: None,
        };

        match tokio::time::timeout(self.timeout, Arc::clone(&self).analyze_inner(content)).await {
            Ok((chunks, summary, key_information, tags)) => {
                report.chunks = chunks;
                report.context_summary = summary;
                report.key_information = key_information;
                report.tags = tags;
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.timeout.as_secs_f64(),
                    "context analysis timed out"
                );
                report.error =
                    Some(CaptureError::AnalysisTimeout(self.timeout.as_secs_f64()).to_string());
            }
        }

        report.processing_time_ms = started.elapsed().as_millis() as u64;
        report
    }

    async fn analyze_inner(
        self: Arc<Self>,
        content: &str,
    ) -> (Vec<AnalyzedChunk>, ContextSummary, KeyInformation, Vec<String>) {
        let chunks = split_text(content, self.chunk_size, self.chunk_overlap);

        let analyzed = if self.performance_mode && chunks.len() > 1 {
            Arc::clone(&self).analyze_chunks_concurrent(chunks).await
        } else {
            let mut analyzed = Vec::with_capacity(chunks.len());
            for chunk in chunks {
                let analysis = self.analyze_chunk(&chunk.text, chunk.index);
                analyzed.push(AnalyzedChunk { chunk, analysis });
                // Chunk analysis is pure CPU work; yield between chunks so
                // the document deadline can be observed on this path too.
                tokio::task::yield_now().await;
            }
            analyzed
        };

        let summary = self.summarize(content, &analyzed);
        let key_information = self.extract_key_information(content);
        let tags = self.generate_tags(content, &key_information);

        (analyzed, summary, key_information, tags)
    }

    /// Concurrent per-chunk dispatch on a bounded pool. Submission is
    /// non-blocking; each result retrieval is bounded by [`CHUNK_TIMEOUT`].
    /// Timed-out chunks are aborted and dropped, not retried.
    async fn analyze_chunks_concurrent(self: Arc<Self>, chunks: Vec<ContentChunk>) -> Vec<AnalyzedChunk> {
        let pool = Arc::new(Semaphore::new(CHUNK_WORKERS));
        let mut pending = Vec::with_capacity(chunks.len());

        for chunk in chunks {
            let pool = Arc::clone(&pool);
            let analyzer = Arc::clone(&self);
            let text = chunk.text.clone();
            let index = chunk.index;
            let handle = tokio::spawn(async move {
                let _permit = pool.acquire_owned().await;
                analyzer.analyze_chunk(&text, index)
            });
            pending.push((chunk, handle));
        }

        let mut analyzed = Vec::with_capacity(pending.len());
        for (chunk, handle) in pending {
            let abort = handle.abort_handle();
            match tokio::time::timeout(CHUNK_TIMEOUT, handle).await {
                Ok(Ok(analysis)) => analyzed.push(AnalyzedChunk { chunk, analysis }),
                Ok(Err(e)) => warn!(chunk_id = chunk.index, error = %e, "chunk analysis failed"),
                Err(_) => {
                    abort.abort();
                    warn!(chunk_id = chunk.index, "chunk analysis timed out");
                }
            }
        }
        analyzed
    }

    /// Analyze one chunk. Pure function of the chunk text and ordinal.
    pub fn analyze_chunk(&self, text: &str, chunk_id: usize) -> ChunkAnalysis {
        let ids = self.parser.extract_case_ids(text);
        ChunkAnalysis {
            chunk_id,
            length: text.len(),
            word_count: text.split_whitespace().count(),
            line_count: text.lines().count(),
            contains_case_ids: ids.is_valid(),
            extracted_ids: ids,
            content_type: classify_content_type(text),
            priority_level: determine_priority(text),
            key_phrases: self.extract_key_phrases(text),
            entities: self.extract_entities(text),
        }
    }

    fn extract_key_phrases(&self, text: &str) -> Vec<String> {
        let mut phrases = BTreeSet::new();
        for pattern in &self.patterns.key_phrases {
            for m in pattern.find_iter(text) {
                phrases.insert(m.as_str().to_string());
            }
        }
        phrases.into_iter().collect()
    }

    fn extract_entities(&self, text: &str) -> Vec<Entity> {
        let mut entities = Vec::new();
        for (entity_type, pattern) in &self.patterns.entities {
            for m in pattern.find_iter(text) {
                entities.push(Entity {
                    entity_type: entity_type.to_string(),
                    value: m.as_str().to_string(),
                    context: context_window(text, m.start(), m.end()),
                });
            }
        }
        entities
    }

    fn summarize(&self, content: &str, chunks: &[AnalyzedChunk]) -> ContextSummary {
        let mut content_types: BTreeMap<String, usize> = BTreeMap::new();
        let mut priority_distribution: BTreeMap<String, usize> = BTreeMap::new();
        for c in chunks {
            *content_types
                .entry(c.analysis.content_type.as_str().to_string())
                .or_insert(0) += 1;
            *priority_distribution
                .entry(c.analysis.priority_level.as_str().to_string())
                .or_insert(0) += 1;
        }

        let mut key_topics: Vec<(String, usize)> = content_types
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        key_topics.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        key_topics.truncate(5);

        ContextSummary {
            total_chunks: chunks.len(),
            total_length: content.len(),
            content_types,
            priority_distribution,
            key_topics,
        }
    }

    /// Distill error messages, timestamps, system info, customer impact and
    /// resolution steps from the whole capture. All lists are deduplicated.
    pub fn extract_key_information(&self, content: &str) -> KeyInformation {
        KeyInformation {
            case_identifiers: self.parser.extract_case_ids(content),
            error_messages: capture_set(&self.patterns.errors, content),
            timestamps: find_set(&self.patterns.timestamps, content),
            system_information: SystemInformation {
                operating_system: find_set(&self.patterns.operating_systems, content),
                versions: find_set(&self.patterns.versions, content),
            },
            customer_impact: self.extract_customer_impact(content),
            resolution_steps: capture_set(&self.patterns.resolutions, content),
        }
    }

    fn extract_customer_impact(&self, content: &str) -> CustomerImpact {
        let lower = content.to_lowercase();
        // Severity ladder, most severe first.
        let ladder: &[(&str, &[&str])] = &[
            ("critical", &["critical", "sev1", "severity 1"]),
            ("high", &["high", "sev2", "severity 2"]),
            ("medium", &["medium", "sev3", "severity 3"]),
            ("low", &["low", "sev4", "severity 4"]),
        ];
        let severity = ladder
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
            .map(|(level, _)| level.to_string())
            .unwrap_or_else(|| "unknown".to_string());

        CustomerImpact {
            severity,
            affected_users: capture_set(&self.patterns.affected_users, content),
        }
    }

    /// Generate the deduplicated tag set for a capture.
    pub fn generate_tags(&self, content: &str, key_info: &KeyInformation) -> Vec<String> {
        let mut tags = BTreeSet::new();

        if let Some(icm) = &key_info.case_identifiers.icm_id {
            tags.insert(format!("ICM-{}", icm));
        }
        if let Some(case) = &key_info.case_identifiers.case_id {
            tags.insert(format!("Case-{}", case));
        }
        if key_info.customer_impact.severity != "unknown" {
            tags.insert(format!("severity-{}", key_info.customer_impact.severity));
        }

        let lower = content.to_lowercase();
        if lower.contains("error") {
            tags.insert("error".to_string());
        }
        if lower.contains("resolution") {
            tags.insert("resolution".to_string());
        }
        if lower.contains("customer") {
            tags.insert("customer-facing".to_string());
        }
        if lower.contains("internal") {
            tags.insert("internal".to_string());
        }

        tags.into_iter().collect()
    }

    /// Urgency keywords present anywhere in the content, in vocabulary order.
    pub fn extract_urgency_indicators(&self, content: &str) -> Vec<String> {
        let lower = content.to_lowercase();
        URGENCY_KEYWORDS
            .iter()
            .filter(|k| lower.contains(*k))
            .map(|k| k.to_string())
            .collect()
    }

    /// First labeled issue/problem/error line, else the first line that looks
    /// like an issue, else a fixed sentinel.
    pub fn extract_primary_issue(&self, content: &str) -> String {
        for pattern in &self.patterns.issues {
            if let Some(c) = pattern.captures(content) {
                return c[1].trim().to_string();
            }
        }
        for line in content.lines() {
            let lower = line.to_lowercase();
            if ["issue", "problem", "error", "unable"]
                .iter()
                .any(|k| lower.contains(k))
            {
                return line.trim().to_string();
            }
        }
        "Primary issue not clearly identified".to_string()
    }

    /// Systems named by server/application/service/database/system labels.
    pub fn extract_affected_systems(&self, content: &str) -> Vec<String> {
        capture_set(&self.patterns.systems, content)
    }

    /// Labeled action/todo/next-step/follow-up/escalate lines.
    pub fn extract_actionable_items(&self, content: &str) -> Vec<String> {
        capture_set(&self.patterns.actions, content)
    }

    pub fn parser(&self) -> &CaseParser {
        &self.parser
    }
}

/// Classify chunk content by the first matching rule in
/// [`CONTENT_TYPE_RULES`]. Defaults to general information.
pub fn classify_content_type(text: &str) -> ContentType {
    let lower = text.to_lowercase();
    for (content_type, keywords) in CONTENT_TYPE_RULES {
        if keywords.iter().any(|k| lower.contains(k)) {
            return *content_type;
        }
    }
    ContentType::GeneralInformation
}

/// Resolve the priority of a piece of text by the first matching keyword set.
/// Pure and cacheable by input text; defaults to `Normal`.
pub fn determine_priority(text: &str) -> PriorityLevel {
    let lower = text.to_lowercase();
    for (priority, keywords) in PRIORITY_RULES {
        if keywords.iter().any(|k| lower.contains(k)) {
            return *priority;
        }
    }
    PriorityLevel::Normal
}

/// Deduplicated first-capture-group matches across a pattern list.
fn capture_set(patterns: &[Regex], content: &str) -> Vec<String> {
    let mut out = BTreeSet::new();
    for pattern in patterns {
        for c in pattern.captures_iter(content) {
            out.insert(c[1].trim().to_string());
        }
    }
    out.into_iter().collect()
}

/// Deduplicated whole matches across a pattern list.
fn find_set(patterns: &[Regex], content: &str) -> Vec<String> {
    let mut out = BTreeSet::new();
    for pattern in patterns {
        for m in pattern.find_iter(content) {
            out.insert(m.as_str().to_string());
        }
    }
    out.into_iter().collect()
}

/// ±100 characters around a match, clamped to the text bounds and snapped to
/// char boundaries.
fn context_window(text: &str, start: usize, end: usize) -> String {
    let mut lo = start.saturating_sub(100);
    while lo > 0 && !text.is_char_boundary(lo) {
        lo -= 1;
    }
    let mut hi = (end + 100).min(text.len());
    while hi < text.len() && !text.is_char_boundary(hi) {
        hi += 1;
    }
    text[lo..hi].trim().to_string()
}
