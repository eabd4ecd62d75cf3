//! Support Context Protocol synthesis.
//!
//! The protocol is the single externally consumable enrichment artifact: a
//! condensed, structured summary of one capture assembled from a fresh
//! analysis pass. It is read-only once generated and is persisted both as
//! JSON (`_context_protocol.json`) and as a human-readable rendering
//! (`_condensed.txt`).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::analyzer::{determine_priority, AnalysisReport, ContextAnalyzer, CustomerImpact, PriorityLevel};
use crate::parser::CaseIdentifiers;

pub const PROTOCOL_VERSION: &str = "1.0";

/// How many error messages the protocol carries.
const MAX_ERROR_MESSAGES: usize = 3;
/// How many high/medium chunks the protocol carries.
const MAX_CONTEXT_CHUNKS: usize = 5;
/// Chunk summaries are truncated to this many characters.
const CHUNK_SUMMARY_CHARS: usize = 200;

#[derive(Debug, Clone, Serialize)]
pub struct PrioritySummary {
    pub overall_priority: PriorityLevel,
    pub severity: String,
    pub urgency_indicators: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct KeyFacts {
    pub primary_issue: String,
    pub error_messages: Vec<String>,
    pub affected_systems: Vec<String>,
    pub customer_impact: CustomerImpact,
}

/// One high/medium-priority chunk, summarized. Chunks keep their original
/// document order; they are not re-sorted by priority.
#[derive(Debug, Clone, Serialize)]
pub struct ContextChunkSummary {
    #[serde(rename = "type")]
    pub content_type: String,
    pub priority: PriorityLevel,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProtocolMetadata {
    pub original_length: usize,
    pub processed_chunks: usize,
    pub processing_timestamp: DateTime<Utc>,
}

/// The condensed enrichment artifact for one capture.
#[derive(Debug, Clone, Serialize)]
pub struct SupportContextProtocol {
    pub protocol_version: String,
    pub generated_at: DateTime<Utc>,
    pub case_identifiers: CaseIdentifiers,
    pub priority_summary: PrioritySummary,
    pub key_facts: KeyFacts,
    pub context_chunks: Vec<ContextChunkSummary>,
    pub actionable_items: Vec<String>,
    pub tags: Vec<String>,
    pub metadata: ProtocolMetadata,
}

/// Synthesize the protocol for a capture. Runs its own metadata extraction
/// and analysis pass over the content.
pub async fn synthesize(analyzer: &Arc<ContextAnalyzer>, content: &str) -> SupportContextProtocol {
    let metadata = analyzer.parser().extract_metadata(content);
    let report = Arc::clone(analyzer).analyze(content, &metadata).await;
    from_report(analyzer, content, &report)
}

/// Assemble the protocol from an existing analysis report, avoiding a second
/// analysis pass when the caller already has one.
pub fn from_report(
    analyzer: &Arc<ContextAnalyzer>,
    content: &str,
    report: &AnalysisReport,
) -> SupportContextProtocol {
    let key_info = &report.key_information;

    let context_chunks: Vec<ContextChunkSummary> = report
        .chunks
        .iter()
        .filter(|c| {
            matches!(
                c.analysis.priority_level,
                PriorityLevel::High | PriorityLevel::Medium
            )
        })
        .take(MAX_CONTEXT_CHUNKS)
        .map(|c| ContextChunkSummary {
            content_type: c.analysis.content_type.as_str().to_string(),
            priority: c.analysis.priority_level,
            summary: truncate_chars(&c.chunk.text, CHUNK_SUMMARY_CHARS),
        })
        .collect();

    SupportContextProtocol {
        protocol_version: PROTOCOL_VERSION.to_string(),
        generated_at: Utc::now(),
        case_identifiers: key_info.case_identifiers.clone(),
        priority_summary: PrioritySummary {
            overall_priority: determine_priority(content),
            severity: key_info.customer_impact.severity.clone(),
            urgency_indicators: analyzer.extract_urgency_indicators(content),
        },
        key_facts: KeyFacts {
            primary_issue: analyzer.extract_primary_issue(content),
            error_messages: key_info
                .error_messages
                .iter()
                .take(MAX_ERROR_MESSAGES)
                .cloned()
                .collect(),
            affected_systems: analyzer.extract_affected_systems(content),
            customer_impact: key_info.customer_impact.clone(),
        },
        context_chunks,
        actionable_items: analyzer.extract_actionable_items(content),
        tags: report.tags.clone(),
        metadata: ProtocolMetadata {
            original_length: content.len(),
            processed_chunks: report.chunks.len(),
            processing_timestamp: report.processed_at,
        },
    }
}

/// Human-readable rendering of the protocol, written as `_condensed.txt`.
pub fn render_condensed(protocol: &SupportContextProtocol) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "SUPPORT CONTEXT PROTOCOL v{}\n",
        protocol.protocol_version
    ));
    out.push_str(&format!(
        "Generated: {}\n",
        protocol.generated_at.to_rfc3339()
    ));
    out.push('\n');

    out.push_str("CASE IDENTIFIERS\n");
    out.push_str(&format!(
        "  ICM ID:  {}\n",
        protocol.case_identifiers.icm_id.as_deref().unwrap_or("-")
    ));
    out.push_str(&format!(
        "  Case ID: {}\n",
        protocol.case_identifiers.case_id.as_deref().unwrap_or("-")
    ));
    out.push('\n');

    out.push_str("PRIORITY\n");
    out.push_str(&format!(
        "  Overall:  {}\n",
        protocol.priority_summary.overall_priority.as_str()
    ));
    out.push_str(&format!(
        "  Severity: {}\n",
        protocol.priority_summary.severity
    ));
    if !protocol.priority_summary.urgency_indicators.is_empty() {
        out.push_str(&format!(
            "  Urgency:  {}\n",
            protocol.priority_summary.urgency_indicators.join(", ")
        ));
    }
    out.push('\n');

    out.push_str("KEY FACTS\n");
    out.push_str(&format!(
        "  Primary issue: {}\n",
        protocol.key_facts.primary_issue
    ));
    for error in &protocol.key_facts.error_messages {
        out.push_str(&format!("  Error: {}\n", error));
    }
    for system in &protocol.key_facts.affected_systems {
        out.push_str(&format!("  Affected system: {}\n", system));
    }
    out.push('\n');

    if !protocol.context_chunks.is_empty() {
        out.push_str("CONTEXT\n");
        for chunk in &protocol.context_chunks {
            out.push_str(&format!(
                "  [{} / {}] {}\n",
                chunk.content_type,
                chunk.priority.as_str(),
                chunk.summary.replace('\n', " ")
            ));
        }
        out.push('\n');
    }

    if !protocol.actionable_items.is_empty() {
        out.push_str("ACTION ITEMS\n");
        for item in &protocol.actionable_items {
            out.push_str(&format!("  - {}\n", item));
        }
        out.push('\n');
    }

    if !protocol.tags.is_empty() {
        out.push_str(&format!("TAGS: {}\n", protocol.tags.join(", ")));
    }

    out
}

/// Truncate to at most `max` characters, appending an ellipsis when cut.
fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max).collect();
    format!("{}...", cut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn analyzer() -> Arc<ContextAnalyzer> {
        Arc::new(ContextAnalyzer::new(&Config::default()))
    }

    #[tokio::test]
    async fn protocol_carries_tags_and_primary_issue() {
        let a = analyzer();
        let content = "ICM 635658889 outage\nerror: connection refused\ncustomer cannot log in";
        let protocol = synthesize(&a, content).await;

        assert_eq!(protocol.protocol_version, "1.0");
        assert!(protocol.tags.contains(&"error".to_string()));
        assert!(protocol.tags.contains(&"customer-facing".to_string()));
        assert!(!protocol.key_facts.primary_issue.is_empty());
        assert_eq!(protocol.key_facts.primary_issue, "connection refused");
        assert_eq!(
            protocol.case_identifiers.icm_id.as_deref(),
            Some("635658889")
        );
    }

    #[tokio::test]
    async fn context_chunks_capped_and_in_document_order() {
        let a = analyzer();
        // Many high-priority paragraphs to overflow the cap.
        let content = (0..12)
            .map(|i| format!("critical outage segment {} with plenty of padding text to force multiple chunks out of the splitter window size", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let protocol = synthesize(&a, &content).await;

        assert!(protocol.context_chunks.len() <= 5);
        assert!(protocol
            .context_chunks
            .iter()
            .all(|c| matches!(c.priority, PriorityLevel::High | PriorityLevel::Medium)));
    }

    #[tokio::test]
    async fn error_messages_capped_at_three() {
        let a = analyzer();
        let content = "error: one\nerror: two\nerror: three\nerror: four\nerror: five";
        let protocol = synthesize(&a, content).await;
        assert!(protocol.key_facts.error_messages.len() <= 3);
    }

    #[tokio::test]
    async fn actionable_items_extracted() {
        let a = analyzer();
        let content = "issue: replication lag\naction: page the on-call\nnext step: rotate the cert";
        let protocol = synthesize(&a, content).await;
        assert!(protocol
            .actionable_items
            .iter()
            .any(|i| i.contains("page the on-call")));
        assert!(protocol
            .actionable_items
            .iter()
            .any(|i| i.contains("rotate the cert")));
    }

    #[tokio::test]
    async fn condensed_rendering_mentions_key_sections() {
        let a = analyzer();
        let content = "ICM 635658889 urgent outage\nerror: disk full on server: files01";
        let protocol = synthesize(&a, content).await;
        let text = render_condensed(&protocol);
        assert!(text.contains("SUPPORT CONTEXT PROTOCOL v1.0"));
        assert!(text.contains("ICM ID:  635658889"));
        assert!(text.contains("Primary issue:"));
        assert!(text.contains("TAGS:"));
    }

    #[test]
    fn truncation_appends_ellipsis() {
        assert_eq!(truncate_chars("short", 10), "short");
        let long = "x".repeat(250);
        let cut = truncate_chars(&long, 200);
        assert!(cut.ends_with("..."));
        assert_eq!(cut.chars().count(), 203);
    }
}
