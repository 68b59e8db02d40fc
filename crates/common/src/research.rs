//! Research artifacts: plans, evidence, per-section results and reports.

use crate::now_millis;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Write as _};

/// One research subtask of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    /// Stable ID within the plan (`section-1`, `section-2`, ...)
    pub id: String,

    /// Human-readable title
    pub title: String,

    /// What the researcher should find out
    pub objective: String,
}

/// Ordered decomposition of a topic into sections.
///
/// Immutable once produced by the planner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub topic: String,
    sections: Vec<Section>,
}

impl Plan {
    /// Build a plan from `(title, objective)` pairs, assigning section IDs in order.
    pub fn new<I, T, O>(topic: impl Into<String>, sections: I) -> Self
    where
        I: IntoIterator<Item = (T, O)>,
        T: Into<String>,
        O: Into<String>,
    {
        let sections = sections
            .into_iter()
            .enumerate()
            .map(|(i, (title, objective))| Section {
                id: format!("section-{}", i + 1),
                title: title.into(),
                objective: objective.into(),
            })
            .collect();

        Self {
            topic: topic.into(),
            sections,
        }
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

/// A single retrieved fact or snippet with source provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    /// Source identifier (URL, DOI, ...)
    pub source: String,

    pub snippet: String,

    /// Tool that produced this evidence
    pub tool: String,

    /// Retrieval timestamp (Unix millis)
    pub retrieved_at: u64,
}

/// Outcome of researching one section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchResult {
    pub section_id: String,

    #[serde(default)]
    pub evidence: Vec<Evidence>,

    pub summary: String,

    /// Set when the section could not be researched; such results carry no evidence.
    #[serde(default)]
    pub degraded: bool,
}

impl ResearchResult {
    pub fn new(section_id: impl Into<String>, evidence: Vec<Evidence>, summary: impl Into<String>) -> Self {
        Self {
            section_id: section_id.into(),
            evidence,
            summary: summary.into(),
            degraded: false,
        }
    }

    /// An evidence-less result explaining why the section has no findings.
    pub fn degraded(section: &Section, reason: impl fmt::Display) -> Self {
        Self {
            section_id: section.id.clone(),
            evidence: Vec::new(),
            summary: format!(
                "Research for '{}' could not be completed: {}",
                section.title, reason
            ),
            degraded: true,
        }
    }
}

/// One written section of the final report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSection {
    pub section_id: String,
    pub title: String,
    pub body: String,

    #[serde(default)]
    pub sources: Vec<String>,

    #[serde(default)]
    pub degraded: bool,
}

/// Terminal artifact of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub title: String,
    pub sections: Vec<ReportSection>,

    /// Excerpts the writer flagged as worth remembering
    #[serde(default)]
    pub notable: Vec<String>,

    /// Creation timestamp (Unix millis)
    pub created_at: u64,
}

impl Report {
    pub fn new(title: impl Into<String>, sections: Vec<ReportSection>, notable: Vec<String>) -> Self {
        Self {
            title: title.into(),
            sections,
            notable,
            created_at: now_millis(),
        }
    }

    pub fn degraded_count(&self) -> usize {
        self.sections.iter().filter(|s| s.degraded).count()
    }

    /// Render as markdown with a table of contents and numbered sources.
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# {}\n", self.title);
        let _ = writeln!(out, "*Generated at: {} (unix ms)*\n", self.created_at);

        out.push_str("## Table of Contents\n\n");
        for section in &self.sections {
            let _ = writeln!(out, "- [{}](#{})", section.title, anchor(&section.title));
        }
        out.push_str("\n---\n\n");

        for section in &self.sections {
            let _ = writeln!(out, "## {}\n", section.title);
            if section.degraded {
                out.push_str("> **Degraded section:** no evidence could be gathered.\n\n");
            }
            let _ = writeln!(out, "{}\n", section.body.trim());

            if !section.sources.is_empty() {
                out.push_str("### Sources\n\n");
                for (i, source) in section.sources.iter().enumerate() {
                    let _ = writeln!(out, "{}. {}", i + 1, source);
                }
                out.push('\n');
            }
        }

        out
    }
}

fn anchor(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == ' ' || *c == '-')
        .collect::<String>()
        .replace(' ', "-")
}
