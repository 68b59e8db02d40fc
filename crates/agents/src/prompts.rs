//! Prompt templates for the three agents.

use delve_common::{Evidence, ResearchResult, Section};

pub const PLANNER_INSTRUCTIONS: &str = r#"You are a Research Planning Agent. Break the topic into an ordered set of research sections.

INSTRUCTIONS:
1. Analyze the topic to understand its scope
2. Identify the key research areas and subtopics
3. Order the sections so each builds on the previous ones

OUTPUT FORMAT:
Respond with JSON only:
{"sections": [{"title": "...", "objective": "what to find out"}]}
"#;

pub const RESEARCHER_INSTRUCTIONS: &str = r#"You are a Research Agent. Summarize the evidence gathered for one section of a research plan.

INSTRUCTIONS:
1. Keep only information relevant to the section objective
2. Note conflicting findings and gaps
3. Do not invent facts that are not in the evidence
"#;

pub const WRITER_INSTRUCTIONS: &str = r#"You are a Report Writing Agent. Write one section of a research report from the findings provided.

INSTRUCTIONS:
1. Write clear, well-structured prose in markdown, without a heading
2. Only state what the findings support
3. After the section text, add up to two lines starting with "NOTABLE:" holding
   facts worth remembering for future research
"#;

pub fn planner(topic: &str, max_sections: usize) -> String {
    format!("{PLANNER_INSTRUCTIONS}\nUse at most {max_sections} sections.\n\nTOPIC: {topic}")
}

pub fn researcher(topic: &str, section: &Section, evidence: &[Evidence]) -> String {
    let evidence_lines: Vec<String> = evidence
        .iter()
        .enumerate()
        .map(|(i, e)| format!("[{}] ({}, via {}) {}", i + 1, e.source, e.tool, e.snippet))
        .collect();

    format!(
        "{RESEARCHER_INSTRUCTIONS}\nMAIN TOPIC: {topic}\nSECTION: {}\nOBJECTIVE: {}\n\nEVIDENCE:\n{}",
        section.title,
        section.objective,
        evidence_lines.join("\n")
    )
}

pub fn writer_section(topic: &str, section: &Section, result: &ResearchResult) -> String {
    format!(
        "{WRITER_INSTRUCTIONS}\nREPORT TOPIC: {topic}\nSECTION: {}\nOBJECTIVE: {}\n\nFINDINGS:\n{}",
        section.title, section.objective, result.summary
    )
}

/// Search query for one section.
pub fn tool_query(topic: &str, section: &Section) -> String {
    format!("{topic}: {}", section.title)
}
