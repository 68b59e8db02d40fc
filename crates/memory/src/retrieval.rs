//! Memory context building for agent prompts.

use tracing::debug;

use crate::types::{RetrievedMemory, Turn};

/// Formats memory into a bounded block of prompt context.
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    max_context_tokens: usize,
}

impl ContextBuilder {
    pub fn new(max_context_tokens: usize) -> Self {
        Self { max_context_tokens }
    }

    /// Long-term hits first (best first), then as many recent turns as fit.
    ///
    /// Returns an empty string when there is nothing to say.
    pub fn build(&self, short_term: &[Turn], long_term: &[RetrievedMemory]) -> String {
        let mut token_count = 0;

        let mut knowledge = Vec::new();
        for hit in long_term {
            let part = format!("- ({:.2}) {}", hit.score, hit.entry.content);
            let tokens = estimate_tokens(&part);
            if token_count + tokens > self.max_context_tokens {
                break;
            }
            knowledge.push(part);
            token_count += tokens;
        }

        let mut recent = Vec::new();
        for turn in short_term.iter().rev() {
            let part = format!("[{}] {}", turn.role.label(), turn.text);
            let tokens = estimate_tokens(&part);
            if token_count + tokens > self.max_context_tokens {
                break;
            }
            recent.push(part);
            token_count += tokens;
        }
        recent.reverse();

        let mut sections = Vec::new();
        if !knowledge.is_empty() {
            sections.push(format!(
                "## Relevant Knowledge from Previous Sessions\n\n{}",
                knowledge.join("\n")
            ));
        }
        if !recent.is_empty() {
            sections.push(format!("## Recent Conversation\n\n{}", recent.join("\n")));
        }

        debug!(
            long_term = knowledge.len(),
            short_term = recent.len(),
            estimated_tokens = token_count,
            "Built memory context"
        );

        sections.join("\n\n")
    }
}

/// Rough estimate: ~4 chars per token.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}
