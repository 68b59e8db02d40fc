//! Planner agent: topic in, ordered research plan out.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use delve_common::{Plan, StepTrace};
use delve_llm::ModelClient;
use regex::Regex;
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::prompts;
use crate::traits::{Agent, AgentContext, AgentError, AgentOutcome, AgentOutput, AgentRole};

/// Produces the session plan with a single model call.
pub struct PlannerAgent {
    model: Arc<dyn ModelClient>,
    max_sections: usize,
}

impl PlannerAgent {
    pub fn new(model: Arc<dyn ModelClient>) -> Self {
        Self {
            model,
            max_sections: 10,
        }
    }

    pub fn with_max_sections(mut self, max_sections: usize) -> Self {
        self.max_sections = max_sections.max(1);
        self
    }
}

#[async_trait]
impl Agent for PlannerAgent {
    fn name(&self) -> &str {
        "planner"
    }

    fn role(&self) -> AgentRole {
        AgentRole::Planner
    }

    #[instrument(skip(self, ctx), fields(session_id = %ctx.session_id))]
    async fn invoke(&self, ctx: AgentContext) -> Result<AgentOutcome, AgentError> {
        let prompt = prompts::planner(&ctx.topic, self.max_sections);
        let trace = StepTrace::new(self.name(), prompt.clone());

        let raw = match self.model.complete(&prompt, &ctx.memory.rendered).await {
            Ok(raw) => raw,
            Err(e) => return Err(AgentError::new(self.name(), format!("model error: {e}"), trace)),
        };
        let trace = trace.with_output(raw.clone());

        let plan = match parse_plan(&ctx.topic, &raw, self.max_sections) {
            Some(plan) => plan,
            None => {
                warn!(session_id = %ctx.session_id, "Planner output could not be parsed");
                return Err(AgentError::new(
                    self.name(),
                    "planner output contained no recognizable plan",
                    trace,
                ));
            }
        };

        info!(
            agent = %self.name(),
            session_id = %ctx.session_id,
            sections = plan.len(),
            "Plan created"
        );

        let trace = trace.with_decision(format!("planned {} sections", plan.len()));
        Ok(AgentOutcome {
            output: AgentOutput::Plan(plan),
            trace,
        })
    }
}

fn list_item_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(?:\d+[.)]|[-*•])\s+(.+?)\s*$").ok())
        .as_ref()
}

/// Parse planner output into a plan of at most `max_sections` sections.
///
/// JSON (`{"sections": [...]}` or a bare array of strings or
/// `{title, objective}` objects) is tried first, then numbered or bulleted
/// lines of the form `Title: objective`. Returns `None` when neither form is
/// present; a JSON plan with no sections parses to an empty plan.
pub fn parse_plan(topic: &str, raw: &str, max_sections: usize) -> Option<Plan> {
    if let Some(sections) = parse_json_sections(raw) {
        return Some(Plan::new(topic, sections.into_iter().take(max_sections)));
    }

    let re = list_item_re()?;
    let sections: Vec<(String, String)> = raw
        .lines()
        .filter_map(|line| re.captures(line))
        .filter_map(|caps| caps.get(1).map(|m| split_title(m.as_str())))
        .filter(|(title, _)| !title.is_empty())
        .take(max_sections)
        .collect();

    if sections.is_empty() {
        None
    } else {
        Some(Plan::new(topic, sections))
    }
}

fn parse_json_sections(raw: &str) -> Option<Vec<(String, String)>> {
    let value = extract_json(raw)?;
    let items = match &value {
        Value::Object(map) => map.get("sections")?.as_array()?,
        Value::Array(items) => items,
        _ => return None,
    };

    Some(
        items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(split_title(s)),
                Value::Object(obj) => {
                    let title = obj.get("title").and_then(Value::as_str)?.trim().to_string();
                    let objective = obj
                        .get("objective")
                        .or_else(|| obj.get("description"))
                        .and_then(Value::as_str)
                        .map(|s| s.trim().to_string())
                        .unwrap_or_else(|| title.clone());
                    Some((title, objective))
                }
                _ => None,
            })
            .filter(|(title, _)| !title.is_empty())
            .collect(),
    )
}

/// The outermost JSON object or array in `raw`, tolerating code fences and prose.
fn extract_json(raw: &str) -> Option<Value> {
    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (raw.find(open), raw.rfind(close)) {
            if start < end {
                if let Ok(value) = serde_json::from_str(&raw[start..=end]) {
                    return Some(value);
                }
            }
        }
    }
    None
}

fn split_title(item: &str) -> (String, String) {
    let item = item.trim().trim_matches('*').trim();
    match item.split_once(": ").or_else(|| item.split_once(" - ")) {
        Some((title, objective)) => (
            title.trim().trim_matches('*').trim().to_string(),
            objective.trim().to_string(),
        ),
        None => (item.to_string(), item.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_objects() {
        let raw = r#"```json
{"sections": [
  {"title": "Background", "objective": "What caffeine is"},
  {"title": "Sleep Latency", "description": "Effect on falling asleep"}
]}
```"#;
        let plan = parse_plan("caffeine", raw, 10).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.sections()[0].title, "Background");
        assert_eq!(plan.sections()[1].objective, "Effect on falling asleep");
    }

    #[test]
    fn parses_json_string_array() {
        let plan = parse_plan("t", r#"["Introduction", "Analysis: compare studies"]"#, 10).unwrap();
        assert_eq!(plan.sections()[1].title, "Analysis");
        assert_eq!(plan.sections()[1].objective, "compare studies");
    }

    #[test]
    fn empty_json_sections_is_empty_plan() {
        let plan = parse_plan("t", r#"{"sections": []}"#, 10).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn falls_back_to_numbered_lines() {
        let raw = "Here is the plan:\n1. Background: history of caffeine\n2) **Mechanisms** - adenosine\n- Dosage\nThanks!";
        let plan = parse_plan("caffeine", raw, 10).unwrap();
        let titles: Vec<&str> = plan.sections().iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["Background", "Mechanisms", "Dosage"]);
        assert_eq!(plan.sections()[1].objective, "adenosine");
    }

    #[test]
    fn caps_sections() {
        let raw = (1..=8).map(|i| format!("{i}. Section {i}")).collect::<Vec<_>>().join("\n");
        assert_eq!(parse_plan("t", &raw, 3).unwrap().len(), 3);
    }

    #[test]
    fn prose_is_unparseable() {
        assert!(parse_plan("t", "I cannot help with that.", 10).is_none());
    }
}
