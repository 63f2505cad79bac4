//! Assessment parsing
//!
//! Judge output is free-form model text. `parse_assessment` is total: every
//! input, including empty and garbage input, yields an [`Assessment`].
//!
//! Order of attempts:
//! 1. fenced block (json, yaml, or bare fence) as JSON, then as `key: value` lines
//! 2. the text between the first `{` and the last `}`, same parse
//! 3. loose pattern extraction from prose
//! 4. fixed defaults

use coop_core::{Decision, ParseMode};
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::OnceLock;

pub const DEFAULT_QUALITY: f64 = 0.5;
pub const DEFAULT_CHANGE: f64 = 0.5;
pub const FALLBACK_REASONING: &str = "Unable to parse assessment";

const STRUCTURED_CONFIDENCE: f64 = 0.9;
const PATTERN_CONFIDENCE: f64 = 0.6;
const MAX_REASONING_CHARS: usize = 2000;

/// Scores recovered from one judge response
#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    pub quality_score: f64,
    pub change_magnitude: f64,
    pub confidence: f64,
    pub decision: Decision,
    pub reasoning: String,
    pub mode: ParseMode,
}

impl Assessment {
    /// The assessment used when nothing in the text is recognizable
    pub fn fallback() -> Self {
        Self {
            quality_score: DEFAULT_QUALITY,
            change_magnitude: DEFAULT_CHANGE,
            confidence: 0.0,
            decision: Decision::Continue,
            reasoning: FALLBACK_REASONING.to_string(),
            mode: ParseMode::Fallback,
        }
    }
}

/// Fields found before defaults are applied
#[derive(Debug, Default)]
struct Partial {
    quality: Option<f64>,
    change: Option<f64>,
    confidence: Option<f64>,
    decision: Option<Decision>,
    reasoning: Option<String>,
}

impl Partial {
    fn has_signal(&self) -> bool {
        self.quality.is_some() || self.change.is_some() || self.decision.is_some()
    }

    fn finish(self, mode: ParseMode, default_confidence: f64) -> Assessment {
        let reasoning = self
            .reasoning
            .map(|r| truncate(r.trim(), MAX_REASONING_CHARS))
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| "No reasoning provided".to_string());

        Assessment {
            quality_score: self.quality.unwrap_or(DEFAULT_QUALITY),
            change_magnitude: self.change.unwrap_or(DEFAULT_CHANGE),
            confidence: self.confidence.unwrap_or(default_confidence),
            decision: self.decision.unwrap_or_default(),
            reasoning,
            mode,
        }
    }
}

/// Parse judge output into an assessment. Never fails.
pub fn parse_assessment(text: &str) -> Assessment {
    for block in fenced_blocks(text) {
        if let Some(partial) = parse_structured(block) {
            return partial.finish(ParseMode::Structured, STRUCTURED_CONFIDENCE);
        }
    }

    if let Some(fragment) = brace_fragment(text) {
        if let Some(partial) = parse_structured(fragment) {
            return partial.finish(ParseMode::Structured, STRUCTURED_CONFIDENCE);
        }
    }

    let partial = parse_patterns(text);
    if partial.has_signal() {
        return partial.finish(ParseMode::Pattern, PATTERN_CONFIDENCE);
    }

    Assessment::fallback()
}

/// Map a score onto `[0, 1]`
///
/// Values above 1 are read as a 0-10 scale when they fit, otherwise clamped.
pub fn normalize_score(value: f64) -> Option<f64> {
    if !value.is_finite() {
        return None;
    }
    let v = if value > 1.0 {
        if value <= 10.0 {
            value / 10.0
        } else {
            1.0
        }
    } else {
        value
    };
    Some(v.max(0.0))
}

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)```[ \t]*(?:json|yaml|yml)?[ \t]*\r?\n?(.*?)```").expect("valid regex")
    })
}

fn fenced_blocks(text: &str) -> Vec<&str> {
    fence_re()
        .captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect()
}

fn brace_fragment(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Parse a block as a JSON object, then as `key: value` / `key = value` lines
fn parse_structured(block: &str) -> Option<Partial> {
    let block = block.trim();
    if block.is_empty() {
        return None;
    }

    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(block) {
        let fields: HashMap<String, String> = map
            .into_iter()
            .map(|(k, v)| {
                let value = match v {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                (normalize_key(&k), value)
            })
            .collect();
        let partial = from_fields(&fields);
        if partial.has_signal() {
            return Some(partial);
        }
    }

    let partial = from_fields(&key_value_lines(block));
    partial.has_signal().then_some(partial)
}

fn key_value_lines(block: &str) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    for line in block.lines() {
        let line = line.trim().trim_start_matches(['-', '*', '{']).trim();
        let Some(idx) = line.find([':', '=']) else {
            continue;
        };
        let key = normalize_key(&line[..idx]);
        let value = line[idx + 1..]
            .trim()
            .trim_end_matches([',', '}'])
            .trim()
            .trim_matches(['"', '\''])
            .to_string();
        if !key.is_empty() {
            fields.entry(key).or_insert(value);
        }
    }
    fields
}

fn normalize_key(raw: &str) -> String {
    raw.trim()
        .trim_matches(['"', '\'', '*', '`'])
        .trim()
        .to_lowercase()
        .replace([' ', '-'], "_")
}

fn from_fields(fields: &HashMap<String, String>) -> Partial {
    let lookup = |keys: &[&str]| keys.iter().find_map(|k| fields.get(*k));

    Partial {
        quality: lookup(&["quality_score", "quality", "score"]).and_then(|v| parse_number(v)),
        change: lookup(&["change_magnitude", "change", "magnitude"]).and_then(|v| parse_number(v)),
        confidence: lookup(&["confidence"]).and_then(|v| parse_number(v)),
        decision: lookup(&["decision", "verdict", "recommendation"]).and_then(|v| decision_from_text(v)),
        reasoning: lookup(&["reasoning", "rationale", "explanation", "reason"]).cloned(),
    }
}

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-?[0-9]*\.?[0-9]+").expect("valid regex"))
}

fn parse_number(value: &str) -> Option<f64> {
    let m = number_re().find(value)?;
    m.as_str().parse::<f64>().ok().and_then(normalize_score)
}

fn halt_word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(HALT|STOP|COMPLETE)\b").expect("valid regex"))
}

fn continue_word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(CONTINUE|PROCEED)\b").expect("valid regex"))
}

fn decision_from_text(value: &str) -> Option<Decision> {
    if halt_word_re().is_match(value) {
        Some(Decision::Halt)
    } else if continue_word_re().is_match(value) {
        Some(Decision::Continue)
    } else {
        None
    }
}

fn quality_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)quality.*?score.*?[:\-]?\s*([0-9]*\.?[0-9]+)").expect("valid regex")
    })
}

fn change_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)change.*?magnitude.*?[:\-]?\s*([0-9]*\.?[0-9]+)").expect("valid regex")
    })
}

fn labeled_decision_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)decision\W{0,4}(HALT|STOP|COMPLETE|CONTINUE|PROCEED)\b").expect("valid regex")
    })
}

fn bare_halt_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(HALT|STOP|COMPLETE)\b").expect("valid regex"))
}

fn bare_continue_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(CONTINUE|PROCEED)\b").expect("valid regex"))
}

/// Reasoning markers in priority order
fn reasoning_res() -> &'static [Regex] {
    static RES: OnceLock<Vec<Regex>> = OnceLock::new();
    RES.get_or_init(|| {
        ["reasoning", "because", "decision"]
            .iter()
            .map(|marker| {
                // Reasoning may run over several lines
                let flags = if *marker == "reasoning" { "is" } else { "i" };
                Regex::new(&format!(r"(?{})\b{}\b\s*[:\-]?\s*(.+)", flags, marker))
                    .expect("valid regex")
            })
            .collect()
    })
}

fn reasoning_after_marker(text: &str) -> Option<String> {
    reasoning_res().iter().find_map(|re| {
        re.captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    })
}

fn capture_number(re: &Regex, text: &str) -> Option<f64> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .and_then(normalize_score)
}

fn parse_patterns(text: &str) -> Partial {
    // A labeled decision wins over keywords that merely appear in the prose.
    let decision = labeled_decision_re()
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| decision_from_text(m.as_str()))
        .or_else(|| {
            if bare_halt_re().is_match(text) {
                Some(Decision::Halt)
            } else if bare_continue_re().is_match(text) {
                Some(Decision::Continue)
            } else {
                None
            }
        });

    Partial {
        quality: capture_number(quality_re(), text),
        change: capture_number(change_re(), text),
        confidence: None,
        decision,
        reasoning: reasoning_after_marker(text),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let head: String = text.chars().take(max_chars).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fenced_json() {
        let text = r#"Here is my assessment:
```json
{"quality_score": 0.85, "change_magnitude": 0.2, "decision": "HALT", "reasoning": "All tests pass"}
```"#;
        let a = parse_assessment(text);
        assert_eq!(a.mode, ParseMode::Structured);
        assert_eq!(a.quality_score, 0.85);
        assert_eq!(a.change_magnitude, 0.2);
        assert_eq!(a.decision, Decision::Halt);
        assert_eq!(a.reasoning, "All tests pass");
        assert_eq!(a.confidence, STRUCTURED_CONFIDENCE);
    }

    #[test]
    fn test_fenced_yaml_lines() {
        let text = "```yaml\nquality_score: 7\nchange_magnitude: 0.4\ndecision: CONTINUE\nconfidence: 0.75\nreasoning: needs error handling\n```";
        let a = parse_assessment(text);
        assert_eq!(a.mode, ParseMode::Structured);
        assert!((a.quality_score - 0.7).abs() < 1e-9);
        assert_eq!(a.decision, Decision::Continue);
        assert_eq!(a.confidence, 0.75);
        assert_eq!(a.reasoning, "needs error handling");
    }

    #[test]
    fn test_brace_fragment_without_fence() {
        let text = r#"Sure. {"quality": "0.9", "change": 0.01, "decision": "stop"} Done."#;
        let a = parse_assessment(text);
        assert_eq!(a.mode, ParseMode::Structured);
        assert_eq!(a.quality_score, 0.9);
        assert_eq!(a.change_magnitude, 0.01);
        assert_eq!(a.decision, Decision::Halt);
    }

    #[test]
    fn test_malformed_json_falls_back_to_lines() {
        let text = "{\n  \"quality_score\": 0.6,\n  \"decision\": \"CONTINUE\",\n}";
        let a = parse_assessment(text);
        assert_eq!(a.mode, ParseMode::Structured);
        assert_eq!(a.quality_score, 0.6);
        assert_eq!(a.decision, Decision::Continue);
        assert_eq!(a.change_magnitude, DEFAULT_CHANGE);
    }

    #[test]
    fn test_prose_patterns() {
        let text = "Quality Score: 8.5\nChange Magnitude - 0.05\nDecision: HALT\nReasoning: requirements are met";
        let a = parse_assessment(text);
        assert_eq!(a.mode, ParseMode::Pattern);
        assert!((a.quality_score - 0.85).abs() < 1e-9);
        assert_eq!(a.change_magnitude, 0.05);
        assert_eq!(a.decision, Decision::Halt);
        assert_eq!(a.confidence, PATTERN_CONFIDENCE);
        assert_eq!(a.reasoning, "requirements are met");
    }

    #[test]
    fn test_lowercase_prose_keywords() {
        let a = parse_assessment("The deliverable is complete and we should halt here.");
        assert_eq!(a.mode, ParseMode::Pattern);
        assert_eq!(a.decision, Decision::Halt);

        let a = parse_assessment("quality score: 0.9\nAll requirements met, please stop.");
        assert_eq!(a.mode, ParseMode::Pattern);
        assert_eq!(a.quality_score, 0.9);
        assert_eq!(a.decision, Decision::Halt);

        let a = parse_assessment("Not there yet, please proceed with the fixes.");
        assert_eq!(a.decision, Decision::Continue);
    }

    #[test]
    fn test_reasoning_spans_lines() {
        let text = "quality score: 0.4\nReasoning: the parser is missing.\nError handling is thin too.";
        let a = parse_assessment(text);
        assert_eq!(
            a.reasoning,
            "the parser is missing.\nError handling is thin too."
        );
    }

    #[test]
    fn test_bare_keyword_decision() {
        let a = parse_assessment("Looks finished. COMPLETE");
        assert_eq!(a.mode, ParseMode::Pattern);
        assert_eq!(a.decision, Decision::Halt);
        assert_eq!(a.quality_score, DEFAULT_QUALITY);
    }

    #[test]
    fn test_large_scores_clamp() {
        let a = parse_assessment("quality score: 85");
        assert_eq!(a.quality_score, 1.0);
    }

    #[test]
    fn test_total_on_garbage_and_empty() {
        for text in ["", "   ", "¯\\_(ツ)_/¯", "{", "}{", "```", "```json\n```", "null", "[1,2,3]"] {
            let a = parse_assessment(text);
            assert_eq!(a, Assessment::fallback(), "input: {:?}", text);
        }
    }

    #[test]
    fn test_fallback_values() {
        let a = parse_assessment("I have no opinion.");
        assert_eq!(a.quality_score, 0.5);
        assert_eq!(a.change_magnitude, 0.5);
        assert_eq!(a.decision, Decision::Continue);
        assert_eq!(a.reasoning, FALLBACK_REASONING);
        assert_eq!(a.mode, ParseMode::Fallback);
        assert_eq!(a.confidence, 0.0);
    }

    #[test]
    fn test_normalize_score() {
        assert_eq!(normalize_score(0.3), Some(0.3));
        assert_eq!(normalize_score(10.0), Some(1.0));
        assert_eq!(normalize_score(42.0), Some(1.0));
        assert_eq!(normalize_score(-0.2), Some(0.0));
        assert_eq!(normalize_score(f64::NAN), None);
    }
}
