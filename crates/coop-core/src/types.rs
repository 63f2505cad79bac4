//! Shared data model for a Coop run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// The reasoning roles a run calls on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    ProductManager,
    Architect,
    Programmer,
    Tester,
    Reviewer,
    QualityGate,
    Reflector,
    Distiller,
}

impl Role {
    pub const ALL: [Role; 8] = [
        Role::ProductManager,
        Role::Architect,
        Role::Programmer,
        Role::Tester,
        Role::Reviewer,
        Role::QualityGate,
        Role::Reflector,
        Role::Distiller,
    ];

    /// Configuration key for this role
    pub fn key(&self) -> &'static str {
        match self {
            Role::ProductManager => "product_manager",
            Role::Architect => "architect",
            Role::Programmer => "programmer",
            Role::Tester => "tester",
            Role::Reviewer => "reviewer",
            Role::QualityGate => "quality_gate",
            Role::Reflector => "reflector",
            Role::Distiller => "distiller",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::ProductManager => "Product Manager",
            Role::Architect => "Architect",
            Role::Programmer => "Programmer",
            Role::Tester => "Tester",
            Role::Reviewer => "Reviewer",
            Role::QualityGate => "Quality Gate",
            Role::Reflector => "Reflector",
            Role::Distiller => "Distiller",
        };
        write!(f, "{}", name)
    }
}

/// Model settings resolved for one role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleConfig {
    pub role: Role,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Speaker of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// One message in a gateway conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Languages the sandbox knows how to test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Python,
    JavaScript,
    C,
}

impl Language {
    /// File extension for source files
    pub fn extension(&self) -> &'static str {
        match self {
            Language::Python => "py",
            Language::JavaScript => "js",
            Language::C => "c",
        }
    }

    /// Fence tags a model may use for this language
    pub fn fence_tags(&self) -> &'static [&'static str] {
        match self {
            Language::Python => &["python", "py"],
            Language::JavaScript => &["javascript", "js"],
            Language::C => &["c"],
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::Python => write!(f, "python"),
            Language::JavaScript => write!(f, "javascript"),
            Language::C => write!(f, "c"),
        }
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "python" | "py" => Ok(Language::Python),
            "javascript" | "js" | "node" => Ok(Language::JavaScript),
            "c" => Ok(Language::C),
            _ => Err(format!(
                "Invalid language: {}. Use python, javascript, or c.",
                s
            )),
        }
    }
}

/// The textual deliverables produced so far in a run
///
/// Each stage owns exactly one field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub requirements: String,
    pub design: String,
    pub code: String,
    pub test_results: String,
    pub review_feedback: String,
    pub strategic_guidance: String,
}

impl Snapshot {
    /// Flatten into the text the judge reads
    pub fn render(&self) -> String {
        let sections = [
            ("Requirements", &self.requirements),
            ("Design", &self.design),
            ("Code", &self.code),
            ("Test Results", &self.test_results),
            ("Review Feedback", &self.review_feedback),
            ("Strategic Guidance", &self.strategic_guidance),
        ];

        let mut out = String::new();
        for (title, body) in sections {
            out.push_str(&format!("## {}\n", title));
            if body.trim().is_empty() {
                out.push_str("(none)\n\n");
            } else {
                out.push_str(body.trim_end());
                out.push_str("\n\n");
            }
        }
        out
    }

    /// SHA-256 over every field, hex encoded
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for field in [
            &self.requirements,
            &self.design,
            &self.code,
            &self.test_results,
            &self.review_feedback,
            &self.strategic_guidance,
        ] {
            hasher.update((field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
            && self.design.is_empty()
            && self.code.is_empty()
            && self.test_results.is_empty()
            && self.review_feedback.is_empty()
            && self.strategic_guidance.is_empty()
    }
}

/// Judge verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Halt,
    #[default]
    Continue,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Halt => write!(f, "HALT"),
            Decision::Continue => write!(f, "CONTINUE"),
        }
    }
}

/// How an assessment was recovered from judge output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseMode {
    /// Fenced block or brace fragment parsed as key/value data
    Structured,
    /// Loose pattern extraction from prose
    Pattern,
    /// Nothing recognizable, defaults used
    Fallback,
    /// The judge call itself failed
    CallFailed,
}

impl ParseMode {
    /// Degraded modes carry no real signal from the judge
    pub fn is_degraded(&self) -> bool {
        matches!(self, ParseMode::Fallback | ParseMode::CallFailed)
    }
}

/// One quality-gate cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration_index: usize,
    pub quality_score: f64,
    pub change_magnitude: f64,
    pub confidence: f64,
    pub decision: Decision,
    pub should_halt: bool,
    pub reasoning: String,
    pub parse_mode: ParseMode,
    pub snapshot: Snapshot,
    pub evaluated_at: DateTime<Utc>,
}

/// Per-run orchestration state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestrationState {
    pub input: String,
    pub snapshot: Snapshot,
    pub iteration_count: usize,
    pub halted: bool,
    pub iteration_log: Vec<IterationRecord>,
    /// Stage executions counted toward the hard ceiling
    pub stage_executions: usize,
    pub ceiling_reached: bool,
    /// Notes from a rejected human approval, fed back into the design stage
    pub approval_feedback: Option<String>,
    /// Consecutive judge results that carried no signal
    pub degraded_judgments: usize,
}

impl OrchestrationState {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            ..Default::default()
        }
    }

    pub fn latest_record(&self) -> Option<&IterationRecord> {
        self.iteration_log.last()
    }

    pub fn quality_scores(&self) -> Vec<f64> {
        self.iteration_log.iter().map(|r| r.quality_score).collect()
    }
}
