//! Human approval of the design, as a swappable capability

use async_trait::async_trait;
use coop_core::{CoopError, Result, Snapshot};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Stdin};
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approved,
    /// Back to design with these notes
    Rejected { feedback: String },
}

/// Reviews the design before any code is written
#[async_trait]
pub trait ApprovalGate: Send + Sync {
    async fn review(&self, snapshot: &Snapshot) -> Result<ApprovalDecision>;
}

/// Approves everything; the default when no reviewer is attached
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

#[async_trait]
impl ApprovalGate for AutoApprove {
    async fn review(&self, _snapshot: &Snapshot) -> Result<ApprovalDecision> {
        Ok(ApprovalDecision::Approved)
    }
}

/// Asks a person on the terminal
///
/// `y` or `yes` approves. Anything else rejects, and non-trivial input is
/// passed back to the architect as feedback. End of input approves.
pub struct ConsoleApproval<R> {
    input: Mutex<R>,
}

impl ConsoleApproval<BufReader<Stdin>> {
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }
}

impl<R: AsyncBufRead + Unpin + Send> ConsoleApproval<R> {
    pub fn new(input: R) -> Self {
        Self {
            input: Mutex::new(input),
        }
    }
}

pub(crate) fn interpret_answer(answer: &str) -> ApprovalDecision {
    let answer = answer.trim();
    match answer.to_lowercase().as_str() {
        "y" | "yes" => ApprovalDecision::Approved,
        "" | "n" | "no" => ApprovalDecision::Rejected {
            feedback: "Design rejected by reviewer without notes".to_string(),
        },
        _ => ApprovalDecision::Rejected {
            feedback: answer.to_string(),
        },
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> ApprovalGate for ConsoleApproval<R> {
    async fn review(&self, snapshot: &Snapshot) -> Result<ApprovalDecision> {
        println!("\n=== DESIGN FOR APPROVAL ===\n\n{}\n", snapshot.design);
        println!("Approve this design? [y]es, or type notes to send it back:");

        let mut line = String::new();
        let read = self
            .input
            .lock()
            .await
            .read_line(&mut line)
            .await
            .map_err(|e| CoopError::Approval(format!("Failed to read answer: {}", e)))?;

        if read == 0 {
            warn!("No approval input available, approving design");
            return Ok(ApprovalDecision::Approved);
        }

        let decision = interpret_answer(&line);
        info!("Design approval: {:?}", decision);
        Ok(decision)
    }
}
