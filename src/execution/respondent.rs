//! External respondents answering interaction requests.

use std::io::BufRead;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error};

use crate::core::task::TaskError;

use super::bridge::InteractionPrompt;

/// The single, slow party that answers interaction requests.
///
/// The bridge calls `respond` for one request at a time, so implementations
/// never see concurrent calls from the same bridge.
#[async_trait]
pub trait Respondent: Send + Sync + 'static {
    /// Present the prompt and wait for the answer.
    async fn respond(&self, prompt: &InteractionPrompt) -> Result<Value, TaskError>;
}

/// Asks a human operator on the terminal.
///
/// The prompt payload is printed to stdout (strings verbatim, anything else
/// as pretty JSON) and one line is read from stdin as the answer.
///
/// Stdin is read by one dedicated thread that forwards lines over a
/// channel. Waiting on that channel can be cancelled, so a timed-out
/// prompt leaves nothing behind. Lines typed while no prompt is shown are
/// discarded before the next prompt, so a late answer never becomes the
/// answer to a different task.
pub struct StdinRespondent {
    lines: Mutex<mpsc::UnboundedReceiver<std::io::Result<String>>>,
}

impl StdinRespondent {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let reader = std::thread::Builder::new()
            .name("handoff-stdin".into())
            .spawn(move || forward_lines(std::io::stdin().lock(), tx));
        if let Err(e) = reader {
            // The receiver reports closed, so every prompt fails as unavailable.
            error!(error = %e, "failed to start stdin reader thread");
        }
        Self::from_lines(rx)
    }

    /// Answer from a channel of lines instead of the process's stdin.
    pub fn from_lines(lines: mpsc::UnboundedReceiver<std::io::Result<String>>) -> Self {
        Self {
            lines: Mutex::new(lines),
        }
    }
}

impl Default for StdinRespondent {
    fn default() -> Self {
        Self::new()
    }
}

fn forward_lines(input: impl BufRead, tx: mpsc::UnboundedSender<std::io::Result<String>>) {
    for line in input.lines() {
        let failed = line.is_err();
        if tx.send(line).is_err() || failed {
            break;
        }
    }
    debug!("stdin reader exiting");
}

/// Text shown to the operator for a payload.
pub fn render_payload(payload: &Value) -> String {
    match payload {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

#[async_trait]
impl Respondent for StdinRespondent {
    async fn respond(&self, prompt: &InteractionPrompt) -> Result<Value, TaskError> {
        let mut lines = self.lines.lock().await;
        while let Ok(stale) = lines.try_recv() {
            debug!(task = %prompt.task_id, ?stale, "discarding input typed before the prompt");
        }

        let text = format!("[{}] {}\n> ", prompt.task_id, render_payload(&prompt.payload));
        let mut stdout = tokio::io::stdout();
        stdout
            .write_all(text.as_bytes())
            .await
            .map_err(|e| TaskError::InteractionUnavailable(e.to_string()))?;
        stdout
            .flush()
            .await
            .map_err(|e| TaskError::InteractionUnavailable(e.to_string()))?;

        match lines.recv().await {
            Some(Ok(line)) => Ok(Value::String(line.trim_end_matches('\r').to_string())),
            Some(Err(e)) => Err(TaskError::InteractionUnavailable(e.to_string())),
            None => Err(TaskError::InteractionUnavailable(
                "stdin closed before an answer was given".into(),
            )),
        }
    }
}
