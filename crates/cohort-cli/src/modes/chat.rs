//! Streamed stdout/stderr rendering of a chat turn.
//!
//! This module provides:
//! - `ChatRenderer`: turns controller updates into terminal output
//! - `spawn_chat_renderer_task`: runs the renderer and the approval prompt

use std::collections::HashMap;
use std::io::{BufRead, Stderr, Stdout, Write, stderr, stdout};

use cohort_core::core::controller::TurnHandle;
use cohort_core::core::conversation::{ConversationState, Role};
use cohort_core::core::events::{TurnOutcome, TurnUpdate, TurnUpdateRx};
use cohort_core::error::{EngineError, ErrorKind};
use tokio::task::JoinHandle;

/// Key of the plain text section of the answer.
const TEXT_SECTION: &str = "";

/// CLI renderer that writes turn updates to stdout/stderr.
///
/// # Output contract
/// - Agent contributions and answer text → stdout, printed incrementally
/// - Approval requests → stdout
/// - Notices, warnings and lifecycle messages → stderr
pub struct ChatRenderer {
    stdout: Stdout,
    stderr: Stderr,
    /// Text already written per section (agent instance id or text).
    printed: HashMap<String, String>,
    /// Section written last, to know when a header is due.
    active: Option<String>,
    needs_final_newline: bool,
    awaiting_decision: bool,
}

impl Default for ChatRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatRenderer {
    pub fn new() -> Self {
        Self {
            stdout: stdout(),
            stderr: stderr(),
            printed: HashMap::new(),
            active: None,
            needs_final_newline: false,
            awaiting_decision: false,
        }
    }

    /// Renders one update. Returns true when a decision should be read.
    fn handle_update(&mut self, update: &TurnUpdate) -> bool {
        match update {
            TurnUpdate::Snapshot(state) => self.render_snapshot(state),
            TurnUpdate::CheckpointOpened {
                requested_by,
                content,
                message,
                ..
            } => {
                self.end_line();
                let by = requested_by
                    .as_deref()
                    .map(|agent| format!(" by {agent}"))
                    .unwrap_or_default();
                let _ = writeln!(self.stdout, "\n👤 Approval requested{by}:");
                for line in content.lines() {
                    let _ = writeln!(self.stdout, "  {line}");
                }
                let _ = self.stdout.flush();
                if let Some(note) = message {
                    let _ = writeln!(self.stderr, "{note}");
                }
                self.active = None;
                self.awaiting_decision = true;
                return true;
            }
            TurnUpdate::CheckpointResolved { summary, .. } => {
                self.awaiting_decision = false;
                let _ = writeln!(self.stderr, "✓ {summary}");
            }
            TurnUpdate::Notice(message) => {
                self.end_line();
                let _ = writeln!(self.stderr, "Notice: {message}");
            }
            TurnUpdate::Warning(error) => {
                self.end_line();
                self.write_error("Warning", error);
                if self.awaiting_decision && decision_not_delivered(error) {
                    return true;
                }
            }
            TurnUpdate::Finished(outcome) => {
                self.awaiting_decision = false;
                self.finish();
                match outcome {
                    TurnOutcome::Dismissed => {
                        let _ = writeln!(self.stderr, "Approval dismissed; turn ended.");
                    }
                    TurnOutcome::Cancelled => {
                        let _ = writeln!(self.stderr, "\n^C Interrupted.");
                    }
                    TurnOutcome::Completed | TurnOutcome::Failed(_) => {}
                }
            }
        }
        false
    }

    fn render_snapshot(&mut self, state: &ConversationState) {
        let Some(message) = state
            .messages
            .last()
            .filter(|m| m.role == Role::Assistant)
        else {
            return;
        };

        for instance in &message.agents {
            // checkpoints are rendered from their own update
            if instance.is_checkpoint() {
                continue;
            }
            let header = format!("{} {}:", instance.info.avatar, instance.info.name);
            self.write_section(&instance.id, Some(&header), &instance.content);
        }
        self.write_section(TEXT_SECTION, None, &message.content);
    }

    /// Writes whatever `content` adds to what was already printed for
    /// `key`. Replaced content is not reprinted.
    fn write_section(&mut self, key: &str, header: Option<&str>, content: &str) {
        let printed = self.printed.get(key).map_or("", String::as_str);
        let Some(delta) = content.strip_prefix(printed) else {
            return;
        };
        if delta.is_empty() {
            return;
        }

        if self.active.as_deref() != Some(key) {
            self.end_line();
            if let Some(header) = header {
                let _ = writeln!(self.stdout, "{header}");
            }
            self.active = Some(key.to_string());
        }
        let _ = write!(self.stdout, "{delta}");
        let _ = self.stdout.flush();
        self.needs_final_newline = !delta.ends_with('\n');
        self.printed.insert(key.to_string(), content.to_string());
    }

    fn write_error(&mut self, label: &str, error: &EngineError) {
        let _ = writeln!(self.stderr, "{label} [{}]: {}", error.kind, error.message);
        if let Some(details) = &error.details {
            let _ = writeln!(self.stderr, "  Details: {details}");
        }
    }

    fn end_line(&mut self) {
        if self.needs_final_newline {
            let _ = writeln!(self.stdout);
            let _ = self.stdout.flush();
            self.needs_final_newline = false;
        }
    }

    /// Prints a final newline to stdout if needed.
    pub fn finish(&mut self) {
        self.end_line();
    }
}

/// Spawns a renderer task that consumes updates until the channel closes.
///
/// When a checkpoint opens (or a decision for it was not delivered) the
/// task reads one line from stdin and forwards it through `handle`; end
/// of input dismisses the checkpoint.
/// Whether a warning reports that the last decision did not reach the
/// backend, so the checkpoint still wants an answer.
fn decision_not_delivered(error: &EngineError) -> bool {
    matches!(
        error.kind,
        ErrorKind::Rejected | ErrorKind::HttpStatus | ErrorKind::Transport | ErrorKind::Timeout
    )
}

pub fn spawn_chat_renderer_task(mut rx: TurnUpdateRx, handle: TurnHandle) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut renderer = ChatRenderer::new();
        let mut prompt: Option<JoinHandle<()>> = None;

        while let Some(update) = rx.recv().await {
            let ask = renderer.handle_update(&update);
            let prompting = prompt.as_ref().is_some_and(|p| !p.is_finished());
            if ask && !prompting {
                prompt = Some(spawn_prompt(handle.clone()));
            }
            if matches!(update.as_ref(), TurnUpdate::Finished(_)) {
                break;
            }
        }

        renderer.finish();
    })
}

fn spawn_prompt(handle: TurnHandle) -> JoinHandle<()> {
    tokio::spawn(async move {
        match tokio::task::spawn_blocking(read_decision).await {
            Ok(Some(input)) => {
                handle.decide(input).await;
            }
            _ => {
                handle.dismiss().await;
            }
        }
    })
}

/// Reads one decision line; `None` on end of input.
fn read_decision() -> Option<String> {
    let mut err = stderr();
    let _ = write!(
        err,
        "Type APPROVE (or press Enter) to continue, or describe what to change: "
    );
    let _ = err.flush();

    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reprompts_only_when_decision_was_not_delivered() {
        let mut renderer = ChatRenderer::new();
        renderer.awaiting_decision = true;

        let framing = TurnUpdate::Warning(EngineError::framing("Invalid event payload"));
        assert!(!renderer.handle_update(&framing));
        let stale = TurnUpdate::Warning(EngineError::new(
            ErrorKind::NoCheckpoint,
            "No approval is pending",
        ));
        assert!(!renderer.handle_update(&stale));

        let rejected = TurnUpdate::Warning(EngineError::new(ErrorKind::Rejected, "not accepted"));
        assert!(renderer.handle_update(&rejected));
    }

    #[test]
    fn test_no_reprompt_once_checkpoint_resolved() {
        let mut renderer = ChatRenderer::new();
        renderer.awaiting_decision = true;
        renderer.handle_update(&TurnUpdate::CheckpointResolved {
            instance_id: "user_proxy-1".to_string(),
            summary: "Approved".to_string(),
        });

        let rejected = TurnUpdate::Warning(EngineError::new(ErrorKind::Rejected, "not accepted"));
        assert!(!renderer.handle_update(&rejected));
    }
}
