//! Session controller: the single owner of a conversation.
//!
//! One turn at a time, the controller opens the event stream, applies
//! decoded events through the reducer, forwards human decisions on the
//! side channel, and commits the finished transcript to the session store.
//! The read loop keeps consuming the stream while a checkpoint waits.

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{ByteStream, ChatClient};
use crate::core::approval::{self, Decision};
use crate::core::conversation::{ConversationState, FileAttachment};
use crate::core::events::{TurnOutcome, TurnUpdate, UpdateSender};
use crate::core::reducer::{self, TurnEffect};
use crate::error::{EngineError, EngineResult, ErrorKind};
use crate::history::{SessionRecord, SessionStore};
use crate::stream::{EventDecoder, ServerEvent};
use crate::upload::{self, FileDescriptor};

/// Commands accepted while a turn runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnCommand {
    /// Raw decision text for the pending checkpoint.
    Decide(String),
    /// Close the pending checkpoint without a decision.
    Dismiss,
}

/// Caller side of a running turn.
#[derive(Debug, Clone)]
pub struct TurnHandle {
    commands: mpsc::Sender<TurnCommand>,
    cancel: CancellationToken,
}

impl TurnHandle {
    /// Submits a decision. Returns false if the turn is already over.
    pub async fn decide(&self, input: impl Into<String>) -> bool {
        self.commands
            .send(TurnCommand::Decide(input.into()))
            .await
            .is_ok()
    }

    /// Dismisses the pending checkpoint. Returns false if the turn is over.
    pub async fn dismiss(&self) -> bool {
        self.commands.send(TurnCommand::Dismiss).await.is_ok()
    }

    /// Aborts the turn and clears the live conversation.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// Controller side of a running turn.
#[derive(Debug)]
pub struct TurnInputs {
    commands: mpsc::Receiver<TurnCommand>,
    cancel: CancellationToken,
}

/// Creates the paired handle and inputs for one turn.
pub fn turn_channel() -> (TurnHandle, TurnInputs) {
    let (tx, rx) = mpsc::channel(8);
    let cancel = CancellationToken::new();
    (
        TurnHandle {
            commands: tx,
            cancel: cancel.clone(),
        },
        TurnInputs {
            commands: rx,
            cancel,
        },
    )
}

/// A decision on its way to the backend.
struct Inflight {
    instance_id: String,
    decision: Decision,
    handle: JoinHandle<EngineResult<()>>,
}

pub struct SessionController {
    client: ChatClient,
    store: SessionStore,
    state: ConversationState,
    title: Option<String>,
    attachment: Option<FileDescriptor>,
    max_upload_bytes: u64,
}

impl SessionController {
    /// Starts a fresh session.
    pub fn new(client: ChatClient, store: SessionStore) -> Self {
        let session_id = ConversationState::new_session_id(Utc::now());
        Self::with_state(client, store, ConversationState::new(session_id))
    }

    /// Continues a stored session.
    pub fn resume(client: ChatClient, store: SessionStore, record: &SessionRecord) -> Self {
        let state = ConversationState::with_messages(record.id.clone(), record.messages.clone());
        Self::with_state(client, store, state)
    }

    fn with_state(client: ChatClient, store: SessionStore, state: ConversationState) -> Self {
        Self {
            client,
            store,
            state,
            title: None,
            attachment: None,
            max_upload_bytes: upload::DEFAULT_MAX_SIZE_MB * 1024 * 1024,
        }
    }

    #[must_use]
    pub fn with_upload_limit(mut self, max_bytes: u64) -> Self {
        self.max_upload_bytes = max_bytes;
        self
    }

    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    pub fn snapshot(&self) -> Arc<ConversationState> {
        Arc::new(self.state.clone())
    }

    pub fn session_id(&self) -> &str {
        &self.state.session_id
    }

    /// Title used when the session is next saved.
    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = Some(title.into());
    }

    pub fn attachment(&self) -> Option<&FileDescriptor> {
        self.attachment.as_ref()
    }

    /// Validates, uploads and attaches a local file to the next message.
    ///
    /// # Errors
    /// Returns a validation error if a file is already attached, the file
    /// is too large or of an unsupported type; otherwise any upload error.
    pub async fn attach_file(&mut self, path: &Path) -> EngineResult<FileAttachment> {
        if let Some(existing) = &self.attachment {
            return Err(EngineError::validation(format!(
                "{} is already attached; remove it before adding another file",
                existing.name
            )));
        }

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                EngineError::validation(format!("Not a file path: {}", path.display()))
            })?
            .to_string();
        let size = std::fs::metadata(path)
            .map_err(|e| EngineError::validation(format!("Cannot read {}: {e}", path.display())))?
            .len();
        upload::validate(&name, size, self.max_upload_bytes)?;

        let bytes = std::fs::read(path)
            .map_err(|e| EngineError::validation(format!("Cannot read {}: {e}", path.display())))?;
        let file = self.client.upload(&name, bytes).await?;
        info!(file = %file.name, size = file.size, "file attached");

        let attachment = file.attachment();
        self.attachment = Some(file);
        Ok(attachment)
    }

    /// Attaches an already uploaded file.
    ///
    /// # Errors
    /// Returns a validation error if a file is already attached.
    pub fn attach(&mut self, file: FileDescriptor) -> EngineResult<()> {
        if self.attachment.is_some() {
            return Err(EngineError::validation("Only one file can be attached"));
        }
        self.attachment = Some(file);
        Ok(())
    }

    pub fn detach_file(&mut self) -> Option<FileDescriptor> {
        self.attachment.take()
    }

    /// Runs one turn: sends `text` (with the attachment, if any) and
    /// drives the resulting stream to its end.
    pub async fn send(
        &mut self,
        text: &str,
        inputs: TurnInputs,
        updates: &UpdateSender,
    ) -> TurnOutcome {
        let file = self.attachment.take();
        self.state
            .begin_turn(text, file.as_ref().map(FileDescriptor::attachment), Utc::now());
        updates
            .send_important(TurnUpdate::Snapshot(self.snapshot()))
            .await;
        info!(session = %self.state.session_id, "turn started");

        let cancel = inputs.cancel.clone();
        let opened = tokio::select! {
            biased;
            () = cancel.cancelled() => return self.cancel_turn(None, updates).await,
            result = self.open_stream(text, file.as_ref()) => result,
        };

        match opened {
            Ok(stream) => self.drive(stream, inputs, updates).await,
            Err(e) => {
                self.fail(&e);
                self.finish(TurnOutcome::Failed(e), updates).await
            }
        }
    }

    async fn open_stream(
        &self,
        text: &str,
        file: Option<&FileDescriptor>,
    ) -> EngineResult<ByteStream> {
        let session_id = &self.state.session_id;
        match file {
            Some(file) => {
                self.client
                    .stream_file_analysis(text, session_id, file)
                    .await
            }
            None => self.client.stream_chat(text, session_id).await,
        }
    }

    /// Drives an open byte stream until the turn is over.
    ///
    /// The turn ends once the stream is exhausted and no checkpoint is
    /// pending, on dismissal, on a transport failure, or on cancellation.
    pub async fn drive<S, E>(
        &mut self,
        stream: S,
        inputs: TurnInputs,
        updates: &UpdateSender,
    ) -> TurnOutcome
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: std::error::Error + Send + Sync + 'static,
    {
        let TurnInputs {
            mut commands,
            cancel,
        } = inputs;
        let mut decoder = EventDecoder::new(stream);
        let mut stream_done = false;
        let mut inflight: Option<Inflight> = None;
        let mut outcome = TurnOutcome::Completed;
        let mut commands_open = true;

        loop {
            if stream_done && self.state.checkpoint.is_idle() && inflight.is_none() {
                break;
            }
            let awaiting_decision = !self.state.checkpoint.is_idle() && inflight.is_none();

            // A dropped handle can never decide.
            if awaiting_decision && !commands_open {
                self.dismiss_pending();
                stream_done = true;
                outcome = TurnOutcome::Dismissed;
                continue;
            }

            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    drop(decoder);
                    return self.cancel_turn(inflight.take(), updates).await;
                }

                joined = wait_inflight(&mut inflight), if inflight.is_some() => {
                    if let Some(done) = inflight.take() {
                        self.settle_decision(done, joined, updates).await;
                    }
                }

                // Commands are drained eagerly so a stale one never
                // answers a checkpoint the caller has not seen yet.
                command = commands.recv(), if commands_open => match command {
                    Some(TurnCommand::Decide(input)) if awaiting_decision => {
                        inflight = self.submit_decision(&input);
                    }
                    Some(TurnCommand::Decide(_)) => {
                        debug!(inflight = inflight.is_some(), "decision with no open checkpoint");
                        updates
                            .send_important(TurnUpdate::Warning(EngineError::new(
                                ErrorKind::NoCheckpoint,
                                "No approval is pending",
                            )))
                            .await;
                    }
                    Some(TurnCommand::Dismiss) if awaiting_decision => {
                        self.dismiss_pending();
                        stream_done = true;
                        outcome = TurnOutcome::Dismissed;
                    }
                    Some(TurnCommand::Dismiss) => {
                        debug!("dismiss with no open checkpoint");
                    }
                    None => commands_open = false,
                },

                next = decoder.next(), if !stream_done => match next {
                    Some(Ok(event)) => {
                        if self.apply(&event, updates).await {
                            stream_done = true;
                        }
                    }
                    Some(Err(e)) if e.is_fatal() => {
                        if let Some(pending) = inflight.take() {
                            pending.handle.abort();
                        }
                        self.fail(&e);
                        stream_done = true;
                        outcome = TurnOutcome::Failed(e);
                    }
                    Some(Err(e)) => {
                        warn!(details = ?e.details, "skipping stream line: {e}");
                        updates.send_important(TurnUpdate::Warning(e)).await;
                    }
                    None => {
                        debug!("event stream ended");
                        reducer::end_of_stream(&mut self.state);
                        stream_done = true;
                    }
                },
            }
        }

        self.finish(outcome, updates).await
    }

    /// Applies one event; returns true once the backend closed the turn.
    async fn apply(&mut self, event: &ServerEvent, updates: &UpdateSender) -> bool {
        let effects = reducer::update(&mut self.state, event, Utc::now());
        updates.send_delta(TurnUpdate::Snapshot(self.snapshot()));

        let mut closed = false;
        for effect in effects {
            match effect {
                TurnEffect::CheckpointOpened {
                    instance_id,
                    requested_by,
                    content,
                    message,
                } => {
                    info!(instance = %instance_id, "checkpoint awaiting approval");
                    updates
                        .send_important(TurnUpdate::CheckpointOpened {
                            instance_id,
                            requested_by,
                            content,
                            message,
                        })
                        .await;
                }
                TurnEffect::Notice { message } => {
                    updates.send_important(TurnUpdate::Notice(message)).await;
                }
                TurnEffect::StreamClosed => closed = true,
            }
        }
        closed
    }

    fn dismiss_pending(&mut self) {
        approval::dismiss(&mut self.state, Utc::now());
        info!(session = %self.state.session_id, "checkpoint dismissed");
    }

    fn submit_decision(&self, input: &str) -> Option<Inflight> {
        let instance_id = self.state.checkpoint.pending_instance()?.to_string();
        let decision = Decision::parse(input);
        let client = self.client.clone();
        let payload = decision.payload().to_string();
        debug!(instance = %instance_id, "submitting decision");

        let handle = tokio::spawn(async move { client.submit_feedback(&payload).await });
        Some(Inflight {
            instance_id,
            decision,
            handle,
        })
    }

    async fn settle_decision(
        &mut self,
        done: Inflight,
        joined: Result<EngineResult<()>, JoinError>,
        updates: &UpdateSender,
    ) {
        let result = joined.unwrap_or_else(|e| {
            Err(EngineError::transport(format!("Decision submission failed: {e}")))
        });

        if let Err(e) = result {
            warn!(instance = %done.instance_id, "decision not delivered: {e}");
            updates.send_important(TurnUpdate::Warning(e)).await;
            return;
        }

        if self.state.checkpoint.pending_instance() != Some(done.instance_id.as_str()) {
            debug!(instance = %done.instance_id, "decision arrived for a superseded checkpoint");
            return;
        }

        match approval::resolve(&mut self.state, &done.decision, Utc::now()) {
            Ok(instance_id) => {
                info!(instance = %instance_id, "checkpoint resolved");
                updates
                    .send_important(TurnUpdate::Snapshot(self.snapshot()))
                    .await;
                updates
                    .send_important(TurnUpdate::CheckpointResolved {
                        instance_id,
                        summary: done.decision.summary(),
                    })
                    .await;
            }
            Err(e) => {
                updates.send_important(TurnUpdate::Warning(e)).await;
            }
        }
    }

    fn fail(&mut self, error: &EngineError) {
        warn!(session = %self.state.session_id, kind = %error.kind, "turn failed: {error}");
        reducer::fail_turn(&mut self.state, &error.message, Utc::now());
    }

    async fn cancel_turn(
        &mut self,
        inflight: Option<Inflight>,
        updates: &UpdateSender,
    ) -> TurnOutcome {
        if let Some(pending) = inflight {
            pending.handle.abort();
        }
        info!(session = %self.state.session_id, "turn cancelled");
        self.clear().await;
        self.finish(TurnOutcome::Cancelled, updates).await
    }

    async fn finish(&mut self, outcome: TurnOutcome, updates: &UpdateSender) -> TurnOutcome {
        if outcome != TurnOutcome::Cancelled
            && let Err(e) = self.commit()
        {
            warn!("failed to save session: {e:#}");
            updates
                .send_important(TurnUpdate::Warning(EngineError::new(
                    ErrorKind::Storage,
                    format!("Session not saved: {e:#}"),
                )))
                .await;
        }

        updates
            .send_important(TurnUpdate::Snapshot(self.snapshot()))
            .await;
        updates
            .send_important(TurnUpdate::Finished(outcome.clone()))
            .await;
        info!(session = %self.state.session_id, outcome = ?outcome, "turn finished");
        outcome
    }

    /// Saves the current transcript to the session store.
    ///
    /// # Errors
    /// Returns an error if the store fails.
    pub fn commit(&self) -> anyhow::Result<SessionRecord> {
        self.store.save(
            &self.state.session_id,
            self.title.as_deref(),
            &self.state.messages,
        )
    }

    /// Discards the server-side session (best effort), clears the live
    /// conversation and starts a new session id.
    pub async fn clear(&mut self) {
        let session_id = self.state.session_id.clone();
        if let Err(e) = self.client.delete_session(&session_id).await {
            warn!(session = %session_id, "failed to delete server session: {e}");
        }
        self.state.clear();
        self.state.session_id = ConversationState::new_session_id(Utc::now());
        self.title = None;
        self.attachment = None;
    }
}

async fn wait_inflight(slot: &mut Option<Inflight>) -> Result<EngineResult<()>, JoinError> {
    match slot {
        Some(inflight) => (&mut inflight.handle).await,
        None => std::future::pending().await,
    }
}
