//! Chat command handler.

use std::path::Path;

use anyhow::{Context, Result, anyhow};
use cohort_core::client::ChatClient;
use cohort_core::config::Config;
use cohort_core::core::controller::{SessionController, TurnHandle, turn_channel};
use cohort_core::core::events::{TurnOutcome, UpdateSender, create_update_channel};
use cohort_core::core::interrupt;
use cohort_core::history::SessionStore;
use cohort_core::upload;
use tokio::task::JoinHandle;

use crate::modes;

pub struct ChatRunOptions<'a> {
    pub message: &'a str,
    pub session: Option<&'a str>,
    pub title: Option<&'a str>,
    pub file: Option<&'a Path>,
    pub demo: bool,
    pub config: &'a Config,
}

pub async fn run(options: ChatRunOptions<'_>) -> Result<()> {
    let message = options.message.trim();
    if message.is_empty() {
        anyhow::bail!("Message cannot be empty");
    }

    let client = ChatClient::from_config(options.config)
        .context("create client")?
        .with_demo(options.config.demo || options.demo);
    let store = SessionStore::open_default();

    let controller = match options.session {
        Some(id) => {
            let record = store
                .get(id)
                .with_context(|| format!("load session '{id}'"))?
                .with_context(|| format!("Session '{id}' not found"))?;
            SessionController::resume(client, store, &record)
        }
        None => SessionController::new(client, store),
    };
    let mut controller = controller.with_upload_limit(options.config.upload.max_bytes());

    if let Some(title) = options.title {
        controller.set_title(title);
    }
    if let Some(path) = options.file {
        let attached = controller
            .attach_file(path)
            .await
            .with_context(|| format!("attach {}", path.display()))?;
        eprintln!(
            "Attached {} ({})",
            attached.name,
            upload::format_size(attached.size)
        );
    }

    let (handle, inputs) = turn_channel();
    let (tx, rx) = create_update_channel();
    let renderer = modes::chat::spawn_chat_renderer_task(rx, handle.clone());
    let watcher = spawn_interrupt_watcher(handle);

    let outcome = controller
        .send(message, inputs, &UpdateSender::new(tx))
        .await;

    watcher.abort();
    let _ = renderer.await;

    match outcome {
        TurnOutcome::Completed | TurnOutcome::Dismissed => {
            eprintln!("Session {}", controller.session_id());
            Ok(())
        }
        TurnOutcome::Failed(e) => Err(anyhow!(e)).context("chat turn failed"),
        TurnOutcome::Cancelled => Err(interrupt::InterruptedError.into()),
    }
}

/// Cancels the turn on the first Ctrl+C.
fn spawn_interrupt_watcher(handle: TurnHandle) -> JoinHandle<()> {
    tokio::spawn(async move {
        interrupt::wait_for_interrupt().await;
        handle.cancel();
    })
}
