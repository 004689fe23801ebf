//! Session command handlers.

use std::fmt::Write as _;

use anyhow::{Context, Result, bail};
use chrono::Local;
use cohort_core::core::conversation::Role;
use cohort_core::history::{SessionRecord, SessionStore};
use cohort_core::upload;

pub fn list() -> Result<()> {
    let records = SessionStore::open_default()
        .list()
        .context("list sessions")?;
    if records.is_empty() {
        println!("No sessions found.");
    } else {
        for record in records {
            println!("{}", record.summary_line());
        }
    }
    Ok(())
}

pub fn show(id: &str) -> Result<()> {
    let record = SessionStore::open_default()
        .get(id)
        .with_context(|| format!("load session '{id}'"))?;
    let Some(record) = record else {
        bail!("Session '{id}' not found");
    };
    print!("{}", format_transcript(&record));
    Ok(())
}

pub fn rename(id: &str, title: &str) -> Result<()> {
    let renamed = SessionStore::open_default()
        .rename(id, title)
        .with_context(|| format!("rename session '{id}'"))?;
    if !renamed {
        bail!("Session '{id}' not found");
    }
    println!("Renamed session {id} → {}", title.trim());
    Ok(())
}

pub fn delete(id: &str) -> Result<()> {
    let deleted = SessionStore::open_default()
        .delete(id)
        .with_context(|| format!("delete session '{id}'"))?;
    if deleted {
        println!("Deleted session {id}");
    } else {
        println!("Session '{id}' not found; nothing deleted.");
    }
    Ok(())
}

/// Renders a saved session as plain text, one block per message and one
/// indented block per agent contribution.
fn format_transcript(record: &SessionRecord) -> String {
    let mut out = String::new();
    let created = record.created_at.with_timezone(&Local).format("%Y-%m-%d %H:%M");
    let _ = writeln!(out, "# {}", record.title);
    let _ = writeln!(out, "{}  created {created}\n", record.id);

    for message in &record.messages {
        match message.role {
            Role::User => {
                let _ = writeln!(out, "You: {}", message.content);
                if let Some(file) = &message.attachment {
                    let _ = writeln!(
                        out,
                        "  📎 {} ({}, {})",
                        file.name,
                        file.kind,
                        upload::format_size(file.size)
                    );
                }
            }
            Role::Assistant => {
                let _ = writeln!(out, "Assistant:");
                for instance in &message.agents {
                    let _ = writeln!(
                        out,
                        "  {} {} [{}]",
                        instance.info.avatar, instance.info.name, instance.status
                    );
                    for line in instance.content.lines() {
                        let _ = writeln!(out, "    {line}");
                    }
                }
                if !message.content.is_empty() {
                    for line in message.content.lines() {
                        let _ = writeln!(out, "  {line}");
                    }
                }
            }
        }
        out.push('\n');
    }
    out
}
