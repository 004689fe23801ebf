use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Result, anyhow, bail};
use chrono::{DateTime, TimeDelta, Utc};
use tracing::info;

use crate::config::paths;
use crate::core::conversation::ConversationMessage;
use crate::history::record::{SessionRecord, default_title, preview};
use crate::history::repository::{JsonFileRepository, MemoryRepository, SessionRepository};

/// Most records kept; saving beyond this evicts the least recently updated.
pub const MAX_SESSIONS: usize = 50;

/// Bounded, recency-ordered session history.
///
/// Cloning is cheap and every clone shares one repository; all operations
/// are serialized behind a single lock.
#[derive(Clone)]
pub struct SessionStore {
    repo: Arc<Mutex<Box<dyn SessionRepository>>>,
}

impl SessionStore {
    pub fn new(repo: impl SessionRepository + 'static) -> Self {
        Self {
            repo: Arc::new(Mutex::new(Box::new(repo))),
        }
    }

    /// Store backed by `$COHORT_HOME/sessions.json`.
    pub fn open_default() -> Self {
        Self::new(JsonFileRepository::new(paths::sessions_path()))
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryRepository::default())
    }

    /// Inserts or updates the record for `id`.
    ///
    /// `created_at` is kept from an existing record, and so is its title
    /// when `title` is `None`. The saved record becomes the most recent
    /// one; if the store then holds more than [`MAX_SESSIONS`] records the
    /// least recently updated others are evicted.
    ///
    /// # Errors
    /// Returns an error if the repository fails.
    pub fn save(
        &self,
        id: &str,
        title: Option<&str>,
        messages: &[ConversationMessage],
    ) -> Result<SessionRecord> {
        let mut repo = self.lock()?;
        let all = repo.list()?;
        let now = next_stamp(&all);
        let existing = all.into_iter().find(|r| r.id == id);

        let title = title
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .or_else(|| existing.as_ref().map(|r| r.title.clone()))
            .unwrap_or_else(|| default_title(now));

        let record = SessionRecord {
            id: id.to_string(),
            title,
            message_count: messages.len(),
            last_message: preview(messages),
            last_updated: now,
            created_at: existing.map_or(now, |r| r.created_at),
            messages: messages.to_vec(),
        };
        repo.put(record.clone())?;
        evict_overflow(&mut **repo, id)?;
        Ok(record)
    }

    /// Removes a record. Missing ids are a no-op.
    ///
    /// # Errors
    /// Returns an error if the repository fails.
    pub fn delete(&self, id: &str) -> Result<bool> {
        self.lock()?.delete(id)
    }

    /// All records, most recently updated first.
    ///
    /// # Errors
    /// Returns an error if the repository fails.
    pub fn list(&self) -> Result<Vec<SessionRecord>> {
        let mut records = self.lock()?.list()?;
        sort_by_recency(&mut records);
        Ok(records)
    }

    /// Renames a record and marks it as updated. Returns false if the id
    /// is unknown.
    ///
    /// # Errors
    /// Returns an error for an empty title or if the repository fails.
    pub fn rename(&self, id: &str, title: &str) -> Result<bool> {
        let title = title.trim();
        if title.is_empty() {
            bail!("Session title cannot be empty");
        }

        let mut repo = self.lock()?;
        let all = repo.list()?;
        let now = next_stamp(&all);
        let Some(mut record) = all.into_iter().find(|r| r.id == id) else {
            return Ok(false);
        };
        record.title = title.to_string();
        record.last_updated = now;
        repo.put(record)?;
        Ok(true)
    }

    /// # Errors
    /// Returns an error if the repository fails.
    pub fn get(&self, id: &str) -> Result<Option<SessionRecord>> {
        self.lock()?.get(id)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Box<dyn SessionRepository>>> {
        self.repo
            .lock()
            .map_err(|e| anyhow!("session store lock poisoned: {e}"))
    }
}

/// A timestamp later than every stored one, so recency order is total.
fn next_stamp(records: &[SessionRecord]) -> DateTime<Utc> {
    let now = Utc::now();
    match records.iter().map(|r| r.last_updated).max() {
        Some(latest) if latest >= now => latest + TimeDelta::milliseconds(1),
        _ => now,
    }
}

fn sort_by_recency(records: &mut [SessionRecord]) {
    records.sort_by(|a, b| {
        b.last_updated
            .cmp(&a.last_updated)
            .then_with(|| a.id.cmp(&b.id))
    });
}

fn evict_overflow(repo: &mut dyn SessionRepository, keep: &str) -> Result<()> {
    let mut records = repo.list()?;
    if records.len() <= MAX_SESSIONS {
        return Ok(());
    }

    sort_by_recency(&mut records);
    let excess = records.len() - MAX_SESSIONS;
    let victims: Vec<String> = records
        .iter()
        .rev()
        .filter(|r| r.id != keep)
        .take(excess)
        .map(|r| r.id.clone())
        .collect();

    for id in victims {
        info!(session = %id, "evicting least recently updated session");
        repo.delete(&id)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::core::conversation::{ConversationMessage, ConversationState};
    use crate::core::reducer;
    use crate::stream::{AgentInfo, ServerEvent};

    fn transcript(text: &str) -> Vec<ConversationMessage> {
        let now = Utc::now();
        let mut state = ConversationState::new("s");
        state.begin_turn(text, None, now);
        for event in [
            ServerEvent::AgentStart {
                agent: "writer".to_string(),
                agent_info: AgentInfo {
                    name: "Writer".to_string(),
                    description: "Writes".to_string(),
                    avatar: "✍️".to_string(),
                    color: "#13c2c2".to_string(),
                },
            },
            ServerEvent::Chunk {
                agent: Some("writer".to_string()),
                content: format!("answer to {text}"),
            },
            ServerEvent::AgentEnd {
                agent: "writer".to_string(),
                content: None,
            },
            ServerEvent::Complete { message: None },
        ] {
            reducer::update(&mut state, &event, now);
        }
        state.messages
    }

    #[test]
    fn test_save_twice_keeps_one_record_first() {
        let store = SessionStore::in_memory();
        let first = store.save("a", None, &transcript("one")).unwrap();
        store.save("b", None, &transcript("two")).unwrap();

        let second = store.save("a", None, &transcript("three")).unwrap();

        let list = store.list().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, "a");
        assert_eq!(second.created_at, first.created_at);
        assert_eq!(second.title, first.title);
        assert!(second.last_updated > first.last_updated);
    }

    #[test]
    fn test_cap_evicts_least_recently_updated() {
        let store = SessionStore::in_memory();
        for i in 0..(MAX_SESSIONS + 5) {
            store.save(&format!("s{i}"), None, &[]).unwrap();
        }

        let list = store.list().unwrap();
        assert_eq!(list.len(), MAX_SESSIONS);
        assert_eq!(list[0].id, format!("s{}", MAX_SESSIONS + 4));
        for i in 0..5 {
            assert!(store.get(&format!("s{i}")).unwrap().is_none());
        }
        assert!(store.get("s5").unwrap().is_some());
    }

    #[test]
    fn test_resaving_old_record_protects_it_from_eviction() {
        let store = SessionStore::in_memory();
        for i in 0..MAX_SESSIONS {
            store.save(&format!("s{i}"), None, &[]).unwrap();
        }
        store.save("s0", None, &[]).unwrap();
        store.save("new", None, &[]).unwrap();

        assert!(store.get("s0").unwrap().is_some());
        assert!(store.get("s1").unwrap().is_none());
        assert_eq!(store.list().unwrap().len(), MAX_SESSIONS);
    }

    #[test]
    fn test_round_trip_through_json_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sessions.json");
        let messages = transcript("question");

        let saved = SessionStore::new(JsonFileRepository::new(&path))
            .save("session_1", Some("My chat"), &messages)
            .unwrap();

        let reopened = SessionStore::new(JsonFileRepository::new(&path));
        let list = reopened.list().unwrap();
        assert_eq!(list.len(), 1);
        let record = &list[0];
        assert_eq!(record, &saved);
        assert_eq!(record.title, "My chat");
        assert_eq!(record.message_count, 2);
        assert_eq!(record.messages, messages);
        assert_eq!(record.last_message, "answer to question");
    }

    #[test]
    fn test_explicit_title_overrides_and_none_keeps() {
        let store = SessionStore::in_memory();
        store.save("a", Some("first"), &[]).unwrap();
        assert_eq!(store.save("a", None, &[]).unwrap().title, "first");
        assert_eq!(store.save("a", Some("  "), &[]).unwrap().title, "first");
        assert_eq!(store.save("a", Some("second"), &[]).unwrap().title, "second");
    }

    #[test]
    fn test_rename_refreshes_recency() {
        let store = SessionStore::in_memory();
        store.save("a", None, &[]).unwrap();
        store.save("b", None, &[]).unwrap();

        assert!(store.rename("a", "Renamed").unwrap());

        let list = store.list().unwrap();
        assert_eq!(list[0].id, "a");
        assert_eq!(list[0].title, "Renamed");
        assert!(!store.rename("missing", "x").unwrap());
        assert!(store.rename("a", "   ").is_err());
    }

    #[test]
    fn test_delete_missing_is_noop() {
        let store = SessionStore::in_memory();
        store.save("a", None, &[]).unwrap();

        assert!(!store.delete("zzz").unwrap());
        assert!(store.delete("a").unwrap());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_clones_share_state() {
        let store = SessionStore::in_memory();
        let other = store.clone();
        store.save("a", None, &[]).unwrap();
        assert_eq!(other.list().unwrap().len(), 1);
    }
}
