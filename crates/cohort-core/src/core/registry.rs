//! Per-message registry of agent instances.
//!
//! Every `start` allocates a fresh instance, so an agent type invoked twice
//! in one turn shows up twice. At most one instance per type is working at
//! a time; fragments and end signals go to that instance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::conversation::{AgentInstance, AgentStatus, USER_PROXY_AGENT};
use crate::stream::AgentInfo;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentRegistry {
    instances: Vec<AgentInstance>,
}

impl AgentRegistry {
    /// Opens a new working instance of `agent` and returns its id.
    ///
    /// A still-working instance of the same type is completed first.
    pub fn start(&mut self, agent: &str, info: AgentInfo, at: DateTime<Utc>) -> String {
        if let Some(previous) = self.working_mut(agent) {
            debug!(agent, id = %previous.id, "closing unfinished instance before restart");
            previous.status = AgentStatus::Completed;
            previous.ended_at = Some(at);
        }
        self.push(agent, info, String::new(), AgentStatus::Working, at)
    }

    /// Appends a fragment to the working instance of `agent`.
    ///
    /// Returns false (and changes nothing) when no such instance exists.
    pub fn append_chunk(&mut self, agent: &str, text: &str) -> bool {
        match self.working_mut(agent) {
            Some(instance) => {
                instance.content.push_str(text);
                true
            }
            None => false,
        }
    }

    /// Completes the working instance of `agent` and returns its id.
    ///
    /// `final_content` is adopted only when the instance received no
    /// fragments, so text that already streamed in is never duplicated.
    pub fn end(
        &mut self,
        agent: &str,
        final_content: Option<&str>,
        at: DateTime<Utc>,
    ) -> Option<String> {
        let instance = self.working_mut(agent)?;
        if instance.content.is_empty()
            && let Some(text) = final_content
        {
            instance.content = text.to_string();
        }
        instance.status = AgentStatus::Completed;
        instance.ended_at = Some(at);
        Some(instance.id.clone())
    }

    /// Opens a waiting checkpoint instance holding `content`.
    pub fn open_checkpoint(&mut self, info: AgentInfo, content: &str, at: DateTime<Utc>) -> String {
        self.push(
            USER_PROXY_AGENT,
            info,
            content.to_string(),
            AgentStatus::Waiting,
            at,
        )
    }

    /// Completes a waiting checkpoint, replacing its body with `summary`.
    /// Returns false if `id` is not a waiting instance.
    pub fn close_checkpoint(&mut self, id: &str, summary: Option<&str>, at: DateTime<Utc>) -> bool {
        match self
            .instances
            .iter_mut()
            .find(|i| i.id == id && i.status == AgentStatus::Waiting)
        {
            Some(instance) => {
                if let Some(summary) = summary {
                    instance.content = summary.to_string();
                }
                instance.status = AgentStatus::Completed;
                instance.ended_at = Some(at);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<&AgentInstance> {
        self.instances.iter().find(|i| i.id == id)
    }

    /// The working instance of `agent`, if any.
    pub fn working(&self, agent: &str) -> Option<&AgentInstance> {
        self.instances
            .iter()
            .rev()
            .find(|i| i.agent == agent && i.is_working())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, AgentInstance> {
        self.instances.iter()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    fn working_mut(&mut self, agent: &str) -> Option<&mut AgentInstance> {
        self.instances
            .iter_mut()
            .rev()
            .find(|i| i.agent == agent && i.is_working())
    }

    fn push(
        &mut self,
        agent: &str,
        info: AgentInfo,
        content: String,
        status: AgentStatus,
        at: DateTime<Utc>,
    ) -> String {
        let order = self.instances.len();
        let id = format!("{agent}-{}-{order}", at.timestamp_millis());
        self.instances.push(AgentInstance {
            id: id.clone(),
            agent: agent.to_string(),
            info,
            content,
            status,
            started_at: at,
            ended_at: None,
            order,
        });
        id
    }
}

impl<'a> IntoIterator for &'a AgentRegistry {
    type Item = &'a AgentInstance;
    type IntoIter = std::slice::Iter<'a, AgentInstance>;

    fn into_iter(self) -> Self::IntoIter {
        self.instances.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(name: &str) -> AgentInfo {
        AgentInfo {
            name: name.to_string(),
            description: format!("{name} agent"),
            avatar: "🤖".to_string(),
            color: "#1890ff".to_string(),
        }
    }

    #[test]
    fn test_analyzer_fragments_concatenate() {
        let now = Utc::now();
        let mut registry = AgentRegistry::default();

        registry.start("analyzer", info("Analyzer"), now);
        assert!(registry.append_chunk("analyzer", "A"));
        assert!(registry.append_chunk("analyzer", "B"));
        registry.end("analyzer", None, now);

        assert_eq!(registry.len(), 1);
        let instance = registry.iter().next().unwrap();
        assert_eq!(instance.status, AgentStatus::Completed);
        assert_eq!(instance.content, "AB");
        assert!(instance.ended_at.is_some());
    }

    #[test]
    fn test_repeated_invocation_gets_distinct_instances() {
        let now = Utc::now();
        let mut registry = AgentRegistry::default();

        let first = registry.start("writer", info("Writer"), now);
        registry.append_chunk("writer", "v1");
        registry.end("writer", None, now);

        let second = registry.start("writer", info("Writer"), now);
        registry.append_chunk("writer", "v2");

        assert_ne!(first, second);
        assert_eq!(registry.get(&first).unwrap().content, "v1");
        assert_eq!(registry.get(&second).unwrap().content, "v2");
        assert_eq!(registry.get(&second).unwrap().order, 1);
    }

    #[test]
    fn test_restart_closes_previous_working_instance() {
        let now = Utc::now();
        let mut registry = AgentRegistry::default();

        let first = registry.start("writer", info("Writer"), now);
        let second = registry.start("writer", info("Writer"), now);

        assert_eq!(registry.get(&first).unwrap().status, AgentStatus::Completed);
        assert_eq!(registry.working("writer").unwrap().id, second);
        let working = registry.iter().filter(|i| i.is_working()).count();
        assert_eq!(working, 1);
    }

    #[test]
    fn test_chunk_without_working_instance_is_rejected() {
        let now = Utc::now();
        let mut registry = AgentRegistry::default();
        assert!(!registry.append_chunk("ghost", "x"));

        registry.start("writer", info("Writer"), now);
        registry.end("writer", None, now);
        assert!(!registry.append_chunk("writer", "late"));
        assert_eq!(registry.iter().next().unwrap().content, "");
        assert!(registry.end("writer", None, now).is_none());
    }

    #[test]
    fn test_end_adopts_content_only_when_nothing_streamed() {
        let now = Utc::now();
        let mut registry = AgentRegistry::default();

        let quiet = registry.start("quiet", info("Quiet"), now);
        registry.end("quiet", Some("full text"), now);
        assert_eq!(registry.get(&quiet).unwrap().content, "full text");

        let chatty = registry.start("chatty", info("Chatty"), now);
        registry.append_chunk("chatty", "full ");
        registry.append_chunk("chatty", "text");
        registry.end("chatty", Some("full text"), now);
        assert_eq!(registry.get(&chatty).unwrap().content, "full text");
    }

    #[test]
    fn test_checkpoint_lifecycle() {
        let now = Utc::now();
        let mut registry = AgentRegistry::default();

        let id = registry.open_checkpoint(info("Reviewer"), "please review", now);
        let instance = registry.get(&id).unwrap();
        assert_eq!(instance.status, AgentStatus::Waiting);
        assert!(instance.is_checkpoint());
        assert!(registry.working(USER_PROXY_AGENT).is_none());

        assert!(registry.close_checkpoint(&id, Some("Approved"), now));
        assert_eq!(registry.get(&id).unwrap().content, "Approved");
        assert!(!registry.close_checkpoint(&id, None, now));
    }
}
