//! Per-agent conversation memory.
//!
//! Conversations are keyed by caller and agent id so two users talking to
//! the same agent never see each other's history. The map is a bounded
//! `moka` cache: idle conversations expire and the least useful are evicted
//! at capacity.

use moka::sync::Cache;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;

use super::types::{ChatMessage, MessageRole};
use crate::config::LlmConfig;

/// Messages retained per conversation, excluding the system prompt.
pub const MAX_HISTORY: usize = 20;

pub const DEFAULT_AGENT_ROLE: &str = "un assistant de chantier";

pub fn system_prompt(agent_id: &str, role: &str) -> String {
    format!(
        "Tu es {role} dans le système ROADY Construction.\n\n\
         CONTEXTE:\n\
         - Tu fais partie d'une équipe d'agents IA spécialisés dans la construction\n\
         - Tu communiques avec d'autres agents et les utilisateurs humains\n\n\
         COMPORTEMENT:\n\
         - Sois précis et professionnel\n\
         - Utilise les termes techniques de construction quand approprié\n\
         - Fournis des réponses actionables et concrètes\n\
         - Signale les risques SST si pertinents\n\n\
         Agent ID: {agent_id}\n\
         Date: {}\n",
        chrono::Utc::now().format("%Y-%m-%d")
    )
}

/// The prompt as sent and stored, with an optional context block appended.
pub fn with_context(prompt: &str, context: Option<&Value>) -> String {
    match context {
        Some(ctx) if !ctx.is_null() => {
            let pretty = serde_json::to_string_pretty(ctx).unwrap_or_else(|_| ctx.to_string());
            format!("{prompt}\n\nCONTEXTE ACTUEL:\n{pretty}")
        }
        _ => prompt.to_string(),
    }
}

type History = Arc<Mutex<Vec<ChatMessage>>>;

pub struct AgentRegistry {
    conversations: Cache<(String, String), History>,
}

fn key(user_id: &str, agent_id: &str) -> (String, String) {
    (user_id.to_string(), agent_id.to_string())
}

impl AgentRegistry {
    pub fn new(config: &LlmConfig) -> Self {
        Self::with_limits(config.agent_capacity, Duration::from_secs(config.agent_idle_secs))
    }

    pub fn with_limits(capacity: u64, idle: Duration) -> Self {
        Self {
            conversations: Cache::builder()
                .max_capacity(capacity)
                .time_to_idle(idle)
                .build(),
        }
    }

    /// System prompt, prior history, then the new user turn.
    pub fn conversation(&self, user_id: &str, agent_id: &str, role: &str, prompt: &str) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::new(MessageRole::System, system_prompt(agent_id, role))];
        messages.extend(self.history(user_id, agent_id));
        messages.push(ChatMessage::new(MessageRole::User, prompt));
        messages
    }

    /// Store one exchange and trim to the last `MAX_HISTORY` messages.
    pub fn record(&self, user_id: &str, agent_id: &str, prompt: &str, reply: &str) {
        let history = self.conversations.get_with(key(user_id, agent_id), History::default);
        let Ok(mut history) = history.lock() else {
            return;
        };
        history.push(ChatMessage::new(MessageRole::User, prompt));
        history.push(ChatMessage::new(MessageRole::Assistant, reply));
        if history.len() > MAX_HISTORY {
            let excess = history.len() - MAX_HISTORY;
            history.drain(..excess);
        }
    }

    pub fn history(&self, user_id: &str, agent_id: &str) -> Vec<ChatMessage> {
        self.conversations
            .get(&key(user_id, agent_id))
            .and_then(|history| history.lock().ok().map(|h| h.clone()))
            .unwrap_or_default()
    }

    /// Forget a conversation. Returns whether one existed.
    pub fn reset(&self, user_id: &str, agent_id: &str) -> bool {
        self.conversations.remove(&key(user_id, agent_id)).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> AgentRegistry {
        AgentRegistry::with_limits(100, Duration::from_secs(3600))
    }

    #[test]
    fn conversation_starts_with_system_prompt() {
        let registry = registry();
        let messages = registry.conversation("u1", "estimateur", "l'Agent Estimateur", "Bonjour");

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::System);
        assert!(messages[0].content.starts_with("Tu es l'Agent Estimateur"));
        assert!(messages[0].content.contains("Agent ID: estimateur"));
        assert_eq!(messages[1], ChatMessage::new(MessageRole::User, "Bonjour"));
    }

    #[test]
    fn history_is_capped() {
        let registry = registry();
        for i in 0..15 {
            registry.record("u1", "a", &format!("q{i}"), &format!("r{i}"));
        }

        let history = registry.history("u1", "a");
        assert_eq!(history.len(), MAX_HISTORY);
        assert_eq!(history[0].content, "q5");
        assert_eq!(history[19].content, "r14");
    }

    #[test]
    fn conversations_are_per_user() {
        let registry = registry();
        registry.record("u1", "a", "secret", "ok");

        assert!(registry.history("u2", "a").is_empty());
        assert_eq!(registry.conversation("u1", "a", "r", "suite").len(), 4);
    }

    #[test]
    fn reset_forgets() {
        let registry = registry();
        registry.record("u1", "a", "q", "r");

        assert!(registry.reset("u1", "a"));
        assert!(!registry.reset("u1", "a"));
        assert!(registry.history("u1", "a").is_empty());
    }

    #[test]
    fn conversation_count_is_bounded() {
        let registry = AgentRegistry::with_limits(2, Duration::from_secs(3600));
        for user in ["u1", "u2", "u3", "u4"] {
            registry.record(user, "a", "q", "r");
        }
        registry.conversations.run_pending_tasks();

        assert!(registry.conversations.entry_count() <= 2);
    }

    #[test]
    fn idle_conversations_expire() {
        let registry = AgentRegistry::with_limits(10, Duration::from_millis(50));
        registry.record("u1", "a", "q", "r");
        assert_eq!(registry.history("u1", "a").len(), 2);

        std::thread::sleep(Duration::from_millis(120));

        assert!(registry.history("u1", "a").is_empty());
    }

    #[test]
    fn context_block_is_pretty_json() {
        let prompt = with_context("Estime", Some(&json!({"surface": 100})));
        assert_eq!(prompt, "Estime\n\nCONTEXTE ACTUEL:\n{\n  \"surface\": 100\n}");
        assert_eq!(with_context("Estime", None), "Estime");
    }
}
