//! Conversation context (§4.6): a per-session bounded history with
//! persistent entity extraction and barge-in annotation.

use std::collections::{HashMap, VecDeque};

use crate::providers::{LanguageModel, Message, Role};

/// Bounded conversation history plus a separate slot for entities the
/// caller has explicitly provided, which survive summarisation.
pub struct ConversationContext {
    history: VecDeque<Message>,
    max_turns: usize,
    entities: HashMap<String, String>,
}

impl ConversationContext {
    pub fn new(max_turns: usize) -> Self {
        Self {
            history: VecDeque::new(),
            max_turns,
            entities: HashMap::new(),
        }
    }

    pub fn entities(&self) -> &HashMap<String, String> {
        &self.entities
    }

    /// Appends a user turn, extracting any named entities it carries.
    pub fn push_user_turn(&mut self, transcript: &str) {
        self.extract_entities(transcript);
        self.history.push_back(Message {
            role: Role::User,
            content: transcript.to_string(),
        });
    }

    /// Appends an assistant turn. `interrupted` annotates a barge-in so the
    /// model can acknowledge the cut-off reply in its next turn.
    pub fn push_assistant_turn(&mut self, content: &str, interrupted: bool) {
        let content = if interrupted {
            format!("{content} [interrupted]")
        } else {
            content.to_string()
        };
        self.history.push_back(Message {
            role: Role::Assistant,
            content,
        });
    }

    /// Builds the message list handed to the LLM: entity slot as a leading
    /// system message (if any entities are known), followed by history.
    pub fn messages_for_generation(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.history.len() + 1);
        if !self.entities.is_empty() {
            let mut pairs: Vec<String> = self
                .entities
                .iter()
                .map(|(k, v)| format!("{k}: {v}"))
                .collect();
            pairs.sort();
            messages.push(Message {
                role: Role::System,
                content: format!("Known caller details - {}", pairs.join(", ")),
            });
        }
        messages.extend(self.history.iter().cloned());
        messages
    }

    /// If the history exceeds `max_turns`, compresses the oldest half into a
    /// single summary turn via the LLM's `summarize` capability.
    pub async fn maybe_summarize(&mut self, llm: &dyn LanguageModel) {
        if self.history.len() <= self.max_turns {
            return;
        }
        let half = self.history.len() / 2;
        let to_summarize: Vec<Message> = self.history.drain(..half).collect();
        if let Ok(summary) = llm.summarize(to_summarize).await {
            self.history.push_front(Message {
                role: Role::System,
                content: format!("Earlier conversation summary: {summary}"),
            });
        }
    }

    fn extract_entities(&mut self, transcript: &str) {
        let lower = transcript.to_lowercase();
        if let Some(pos) = lower.find("my name is ") {
            let rest = &transcript[pos + "my name is ".len()..];
            if let Some(name) = rest.split(|c: char| ".,!?".contains(c)).next() {
                self.entities.insert("name".into(), name.trim().to_string());
            }
        }
        if let Some(pos) = lower.find("account number is ") {
            let rest = &transcript[pos + "account number is ".len()..];
            if let Some(id) = rest.split_whitespace().next() {
                self.entities
                    .insert("account_id".into(), id.trim_matches(|c: char| ".,!?".contains(c)).to_string());
            }
        }
    }
}
