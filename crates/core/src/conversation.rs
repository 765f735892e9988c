//! Conversation and Turn domain types.
//!
//! A conversation is owned by the orchestrator and has a single writer.
//! Turns are append-only and ordered by commit time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::persona::PersonaMode;

/// Unique identifier for a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for ConversationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// A single committed turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub id: String,
    pub role: Role,
    pub content: String,

    /// Memory ids used to produce this turn. Soft references: they may
    /// later point at superseded or tombstoned entries.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub referenced_memory_ids: Vec<String>,

    /// Persona active when the turn was committed.
    pub persona: PersonaMode,

    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn user(content: impl Into<String>, persona: PersonaMode) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::User,
            content: content.into(),
            referenced_memory_ids: Vec::new(),
            persona,
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(
        content: impl Into<String>,
        referenced_memory_ids: Vec<String>,
        persona: PersonaMode,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::Assistant,
            content: content.into(),
            referenced_memory_ids,
            persona,
            timestamp: Utc::now(),
        }
    }
}

/// Record of an explicit persona switch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaSwitch {
    pub from: PersonaMode,
    pub to: PersonaMode,
    /// Number of turns recorded before the switch took effect.
    pub at_turn: usize,
    pub timestamp: DateTime<Utc>,
}

/// Caller-supplied fields for a new conversation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewConversation {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub persona_mode: PersonaMode,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub persona_switches: Vec<PersonaSwitch>,

    pub turns: Vec<Turn>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(persona_mode: PersonaMode, fields: NewConversation) -> Self {
        let now = Utc::now();
        Self {
            id: ConversationId::new(),
            persona_mode,
            persona_switches: Vec::new(),
            turns: Vec::new(),
            title: fields.title,
            customer_id: fields.customer_id,
            project_id: fields.project_id,
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a turn. Timestamps never go backwards within a conversation.
    pub fn push(&mut self, mut turn: Turn) {
        if let Some(last) = self.turns.last() {
            if turn.timestamp < last.timestamp {
                turn.timestamp = last.timestamp;
            }
        }
        self.updated_at = turn.timestamp.max(self.updated_at);
        self.turns.push(turn);
    }

    /// Change the persona for subsequent turns. Returns the previous mode.
    pub fn switch_persona(&mut self, to: PersonaMode) -> PersonaMode {
        let from = self.persona_mode;
        if from != to {
            let now = Utc::now();
            self.persona_switches.push(PersonaSwitch {
                from,
                to,
                at_turn: self.turns.len(),
                timestamp: now,
            });
            self.persona_mode = to;
            self.updated_at = now.max(self.updated_at);
        }
        from
    }

    /// The last `n` turns, oldest first.
    pub fn recent_turns(&self, n: usize) -> &[Turn] {
        let start = self.turns.len().saturating_sub(n);
        &self.turns[start..]
    }
}

/// Phase of a single turn as it moves through the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    Idle,
    AwaitingRetrieval,
    ComposingPrompt,
    AwaitingGeneration,
    Completed,
    Failed,
}

impl TurnState {
    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: TurnState) -> bool {
        use TurnState::*;
        matches!(
            (self, next),
            (Idle | Completed | Failed, AwaitingRetrieval)
                | (AwaitingRetrieval, ComposingPrompt)
                | (ComposingPrompt, AwaitingGeneration)
                | (AwaitingGeneration, Completed)
                | (AwaitingRetrieval | ComposingPrompt | AwaitingGeneration, Failed)
                | (AwaitingRetrieval | ComposingPrompt | AwaitingGeneration, Idle)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for TurnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::AwaitingRetrieval => "awaiting_retrieval",
            Self::ComposingPrompt => "composing_prompt",
            Self::AwaitingGeneration => "awaiting_generation",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_keeps_timestamps_monotonic() {
        let mut conv = Conversation::new(PersonaMode::default(), NewConversation::default());
        let first = Turn::user("first", PersonaMode::default());
        let mut second = Turn::assistant("second", vec![], PersonaMode::default());
        second.timestamp = first.timestamp - chrono::Duration::seconds(5);

        conv.push(first.clone());
        conv.push(second);
        assert_eq!(conv.turns.len(), 2);
        assert!(conv.turns[1].timestamp >= conv.turns[0].timestamp);
    }

    #[test]
    fn switch_persona_records_position() {
        let mut conv = Conversation::new(PersonaMode::ScientificAdvisor, NewConversation::default());
        conv.push(Turn::user("hi", PersonaMode::ScientificAdvisor));
        let prev = conv.switch_persona(PersonaMode::DataSummary);

        assert_eq!(prev, PersonaMode::ScientificAdvisor);
        assert_eq!(conv.persona_mode, PersonaMode::DataSummary);
        assert_eq!(conv.persona_switches[0].at_turn, 1);
        assert_eq!(conv.turns[0].persona, PersonaMode::ScientificAdvisor);
    }

    #[test]
    fn switching_to_same_persona_is_a_noop() {
        let mut conv = Conversation::new(PersonaMode::DataSummary, NewConversation::default());
        conv.switch_persona(PersonaMode::DataSummary);
        assert!(conv.persona_switches.is_empty());
    }

    #[test]
    fn recent_turns_window() {
        let mut conv = Conversation::new(PersonaMode::default(), NewConversation::default());
        for i in 0..5 {
            conv.push(Turn::user(format!("m{i}"), PersonaMode::default()));
        }
        let window = conv.recent_turns(2);
        assert_eq!(window.len(), 2);
        assert_eq!(window[0].content, "m3");
        assert_eq!(conv.recent_turns(10).len(), 5);
    }

    #[test]
    fn turn_state_transitions() {
        use TurnState::*;
        assert!(Idle.can_transition_to(AwaitingRetrieval));
        assert!(AwaitingRetrieval.can_transition_to(ComposingPrompt));
        assert!(ComposingPrompt.can_transition_to(AwaitingGeneration));
        assert!(AwaitingGeneration.can_transition_to(Completed));
        assert!(AwaitingGeneration.can_transition_to(Failed));
        assert!(!Idle.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(AwaitingGeneration));
        assert!(Completed.is_terminal());
    }
}
