//! Prompt assembly.
//!
//! A prompt is built from four layers, filled in priority order against a
//! single token budget:
//!
//! | Layer | Source | Trim strategy |
//! |-------|--------|---------------|
//! | System | Rendered persona template | Never trimmed |
//! | User input | The new turn | Never trimmed |
//! | Memory | Retrieved entries, ranked | Lowest-ranked dropped first |
//! | History | Prior turns in the window | Oldest dropped first |
//!
//! Assembly is deterministic: identical inputs give identical prompts.

use advisor_core::conversation::{Role, Turn};
use advisor_core::error::Error;
use advisor_core::provider::PromptMessage;
use advisor_retrieval::token::{MESSAGE_OVERHEAD, estimate_message_tokens, estimate_tokens};
use advisor_retrieval::{RetrievedMemory, format_sources};
use serde::{Deserialize, Serialize};

const MEMORY_HEADER: &str = "[Retrieved Memory]\n";

/// All inputs for a single generation call.
pub struct PromptInput<'a> {
    /// Persona template with placeholders already substituted.
    pub system_prompt: &'a str,
    /// Retrieved entries, best first.
    pub memories: &'a [RetrievedMemory],
    /// Prior turns, oldest first.
    pub history: &'a [Turn],
    pub user_message: &'a str,
}

/// The assembled prompt, ready for the generative provider.
#[derive(Debug, Clone)]
pub struct AssembledPrompt {
    pub messages: Vec<PromptMessage>,
    /// Memory ids that made it into the prompt, in rank order.
    pub memory_ids: Vec<String>,
    pub metadata: AssemblyMetadata,
}

impl AssembledPrompt {
    pub fn system_message(&self) -> &str {
        self.messages
            .iter()
            .find(|m| m.role == Role::System)
            .map_or("", |m| m.content.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssemblyMetadata {
    pub total_tokens: usize,
    pub budget: usize,
    pub per_layer: Vec<LayerStats>,
    pub drops: Vec<DropInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerStats {
    pub name: String,
    pub tokens: usize,
    pub items_included: usize,
    pub items_total: usize,
}

/// Items dropped from a layer while enforcing the budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DropInfo {
    pub layer: String,
    pub items_dropped: usize,
    pub tokens_dropped: usize,
    pub reason: String,
}

pub struct PromptAssembler {
    budget: usize,
}

impl PromptAssembler {
    pub fn new(budget: usize) -> Self {
        Self { budget }
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Build the prompt. Fails only when the system prompt and the user
    /// message alone exceed the budget.
    pub fn assemble(&self, input: &PromptInput<'_>) -> Result<AssembledPrompt, Error> {
        let mut stats = Vec::new();
        let mut drops = Vec::new();

        let system_tokens = estimate_message_tokens(input.system_prompt);
        let user_tokens = estimate_message_tokens(input.user_message);
        let reserved = system_tokens + user_tokens;
        if reserved > self.budget {
            return Err(Error::Validation(format!(
                "system prompt ({system_tokens} tokens) and user message ({user_tokens} tokens) exceed the prompt budget ({} tokens)",
                self.budget
            )));
        }
        stats.push(LayerStats {
            name: "system".into(),
            tokens: system_tokens,
            items_included: 1,
            items_total: 1,
        });

        let mut remaining = self.budget - reserved;

        let (memory_section, memory_ids, mem_stats, mem_drop) =
            Self::memory_layer(input.memories, remaining);
        remaining -= mem_stats.tokens;
        stats.push(mem_stats);
        drops.extend(mem_drop);

        let (history, hist_stats, hist_drop) = Self::history_layer(input.history, remaining);
        stats.push(hist_stats);
        drops.extend(hist_drop);

        stats.push(LayerStats {
            name: "user_message".into(),
            tokens: user_tokens,
            items_included: 1,
            items_total: 1,
        });

        let system = format!("{}\n\n{}", input.system_prompt, memory_section);
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(PromptMessage::system(system));
        messages.extend(history);
        messages.push(PromptMessage::user(input.user_message));

        let total_tokens = stats.iter().map(|s| s.tokens).sum();
        Ok(AssembledPrompt {
            messages,
            memory_ids,
            metadata: AssemblyMetadata {
                total_tokens,
                budget: self.budget,
                per_layer: stats,
                drops,
            },
        })
    }

    /// Keep the longest rank-order prefix that fits. When nothing fits the
    /// section still says that no memory was found.
    fn memory_layer(
        memories: &[RetrievedMemory],
        budget: usize,
    ) -> (String, Vec<String>, LayerStats, Option<DropInfo>) {
        let layer = "memory";
        let mut kept = memories.len();
        let mut section = render_memory(&memories[..kept]);
        while kept > 0 && estimate_tokens(&section) > budget {
            kept -= 1;
            section = render_memory(&memories[..kept]);
        }

        let dropped = &memories[kept..];
        let drop = (!dropped.is_empty()).then(|| DropInfo {
            layer: layer.into(),
            items_dropped: dropped.len(),
            tokens_dropped: dropped.iter().map(RetrievedMemory::tokens).sum(),
            reason: "Lowest-ranked entries dropped".into(),
        });
        // The empty-result notice is always sent; it is charged to the
        // layer only when it fits.
        let tokens = estimate_tokens(&section).min(budget);
        (
            section,
            memories[..kept].iter().map(|m| m.entry.id.clone()).collect(),
            LayerStats {
                name: layer.into(),
                tokens,
                items_included: kept,
                items_total: memories.len(),
            },
            drop,
        )
    }

    /// Newest turns first until the budget runs out; returned oldest first.
    fn history_layer(history: &[Turn], budget: usize) -> (Vec<PromptMessage>, LayerStats, Option<DropInfo>) {
        let layer = "history";
        let mut used = 0;
        let mut kept = Vec::new();
        let mut dropped = 0;
        let mut dropped_tokens = 0;

        for turn in history.iter().rev() {
            let cost = estimate_tokens(&turn.content) + MESSAGE_OVERHEAD;
            if dropped == 0 && used + cost <= budget {
                used += cost;
                kept.push(turn_message(turn));
            } else {
                dropped += 1;
                dropped_tokens += cost;
            }
        }
        kept.reverse();

        let drop = (dropped > 0).then(|| DropInfo {
            layer: layer.into(),
            items_dropped: dropped,
            tokens_dropped: dropped_tokens,
            reason: "Oldest turns dropped".into(),
        });
        let stats = LayerStats {
            name: layer.into(),
            tokens: used,
            items_included: kept.len(),
            items_total: history.len(),
        };
        (kept, stats, drop)
    }
}

fn render_memory(items: &[RetrievedMemory]) -> String {
    format!("{MEMORY_HEADER}{}", format_sources(items))
}

fn turn_message(turn: &Turn) -> PromptMessage {
    match turn.role {
        Role::User => PromptMessage::user(&turn.content),
        Role::Assistant => PromptMessage::assistant(&turn.content),
        Role::System => PromptMessage::system(&turn.content),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use advisor_core::memory::{MemoryEntry, MemoryMetadata, SourceType};
    use advisor_core::persona::PersonaMode;

    fn memory(id: &str, text: &str, score: f32) -> RetrievedMemory {
        let mut entry = MemoryEntry::new(
            text,
            vec![1.0],
            "m",
            MemoryMetadata::new("acme", "p1", SourceType::Email),
            0.5,
        );
        entry.id = id.into();
        RetrievedMemory { entry, similarity: score, recency: 1.0, score }
    }

    fn history(n: usize) -> Vec<Turn> {
        (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    Turn::user(format!("question {i}"), PersonaMode::default())
                } else {
                    Turn::assistant(format!("answer {i}"), vec![], PersonaMode::default())
                }
            })
            .collect()
    }

    #[test]
    fn assembles_all_layers_in_order() {
        let memories = vec![memory("m1", "Buffer is PBS", 0.9)];
        let turns = history(2);
        let prompt = PromptAssembler::new(1000)
            .assemble(&PromptInput {
                system_prompt: "You are an advisor.",
                memories: &memories,
                history: &turns,
                user_message: "Which buffer?",
            })
            .unwrap();

        assert_eq!(prompt.messages.len(), 4);
        assert_eq!(prompt.messages[0].role, Role::System);
        assert!(prompt.system_message().starts_with("You are an advisor."));
        assert!(prompt.system_message().contains("Source 1 (Customer: acme) (Project: p1) [m1]:\nBuffer is PBS"));
        assert_eq!(prompt.messages[1].content, "question 0");
        assert_eq!(prompt.messages[2].role, Role::Assistant);
        assert_eq!(prompt.messages[3], PromptMessage::user("Which buffer?"));
        assert_eq!(prompt.memory_ids, vec!["m1".to_string()]);
        assert!(prompt.metadata.drops.is_empty());
    }

    #[test]
    fn empty_memory_is_stated() {
        let prompt = PromptAssembler::new(1000)
            .assemble(&PromptInput {
                system_prompt: "sys",
                memories: &[],
                history: &[],
                user_message: "hi",
            })
            .unwrap();
        assert!(prompt.system_message().contains("No relevant information found in memory."));
        assert!(prompt.memory_ids.is_empty());
    }

    #[test]
    fn oldest_history_dropped_first() {
        let turns = history(10);
        // system ~ 5, user ~ 5, memory notice ~ 15; leaves room for a few turns
        let prompt = PromptAssembler::new(60)
            .assemble(&PromptInput {
                system_prompt: "sys",
                memories: &[],
                history: &turns,
                user_message: "latest",
            })
            .unwrap();

        let hist = &prompt.messages[1..prompt.messages.len() - 1];
        assert!(!hist.is_empty());
        assert!(hist.len() < 10);
        assert_eq!(hist.last().map(|m| m.content.as_str()), Some("answer 9"));
        let drop = prompt.metadata.drops.iter().find(|d| d.layer == "history").unwrap();
        assert_eq!(drop.items_dropped, 10 - hist.len());
        assert!(prompt.metadata.total_tokens <= 60);
    }

    #[test]
    fn lowest_ranked_memory_dropped_first() {
        let long = "x".repeat(400);
        let memories = vec![memory("best", "short fact", 0.9), memory("worst", &long, 0.5)];
        let prompt = PromptAssembler::new(80)
            .assemble(&PromptInput {
                system_prompt: "sys",
                memories: &memories,
                history: &[],
                user_message: "q",
            })
            .unwrap();
        assert_eq!(prompt.memory_ids, vec!["best".to_string()]);
        assert!(!prompt.system_message().contains(&long));
        assert_eq!(prompt.metadata.drops[0].items_dropped, 1);
    }

    #[test]
    fn oversized_input_is_rejected() {
        let long = "word ".repeat(200);
        let err = PromptAssembler::new(50)
            .assemble(&PromptInput {
                system_prompt: "sys",
                memories: &[],
                history: &[],
                user_message: &long,
            })
            .unwrap_err();
        assert_eq!(err.kind(), advisor_core::error::ErrorKind::Validation);
    }

    #[test]
    fn assembly_is_deterministic() {
        let memories = vec![memory("a", "alpha", 0.9), memory("b", "beta", 0.8)];
        let turns = history(4);
        let input = PromptInput {
            system_prompt: "sys",
            memories: &memories,
            history: &turns,
            user_message: "q",
        };
        let assembler = PromptAssembler::new(500);
        let a = assembler.assemble(&input).unwrap();
        let b = assembler.assemble(&input).unwrap();
        assert_eq!(a.messages, b.messages);
    }
}
