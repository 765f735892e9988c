//! The agent side of Advisor: turning a user message into a grounded reply.
//!
//! A turn retrieves memory for the conversation's persona scope, assembles
//! a prompt within a token budget, calls the generative provider, and
//! commits the exchange. See [`Orchestrator`] for the state machine.

pub mod orchestrator;
pub mod persist;
pub mod prompt;

pub use orchestrator::{GenerationSettings, Orchestrator, TurnOutcome};
pub use persist::{load_conversations, remove_conversation, save_conversations};
pub use prompt::{AssembledPrompt, AssemblyMetadata, DropInfo, LayerStats, PromptAssembler, PromptInput};
