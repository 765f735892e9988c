//! # Advisor Core
//!
//! Domain types, traits, and error definitions for the Advisor memory and
//! conversation-orchestration engine. Every subsystem is defined as a trait
//! or value type here; implementations live in their own crates and depend
//! inward on this one.

pub mod audit;
pub mod conversation;
pub mod error;
pub mod event;
pub mod ingestion;
pub mod memory;
pub mod persona;
pub mod provider;
pub mod scope;

pub use audit::{AuditLogEntry, AuditOperation};
pub use conversation::{Conversation, ConversationId, NewConversation, Role, Turn, TurnState};
pub use error::{Error, ErrorKind, IngestError, MemoryError, ProviderError, Result};
pub use event::{DomainEvent, EventBus};
pub use ingestion::{IngestionJob, JobStatus};
pub use memory::{
    EmbeddingModel, ListFilters, MemoryEntry, MemoryMetadata, MemoryStats, MemoryStore,
    MemoryUpdate, ScoredEntry, SearchFilters, SourceType,
};
pub use persona::{Persona, PersonaCatalog, PersonaMode, PersonaOverride};
pub use provider::{
    EmbeddingProvider, GenerativeProvider, PromptMessage, ProviderRequest, ProviderResponse,
    StreamChunk, Usage,
};
pub use scope::KnownScopes;
