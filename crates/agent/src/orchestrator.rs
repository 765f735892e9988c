//! The conversation orchestrator.
//!
//! Each conversation runs its own turn state machine:
//!
//! ```text
//! Idle → AwaitingRetrieval → ComposingPrompt → AwaitingGeneration → Completed | Failed
//! ```
//!
//! Conversations are independent and run concurrently. Within one
//! conversation a turn holds the conversation lock from retrieval to
//! commit, so a second turn waits for the first (FIFO) and never
//! interleaves with it. Turns are appended only when generation succeeds;
//! a failed or cancelled turn leaves the conversation as it was.

use advisor_config::{GenerationConfig, OrchestratorConfig};
use advisor_core::conversation::{Conversation, ConversationId, NewConversation, Turn, TurnState};
use advisor_core::error::{Error, ErrorKind, ProviderError};
use advisor_core::event::{DomainEvent, EventBus};
use advisor_core::memory::{SearchFilters, SourceType};
use advisor_core::persona::{PersonaCatalog, PersonaMode};
use advisor_core::provider::{GenerativeProvider, ProviderRequest, Usage, collect_stream};
use advisor_core::scope::KnownScopes;
use advisor_ingest::{IngestionPipeline, NewMemory};
use advisor_retrieval::{RetrievalEngine, RetrievalScope, RetrievedMemory};
use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::persist::save_conversations;
use crate::prompt::{AssemblyMetadata, PromptAssembler, PromptInput};

const ACTOR: &str = "orchestrator";

/// Model parameters for generation calls.
#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub stream: bool,
}

impl GenerationSettings {
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self {
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: Some(config.max_tokens),
            stream: config.stream,
        }
    }
}

/// Result of a submitted turn.
#[derive(Debug, Clone)]
pub enum TurnOutcome {
    /// The user turn and the assistant reply were both committed.
    Completed {
        reply: Turn,
        /// Memory that went into the prompt, best first.
        retrieved: Vec<RetrievedMemory>,
        usage: Option<Usage>,
        prompt: AssemblyMetadata,
    },
    /// Nothing was committed. `message` is safe to show to the user.
    Failed {
        kind: ErrorKind,
        reason: String,
        message: String,
    },
}

impl TurnOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    /// What to show the user either way.
    pub fn reply_text(&self) -> &str {
        match self {
            Self::Completed { reply, .. } => &reply.content,
            Self::Failed { message, .. } => message,
        }
    }
}

struct Slot {
    conversation: tokio::sync::Mutex<Conversation>,
    state: Mutex<TurnState>,
}

impl Slot {
    fn new(conversation: Conversation) -> Self {
        Self {
            conversation: tokio::sync::Mutex::new(conversation),
            state: Mutex::new(TurnState::Idle),
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

fn read<T>(l: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    l.read().unwrap_or_else(|p| p.into_inner())
}

fn write<T>(l: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    l.write().unwrap_or_else(|p| p.into_inner())
}

pub struct Orchestrator {
    retrieval: Arc<RetrievalEngine>,
    generator: Arc<dyn GenerativeProvider>,
    settings: GenerationSettings,
    config: OrchestratorConfig,
    personas: PersonaCatalog,
    scopes: KnownScopes,
    ingestion: Option<Arc<IngestionPipeline>>,
    events: Option<Arc<EventBus>>,
    persist_path: Option<PathBuf>,
    persist_lock: tokio::sync::Mutex<()>,
    slots: RwLock<HashMap<ConversationId, Arc<Slot>>>,
    /// Last committed state of every conversation. Readers use this and
    /// never wait on an in-flight turn.
    committed: RwLock<HashMap<ConversationId, Conversation>>,
}

impl Orchestrator {
    pub fn new(
        retrieval: Arc<RetrievalEngine>,
        generator: Arc<dyn GenerativeProvider>,
        settings: GenerationSettings,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            retrieval,
            generator,
            settings,
            config,
            personas: PersonaCatalog::builtin(),
            scopes: KnownScopes::open(),
            ingestion: None,
            events: None,
            persist_path: None,
            persist_lock: tokio::sync::Mutex::new(()),
            slots: RwLock::new(HashMap::new()),
            committed: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_personas(mut self, personas: PersonaCatalog) -> Self {
        self.personas = personas;
        self
    }

    pub fn with_scopes(mut self, scopes: KnownScopes) -> Self {
        self.scopes = scopes;
        self
    }

    /// Pipeline used for candidate facts when `emit_candidate_facts` is on.
    pub fn with_ingestion(mut self, ingestion: Arc<IngestionPipeline>) -> Self {
        self.ingestion = Some(ingestion);
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Save every conversation to `path` after each commit.
    pub fn with_persistence(mut self, path: PathBuf) -> Self {
        self.persist_path = Some(path);
        self
    }

    /// Register previously saved conversations. Existing ids are replaced.
    pub fn restore(&self, conversations: Vec<Conversation>) {
        let mut slots = write(&self.slots);
        let mut committed = write(&self.committed);
        for conversation in conversations {
            slots.insert(conversation.id.clone(), Arc::new(Slot::new(conversation.clone())));
            committed.insert(conversation.id.clone(), conversation);
        }
        debug!(count = committed.len(), "Restored conversations");
    }

    pub async fn create_conversation(
        &self,
        persona: PersonaMode,
        fields: NewConversation,
    ) -> Result<Conversation, Error> {
        match (&fields.customer_id, &fields.project_id) {
            (Some(customer), Some(project)) => self.scopes.validate(customer, project)?,
            (Some(customer), None) => self.scopes.validate_customer(customer)?,
            (None, Some(_)) => {
                return Err(Error::Validation("a project scope requires a customer".into()));
            }
            (None, None) => {}
        }

        let conversation = Conversation::new(persona, fields);
        write(&self.slots).insert(conversation.id.clone(), Arc::new(Slot::new(conversation.clone())));
        info!(conversation_id = %conversation.id, persona = %persona, "Conversation created");
        self.commit(&conversation).await;
        Ok(conversation)
    }

    pub fn conversation(&self, id: &ConversationId) -> Result<Conversation, Error> {
        read(&self.committed)
            .get(id)
            .cloned()
            .ok_or_else(|| not_found(id))
    }

    /// Most recently updated first.
    pub fn list_conversations(&self, limit: usize, offset: usize) -> Vec<Conversation> {
        let mut all: Vec<Conversation> = read(&self.committed).values().cloned().collect();
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        all.into_iter().skip(offset).take(limit).collect()
    }

    /// Remove a conversation and its turns. Waits for an in-flight turn;
    /// that turn's reply is discarded. Memory entries are untouched.
    pub async fn delete_conversation(&self, id: &ConversationId) -> Result<(), Error> {
        let slot = self.slot(id)?;
        let _conversation = slot.conversation.lock().await;
        {
            let mut slots = write(&self.slots);
            if !slots.get(id).is_some_and(|s| Arc::ptr_eq(s, &slot)) {
                return Err(not_found(id));
            }
            slots.remove(id);
            write(&self.committed).remove(id);
        }
        info!(conversation_id = %id, "Conversation deleted");
        self.publish(DomainEvent::ConversationDeleted {
            conversation_id: id.to_string(),
            timestamp: Utc::now(),
        });
        self.persist().await;
        Ok(())
    }

    pub fn turn_state(&self, id: &ConversationId) -> Result<TurnState, Error> {
        let slot = self.slot(id)?;
        let state = *lock(&slot.state);
        Ok(state)
    }

    /// Change the persona for subsequent turns. Waits for an in-flight
    /// turn, which keeps the persona it started with.
    pub async fn switch_persona(&self, id: &ConversationId, to: PersonaMode) -> Result<Conversation, Error> {
        let slot = self.slot(id)?;
        let mut conversation = slot.conversation.lock().await;
        let from = conversation.switch_persona(to);
        if from != to {
            info!(conversation_id = %id, %from, %to, "Persona switched");
            self.publish(DomainEvent::PersonaSwitched {
                conversation_id: id.to_string(),
                from,
                to,
                timestamp: Utc::now(),
            });
            self.commit(&conversation).await;
        }
        Ok(conversation.clone())
    }

    pub async fn submit_turn(&self, id: &ConversationId, text: &str) -> Result<TurnOutcome, Error> {
        self.submit_turn_with_cancel(id, text, CancellationToken::new()).await
    }

    /// Run one turn. Returns `Err` for rejected input and cancellation, and
    /// `Ok(TurnOutcome::Failed)` when a collaborator failed mid-turn.
    ///
    /// Cancelling stops the turn before the reply is committed. Writes
    /// already made by collaborators are not rolled back.
    pub async fn submit_turn_with_cancel(
        &self,
        id: &ConversationId,
        text: &str,
        cancel: CancellationToken,
    ) -> Result<TurnOutcome, Error> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::Validation("turn text must not be empty".into()));
        }
        let slot = self.slot(id)?;

        let mut conversation = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled(id)),
            guard = slot.conversation.lock() => guard,
        };

        self.transition(&slot, id, TurnState::AwaitingRetrieval);
        let persona = self.personas.get(conversation.persona_mode);
        let scope = RetrievalScope::new(SearchFilters {
            customer_id: conversation.customer_id.clone(),
            project_id: conversation.project_id.clone(),
            persona_scopes: persona.allowed_memory_scopes.clone(),
            ..SearchFilters::default()
        });
        let retrieved = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(self.cancel_turn(&slot, id)),
            result = self.retrieval.retrieve(text, &scope) => result,
        };
        let retrieved = match retrieved {
            Ok(result) => result.items,
            Err(e) => return Ok(self.fail_turn(&slot, id, "retrieval", e)),
        };

        self.transition(&slot, id, TurnState::ComposingPrompt);
        let system_prompt = persona.render(conversation.customer_id.as_deref(), conversation.project_id.as_deref());
        let assembled = PromptAssembler::new(self.config.prompt_token_budget).assemble(&PromptInput {
            system_prompt: &system_prompt,
            memories: &retrieved,
            history: conversation.recent_turns(self.config.history_window),
            user_message: text,
        });
        let prompt = match assembled {
            Ok(prompt) => prompt,
            Err(e) => return Ok(self.fail_turn(&slot, id, "prompt assembly", e)),
        };
        if cancel.is_cancelled() {
            return Err(self.cancel_turn(&slot, id));
        }

        self.transition(&slot, id, TurnState::AwaitingGeneration);
        let mut request = ProviderRequest::new(&self.settings.model, prompt.messages.clone());
        request.temperature = self.settings.temperature;
        request.max_tokens = self.settings.max_tokens;
        request.stream = self.settings.stream;
        let generated = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(self.cancel_turn(&slot, id)),
            result = self.generate(request) => result,
        };
        let (content, usage) = match generated {
            Ok(v) => v,
            Err(e) => return Ok(self.fail_turn(&slot, id, "generation", e.into())),
        };

        let mode = conversation.persona_mode;
        conversation.push(Turn::user(text, mode));
        conversation.push(Turn::assistant(content, prompt.memory_ids.clone(), mode));
        let reply = conversation.turns.last().cloned().ok_or_else(|| {
            Error::Internal("conversation has no turns after commit".into())
        })?;
        self.commit(&conversation).await;
        self.transition(&slot, id, TurnState::Completed);
        info!(
            conversation_id = %id,
            persona = %mode,
            memories = prompt.memory_ids.len(),
            "Turn completed"
        );

        if self.config.emit_candidate_facts {
            self.emit_candidate_fact(&conversation, text, &reply.content).await;
        }

        let used = prompt.memory_ids.len();
        Ok(TurnOutcome::Completed {
            reply,
            retrieved: retrieved.into_iter().take(used).collect(),
            usage,
            prompt: prompt.metadata,
        })
    }

    async fn generate(&self, request: ProviderRequest) -> Result<(String, Option<Usage>), ProviderError> {
        if request.stream {
            let rx = self.generator.stream(request).await?;
            collect_stream(rx).await
        } else {
            let response = self.generator.complete(request).await?;
            Ok((response.content, response.usage))
        }
    }

    /// Feed the exchange back as a low-trust memory entry. Failures are
    /// logged; the turn is already committed.
    async fn emit_candidate_fact(&self, conversation: &Conversation, question: &str, answer: &str) {
        let Some(pipeline) = &self.ingestion else {
            return;
        };
        let (Some(customer), Some(project)) = (&conversation.customer_id, &conversation.project_id) else {
            debug!(conversation_id = %conversation.id, "No customer scope, skipping candidate fact");
            return;
        };
        let mut memory = NewMemory::new(format!("Q: {question}\nA: {answer}"), customer, project);
        memory.source_type = SourceType::Conversation;
        memory.trust_score = Some(self.config.candidate_trust);
        memory.source_ref = Some(format!("conversation:{}", conversation.id));
        match pipeline.add_memory(memory, ACTOR).await {
            Ok(entry) => debug!(entry_id = %entry.id, "Candidate fact stored"),
            Err(e) => warn!(conversation_id = %conversation.id, error = %e, "Candidate fact rejected"),
        }
    }

    fn slot(&self, id: &ConversationId) -> Result<Arc<Slot>, Error> {
        read(&self.slots).get(id).cloned().ok_or_else(|| not_found(id))
    }

    fn transition(&self, slot: &Slot, id: &ConversationId, to: TurnState) {
        let from = std::mem::replace(&mut *lock(&slot.state), to);
        if !from.can_transition_to(to) {
            warn!(conversation_id = %id, %from, %to, "Unexpected turn state transition");
        }
        debug!(conversation_id = %id, %from, %to, "Turn state");
        self.publish(DomainEvent::TurnStateChanged {
            conversation_id: id.to_string(),
            from,
            to,
            timestamp: Utc::now(),
        });
    }

    fn fail_turn(&self, slot: &Slot, id: &ConversationId, stage: &str, error: Error) -> TurnOutcome {
        warn!(conversation_id = %id, stage, error = %error, "Turn failed");
        self.transition(slot, id, TurnState::Failed);
        self.publish(DomainEvent::ErrorOccurred {
            context: format!("conversation {id}: {stage}"),
            error_message: error.to_string(),
            timestamp: Utc::now(),
        });
        TurnOutcome::Failed {
            kind: error.kind(),
            reason: error.to_string(),
            message: format!(
                "I could not answer that: {stage} failed. Nothing was added to this conversation; please try again."
            ),
        }
    }

    fn cancel_turn(&self, slot: &Slot, id: &ConversationId) -> Error {
        info!(conversation_id = %id, "Turn cancelled");
        self.transition(slot, id, TurnState::Idle);
        cancelled(id)
    }

    /// Publish the committed state and persist it if configured. A
    /// conversation deleted meanwhile stays deleted.
    async fn commit(&self, conversation: &Conversation) {
        {
            let slots = read(&self.slots);
            if !slots.contains_key(&conversation.id) {
                debug!(conversation_id = %conversation.id, "Conversation deleted, dropping commit");
                return;
            }
            write(&self.committed).insert(conversation.id.clone(), conversation.clone());
        }
        self.persist().await;
    }

    async fn persist(&self) {
        let Some(path) = &self.persist_path else {
            return;
        };
        let _guard = self.persist_lock.lock().await;
        let mut all: Vec<Conversation> = read(&self.committed).values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        if let Err(e) = save_conversations(path, &all).await {
            warn!(path = %path.display(), error = %e, "Failed to persist conversations");
        }
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }
}

fn not_found(id: &ConversationId) -> Error {
    Error::NotFound(format!("conversation {id}"))
}

fn cancelled(id: &ConversationId) -> Error {
    Error::Cancelled(format!("turn in conversation {id}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use advisor_config::{IngestionConfig, RetrievalConfig};
    use advisor_core::memory::{EmbeddingModel, ListFilters, MemoryEntry, MemoryMetadata, MemoryStore};
    use advisor_memory::InMemoryStore;
    use advisor_providers::HashEmbedder;
    use advisor_providers::mock::ScriptedGenerator;
    use std::time::Duration;

    struct Harness {
        store: Arc<InMemoryStore>,
        embedder: Arc<HashEmbedder>,
        generator: Arc<ScriptedGenerator>,
        orchestrator: Arc<Orchestrator>,
    }

    fn harness(generator: ScriptedGenerator, config: OrchestratorConfig) -> Harness {
        let embedder = Arc::new(HashEmbedder::new("hash-v1", 384));
        let store = Arc::new(InMemoryStore::new(EmbeddingModel::new("hash-v1", 384)));
        let generator = Arc::new(generator);
        let retrieval = Arc::new(RetrievalEngine::new(
            store.clone(),
            embedder.clone(),
            RetrievalConfig::default(),
        ));
        let ingestion = Arc::new(IngestionPipeline::new(
            store.clone(),
            embedder.clone(),
            &IngestionConfig::default(),
        ));
        let settings = GenerationSettings {
            model: "test-model".into(),
            temperature: 0.2,
            max_tokens: Some(256),
            stream: false,
        };
        let orchestrator = Orchestrator::new(retrieval, generator.clone(), settings, config)
            .with_ingestion(ingestion);
        Harness {
            store,
            embedder,
            generator,
            orchestrator: Arc::new(orchestrator),
        }
    }

    async fn seed(h: &Harness, text: &str, customer: &str, project: &str) -> String {
        let entry = MemoryEntry::new(
            text,
            h.embedder.embed_one(text),
            "hash-v1",
            MemoryMetadata::new(customer, project, SourceType::Email),
            0.5,
        );
        h.store.insert(entry, "seed").await.unwrap()
    }

    fn scoped(customer: &str, project: &str) -> NewConversation {
        NewConversation {
            title: None,
            customer_id: Some(customer.into()),
            project_id: Some(project.into()),
        }
    }

    #[tokio::test]
    async fn completed_turn_references_retrieved_memory() {
        let h = harness(ScriptedGenerator::texts(&["They use 50mg."]), OrchestratorConfig::default());
        let fact = seed(&h, "Customer X needs 50mg of protein per assay", "X", "P1").await;
        seed(&h, "Quarterly budget review scheduled for Friday", "X", "P1").await;

        let conv = h
            .orchestrator
            .create_conversation(PersonaMode::ScientificAdvisor, scoped("X", "P1"))
            .await
            .unwrap();
        let outcome = h
            .orchestrator
            .submit_turn(&conv.id, "What dosing does Customer X use?")
            .await
            .unwrap();

        let TurnOutcome::Completed { reply, retrieved, .. } = outcome else {
            panic!("turn should complete");
        };
        assert_eq!(reply.content, "They use 50mg.");
        assert_eq!(reply.referenced_memory_ids, vec![fact.clone()]);
        assert_eq!(retrieved[0].entry.id, fact);

        let system = h.generator.system_prompt(0).unwrap();
        assert!(system.contains("scientific advisor"));
        assert!(system.contains("Customer X needs 50mg of protein per assay"));

        let saved = h.orchestrator.conversation(&conv.id).unwrap();
        assert_eq!(saved.turns.len(), 2);
        assert_eq!(saved.turns[0].content, "What dosing does Customer X use?");
        assert_eq!(h.orchestrator.turn_state(&conv.id).unwrap(), TurnState::Completed);
    }

    #[tokio::test]
    async fn persona_switch_applies_to_next_turn_only() {
        let h = harness(ScriptedGenerator::texts(&["first", "second"]), OrchestratorConfig::default());
        let conv = h
            .orchestrator
            .create_conversation(PersonaMode::ScientificAdvisor, NewConversation::default())
            .await
            .unwrap();

        h.orchestrator.submit_turn(&conv.id, "hello").await.unwrap();
        let before = h.orchestrator.conversation(&conv.id).unwrap();

        h.orchestrator.switch_persona(&conv.id, PersonaMode::DataSummary).await.unwrap();
        h.orchestrator.submit_turn(&conv.id, "summarize please").await.unwrap();

        assert!(h.generator.system_prompt(0).unwrap().contains("scientific advisor"));
        assert!(h.generator.system_prompt(1).unwrap().contains("You summarize experimental data"));

        let after = h.orchestrator.conversation(&conv.id).unwrap();
        assert_eq!(after.turns.len(), 4);
        for (old, new) in before.turns.iter().zip(&after.turns) {
            assert_eq!(old.id, new.id);
            assert_eq!(old.content, new.content);
            assert_eq!(new.persona, PersonaMode::ScientificAdvisor);
        }
        assert_eq!(after.turns[2].persona, PersonaMode::DataSummary);
        assert_eq!(after.persona_switches.len(), 1);
        assert_eq!(after.persona_switches[0].at_turn, 2);
    }

    #[tokio::test]
    async fn provider_failure_is_explicit_and_appends_nothing() {
        let generator = ScriptedGenerator::new(vec![Err(ProviderError::ApiError {
            status_code: 500,
            message: "boom".into(),
        })]);
        let h = harness(generator, OrchestratorConfig::default());
        let conv = h
            .orchestrator
            .create_conversation(PersonaMode::default(), NewConversation::default())
            .await
            .unwrap();

        let outcome = h.orchestrator.submit_turn(&conv.id, "anything").await.unwrap();
        match &outcome {
            TurnOutcome::Failed { kind, reason, .. } => {
                assert_eq!(*kind, ErrorKind::Provider);
                assert!(reason.contains("boom"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(!outcome.reply_text().is_empty());
        assert!(h.orchestrator.conversation(&conv.id).unwrap().turns.is_empty());
        assert_eq!(h.orchestrator.turn_state(&conv.id).unwrap(), TurnState::Failed);
    }

    #[tokio::test]
    async fn turns_in_one_conversation_are_serialized() {
        let generator = ScriptedGenerator::texts(&["one", "two"]).with_delay(Duration::from_millis(20));
        let h = harness(generator, OrchestratorConfig::default());
        let conv = h
            .orchestrator
            .create_conversation(PersonaMode::default(), NewConversation::default())
            .await
            .unwrap();

        let a = {
            let o = h.orchestrator.clone();
            let id = conv.id.clone();
            tokio::spawn(async move { o.submit_turn(&id, "first question").await })
        };
        let b = {
            let o = h.orchestrator.clone();
            let id = conv.id.clone();
            tokio::spawn(async move { o.submit_turn(&id, "second question").await })
        };
        assert!(a.await.unwrap().unwrap().is_completed());
        assert!(b.await.unwrap().unwrap().is_completed());

        let saved = h.orchestrator.conversation(&conv.id).unwrap();
        let roles: Vec<_> = saved.turns.iter().map(|t| t.role).collect();
        use advisor_core::conversation::Role;
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User, Role::Assistant]);
        // The second prompt saw the first exchange as history.
        let second = &h.generator.requests()[1];
        assert_eq!(second.messages.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_before_commit() {
        let generator = ScriptedGenerator::texts(&["too late"]).with_delay(Duration::from_secs(30));
        let h = harness(generator, OrchestratorConfig::default());
        let conv = h
            .orchestrator
            .create_conversation(PersonaMode::default(), NewConversation::default())
            .await
            .unwrap();

        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let err = h
            .orchestrator
            .submit_turn_with_cancel(&conv.id, "slow question", token)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(h.orchestrator.conversation(&conv.id).unwrap().turns.is_empty());
        assert_eq!(h.orchestrator.turn_state(&conv.id).unwrap(), TurnState::Idle);
    }

    #[tokio::test]
    async fn invalid_requests_are_rejected() {
        let h = harness(ScriptedGenerator::texts(&[]), OrchestratorConfig::default());
        let missing = ConversationId::from("nope");
        let err = h.orchestrator.submit_turn(&missing, "hi").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let conv = h
            .orchestrator
            .create_conversation(PersonaMode::default(), NewConversation::default())
            .await
            .unwrap();
        let err = h.orchestrator.submit_turn(&conv.id, "   ").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(h.generator.call_count(), 0);
    }

    #[tokio::test]
    async fn unknown_scope_is_rejected_on_create() {
        let h = harness(ScriptedGenerator::texts(&[]), OrchestratorConfig::default());
        let orchestrator = Arc::try_unwrap(h.orchestrator)
            .ok()
            .unwrap()
            .with_scopes(KnownScopes::new().with_project("acme", "p1"));

        assert!(orchestrator.create_conversation(PersonaMode::default(), scoped("acme", "p1")).await.is_ok());
        let err = orchestrator
            .create_conversation(PersonaMode::default(), scoped("globex", "p1"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        let project_only = NewConversation {
            project_id: Some("p1".into()),
            ..NewConversation::default()
        };
        assert!(orchestrator.create_conversation(PersonaMode::default(), project_only).await.is_err());
    }

    #[tokio::test]
    async fn candidate_facts_are_emitted_when_enabled() {
        let config = OrchestratorConfig {
            emit_candidate_facts: true,
            ..OrchestratorConfig::default()
        };
        let h = harness(ScriptedGenerator::texts(&["Use PBS buffer."]), config);
        let conv = h
            .orchestrator
            .create_conversation(PersonaMode::default(), scoped("acme", "p1"))
            .await
            .unwrap();
        h.orchestrator.submit_turn(&conv.id, "Which buffer?").await.unwrap();

        let entries = h.store.list(&ListFilters::default()).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].metadata.source_type, SourceType::Conversation);
        assert!((entries[0].trust_score - 0.3).abs() < f32::EPSILON);
        assert!(entries[0].text.contains("Use PBS buffer."));
    }

    #[tokio::test]
    async fn conversations_list_newest_first() {
        let h = harness(ScriptedGenerator::texts(&["ok"]), OrchestratorConfig::default());
        let first = h
            .orchestrator
            .create_conversation(PersonaMode::default(), NewConversation::default())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = h
            .orchestrator
            .create_conversation(PersonaMode::default(), NewConversation::default())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        h.orchestrator.submit_turn(&first.id, "bump").await.unwrap();

        let listed = h.orchestrator.list_conversations(10, 0);
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, first.id);
        assert_eq!(listed[1].id, second.id);
        assert_eq!(h.orchestrator.list_conversations(1, 1)[0].id, second.id);
        assert!(h.orchestrator.list_conversations(10, 5).is_empty());
    }

    #[tokio::test]
    async fn events_trace_the_state_machine() {
        let bus = Arc::new(EventBus::new(32));
        let mut rx = bus.subscribe();
        let h = harness(ScriptedGenerator::texts(&["ok"]), OrchestratorConfig::default());
        let orchestrator = Arc::try_unwrap(h.orchestrator).ok().unwrap().with_events(bus);
        let conv = orchestrator
            .create_conversation(PersonaMode::default(), NewConversation::default())
            .await
            .unwrap();
        orchestrator.submit_turn(&conv.id, "hi").await.unwrap();

        let mut states = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let DomainEvent::TurnStateChanged { to, .. } = &*event {
                states.push(*to);
            }
        }
        assert_eq!(
            states,
            vec![
                TurnState::AwaitingRetrieval,
                TurnState::ComposingPrompt,
                TurnState::AwaitingGeneration,
                TurnState::Completed,
            ]
        );
    }

    #[tokio::test]
    async fn persisted_conversations_restore() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conversations.json");
        let h = harness(ScriptedGenerator::texts(&["stored"]), OrchestratorConfig::default());
        let orchestrator = Arc::try_unwrap(h.orchestrator)
            .ok()
            .unwrap()
            .with_persistence(path.clone());
        let conv = orchestrator
            .create_conversation(PersonaMode::ProjectTracking, NewConversation::default())
            .await
            .unwrap();
        orchestrator.submit_turn(&conv.id, "status?").await.unwrap();

        let loaded = crate::persist::load_conversations(&path).await.unwrap();
        let fresh = harness(ScriptedGenerator::texts(&[]), OrchestratorConfig::default());
        fresh.orchestrator.restore(loaded);
        let restored = fresh.orchestrator.conversation(&conv.id).unwrap();
        assert_eq!(restored.turns.len(), 2);
        assert_eq!(restored.persona_mode, PersonaMode::ProjectTracking);
        assert_eq!(fresh.orchestrator.turn_state(&conv.id).unwrap(), TurnState::Idle);
    }

    #[tokio::test]
    async fn deleted_conversation_is_gone_from_memory_and_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conversations.json");
        let h = harness(ScriptedGenerator::texts(&["kept", "dropped"]), OrchestratorConfig::default());
        let orchestrator = Arc::try_unwrap(h.orchestrator)
            .ok()
            .unwrap()
            .with_persistence(path.clone());
        let keep = orchestrator
            .create_conversation(PersonaMode::ScientificAdvisor, NewConversation::default())
            .await
            .unwrap();
        let gone = orchestrator
            .create_conversation(PersonaMode::ScientificAdvisor, NewConversation::default())
            .await
            .unwrap();
        orchestrator.submit_turn(&keep.id, "first").await.unwrap();
        orchestrator.submit_turn(&gone.id, "second").await.unwrap();

        orchestrator.delete_conversation(&gone.id).await.unwrap();

        assert_eq!(orchestrator.conversation(&gone.id).unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(orchestrator.turn_state(&gone.id).unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(orchestrator.list_conversations(10, 0).len(), 1);
        assert!(orchestrator.submit_turn(&gone.id, "again").await.is_err());
        assert_eq!(
            orchestrator.delete_conversation(&gone.id).await.unwrap_err().kind(),
            ErrorKind::NotFound
        );

        let saved = crate::persist::load_conversations(&path).await.unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].id, keep.id);
    }
}
