//! End-to-end scenarios across the Advisor crates.
//!
//! Each test wires the real store, pipeline, retrieval engine, curation
//! controller and orchestrator together, with scripted model providers.

use std::sync::Arc;
use std::time::Duration;

use advisor_config::{AppConfig, CurationConfig, IngestionConfig, OrchestratorConfig, RetrievalConfig};
use advisor_core::audit::AuditOperation;
use advisor_core::conversation::NewConversation;
use advisor_core::error::{MemoryError, ProviderError};
use advisor_core::ingestion::JobStatus;
use advisor_core::memory::{
    EmbeddingModel, ListFilters, MemoryStore, MemoryUpdate, SearchFilters, SourceType,
};
use advisor_core::persona::PersonaMode;
use advisor_core::provider::{EmbeddingProvider, GenerativeProvider};
use advisor_curation::CurationController;
use advisor_agent::{GenerationSettings, Orchestrator, TurnOutcome};
use advisor_ingest::{Chunk, IngestRequest, IngestionPipeline, NewMemory, normalize, reconstruct};
use advisor_memory::InMemoryStore;
use advisor_providers::mock::{FlakyEmbedder, ScriptedGenerator, text_response};
use advisor_providers::{HashEmbedder, RetryPolicy, RetryingEmbedder, RetryingGenerator};
use advisor_retrieval::{RetrievalEngine, RetrievalScope};
use advisor_security::AuditLog;

const MODEL: &str = "hash-v1";
const DIMS: usize = 384;

// ── Harness ──────────────────────────────────────────────────────────────

struct System {
    store: Arc<InMemoryStore>,
    hash: HashEmbedder,
    ingestion: Arc<IngestionPipeline>,
    retrieval: Arc<RetrievalEngine>,
    curation: CurationController,
}

fn system() -> System {
    system_with(Arc::new(HashEmbedder::new(MODEL, DIMS)), IngestionConfig::default())
}

fn system_with(embedder: Arc<dyn EmbeddingProvider>, ingestion: IngestionConfig) -> System {
    let store = Arc::new(InMemoryStore::new(EmbeddingModel::new(MODEL, DIMS)));
    let query_embedder: Arc<dyn EmbeddingProvider> = Arc::new(HashEmbedder::new(MODEL, DIMS));
    System {
        store: store.clone(),
        hash: HashEmbedder::new(MODEL, DIMS),
        ingestion: Arc::new(IngestionPipeline::new(store.clone(), embedder, &ingestion)),
        retrieval: Arc::new(RetrievalEngine::new(
            store.clone(),
            query_embedder.clone(),
            RetrievalConfig::default(),
        )),
        curation: CurationController::new(store, query_embedder, CurationConfig::default()),
    }
}

fn orchestrator(sys: &System, generator: Arc<dyn GenerativeProvider>) -> Orchestrator {
    let settings = GenerationSettings {
        model: "test-model".into(),
        temperature: 0.2,
        max_tokens: Some(256),
        stream: false,
    };
    Orchestrator::new(sys.retrieval.clone(), generator, settings, OrchestratorConfig::default())
        .with_personas(AppConfig::default().persona_catalog())
        .with_ingestion(sys.ingestion.clone())
}

fn scoped(customer: &str, project: &str) -> NewConversation {
    NewConversation {
        title: Some("dosing".into()),
        customer_id: Some(customer.into()),
        project_id: Some(project.into()),
    }
}

fn document() -> String {
    let mut doc = String::new();
    for i in 0..30 {
        doc.push_str(&format!(
            "Assay {i} measured a protein yield of {} mg per litre under the standard protocol. ",
            40 + i
        ));
        if i % 6 == 5 {
            doc.push('\n');
        }
    }
    doc
}

fn fast_retries() -> RetryPolicy {
    RetryPolicy {
        max_retries: 3,
        initial_backoff: Duration::from_millis(100),
        max_backoff: Duration::from_secs(2),
        multiplier: 2.0,
        timeout: Duration::from_secs(5),
    }
}

fn all_for(customer: &str) -> ListFilters {
    ListFilters {
        filters: SearchFilters::for_customer(customer),
        limit: 1000,
        ..Default::default()
    }
}

// ── Ingestion ────────────────────────────────────────────────────────────

async fn ingest_and_stitch(chunk_size: usize, chunk_overlap: usize) {
    let config = IngestionConfig {
        chunk_size,
        chunk_overlap,
        ..Default::default()
    };
    let sys = system_with(Arc::new(HashEmbedder::new(MODEL, DIMS)), config);
    let doc = document();

    let job = sys
        .ingestion
        .ingest(
            IngestRequest::new(&doc, "acme", "p1", SourceType::Document).with_source_ref("report.txt"),
            "tester",
        )
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Committed);

    let mut stored = sys.store.list(&all_for("acme")).await.unwrap();
    stored.sort_by_key(|e| e.metadata.chunk_index);
    assert!(stored.len() > 3);
    assert_eq!(job.entry_ids.len(), stored.len());

    let pieces: Vec<Chunk> = stored
        .iter()
        .map(|entry| {
            assert_eq!(entry.metadata.source_ref.as_deref(), Some("report.txt"));
            assert_eq!(entry.version, 1);
            let (start, end) = entry.metadata.chunk_span.unwrap();
            assert_eq!(end - start, entry.text.len());
            Chunk {
                index: entry.metadata.chunk_index.unwrap(),
                start,
                end,
                text: entry.text.clone(),
            }
        })
        .collect();

    assert_eq!(reconstruct(&pieces), normalize(&doc));
}

#[tokio::test]
async fn ingested_chunks_cover_the_source_document() {
    ingest_and_stitch(200, 40).await;
}

#[tokio::test]
async fn ingested_chunks_without_overlap_keep_sentence_spacing() {
    ingest_and_stitch(200, 0).await;
}

#[tokio::test]
async fn added_memory_is_stored_verbatim() {
    let sys = system();
    let text = "  Buffer pH must stay at 7.4\n(confirmed by the lab)  ";

    let added = sys
        .ingestion
        .add_memory(NewMemory::new(text, "acme", "p1"), "tester")
        .await
        .unwrap();

    let listed = sys.store.list(&all_for("acme")).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, added.id);
    assert_eq!(listed[0].text, text);
    assert_eq!(listed[0].version, 1);
    assert_eq!(listed[0].metadata.source_type, SourceType::Manual);
    assert_eq!(listed[0].trust_score, IngestionConfig::default().manual_trust);
}

// ── Search & curation ────────────────────────────────────────────────────

#[tokio::test]
async fn search_is_bounded_and_skips_deleted_entries() {
    let config = IngestionConfig {
        chunk_size: 200,
        chunk_overlap: 40,
        ..Default::default()
    };
    let sys = system_with(Arc::new(HashEmbedder::new(MODEL, DIMS)), config);
    let job = sys
        .ingestion
        .ingest(IngestRequest::new(document(), "acme", "p1", SourceType::Document), "tester")
        .await
        .unwrap();
    let deleted = job.entry_ids[0].clone();
    sys.curation.delete_entry(&deleted, "obsolete", "tester").await.unwrap();

    let query = sys.hash.embed_one("protein yield per litre");
    let filters = SearchFilters::for_customer("acme");

    let top = sys.store.search(&query, &filters, 3).await.unwrap();
    assert_eq!(top.len(), 3);

    let everything = sys.store.search(&query, &filters, 1000).await.unwrap();
    assert_eq!(everything.len(), job.entry_ids.len() - 1);
    assert!(everything.iter().all(|hit| hit.entry.id != deleted));
    assert!(everything.iter().all(|hit| hit.entry.tombstone.is_none()));
}

#[tokio::test]
async fn memory_search_ranks_within_the_requested_scope() {
    let sys = system();
    let fact = "Buffer pH must stay at 7.4 during the assay";
    let mine = sys
        .ingestion
        .add_memory(NewMemory::new(fact, "acme", "p1"), "tester")
        .await
        .unwrap();
    for text in ["Protein yield was 3.2 mg per litre", "The buffer is stored at 4C"] {
        sys.ingestion.add_memory(NewMemory::new(text, "acme", "p1"), "tester").await.unwrap();
    }
    sys.ingestion
        .add_memory(NewMemory::new(fact, "globex", "p1"), "tester")
        .await
        .unwrap();

    let scope = RetrievalScope::new(SearchFilters::for_customer("acme").with_project("p1")).with_top_k(2);
    let result = sys.retrieval.retrieve(fact, &scope).await.unwrap();

    assert!(!result.items.is_empty() && result.items.len() <= 2);
    assert_eq!(result.items[0].entry.id, mine.id);
    assert!(result.items.iter().all(|item| item.entry.metadata.customer_id == "acme"));
    assert!(result.items.windows(2).all(|w| w[0].score >= w[1].score));
}

#[tokio::test]
async fn correction_replaces_the_fact_in_search() {
    let sys = system();
    let old = sys
        .ingestion
        .add_memory(
            NewMemory::new("Customer X needs 50mg of protein per assay", "X", "P1"),
            "tester",
        )
        .await
        .unwrap();

    let new_text = "Customer X needs 75mg of protein per assay";
    let new_id = sys.curation.correct_entry(&old.id, 1, new_text, "reviewer").await.unwrap();

    let head = sys.store.resolve(&old.id).await.unwrap().unwrap();
    assert_eq!(head.id, new_id);
    assert_eq!(head.version, 2);
    assert_eq!(head.text, new_text);

    let previous = sys.store.get(&old.id).await.unwrap().unwrap();
    assert_eq!(previous.superseded_by.as_deref(), Some(new_id.as_str()));

    let hits = sys
        .store
        .search(&sys.hash.embed_one(new_text), &SearchFilters::for_customer("X"), 10)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].entry.id, new_id);

    let history = sys.store.history(&new_id).await.unwrap();
    assert_eq!(history.len(), 2);
}

#[tokio::test]
async fn concurrent_updates_of_one_version_conflict_once() {
    let sys = system();
    let entry = sys
        .ingestion
        .add_memory(NewMemory::new("Incubate for 12 hours", "acme", "p1"), "tester")
        .await
        .unwrap();

    let update = |text: &str| MemoryUpdate {
        text: Some(text.to_string()),
        embedding: Some(sys.hash.embed_one(text)),
        ..Default::default()
    };
    let (a, b) = tokio::join!(
        sys.store.update(&entry.id, 1, update("Incubate for 10 hours"), "alice"),
        sys.store.update(&entry.id, 1, update("Incubate for 14 hours"), "bob"),
    );

    let results = [a.as_ref(), b.as_ref()];
    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(MemoryError::Conflict { .. })))
        .count();
    assert_eq!(succeeded, 1);
    assert_eq!(conflicts, 1);

    let head = sys.store.resolve(&entry.id).await.unwrap().unwrap();
    assert_eq!(head.version, 2);
}

#[tokio::test]
async fn privacy_deletion_is_recorded_in_exported_audit() {
    let sys = system();
    let entry = sys
        .ingestion
        .add_memory(NewMemory::new("Dr. Rivera prefers morning calls", "acme", "p1"), "tester")
        .await
        .unwrap();

    sys.curation.delete_entry(&entry.id, "privacy", "dpo").await.unwrap();

    let hits = sys
        .store
        .search(&sys.hash.embed_one("morning calls"), &SearchFilters::for_customer("acme"), 10)
        .await
        .unwrap();
    assert!(hits.is_empty());

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.jsonl");
    let written = sys.store.audit().export_jsonl(&path).unwrap();

    let records = AuditLog::read_jsonl(&path).unwrap();
    assert_eq!(records.len(), written);
    let ops: Vec<_> = records
        .iter()
        .filter(|r| r.entry_id == entry.id)
        .map(|r| (r.operation.clone(), r.actor.clone()))
        .collect();
    assert_eq!(ops[0], (AuditOperation::Insert, "tester".to_string()));
    assert_eq!(
        ops[1],
        (AuditOperation::Tombstone { reason: "privacy".into() }, "dpo".to_string())
    );
}

// ── Conversations ────────────────────────────────────────────────────────

#[tokio::test]
async fn dosing_question_is_answered_from_ingested_notes() {
    let sys = system();
    let fact = sys
        .ingestion
        .ingest(
            IngestRequest::new("Customer X needs 50mg of protein per assay", "X", "P1", SourceType::Email),
            "tester",
        )
        .await
        .unwrap();
    sys.ingestion
        .ingest(
            IngestRequest::new("Quarterly budget review scheduled for Friday", "X", "P1", SourceType::MeetingNotes),
            "tester",
        )
        .await
        .unwrap();

    let generator = Arc::new(ScriptedGenerator::texts(&["Customer X uses 50mg per assay."]));
    let orchestrator = orchestrator(&sys, generator.clone());
    let conv = orchestrator
        .create_conversation(PersonaMode::ScientificAdvisor, scoped("X", "P1"))
        .await
        .unwrap();

    let outcome = orchestrator
        .submit_turn(&conv.id, "What dosing does Customer X use?")
        .await
        .unwrap();

    let TurnOutcome::Completed { reply, retrieved, .. } = outcome else {
        panic!("turn should complete");
    };
    assert_eq!(reply.content, "Customer X uses 50mg per assay.");
    assert_eq!(reply.referenced_memory_ids, fact.entry_ids);
    assert_eq!(retrieved[0].entry.text, "Customer X needs 50mg of protein per assay");
    assert!(retrieved[0].similarity >= RetrievalConfig::default().similarity_threshold);

    let system_prompt = generator.system_prompt(0).unwrap();
    assert!(system_prompt.contains("Customer X needs 50mg of protein per assay"));
    assert!(!system_prompt.contains("Quarterly budget review"));
}

#[tokio::test]
async fn persona_switch_changes_the_next_prompt() {
    let sys = system();
    let generator = Arc::new(ScriptedGenerator::texts(&["first", "second"]));
    let orchestrator = orchestrator(&sys, generator.clone());
    let conv = orchestrator
        .create_conversation(PersonaMode::ScientificAdvisor, NewConversation::default())
        .await
        .unwrap();

    orchestrator.submit_turn(&conv.id, "What changed this week?").await.unwrap();
    orchestrator.switch_persona(&conv.id, PersonaMode::DataSummary).await.unwrap();
    orchestrator.submit_turn(&conv.id, "Summarize it").await.unwrap();

    assert!(generator.system_prompt(0).unwrap().contains("scientific advisor"));
    assert!(generator.system_prompt(1).unwrap().contains("You summarize experimental data"));

    let saved = orchestrator.conversation(&conv.id).unwrap();
    assert_eq!(saved.turns.len(), 4);
    assert_eq!(saved.turns[0].persona, PersonaMode::ScientificAdvisor);
    assert_eq!(saved.turns[3].persona, PersonaMode::DataSummary);
    assert_eq!(saved.persona_switches.len(), 1);
}

// ── Provider retries ─────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn ingestion_survives_two_embedding_timeouts() {
    let flaky = Arc::new(FlakyEmbedder::new(
        Arc::new(HashEmbedder::new(MODEL, DIMS)),
        2,
        ProviderError::Timeout("slow".into()),
    ));
    let embedder = Arc::new(RetryingEmbedder::new(flaky.clone(), fast_retries()));
    let sys = system_with(embedder, IngestionConfig::default());

    let job = sys
        .ingestion
        .ingest(IngestRequest::new("Stability study passed at 40C", "acme", "p1", SourceType::Document), "tester")
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Committed);
    assert_eq!(job.embedding_batches, 1);
    assert_eq!(flaky.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn turn_survives_two_transient_generation_errors() {
    let sys = system();
    let scripted = Arc::new(ScriptedGenerator::new(vec![
        Err(ProviderError::Network("connection reset".into())),
        Err(ProviderError::ApiError { status_code: 503, message: "busy".into() }),
        Ok(text_response("recovered")),
    ]));
    let generator = Arc::new(RetryingGenerator::new(scripted.clone(), fast_retries()));
    let orchestrator = orchestrator(&sys, generator);
    let conv = orchestrator
        .create_conversation(PersonaMode::default(), NewConversation::default())
        .await
        .unwrap();

    let outcome = orchestrator.submit_turn(&conv.id, "Status update?").await.unwrap();

    assert!(outcome.is_completed());
    assert_eq!(outcome.reply_text(), "recovered");
    assert_eq!(scripted.call_count(), 3);
    assert_eq!(orchestrator.conversation(&conv.id).unwrap().turns.len(), 2);
}
