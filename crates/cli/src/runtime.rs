//! Wires the components together from configuration.

use advisor_config::AppConfig;
use advisor_core::event::EventBus;
use advisor_core::memory::MemoryStore;
use advisor_core::provider::EmbeddingProvider;
use advisor_curation::CurationController;
use advisor_ingest::IngestionPipeline;
use advisor_memory::InMemoryStore;
use advisor_retrieval::RetrievalEngine;
use advisor_security::{AuditLog, AuditSink, JsonlFileSink, PrivacyFilter, TracingSink};
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Load config from `path`, or from the default location.
pub fn load_config(path: Option<&Path>) -> CliResult<AppConfig> {
    let config = match path {
        Some(path) => {
            let mut config = AppConfig::load_from(path)?;
            config.apply_env(|key| std::env::var(key).ok());
            config.validate()?;
            config
        }
        None => AppConfig::load()?,
    };
    Ok(config)
}

/// Everything a command needs, loaded from the data directory.
pub struct Runtime {
    pub config: AppConfig,
    pub store: Arc<InMemoryStore>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub events: Arc<EventBus>,
    pub ingestion: Arc<IngestionPipeline>,
    pub retrieval: Arc<RetrievalEngine>,
    pub curation: CurationController,
}

impl Runtime {
    pub async fn open(config: AppConfig) -> CliResult<Self> {
        let embedder = advisor_providers::build_embedder(&config)?;

        let audit_path = config.audit_path();
        let previous = AuditLog::read_jsonl(&audit_path)?;
        let sinks: Vec<Box<dyn AuditSink>> =
            vec![Box::new(JsonlFileSink::open(&audit_path)?), Box::new(TracingSink)];
        let audit = Arc::new(AuditLog::with_sinks(sinks));
        audit.restore(previous);

        let (store, report) =
            InMemoryStore::load_snapshot(&config.snapshot_path(), embedder.model(), audit).await?;
        for (line, problem) in &report.skipped {
            warn!(line, error = %problem, "Skipped memory snapshot line");
        }
        if !report.relinked.is_empty() {
            warn!(entries = ?report.relinked, "Restored entries whose newer version was lost");
        }
        let store = Arc::new(store);

        let events = Arc::new(EventBus::default());
        let privacy = Arc::new(PrivacyFilter::from_config(&config.privacy));
        let dyn_store: Arc<dyn MemoryStore> = store.clone();

        let ingestion = Arc::new(
            IngestionPipeline::new(dyn_store.clone(), embedder.clone(), &config.ingestion)
                .with_privacy(privacy.clone())
                .with_scopes(config.known_scopes())
                .with_events(events.clone()),
        );
        let retrieval = Arc::new(RetrievalEngine::new(
            dyn_store.clone(),
            embedder.clone(),
            config.retrieval.clone(),
        ));
        let curation = CurationController::new(dyn_store, embedder.clone(), config.curation.clone())
            .with_privacy(privacy)
            .with_events(events.clone());

        Ok(Self {
            config,
            store,
            embedder,
            events,
            ingestion,
            retrieval,
            curation,
        })
    }

    /// Write the memory snapshot back to disk.
    pub async fn save(&self) -> CliResult<()> {
        self.store.save_snapshot(&self.config.snapshot_path()).await?;
        Ok(())
    }
}
