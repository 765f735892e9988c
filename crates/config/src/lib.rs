//! Configuration loading, validation, and management for Advisor.
//!
//! Loads configuration from `~/.advisor/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use advisor_core::persona::{PersonaCatalog, PersonaMode, PersonaOverride};
use advisor_core::scope::KnownScopes;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.advisor/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Shared API key, used by any provider section without its own key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub ingestion: IngestionConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    #[serde(default)]
    pub curation: CurationConfig,

    #[serde(default)]
    pub privacy: PrivacyConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    /// Known customers and projects
    #[serde(default)]
    pub customers: CustomersConfig,

    /// Per-persona overrides keyed by persona name (e.g. `data_summary`)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub personas: BTreeMap<String, PersonaOverride>,
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("embedding", &self.embedding)
            .field("generation", &self.generation)
            .field("ingestion", &self.ingestion)
            .field("retrieval", &self.retrieval)
            .field("orchestrator", &self.orchestrator)
            .field("curation", &self.curation)
            .field("privacy", &self.privacy)
            .field("storage", &self.storage)
            .field("customers", &self.customers)
            .field("personas", &self.personas)
            .finish()
    }
}

/// Bounded retry with exponential backoff for one call class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub multiplier: f64,
}

fn default_max_retries() -> u32 {
    3
}
fn default_initial_backoff_ms() -> u64 {
    500
}
fn default_max_backoff_ms() -> u64 {
    10_000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_backoff_multiplier(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// "hash" (built-in, offline), "openai", "openrouter", or "ollama"
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_embedding_dimensions")]
    pub dimensions: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_embedding_provider() -> String {
    "hash".into()
}
fn default_embedding_model() -> String {
    "hash-v1".into()
}
fn default_embedding_dimensions() -> usize {
    384
}
fn default_embedding_timeout() -> u64 {
    30
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            dimensions: default_embedding_dimensions(),
            api_url: None,
            api_key: None,
            timeout_secs: default_embedding_timeout(),
            retry: RetryConfig::default(),
        }
    }
}

impl std::fmt::Debug for EmbeddingConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("dimensions", &self.dimensions)
            .field("api_url", &self.api_url)
            .field("api_key", &redact(&self.api_key))
            .field("timeout_secs", &self.timeout_secs)
            .field("retry", &self.retry)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// "openai", "openrouter", or "ollama"
    #[serde(default = "default_generation_provider")]
    pub provider: String,

    #[serde(default = "default_generation_model")]
    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Consume the provider's streaming endpoint
    #[serde(default)]
    pub stream: bool,

    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_generation_provider() -> String {
    "ollama".into()
}
fn default_generation_model() -> String {
    "llama3:8b".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_generation_timeout() -> u64 {
    120
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: default_generation_model(),
            api_url: None,
            api_key: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            stream: false,
            timeout_secs: default_generation_timeout(),
            retry: RetryConfig::default(),
        }
    }
}

impl std::fmt::Debug for GenerationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_url", &self.api_url)
            .field("api_key", &redact(&self.api_key))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("stream", &self.stream)
            .field("timeout_secs", &self.timeout_secs)
            .field("retry", &self.retry)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    /// Target chunk length in characters
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// Chunks per embedding request
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Initial trust for ingested chunks
    #[serde(default = "default_ingested_trust")]
    pub ingested_trust: f32,

    /// Initial trust for manually added entries
    #[serde(default = "default_manual_trust")]
    pub manual_trust: f32,
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}
fn default_batch_size() -> usize {
    32
}
fn default_ingested_trust() -> f32 {
    0.5
}
fn default_manual_trust() -> f32 {
    0.8
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            batch_size: default_batch_size(),
            ingested_trust: default_ingested_trust(),
            manual_trust: default_manual_trust(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Maximum entries handed to the prompt
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Entries fetched from the store before dedup and rerank
    #[serde(default = "default_candidate_pool")]
    pub candidate_pool: usize,

    /// Candidates below this cosine similarity are dropped
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,

    /// Pairs above this similarity are collapsed into one
    #[serde(default = "default_dedup_threshold")]
    pub dedup_threshold: f32,

    /// Weight on similarity (α)
    #[serde(default = "default_alpha")]
    pub alpha: f32,

    /// Weight on trust (β)
    #[serde(default = "default_beta")]
    pub beta: f32,

    /// Weight on recency (γ)
    #[serde(default = "default_gamma")]
    pub gamma: f32,

    #[serde(default = "default_half_life_days")]
    pub recency_half_life_days: f64,

    /// Token budget for the formatted memory section
    #[serde(default = "default_retrieval_budget")]
    pub token_budget: usize,
}

fn default_top_k() -> usize {
    5
}
fn default_candidate_pool() -> usize {
    20
}
fn default_similarity_threshold() -> f32 {
    0.25
}
fn default_dedup_threshold() -> f32 {
    0.95
}
fn default_alpha() -> f32 {
    0.6
}
fn default_beta() -> f32 {
    0.25
}
fn default_gamma() -> f32 {
    0.15
}
fn default_half_life_days() -> f64 {
    90.0
}
fn default_retrieval_budget() -> usize {
    1500
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            candidate_pool: default_candidate_pool(),
            similarity_threshold: default_similarity_threshold(),
            dedup_threshold: default_dedup_threshold(),
            alpha: default_alpha(),
            beta: default_beta(),
            gamma: default_gamma(),
            recency_half_life_days: default_half_life_days(),
            token_budget: default_retrieval_budget(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Prior turns included in the prompt
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// Overall prompt budget; history is trimmed oldest-first to fit
    #[serde(default = "default_prompt_budget")]
    pub prompt_token_budget: usize,

    /// Feed a summary of each completed turn back into ingestion
    #[serde(default)]
    pub emit_candidate_facts: bool,

    #[serde(default = "default_candidate_trust")]
    pub candidate_trust: f32,
}

fn default_history_window() -> usize {
    10
}
fn default_prompt_budget() -> usize {
    6000
}
fn default_candidate_trust() -> f32 {
    0.3
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            history_window: default_history_window(),
            prompt_token_budget: default_prompt_budget(),
            emit_candidate_facts: false,
            candidate_trust: default_candidate_trust(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurationConfig {
    /// Fraction of the remaining distance to 1.0 added on confirm
    #[serde(default = "default_confirm_step")]
    pub confirm_step: f32,

    /// Trust assigned to a corrected version
    #[serde(default = "default_neutral_trust")]
    pub neutral_trust: f32,
}

fn default_confirm_step() -> f32 {
    0.5
}
fn default_neutral_trust() -> f32 {
    0.5
}

impl Default for CurationConfig {
    fn default() -> Self {
        Self {
            confirm_step: default_confirm_step(),
            neutral_trust: default_neutral_trust(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivacyConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Extra regexes; a match rejects the document
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocked_patterns: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            blocked_patterns: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for persisted state; defaults to the config directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    #[serde(default = "default_snapshot_file")]
    pub snapshot_file: String,

    #[serde(default = "default_audit_file")]
    pub audit_file: String,

    #[serde(default = "default_conversations_file")]
    pub conversations_file: String,
}

fn default_snapshot_file() -> String {
    "memory.jsonl".into()
}
fn default_audit_file() -> String {
    "audit.jsonl".into()
}
fn default_conversations_file() -> String {
    "conversations.json".into()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            snapshot_file: default_snapshot_file(),
            audit_file: default_audit_file(),
            conversations_file: default_conversations_file(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomersConfig {
    /// Accept ids that are not listed below
    #[serde(default)]
    pub allow_unregistered: bool,

    /// customer id → project ids
    #[serde(default)]
    pub projects: BTreeMap<String, Vec<String>>,
}

impl AppConfig {
    /// Load configuration from the default path (`$ADVISOR_HOME/config.toml`,
    /// falling back to `~/.advisor/config.toml`).
    ///
    /// Environment overrides:
    /// - `ADVISOR_API_KEY` (highest priority), then `OPENAI_API_KEY`
    /// - `ADVISOR_MODEL` for the generation model
    /// - `ADVISOR_EMBEDDING_MODEL` for the embedding model
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("ADVISOR_API_KEY").or_else(|| lookup("OPENAI_API_KEY")) {
            self.api_key = Some(key);
        }
        if let Some(model) = lookup("ADVISOR_MODEL") {
            self.generation.model = model;
        }
        if let Some(model) = lookup("ADVISOR_EMBEDDING_MODEL") {
            self.embedding.model = model;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        match std::env::var("ADVISOR_HOME") {
            Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => dirs_home().join(".advisor"),
        }
    }

    /// Directory holding the snapshot, audit log and conversations.
    pub fn data_dir(&self) -> PathBuf {
        self.storage.data_dir.clone().unwrap_or_else(Self::config_dir)
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir().join(&self.storage.snapshot_file)
    }

    pub fn audit_path(&self) -> PathBuf {
        self.data_dir().join(&self.storage.audit_file)
    }

    pub fn conversations_path(&self) -> PathBuf {
        self.data_dir().join(&self.storage.conversations_file)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn unit(name: &str, v: f32) -> Result<(), ConfigError> {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(ConfigError::ValidationError(format!("{name} must be between 0.0 and 1.0")))
            }
        }

        let g = &self.generation;
        if g.temperature < 0.0 || g.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "generation.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.embedding.dimensions == 0 {
            return Err(ConfigError::ValidationError("embedding.dimensions must be > 0".into()));
        }

        let i = &self.ingestion;
        if i.chunk_size == 0 {
            return Err(ConfigError::ValidationError("ingestion.chunk_size must be > 0".into()));
        }
        if i.chunk_overlap >= i.chunk_size {
            return Err(ConfigError::ValidationError(
                "ingestion.chunk_overlap must be smaller than chunk_size".into(),
            ));
        }
        if i.batch_size == 0 {
            return Err(ConfigError::ValidationError("ingestion.batch_size must be > 0".into()));
        }
        unit("ingestion.ingested_trust", i.ingested_trust)?;
        unit("ingestion.manual_trust", i.manual_trust)?;

        let r = &self.retrieval;
        if r.alpha < 0.0 || r.beta < 0.0 || r.gamma < 0.0 {
            return Err(ConfigError::ValidationError(
                "retrieval weights must be non-negative".into(),
            ));
        }
        if r.alpha + r.beta + r.gamma <= 0.0 {
            return Err(ConfigError::ValidationError(
                "alpha + beta + gamma must be > 0".into(),
            ));
        }
        unit("retrieval.similarity_threshold", r.similarity_threshold)?;
        unit("retrieval.dedup_threshold", r.dedup_threshold)?;
        if r.recency_half_life_days <= 0.0 {
            return Err(ConfigError::ValidationError(
                "retrieval.recency_half_life_days must be > 0".into(),
            ));
        }
        if r.top_k == 0 {
            return Err(ConfigError::ValidationError("retrieval.top_k must be > 0".into()));
        }

        unit("orchestrator.candidate_trust", self.orchestrator.candidate_trust)?;
        unit("curation.confirm_step", self.curation.confirm_step)?;
        unit("curation.neutral_trust", self.curation.neutral_trust)?;

        for name in self.personas.keys() {
            name.parse::<PersonaMode>().map_err(ConfigError::ValidationError)?;
        }

        for pattern in &self.privacy.blocked_patterns {
            regex_lite::Regex::new(pattern).map_err(|e| {
                ConfigError::ValidationError(format!("invalid privacy pattern '{pattern}': {e}"))
            })?;
        }

        Ok(())
    }

    /// API key for embeddings: section key, then the shared key.
    pub fn embedding_api_key(&self) -> Option<&str> {
        self.embedding.api_key.as_deref().or(self.api_key.as_deref())
    }

    /// API key for generation: section key, then the shared key.
    pub fn generation_api_key(&self) -> Option<&str> {
        self.generation.api_key.as_deref().or(self.api_key.as_deref())
    }

    pub fn has_api_key(&self) -> bool {
        self.generation_api_key().is_some()
    }

    /// The customer/project directory.
    pub fn known_scopes(&self) -> KnownScopes {
        let mut scopes = if self.customers.allow_unregistered {
            KnownScopes::open()
        } else {
            KnownScopes::new()
        };
        for (customer, projects) in &self.customers.projects {
            for project in projects {
                scopes.register(customer, project);
            }
        }
        scopes
    }

    /// Built-in personas with configured overrides applied.
    /// Unknown persona names are skipped; `validate` reports them.
    pub fn persona_catalog(&self) -> PersonaCatalog {
        let overrides: HashMap<PersonaMode, PersonaOverride> = self
            .personas
            .iter()
            .filter_map(|(name, o)| name.parse().ok().map(|mode| (mode, o.clone())))
            .collect();
        PersonaCatalog::with_overrides(&overrides)
    }

    /// Generate a default config TOML string (for the `onboard` command).
    pub fn default_toml() -> String {
        let mut config = Self::default();
        config
            .customers
            .projects
            .insert("example-customer".into(), vec!["example-project".into()]);
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
            ingestion: IngestionConfig::default(),
            retrieval: RetrievalConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            curation: CurationConfig::default(),
            privacy: PrivacyConfig::default(),
            storage: StorageConfig::default(),
            customers: CustomersConfig::default(),
            personas: BTreeMap::new(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
