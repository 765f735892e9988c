//! `advisor status`: Show configuration and store status.

use advisor_config::AppConfig;
use advisor_core::memory::MemoryStore;
use advisor_core::provider::EmbeddingProvider;
use std::path::Path;

use crate::runtime::{Runtime, load_config};

pub async fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path)?;

    println!("🔬 Advisor Status");
    println!("=================");
    println!("  Config dir:   {}", AppConfig::config_dir().display());
    println!("  Data dir:     {}", config.data_dir().display());
    println!(
        "  Embeddings:   {} / {} ({} dims)",
        config.embedding.provider, config.embedding.model, config.embedding.dimensions
    );
    println!("  Generation:   {} / {}", config.generation.provider, config.generation.model);
    println!("  API key:      {}", if config.has_api_key() { "configured" } else { "not set" });
    println!(
        "  Retrieval:    top_k={} threshold={:.2} weights α={:.2} β={:.2} γ={:.2}",
        config.retrieval.top_k,
        config.retrieval.similarity_threshold,
        config.retrieval.alpha,
        config.retrieval.beta,
        config.retrieval.gamma
    );
    println!("  Privacy:      {}", if config.privacy.enabled { "enabled" } else { "disabled" });

    let runtime = Runtime::open(config).await?;
    let stats = runtime.store.stats().await?;
    println!("  Memory:       {} current, {} versions total", stats.current, stats.total_versions);
    println!("  Audit:        {} records", stats.audit_records);

    match runtime.embedder.health_check().await {
        Ok(true) => println!("\n  ✅ Embedding provider reachable"),
        Ok(false) => println!("\n  ⚠️  Embedding provider reported unhealthy"),
        Err(e) => println!("\n  ⚠️  Embedding provider check failed: {e}"),
    }

    Ok(())
}
