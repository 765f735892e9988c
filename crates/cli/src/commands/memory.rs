//! `advisor memory`: Memory management commands.

use advisor_core::memory::{ListFilters, MemoryEntry, MemoryStore, SearchFilters};
use advisor_ingest::NewMemory;
use advisor_retrieval::RetrievalScope;
use std::path::Path;

use crate::MemoryCommand;
use crate::runtime::{CliResult, Runtime, load_config};

pub async fn run(config_path: Option<&Path>, actor: &str, command: MemoryCommand) -> CliResult<()> {
    let runtime = Runtime::open(load_config(config_path)?).await?;

    match command {
        MemoryCommand::List {
            customer,
            project,
            limit,
            offset,
            history,
            tombstoned,
            stale,
        } => {
            let filters = ListFilters {
                filters: SearchFilters {
                    customer_id: customer,
                    project_id: project,
                    ..Default::default()
                },
                limit,
                offset,
                include_history: history,
                include_tombstoned: tombstoned,
                stale_only: stale,
            };
            let entries = runtime.store.list(&filters).await?;
            if entries.is_empty() {
                println!("No memory entries match.");
            }
            for entry in &entries {
                print_summary(entry);
            }
        }

        MemoryCommand::Add {
            text,
            customer,
            project,
            tags,
            trust,
        } => {
            let mut memory = NewMemory::new(text, customer, project);
            memory.persona_tags = tags;
            memory.trust_score = trust;
            let entry = runtime.ingestion.add_memory(memory, actor).await?;
            runtime.save().await?;
            println!("✅ Added {} (trust {:.2})", entry.id, entry.trust_score);
        }

        MemoryCommand::Update { id, version, text } => {
            let new_id = runtime.curation.correct_entry(&id, version, &text, actor).await?;
            runtime.save().await?;
            println!("✅ {id} superseded by {new_id}");
        }

        MemoryCommand::Delete { id, reason } => {
            runtime.curation.delete_entry(&id, &reason, actor).await?;
            runtime.save().await?;
            println!("🗑️  Deleted {id}");
        }

        MemoryCommand::Confirm { id } => {
            let trust = runtime.curation.confirm_entry(&id, actor).await?;
            runtime.save().await?;
            println!("👍 {id} trust is now {trust:.2}");
        }

        MemoryCommand::Stale { id } => {
            runtime.curation.report_stale(&id, actor).await?;
            runtime.save().await?;
            println!("🕰️  {id} flagged for re-verification");
        }

        MemoryCommand::Get { id, history } => {
            if history {
                let versions = runtime.store.history(&id).await?;
                if versions.is_empty() {
                    return Err(format!("memory entry {id} not found").into());
                }
                for entry in &versions {
                    print_detail(entry);
                    println!();
                }
            } else {
                match runtime.store.get(&id).await? {
                    Some(entry) => print_detail(&entry),
                    None => return Err(format!("memory entry {id} not found").into()),
                }
            }
        }

        MemoryCommand::Search {
            query,
            customer,
            project,
            top_k,
        } => {
            let filters = SearchFilters {
                customer_id: customer,
                project_id: project,
                ..Default::default()
            };
            let mut scope = RetrievalScope::new(filters);
            if let Some(k) = top_k {
                scope = scope.with_top_k(k);
            }
            let result = runtime.retrieval.retrieve(&query, &scope).await?;
            if result.items.is_empty() {
                println!("No memory entries match.");
            }
            for (i, item) in result.items.iter().enumerate() {
                print!("{:>2}. score {:.3} (similarity {:.3}) ", i + 1, item.score, item.similarity);
                print_summary(&item.entry);
            }
        }

        MemoryCommand::Stats => {
            let stats = runtime.store.stats().await?;
            println!("🧠 Memory Statistics");
            println!("====================");
            println!("  Current:     {}", stats.current);
            println!("  Superseded:  {}", stats.superseded);
            println!("  Deleted:     {}", stats.tombstoned);
            println!("  Stale:       {}", stats.stale);
            println!("  Versions:    {}", stats.total_versions);
            println!("  Audit:       {} records", stats.audit_records);
            if !stats.per_customer.is_empty() {
                println!("\n  Per customer:");
                for (customer, count) in &stats.per_customer {
                    println!("    {customer:<20} {count}");
                }
            }
        }
    }

    Ok(())
}

fn print_summary(entry: &MemoryEntry) {
    let meta = &entry.metadata;
    let mut flags = String::new();
    if entry.tombstone.is_some() {
        flags.push_str(" [deleted]");
    } else if entry.superseded_by.is_some() {
        flags.push_str(" [superseded]");
    }
    if entry.stale.is_some() {
        flags.push_str(" [stale]");
    }
    let preview: String = entry.text.chars().take(72).collect();
    println!(
        "{} v{} {}/{} trust={:.2}{}\n    {}",
        entry.id, entry.version, meta.customer_id, meta.project_id, entry.trust_score, flags, preview
    );
}

fn print_detail(entry: &MemoryEntry) {
    let meta = &entry.metadata;
    println!("ID:        {}", entry.id);
    println!("Version:   {}", entry.version);
    println!("Scope:     {}/{}", meta.customer_id, meta.project_id);
    println!("Source:    {}", meta.source_type);
    if let Some(source_ref) = &meta.source_ref {
        println!("Ref:       {source_ref}");
    }
    if !meta.persona_tags.is_empty() {
        println!("Personas:  {}", meta.persona_tags.join(", "));
    }
    println!("Trust:     {:.2}", entry.trust_score);
    println!("Observed:  {}", meta.timestamp.to_rfc3339());
    if let Some(previous) = &entry.supersedes {
        println!("Replaces:  {previous}");
    }
    if let Some(next) = &entry.superseded_by {
        println!("Replaced:  {next}");
    }
    if let Some(tombstone) = &entry.tombstone {
        println!("Deleted:   {} by {} ({})", tombstone.reason, tombstone.actor, tombstone.at.to_rfc3339());
    }
    if let Some(flag) = &entry.stale {
        println!("Stale:     reported by {} ({})", flag.reported_by, flag.at.to_rfc3339());
    }
    println!("\n{}", entry.text);
}
