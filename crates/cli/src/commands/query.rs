//! `advisor query`, `advisor conversations` and `advisor delete-conversation`.

use advisor_agent::{
    GenerationSettings, Orchestrator, TurnOutcome, load_conversations, remove_conversation,
};
use advisor_core::conversation::{ConversationId, NewConversation};
use advisor_core::error::ProviderError;
use advisor_core::persona::PersonaMode;
use std::path::Path;
use tokio_util::sync::CancellationToken;

use crate::runtime::{CliResult, Runtime, load_config};

pub struct QueryArgs {
    pub text: String,
    pub conversation: Option<String>,
    pub persona: Option<String>,
    pub customer: Option<String>,
    pub project: Option<String>,
    pub title: Option<String>,
}

pub async fn run(config_path: Option<&Path>, args: QueryArgs) -> CliResult<()> {
    let persona = args.persona.as_deref().map(str::parse::<PersonaMode>).transpose()?;

    let runtime = Runtime::open(load_config(config_path)?).await?;
    let config = &runtime.config;

    let generator = match advisor_providers::build_generator(config) {
        Ok(generator) => generator,
        Err(ProviderError::NotConfigured(reason)) => {
            eprintln!("❌ Generation provider not configured: {reason}");
            eprintln!("   Set ADVISOR_API_KEY, or use provider = \"ollama\" under [generation].");
            return Err("generation provider not configured".into());
        }
        Err(e) => return Err(e.into()),
    };

    let orchestrator = Orchestrator::new(
        runtime.retrieval.clone(),
        generator,
        GenerationSettings::from_config(&config.generation),
        config.orchestrator.clone(),
    )
    .with_personas(config.persona_catalog())
    .with_scopes(config.known_scopes())
    .with_ingestion(runtime.ingestion.clone())
    .with_events(runtime.events.clone())
    .with_persistence(config.conversations_path());
    orchestrator.restore(load_conversations(&config.conversations_path()).await?);

    let conversation = match args.conversation {
        Some(id) => {
            let id = ConversationId(id);
            match persona {
                Some(mode) => orchestrator.switch_persona(&id, mode).await?,
                None => orchestrator.conversation(&id)?,
            }
        }
        None => {
            let fields = NewConversation {
                title: args.title,
                customer_id: args.customer,
                project_id: args.project,
            };
            orchestrator
                .create_conversation(persona.unwrap_or_default(), fields)
                .await?
        }
    };

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let outcome = orchestrator
        .submit_turn_with_cancel(&conversation.id, &args.text, cancel)
        .await?;

    match &outcome {
        TurnOutcome::Completed { reply, retrieved, .. } => {
            println!("{}\n", reply.content);
            if !retrieved.is_empty() {
                println!("📚 Sources:");
                for (i, item) in retrieved.iter().enumerate() {
                    let meta = &item.entry.metadata;
                    println!(
                        "   {}. {} ({}/{}, score {:.2})",
                        i + 1,
                        item.entry.id,
                        meta.customer_id,
                        meta.project_id,
                        item.score
                    );
                }
            }
        }
        TurnOutcome::Failed { reason, message, .. } => {
            tracing::warn!(%reason, "Turn failed");
            println!("⚠️  {message}");
        }
    }
    println!("\n💬 Conversation: {} ({})", conversation.id, conversation.persona_mode);

    if config.orchestrator.emit_candidate_facts && outcome.is_completed() {
        runtime.save().await?;
    }

    Ok(())
}

pub async fn list(config_path: Option<&Path>, limit: usize, offset: usize) -> CliResult<()> {
    let config = load_config(config_path)?;
    let mut conversations = load_conversations(&config.conversations_path()).await?;
    conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));

    if conversations.is_empty() {
        println!("No conversations yet.");
        return Ok(());
    }

    for conversation in conversations.iter().skip(offset).take(limit) {
        let scope = match (&conversation.customer_id, &conversation.project_id) {
            (Some(c), Some(p)) => format!("{c}/{p}"),
            (Some(c), None) => c.clone(),
            _ => "-".to_string(),
        };
        println!(
            "{}  {:<24} {:<22} {:>3} turns  {}",
            conversation.id,
            conversation.title.as_deref().unwrap_or("(untitled)"),
            conversation.persona_mode.as_str(),
            conversation.turns.len(),
            scope,
        );
    }

    Ok(())
}

pub async fn delete(config_path: Option<&Path>, id: String) -> CliResult<()> {
    let config = load_config(config_path)?;
    let id = ConversationId(id);
    if !remove_conversation(&config.conversations_path(), &id).await? {
        return Err(format!("conversation {id} not found").into());
    }
    println!("🗑️  Deleted conversation {id}");
    Ok(())
}
