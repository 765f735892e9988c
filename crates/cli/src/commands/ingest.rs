//! `advisor ingest`: Ingest a document into memory.

use advisor_core::ingestion::JobStatus;
use advisor_core::memory::SourceType;
use advisor_ingest::IngestRequest;
use std::path::{Path, PathBuf};

use crate::runtime::{Runtime, load_config};

pub struct IngestArgs {
    pub customer: String,
    pub project: String,
    pub source_type: String,
    pub source_ref: Option<String>,
    pub tags: Vec<String>,
    pub file: Option<PathBuf>,
    pub text: Option<String>,
}

pub async fn run(
    config_path: Option<&Path>,
    actor: &str,
    args: IngestArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let source_type: SourceType = args.source_type.parse()?;
    let (text, default_ref) = match (&args.file, args.text) {
        (Some(path), _) => (std::fs::read_to_string(path)?, Some(path.display().to_string())),
        (None, Some(text)) => (text, None),
        (None, None) => return Err("either --file or --text is required".into()),
    };

    let runtime = Runtime::open(load_config(config_path)?).await?;

    let mut request = IngestRequest::new(text, &args.customer, &args.project, source_type)
        .with_persona_tags(args.tags);
    if let Some(source_ref) = args.source_ref.or(default_ref) {
        request = request.with_source_ref(source_ref);
    }

    let job = runtime.ingestion.ingest(request, actor).await?;
    runtime.save().await?;

    match job.status {
        JobStatus::Committed => {
            println!("📥 Ingested {} chunks (job {})", job.entry_ids.len(), job.id);
            for id in &job.entry_ids {
                println!("   {id}");
            }
        }
        other => println!("⚠️  Job {} ended as {other:?}", job.id),
    }

    Ok(())
}
