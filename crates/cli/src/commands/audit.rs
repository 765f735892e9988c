//! `advisor audit`: Audit log export.

use std::path::Path;

use crate::runtime::{CliResult, Runtime, load_config};

pub async fn export(config_path: Option<&Path>, path: &Path) -> CliResult<()> {
    let runtime = Runtime::open(load_config(config_path)?).await?;
    let written = runtime.store.audit().export_jsonl(path)?;
    println!("📜 Exported {written} audit records to {}", path.display());
    Ok(())
}
