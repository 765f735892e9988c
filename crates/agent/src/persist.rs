//! Conversation persistence as a single JSON document.

use advisor_core::conversation::{Conversation, ConversationId};
use advisor_core::error::Error;
use std::path::Path;
use tracing::debug;

/// Read saved conversations. A missing file yields none.
pub async fn load_conversations(path: &Path) -> Result<Vec<Conversation>, Error> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::Internal(format!("reading {}: {e}", path.display()))),
    };
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    let conversations: Vec<Conversation> = serde_json::from_str(&raw)?;
    debug!(path = %path.display(), count = conversations.len(), "Loaded conversations");
    Ok(conversations)
}

/// Replace the file with `conversations`. Written to a sibling temp file
/// first and renamed, so a crash never leaves a half-written document.
pub async fn save_conversations(path: &Path, conversations: &[Conversation]) -> Result<(), Error> {
    let io_err = |e: std::io::Error| Error::Internal(format!("writing {}: {e}", path.display()));
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
    }
    let json = serde_json::to_string_pretty(conversations)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json).await.map_err(io_err)?;
    tokio::fs::rename(&tmp, path).await.map_err(io_err)?;
    Ok(())
}

/// Delete one conversation from the saved file. Returns whether it was there.
pub async fn remove_conversation(path: &Path, id: &ConversationId) -> Result<bool, Error> {
    let mut conversations = load_conversations(path).await?;
    let before = conversations.len();
    conversations.retain(|c| &c.id != id);
    if conversations.len() == before {
        return Ok(false);
    }
    save_conversations(path, &conversations).await?;
    debug!(path = %path.display(), conversation_id = %id, "Removed conversation");
    Ok(true)
}
