//! Rules-document ingestion pipeline.
//!
//! Coordinates the upload flow: validate → extract → chunk → embed →
//! transactional replace. Uploads act as upserts: prior chunks for the game
//! are deleted in the same transaction that inserts the new set, so
//! `chunk_index` stays contiguous and stale hits cannot surface. A per-game
//! lock keeps concurrent uploads for the same game from interleaving.

use std::path::Path;

use serde_json::json;
use sqlx::SqlitePool;
use tracing::warn;
use uuid::Uuid;

use crate::chunk::chunk_text;
use crate::config::Config;
use crate::embedding;
use crate::error::{Error, Result};
use crate::locks::KeyedLocks;
use crate::models::{
    DeleteRulesResponse, GameId, HouseRule, NewChunk, SourceType, UploadRulesResponse,
};
use crate::store;

/// Ingest an uploaded rules PDF for a game.
///
/// Embeddings are generated before any database write; a failed batch leaves
/// the previous chunk set untouched.
pub async fn ingest_rules_pdf(
    pool: &SqlitePool,
    config: &Config,
    locks: &KeyedLocks,
    game_id: GameId,
    bytes: Vec<u8>,
) -> Result<UploadRulesResponse> {
    let _guard = locks.acquire(game_id).await;

    let game = store::games::get_game(pool, game_id)
        .await?
        .ok_or_else(|| Error::not_found(format!("game {game_id} not found")))?;

    crate::pdf::validate_pdf(&bytes, config.upload.max_bytes)?;

    let pdf_bytes = bytes.clone();
    let text = crate::pdf::extract_text(bytes).await?;
    let text_length = text.chars().count();

    let chunks = chunk_text(
        &text,
        config.chunking.chunk_size,
        config.chunking.chunk_overlap,
    );
    if chunks.is_empty() {
        return Err(Error::EmptyDocument);
    }

    let vectors = embed_batched(&config.embedding, &chunks).await?;

    let file_name = format!("game_{}_{}.pdf", game_id, Uuid::new_v4());
    let file_path = config.upload.storage_dir.join(&file_name);

    let model = config.embedding.model.as_deref().unwrap_or("unknown");
    let total_chunks = chunks.len();
    let new_chunks: Vec<NewChunk> = chunks
        .into_iter()
        .zip(vectors)
        .enumerate()
        .map(|(index, (chunk_text, embedding))| NewChunk {
            metadata: Some(
                json!({
                    "file_name": file_name,
                    "chunk_size": chunk_text.chars().count(),
                    "total_chunks": total_chunks,
                    "model": model,
                })
                .to_string(),
            ),
            chunk_text,
            embedding,
            chunk_index: index as i64,
        })
        .collect();

    tokio::fs::create_dir_all(&config.upload.storage_dir).await?;
    tokio::fs::write(&file_path, &pdf_bytes).await?;

    let chunk_count =
        store::chunks::replace_for_source(pool, game_id, SourceType::RulesPdf, None, &new_chunks)
            .await?;

    let path_str = file_path.display().to_string();
    store::games::set_rules(pool, game_id, Some(&text), Some(&path_str)).await?;

    // The replaced document's file is no longer referenced.
    if let Some(old_path) = game.rules_pdf_path {
        remove_file_best_effort(Path::new(&old_path)).await;
    }

    Ok(UploadRulesResponse {
        game_id,
        file_path: path_str,
        chunk_count,
        text_length,
    })
}

/// Delete a game's rules document: its chunks, stored file, and extracted
/// text.
pub async fn delete_rules(
    pool: &SqlitePool,
    locks: &KeyedLocks,
    game_id: GameId,
) -> Result<DeleteRulesResponse> {
    let _guard = locks.acquire(game_id).await;

    let game = store::games::get_game(pool, game_id)
        .await?
        .ok_or_else(|| Error::not_found(format!("game {game_id} not found")))?;

    let embeddings_deleted =
        store::chunks::delete_by_source(pool, game_id, SourceType::RulesPdf, None).await?;

    let file_deleted = match game.rules_pdf_path {
        Some(path) => tokio::fs::remove_file(&path).await.is_ok(),
        None => false,
    };

    store::games::set_rules(pool, game_id, None, None).await?;

    Ok(DeleteRulesResponse {
        embeddings_deleted,
        file_deleted,
    })
}

/// Re-embed a house rule's text, replacing any prior chunks for that rule.
pub async fn reindex_house_rule(
    pool: &SqlitePool,
    config: &Config,
    rule: &HouseRule,
) -> Result<u32> {
    let text = format!("{}\n\n{}", rule.title, rule.description);
    let chunks = chunk_text(
        &text,
        config.chunking.chunk_size,
        config.chunking.chunk_overlap,
    );
    if chunks.is_empty() {
        return Ok(0);
    }

    let vectors = embed_batched(&config.embedding, &chunks).await?;

    let new_chunks: Vec<NewChunk> = chunks
        .into_iter()
        .zip(vectors)
        .enumerate()
        .map(|(index, (chunk_text, embedding))| NewChunk {
            metadata: Some(json!({"house_rule_title": rule.title}).to_string()),
            chunk_text,
            embedding,
            chunk_index: index as i64,
        })
        .collect();

    store::chunks::replace_for_source(
        pool,
        rule.game_id,
        SourceType::HouseRule,
        Some(rule.id),
        &new_chunks,
    )
    .await
}

/// Embed all chunk texts, honoring the configured batch size. Any batch
/// failure fails the whole document.
async fn embed_batched(
    config: &crate::config::EmbeddingConfig,
    chunks: &[String],
) -> Result<Vec<Vec<f32>>> {
    let mut vectors = Vec::with_capacity(chunks.len());
    for batch in chunks.chunks(config.batch_size.max(1)) {
        let batch_vectors = embedding::embed_texts(config, batch).await?;
        if batch_vectors.len() != batch.len() {
            return Err(Error::Upstream(format!(
                "expected {} embeddings, got {}",
                batch.len(),
                batch_vectors.len()
            )));
        }
        vectors.extend(batch_vectors);
    }
    Ok(vectors)
}

async fn remove_file_best_effort(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("could not remove stored file {}: {}", path.display(), e);
        }
    }
}
