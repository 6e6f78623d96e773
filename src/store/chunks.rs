use chrono::Utc;
use sqlx::{Row, SqlitePool};

use crate::embedding::blob_to_vec;
use crate::error::Result;
use crate::models::{ChunkRecord, GameId, NewChunk, SourceType};

/// Replace every chunk for `(game_id, source_type, source_id)` with the given
/// batch, inside one transaction. Old rows are gone and new indices are
/// contiguous, or nothing changed.
pub async fn replace_for_source(
    pool: &SqlitePool,
    game_id: GameId,
    source_type: SourceType,
    source_id: Option<i64>,
    chunks: &[NewChunk],
) -> Result<u32> {
    let mut tx = pool.begin().await?;
    let now = Utc::now();

    sqlx::query(DELETE_BY_SOURCE_SQL)
        .bind(game_id)
        .bind(source_type.as_str())
        .bind(source_id)
        .bind(source_id)
        .execute(&mut *tx)
        .await?;

    for chunk in chunks {
        sqlx::query(
            r#"
            INSERT INTO embeddings (
                game_id, chunk_text, embedding, chunk_index, source_type, source_id, metadata, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(game_id)
        .bind(&chunk.chunk_text)
        .bind(crate::embedding::vec_to_blob(&chunk.embedding))
        .bind(chunk.chunk_index)
        .bind(source_type.as_str())
        .bind(source_id)
        .bind(&chunk.metadata)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(chunks.len() as u32)
}

/// `source_id = NULL` matches every row of the source type (rules PDFs have
/// no source id; house-rule deletes pass the rule id).
const DELETE_BY_SOURCE_SQL: &str =
    "DELETE FROM embeddings WHERE game_id = ? AND source_type = ? AND (? IS NULL OR source_id = ?)";

/// Remove all chunks for a source. Used on re-upload and house-rule deletion.
pub async fn delete_by_source(
    pool: &SqlitePool,
    game_id: GameId,
    source_type: SourceType,
    source_id: Option<i64>,
) -> Result<u32> {
    let result = sqlx::query(DELETE_BY_SOURCE_SQL)
        .bind(game_id)
        .bind(source_type.as_str())
        .bind(source_id)
        .bind(source_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() as u32)
}

pub async fn delete_by_game(pool: &SqlitePool, game_id: GameId) -> Result<u32> {
    let result = sqlx::query("DELETE FROM embeddings WHERE game_id = ?")
        .bind(game_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() as u32)
}

/// Load every chunk for a game with decoded vectors, ordered by source then
/// chunk position.
pub async fn load_for_game(pool: &SqlitePool, game_id: GameId) -> Result<Vec<ChunkRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT id, game_id, chunk_text, embedding, chunk_index, source_type, source_id, metadata
        FROM embeddings
        WHERE game_id = ?
        ORDER BY source_type ASC, chunk_index ASC
        "#,
    )
    .bind(game_id)
    .fetch_all(pool)
    .await?;

    let mut chunks = Vec::with_capacity(rows.len());
    for row in &rows {
        let source_type_str: String = row.try_get("source_type")?;
        let blob: Vec<u8> = row.try_get("embedding")?;
        chunks.push(ChunkRecord {
            id: row.try_get("id")?,
            game_id: row.try_get("game_id")?,
            chunk_text: row.try_get("chunk_text")?,
            embedding: blob_to_vec(&blob),
            chunk_index: row.try_get("chunk_index")?,
            source_type: SourceType::parse(&source_type_str).unwrap_or(SourceType::RulesPdf),
            source_id: row.try_get("source_id")?,
            metadata: row.try_get("metadata")?,
        });
    }

    Ok(chunks)
}

pub async fn count_for_source(
    pool: &SqlitePool,
    game_id: GameId,
    source_type: SourceType,
) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM embeddings WHERE game_id = ? AND source_type = ?",
    )
    .bind(game_id)
    .bind(source_type.as_str())
    .fetch_one(pool)
    .await?;
    Ok(count)
}
