//! Similarity search over a game's stored chunks.
//!
//! The query is embedded with the same model as the stored chunks, then
//! scored against every chunk for the game with a brute-force cosine scan.
//! Results are deterministic: descending score, ties broken by ascending
//! `chunk_index`, then ascending id.

use sqlx::SqlitePool;

use crate::config::Config;
use crate::embedding;
use crate::error::{Error, Result};
use crate::models::{ChunkRecord, GameId, SearchResponse, SearchResult};
use crate::store;

/// Run a similarity search for `query` over the game's chunks.
///
/// A game with no stored chunks yields an empty result set, not an error —
/// and short-circuits before any embedding call.
pub async fn search_chunks(
    pool: &SqlitePool,
    config: &Config,
    game_id: GameId,
    query: &str,
    limit: usize,
) -> Result<SearchResponse> {
    if query.trim().is_empty() {
        return Err(Error::validation("query must not be empty"));
    }

    if !store::games::game_exists(pool, game_id).await? {
        return Err(Error::not_found(format!("game {game_id} not found")));
    }

    let chunks = store::chunks::load_for_game(pool, game_id).await?;
    if chunks.is_empty() {
        return Ok(SearchResponse {
            results: Vec::new(),
            total_results: 0,
        });
    }

    let query_vec = embedding::embed_query(&config.embedding, query).await?;
    let results = rank_chunks(chunks, &query_vec, limit);

    Ok(SearchResponse {
        total_results: results.len(),
        results,
    })
}

/// Score and order chunks against a query vector, keeping the top `limit`.
pub fn rank_chunks(chunks: Vec<ChunkRecord>, query_vec: &[f32], limit: usize) -> Vec<SearchResult> {
    let mut results: Vec<SearchResult> = chunks
        .into_iter()
        .map(|chunk| {
            let cosine = embedding::cosine_similarity(query_vec, &chunk.embedding);
            SearchResult {
                id: chunk.id,
                chunk_text: chunk.chunk_text,
                chunk_index: chunk.chunk_index,
                source_type: chunk.source_type,
                source_id: chunk.source_id,
                score: embedding::similarity_score(cosine),
                metadata: chunk.metadata,
            }
        })
        .collect();

    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.chunk_index.cmp(&b.chunk_index))
            .then(a.id.cmp(&b.id))
    });
    results.truncate(limit);

    results
}
