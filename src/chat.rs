//! Chat orchestration.
//!
//! Each session is an append-only log. `post_message` persists the user
//! message first, so it survives any later failure; retrieval and generation
//! happen afterwards under a per-session lock that keeps concurrent posts to
//! the same session from interleaving their context windows.

use sqlx::SqlitePool;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::llm::{self, ChatTurn};
use crate::locks::KeyedLocks;
use crate::models::{
    ChatHistory, ChatMessageRequest, ChatMessageResponse, ChatSession, ChatSessionSummary,
    ChunkId, ContextSource, CreateChatSessionRequest, GameId, MessageRole, PaginatedResponse,
    PaginationParams, SearchResult,
};
use crate::search;
use crate::store;

pub async fn create_session(
    pool: &SqlitePool,
    request: &CreateChatSessionRequest,
) -> Result<ChatSession> {
    if !store::games::game_exists(pool, request.game_id).await? {
        return Err(Error::not_found(format!(
            "game {} not found",
            request.game_id
        )));
    }

    store::chat::create_session(pool, request.game_id, request.title.as_deref()).await
}

pub async fn list_sessions(
    pool: &SqlitePool,
    game_id: GameId,
    pagination: PaginationParams,
) -> Result<PaginatedResponse<ChatSessionSummary>> {
    store::chat::list_sessions(pool, game_id, pagination).await
}

pub async fn get_history(pool: &SqlitePool, session_id: i64) -> Result<ChatHistory> {
    let session = store::chat::get_session(pool, session_id)
        .await?
        .ok_or_else(|| Error::not_found(format!("chat session {session_id} not found")))?;
    let messages = store::chat::list_messages(pool, session_id).await?;
    Ok(ChatHistory { session, messages })
}

/// Post a user message and generate a grounded assistant reply.
///
/// The user message is durable even when retrieval or generation fails; on
/// failure no assistant row is written and the error surfaces to the caller.
pub async fn post_message(
    pool: &SqlitePool,
    config: &Config,
    session_locks: &KeyedLocks,
    request: &ChatMessageRequest,
) -> Result<ChatMessageResponse> {
    if request.message.trim().is_empty() {
        return Err(Error::validation("message must not be empty"));
    }

    let _guard = session_locks.acquire(request.session_id).await;

    let session = store::chat::get_session(pool, request.session_id)
        .await?
        .ok_or_else(|| {
            Error::not_found(format!("chat session {} not found", request.session_id))
        })?;
    let game = store::games::get_game(pool, session.game_id)
        .await?
        .ok_or_else(|| Error::not_found(format!("game {} not found", session.game_id)))?;

    store::chat::append_message(
        pool,
        session.id,
        MessageRole::User,
        &request.message,
        None,
    )
    .await?;

    let context = retrieve_context(pool, config, session.game_id, &request.message).await?;

    let system_prompt = build_system_prompt(&game.name, &context);
    let history = store::chat::list_messages(pool, session.id).await?;
    let window_start = history.len().saturating_sub(config.llm.history_window.max(1));
    let turns: Vec<ChatTurn> = history[window_start..].iter().map(ChatTurn::from).collect();

    let reply = llm::chat_completion(&config.llm, Some(&system_prompt), &turns).await?;

    let context_ids: Vec<ChunkId> = context.iter().map(|c| c.id).collect();
    let assistant_message = store::chat::append_message(
        pool,
        session.id,
        MessageRole::Assistant,
        &reply,
        Some(&context_ids),
    )
    .await?;

    Ok(ChatMessageResponse {
        message: assistant_message,
        context_sources: context
            .into_iter()
            .map(|result| ContextSource {
                embedding_id: result.id,
                chunk_text: result.chunk_text,
                source_type: result.source_type,
                similarity_score: result.score,
                metadata: result.metadata,
            })
            .collect(),
    })
}

/// Top-K chunks for the question, minus anything under the relevance floor.
async fn retrieve_context(
    pool: &SqlitePool,
    config: &Config,
    game_id: GameId,
    query: &str,
) -> Result<Vec<SearchResult>> {
    let response =
        search::search_chunks(pool, config, game_id, query, config.retrieval.context_k).await?;

    let floor = config.retrieval.min_context_score;
    Ok(response
        .results
        .into_iter()
        .filter(|r| r.score >= floor)
        .collect())
}

fn build_system_prompt(game_name: &str, context: &[SearchResult]) -> String {
    let mut prompt = format!(
        "You are a rules assistant for the board game \"{game_name}\". \
         Answer questions using the rules excerpts below. If the excerpts do \
         not cover the question, say so rather than guessing."
    );

    if !context.is_empty() {
        prompt.push_str("\n\nRules excerpts:");
        for result in context {
            prompt.push_str("\n\n");
            prompt.push_str(&result.chunk_text);
        }
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceType;

    fn result(id: i64, text: &str, score: f32) -> SearchResult {
        SearchResult {
            id,
            chunk_text: text.to_string(),
            chunk_index: 0,
            source_type: SourceType::RulesPdf,
            source_id: None,
            score,
            metadata: None,
        }
    }

    #[test]
    fn prompt_names_the_game() {
        let prompt = build_system_prompt("Wingspan", &[]);
        assert!(prompt.contains("Wingspan"));
        assert!(!prompt.contains("Rules excerpts"));
    }

    #[test]
    fn prompt_includes_context_chunks() {
        let context = vec![
            result(1, "Each egg is worth one point.", 0.9),
            result(2, "Tucked cards score at game end.", 0.8),
        ];
        let prompt = build_system_prompt("Wingspan", &context);
        assert!(prompt.contains("Each egg is worth one point."));
        assert!(prompt.contains("Tucked cards score at game end."));
    }
}
