use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::error::{Error, Result};
use crate::models::{
    ChatMessage, ChatMessageId, ChatSession, ChatSessionId, ChatSessionSummary, ChunkId, GameId,
    MessageRole, PaginatedResponse, PaginationParams,
};

fn session_from_row(row: &SqliteRow) -> std::result::Result<ChatSession, sqlx::Error> {
    Ok(ChatSession {
        id: row.try_get("id")?,
        game_id: row.try_get("game_id")?,
        title: row.try_get("title")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn message_from_row(row: &SqliteRow) -> std::result::Result<ChatMessage, sqlx::Error> {
    let role_str: String = row.try_get("role")?;
    let context_chunks: Option<String> = row.try_get("context_chunks")?;

    Ok(ChatMessage {
        id: row.try_get("id")?,
        session_id: row.try_get("session_id")?,
        role: MessageRole::parse(&role_str).unwrap_or(MessageRole::User),
        content: row.try_get("content")?,
        context_chunks: context_chunks.and_then(|s| serde_json::from_str::<Vec<ChunkId>>(&s).ok()),
        created_at: row.try_get("created_at")?,
    })
}

pub async fn create_session(
    pool: &SqlitePool,
    game_id: GameId,
    title: Option<&str>,
) -> Result<ChatSession> {
    let now = Utc::now();
    let result = sqlx::query(
        "INSERT INTO chat_sessions (game_id, title, created_at, updated_at) VALUES (?, ?, ?, ?)",
    )
    .bind(game_id)
    .bind(title)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    let session_id = result.last_insert_rowid();
    get_session(pool, session_id)
        .await?
        .ok_or_else(|| Error::not_found(format!("session {session_id} vanished after insert")))
}

pub async fn get_session(
    pool: &SqlitePool,
    session_id: ChatSessionId,
) -> Result<Option<ChatSession>> {
    let row = sqlx::query("SELECT * FROM chat_sessions WHERE id = ?")
        .bind(session_id)
        .fetch_optional(pool)
        .await?;

    row.as_ref()
        .map(session_from_row)
        .transpose()
        .map_err(Error::from)
}

/// Sessions for a game, most recently active first.
pub async fn list_sessions(
    pool: &SqlitePool,
    game_id: GameId,
    pagination: PaginationParams,
) -> Result<PaginatedResponse<ChatSessionSummary>> {
    let (page, limit) = pagination.clamped();

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chat_sessions WHERE game_id = ?")
        .bind(game_id)
        .fetch_one(pool)
        .await?;

    let rows = sqlx::query(
        r#"
        SELECT
            cs.id, cs.game_id, cs.title, cs.created_at,
            COUNT(cm.id) AS message_count,
            MAX(cm.created_at) AS last_message_at
        FROM chat_sessions cs
        LEFT JOIN chat_messages cm ON cs.id = cm.session_id
        WHERE cs.game_id = ?
        GROUP BY cs.id
        ORDER BY COALESCE(MAX(cm.created_at), cs.created_at) DESC, cs.id DESC
        LIMIT ? OFFSET ?
        "#,
    )
    .bind(game_id)
    .bind(limit as i64)
    .bind(pagination.offset())
    .fetch_all(pool)
    .await?;

    let items = rows
        .iter()
        .map(|row| -> std::result::Result<ChatSessionSummary, sqlx::Error> {
            Ok(ChatSessionSummary {
                id: row.try_get("id")?,
                game_id: row.try_get("game_id")?,
                title: row.try_get("title")?,
                message_count: row.try_get("message_count")?,
                last_message_at: row.try_get::<Option<DateTime<Utc>>, _>("last_message_at")?,
                created_at: row.try_get("created_at")?,
            })
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(PaginatedResponse::new(items, total, page, limit))
}

/// Messages in chronological order (insertion order breaks same-timestamp
/// ties).
pub async fn list_messages(
    pool: &SqlitePool,
    session_id: ChatSessionId,
) -> Result<Vec<ChatMessage>> {
    let rows = sqlx::query(
        "SELECT * FROM chat_messages WHERE session_id = ? ORDER BY created_at ASC, id ASC",
    )
    .bind(session_id)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(message_from_row)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::from)
}

/// Append a message and advance the session's `updated_at`, in one
/// transaction. Messages are immutable once written.
pub async fn append_message(
    pool: &SqlitePool,
    session_id: ChatSessionId,
    role: MessageRole,
    content: &str,
    context_chunks: Option<&[ChunkId]>,
) -> Result<ChatMessage> {
    let now = Utc::now();
    let context_json = context_chunks
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| Error::Internal(anyhow::anyhow!("context serialization failed: {e}")))?;

    let mut tx = pool.begin().await?;

    let result = sqlx::query(
        "INSERT INTO chat_messages (session_id, role, content, context_chunks, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(session_id)
    .bind(role.as_str())
    .bind(content)
    .bind(&context_json)
    .bind(now)
    .execute(&mut *tx)
    .await?;
    let message_id: ChatMessageId = result.last_insert_rowid();

    sqlx::query("UPDATE chat_sessions SET updated_at = ? WHERE id = ?")
        .bind(now)
        .bind(session_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    let row = sqlx::query("SELECT * FROM chat_messages WHERE id = ?")
        .bind(message_id)
        .fetch_one(pool)
        .await?;
    message_from_row(&row).map_err(Error::from)
}
