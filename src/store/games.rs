use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::error::{Error, Result};
use crate::models::{
    CreateGameRequest, Game, GameId, GameSummary, PaginatedResponse, PaginationParams, RulesInfo,
    UpdateGameRequest,
};

fn game_from_row(row: &SqliteRow) -> std::result::Result<Game, sqlx::Error> {
    Ok(Game {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        publisher: row.try_get("publisher")?,
        year_published: row.try_get("year_published")?,
        min_players: row.try_get("min_players")?,
        max_players: row.try_get("max_players")?,
        play_time_minutes: row.try_get("play_time_minutes")?,
        complexity_rating: row.try_get("complexity_rating")?,
        bgg_id: row.try_get("bgg_id")?,
        rules_pdf_path: row.try_get("rules_pdf_path")?,
        rules_text: row.try_get("rules_text")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub async fn list_games(
    pool: &SqlitePool,
    pagination: PaginationParams,
) -> Result<PaginatedResponse<GameSummary>> {
    let (page, limit) = pagination.clamped();

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM games")
        .fetch_one(pool)
        .await?;

    let rows = sqlx::query(
        r#"
        SELECT
            g.id, g.name, g.publisher, g.year_published,
            g.min_players, g.max_players, g.complexity_rating,
            g.rules_pdf_path,
            COUNT(hr.id) AS house_rules_count
        FROM games g
        LEFT JOIN house_rules hr ON g.id = hr.game_id AND hr.is_active = 1
        GROUP BY g.id
        ORDER BY g.name ASC
        LIMIT ? OFFSET ?
        "#,
    )
    .bind(limit as i64)
    .bind(pagination.offset())
    .fetch_all(pool)
    .await?;

    let items = rows
        .iter()
        .map(|row| -> std::result::Result<GameSummary, sqlx::Error> {
            Ok(GameSummary {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                publisher: row.try_get("publisher")?,
                year_published: row.try_get("year_published")?,
                min_players: row.try_get("min_players")?,
                max_players: row.try_get("max_players")?,
                complexity_rating: row.try_get("complexity_rating")?,
                has_rules_pdf: row.try_get::<Option<String>, _>("rules_pdf_path")?.is_some(),
                house_rules_count: row.try_get("house_rules_count")?,
            })
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(PaginatedResponse::new(items, total, page, limit))
}

pub async fn get_game(pool: &SqlitePool, game_id: GameId) -> Result<Option<Game>> {
    let row = sqlx::query("SELECT * FROM games WHERE id = ?")
        .bind(game_id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(game_from_row).transpose().map_err(Error::from)
}

pub async fn game_exists(pool: &SqlitePool, game_id: GameId) -> Result<bool> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM games WHERE id = ?)")
        .bind(game_id)
        .fetch_one(pool)
        .await?;
    Ok(exists)
}

pub async fn create_game(pool: &SqlitePool, request: &CreateGameRequest) -> Result<Game> {
    let now = Utc::now();

    let result = sqlx::query(
        r#"
        INSERT INTO games (
            name, description, publisher, year_published,
            min_players, max_players, play_time_minutes, complexity_rating,
            bgg_id, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&request.name)
    .bind(&request.description)
    .bind(&request.publisher)
    .bind(request.year_published)
    .bind(request.min_players)
    .bind(request.max_players)
    .bind(request.play_time_minutes)
    .bind(request.complexity_rating)
    .bind(request.bgg_id)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    let game_id = result.last_insert_rowid();
    get_game(pool, game_id)
        .await?
        .ok_or_else(|| Error::not_found(format!("game {game_id} vanished after insert")))
}

pub async fn update_game(
    pool: &SqlitePool,
    game_id: GameId,
    request: &UpdateGameRequest,
) -> Result<Option<Game>> {
    if !game_exists(pool, game_id).await? {
        return Ok(None);
    }

    sqlx::query(
        r#"
        UPDATE games SET
            name = COALESCE(?, name),
            description = COALESCE(?, description),
            publisher = COALESCE(?, publisher),
            year_published = COALESCE(?, year_published),
            min_players = COALESCE(?, min_players),
            max_players = COALESCE(?, max_players),
            play_time_minutes = COALESCE(?, play_time_minutes),
            complexity_rating = COALESCE(?, complexity_rating),
            bgg_id = COALESCE(?, bgg_id),
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&request.name)
    .bind(&request.description)
    .bind(&request.publisher)
    .bind(request.year_published)
    .bind(request.min_players)
    .bind(request.max_players)
    .bind(request.play_time_minutes)
    .bind(request.complexity_rating)
    .bind(request.bgg_id)
    .bind(Utc::now())
    .bind(game_id)
    .execute(pool)
    .await?;

    get_game(pool, game_id).await
}

pub async fn delete_game(pool: &SqlitePool, game_id: GameId) -> Result<bool> {
    let result = sqlx::query("DELETE FROM games WHERE id = ?")
        .bind(game_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Set or clear the stored rules document for a game.
pub async fn set_rules(
    pool: &SqlitePool,
    game_id: GameId,
    rules_text: Option<&str>,
    pdf_path: Option<&str>,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE games SET rules_text = ?, rules_pdf_path = ?, updated_at = ? WHERE id = ?",
    )
    .bind(rules_text)
    .bind(pdf_path)
    .bind(Utc::now())
    .bind(game_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Rules document stats: chunk counts cover `rules_pdf` chunks only.
pub async fn rules_info(pool: &SqlitePool, game_id: GameId) -> Result<Option<RulesInfo>> {
    let row = sqlx::query(
        r#"
        SELECT
            g.name,
            g.rules_pdf_path,
            g.rules_text,
            COUNT(e.id) AS chunk_count,
            MAX(e.created_at) AS last_processed
        FROM games g
        LEFT JOIN embeddings e ON g.id = e.game_id AND e.source_type = 'rules_pdf'
        WHERE g.id = ?
        GROUP BY g.id
        "#,
    )
    .bind(game_id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let rules_pdf_path: Option<String> = row.try_get("rules_pdf_path")?;
    let rules_text: Option<String> = row.try_get("rules_text")?;

    Ok(Some(RulesInfo {
        game_id,
        game_name: row.try_get("name")?,
        has_rules_pdf: rules_pdf_path.is_some(),
        rules_pdf_path,
        text_length: rules_text.map(|t| t.chars().count()),
        chunk_count: row.try_get("chunk_count")?,
        last_processed: row.try_get("last_processed")?,
    }))
}
