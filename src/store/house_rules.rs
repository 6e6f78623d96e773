use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::error::{Error, Result};
use crate::models::{
    CreateHouseRuleRequest, GameId, HouseRule, HouseRuleId, PaginatedResponse, PaginationParams,
    UpdateHouseRuleRequest,
};

fn rule_from_row(row: &SqliteRow) -> std::result::Result<HouseRule, sqlx::Error> {
    Ok(HouseRule {
        id: row.try_get("id")?,
        game_id: row.try_get("game_id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        category: row.try_get("category")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub async fn list_house_rules(
    pool: &SqlitePool,
    game_id: GameId,
    pagination: PaginationParams,
) -> Result<PaginatedResponse<HouseRule>> {
    let (page, limit) = pagination.clamped();

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM house_rules WHERE game_id = ?")
        .bind(game_id)
        .fetch_one(pool)
        .await?;

    let rows = sqlx::query(
        "SELECT * FROM house_rules WHERE game_id = ? ORDER BY created_at ASC, id ASC LIMIT ? OFFSET ?",
    )
    .bind(game_id)
    .bind(limit as i64)
    .bind(pagination.offset())
    .fetch_all(pool)
    .await?;

    let items = rows
        .iter()
        .map(rule_from_row)
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(PaginatedResponse::new(items, total, page, limit))
}

pub async fn get_house_rule(pool: &SqlitePool, rule_id: HouseRuleId) -> Result<Option<HouseRule>> {
    let row = sqlx::query("SELECT * FROM house_rules WHERE id = ?")
        .bind(rule_id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(rule_from_row).transpose().map_err(Error::from)
}

pub async fn create_house_rule(
    pool: &SqlitePool,
    request: &CreateHouseRuleRequest,
) -> Result<HouseRule> {
    if !super::games::game_exists(pool, request.game_id).await? {
        return Err(Error::not_found(format!(
            "game {} not found",
            request.game_id
        )));
    }

    let now = Utc::now();
    let result = sqlx::query(
        r#"
        INSERT INTO house_rules (game_id, title, description, category, is_active, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(request.game_id)
    .bind(&request.title)
    .bind(&request.description)
    .bind(&request.category)
    .bind(request.is_active)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    let rule_id = result.last_insert_rowid();
    get_house_rule(pool, rule_id)
        .await?
        .ok_or_else(|| Error::not_found(format!("house rule {rule_id} vanished after insert")))
}

pub async fn update_house_rule(
    pool: &SqlitePool,
    rule_id: HouseRuleId,
    request: &UpdateHouseRuleRequest,
) -> Result<Option<HouseRule>> {
    if get_house_rule(pool, rule_id).await?.is_none() {
        return Ok(None);
    }

    sqlx::query(
        r#"
        UPDATE house_rules SET
            title = COALESCE(?, title),
            description = COALESCE(?, description),
            category = COALESCE(?, category),
            is_active = COALESCE(?, is_active),
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&request.title)
    .bind(&request.description)
    .bind(&request.category)
    .bind(request.is_active)
    .bind(Utc::now())
    .bind(rule_id)
    .execute(pool)
    .await?;

    get_house_rule(pool, rule_id).await
}

pub async fn delete_house_rule(pool: &SqlitePool, rule_id: HouseRuleId) -> Result<bool> {
    let result = sqlx::query("DELETE FROM house_rules WHERE id = ?")
        .bind(rule_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
