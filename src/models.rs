//! Core data models for the rules service.
//!
//! Wire-facing types serialize as camelCase JSON with ISO-8601 timestamps,
//! matching the HTTP contract. Row ids are SQLite autoincrement integers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type GameId = i64;
pub type HouseRuleId = i64;
pub type ChunkId = i64;
pub type ChatSessionId = i64;
pub type ChatMessageId = i64;

// ============ Games ============

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Game {
    pub id: GameId,
    pub name: String,
    pub description: Option<String>,
    pub publisher: Option<String>,
    pub year_published: Option<i32>,
    pub min_players: Option<i32>,
    pub max_players: Option<i32>,
    pub play_time_minutes: Option<i32>,
    pub complexity_rating: Option<f64>,
    pub bgg_id: Option<i32>,
    pub rules_pdf_path: Option<String>,
    pub rules_text: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSummary {
    pub id: GameId,
    pub name: String,
    pub publisher: Option<String>,
    pub year_published: Option<i32>,
    pub min_players: Option<i32>,
    pub max_players: Option<i32>,
    pub complexity_rating: Option<f64>,
    pub has_rules_pdf: bool,
    pub house_rules_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateGameRequest {
    pub name: String,
    pub description: Option<String>,
    pub publisher: Option<String>,
    pub year_published: Option<i32>,
    pub min_players: Option<i32>,
    pub max_players: Option<i32>,
    pub play_time_minutes: Option<i32>,
    pub complexity_rating: Option<f64>,
    pub bgg_id: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpdateGameRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub publisher: Option<String>,
    pub year_published: Option<i32>,
    pub min_players: Option<i32>,
    pub max_players: Option<i32>,
    pub play_time_minutes: Option<i32>,
    pub complexity_rating: Option<f64>,
    pub bgg_id: Option<i32>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RulesInfo {
    pub game_id: GameId,
    pub game_name: String,
    pub has_rules_pdf: bool,
    pub rules_pdf_path: Option<String>,
    pub text_length: Option<usize>,
    pub chunk_count: i64,
    pub last_processed: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRulesResponse {
    pub game_id: GameId,
    pub file_path: String,
    pub chunk_count: u32,
    pub text_length: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteRulesResponse {
    pub embeddings_deleted: u32,
    pub file_deleted: bool,
}

// ============ House rules ============

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HouseRule {
    pub id: HouseRuleId,
    pub game_id: GameId,
    pub title: String,
    pub description: String,
    pub category: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateHouseRuleRequest {
    pub game_id: GameId,
    pub title: String,
    pub description: String,
    pub category: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpdateHouseRuleRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub is_active: Option<bool>,
}

// ============ Embedding chunks ============

/// Where a chunk's text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceType {
    #[serde(rename = "rules_pdf")]
    RulesPdf,
    #[serde(rename = "house_rule")]
    HouseRule,
}

impl SourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceType::RulesPdf => "rules_pdf",
            SourceType::HouseRule => "house_rule",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "rules_pdf" => Some(SourceType::RulesPdf),
            "house_rule" => Some(SourceType::HouseRule),
            _ => None,
        }
    }
}

/// A stored chunk with its decoded vector. Internal to the search and
/// ingestion paths; never serialized whole.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub id: ChunkId,
    pub game_id: GameId,
    pub chunk_text: String,
    pub embedding: Vec<f32>,
    pub chunk_index: i64,
    pub source_type: SourceType,
    pub source_id: Option<i64>,
    pub metadata: Option<String>,
}

/// A chunk ready for insertion: text, vector, and position already decided.
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub chunk_text: String,
    pub embedding: Vec<f32>,
    pub chunk_index: i64,
    pub metadata: Option<String>,
}

// ============ Search ============

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub id: ChunkId,
    pub chunk_text: String,
    pub chunk_index: i64,
    pub source_type: SourceType,
    pub source_id: Option<i64>,
    pub score: f32,
    pub metadata: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub total_results: usize,
}

// ============ Chat ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageRole {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "assistant")]
    Assistant,
    #[serde(rename = "system")]
    System,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(MessageRole::User),
            "assistant" => Some(MessageRole::Assistant),
            "system" => Some(MessageRole::System),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub id: ChatSessionId,
    pub game_id: GameId,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: ChatMessageId,
    pub session_id: ChatSessionId,
    pub role: MessageRole,
    pub content: String,
    /// Embedding ids that grounded an assistant reply. Kept as a historical
    /// snapshot; not re-resolved after re-ingestion.
    pub context_chunks: Option<Vec<ChunkId>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSessionSummary {
    pub id: ChatSessionId,
    pub game_id: GameId,
    pub title: Option<String>,
    pub message_count: i64,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatHistory {
    pub session: ChatSession,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateChatSessionRequest {
    pub game_id: GameId,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ChatMessageRequest {
    pub session_id: ChatSessionId,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageResponse {
    pub message: ChatMessage,
    pub context_sources: Vec<ContextSource>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSource {
    pub embedding_id: ChunkId,
    pub chunk_text: String,
    pub source_type: SourceType,
    pub similarity_score: f32,
    pub metadata: Option<String>,
}

// ============ Pagination ============

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PaginationParams {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self {
            page: default_page(),
            limit: default_limit(),
        }
    }
}

fn default_page() -> u32 {
    1
}
fn default_limit() -> u32 {
    20
}

impl PaginationParams {
    /// Page clamped to >= 1, limit to 1..=100.
    pub fn clamped(self) -> (u32, u32) {
        (self.page.max(1), self.limit.clamp(1, 100))
    }

    pub fn offset(self) -> i64 {
        let (page, limit) = self.clamped();
        (page as i64 - 1) * limit as i64
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub limit: u32,
    pub total: i64,
    pub total_pages: i64,
}

impl<T> PaginatedResponse<T> {
    pub fn new(items: Vec<T>, total: i64, page: u32, limit: u32) -> Self {
        let total_pages = (total + limit as i64 - 1) / limit.max(1) as i64;
        Self {
            items,
            page,
            limit,
            total,
            total_pages,
        }
    }
}
