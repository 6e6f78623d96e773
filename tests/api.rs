//! End-to-end tests for the HTTP API.
//!
//! Each test gets its own temp database and storage directory, with a
//! wiremock server standing in for the embedding and LLM backends. The
//! embedding mock returns letter-frequency vectors, so similarity is
//! deterministic and related texts really do score closer.

use serde_json::{json, Value};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use rulesmith::config::{
    ChunkingConfig, Config, DbConfig, EmbeddingConfig, LlmConfig, RetrievalConfig, ServerConfig,
    UploadConfig,
};
use rulesmith::models::SourceType;
use rulesmith::server::{app, AppState};
use rulesmith::{db, migrate, store};

const EMBED_DIMS: usize = 26;

/// Letter-frequency embedding: deterministic, and texts sharing vocabulary
/// land closer in cosine space.
fn letter_freq_vec(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; EMBED_DIMS];
    for c in text.to_ascii_lowercase().chars() {
        if c.is_ascii_lowercase() {
            v[(c as u8 - b'a') as usize] += 1.0;
        }
    }
    v
}

struct EmbedResponder;

impl Respond for EmbedResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).unwrap();
        let embeddings: Vec<Vec<f32>> = body["input"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| letter_freq_vec(t.as_str().unwrap()))
            .collect();
        ResponseTemplate::new(200).set_body_json(json!({ "embeddings": embeddings }))
    }
}

struct TestApp {
    addr: String,
    client: reqwest::Client,
    pool: sqlx::SqlitePool,
    _tmp: TempDir,
    _mock: MockServer,
}

impl TestApp {
    fn url(&self, p: &str) -> String {
        format!("{}{}", self.addr, p)
    }
}

async fn spawn_app(llm_ok: bool) -> TestApp {
    let tmp = TempDir::new().unwrap();
    let mock = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(EmbedResponder)
        .mount(&mock)
        .await;

    let llm_response = if llm_ok {
        ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": "Check the scoring summary: eggs and tucked cards both count."
                }
            }]
        }))
    } else {
        ResponseTemplate::new(500).set_body_string("model exploded")
    };
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(llm_response)
        .mount(&mock)
        .await;

    let config = Config {
        db: DbConfig {
            path: tmp.path().join("test.sqlite"),
        },
        server: ServerConfig {
            bind: "127.0.0.1:0".to_string(),
        },
        upload: UploadConfig {
            storage_dir: tmp.path().join("uploads"),
            max_bytes: 10 * 1024 * 1024,
        },
        chunking: ChunkingConfig {
            chunk_size: 80,
            chunk_overlap: 16,
        },
        embedding: EmbeddingConfig {
            provider: "ollama".to_string(),
            url: Some(mock.uri()),
            model: Some("test-embed".to_string()),
            dims: Some(EMBED_DIMS),
            batch_size: 64,
            max_retries: 0,
            timeout_secs: 5,
        },
        llm: LlmConfig {
            url: format!("{}/v1", mock.uri()),
            model: "test-llm".to_string(),
            max_tokens: None,
            temperature: 0.0,
            timeout_secs: 5,
            max_retries: 0,
            history_window: 10,
        },
        retrieval: RetrievalConfig::default(),
    };

    let pool = db::connect(&config).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();

    let state = AppState::new(config, pool.clone());
    let router = app(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    TestApp {
        addr: format!("http://{addr}"),
        client: reqwest::Client::new(),
        pool,
        _tmp: tmp,
        _mock: mock,
    }
}

/// Minimal valid single-page PDF containing `text`. Body offsets feed an
/// xref table that pdf-extract accepts.
fn make_pdf(text: &str) -> Vec<u8> {
    let content = format!("BT /F1 12 Tf 72 720 Td ({text}) Tj ET\n");
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    out.extend_from_slice(
        format!(
            "4 0 obj << /Length {} >> stream\n{}endstream endobj\n",
            content.len(),
            content
        )
        .as_bytes(),
    );
    let o5 = out.len();
    out.extend_from_slice(
        b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in [o1, o2, o3, o4, o5] {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

async fn create_game(app: &TestApp, name: &str) -> Value {
    let resp = app
        .client
        .post(app.url("/api/games"))
        .json(&json!({"name": name, "minPlayers": 1, "maxPlayers": 5}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    resp.json().await.unwrap()
}

async fn upload_rules(app: &TestApp, game_id: i64, text: &str) -> Value {
    let resp = app
        .client
        .post(app.url(&format!("/api/games/{game_id}/rules-upload")))
        .body(make_pdf(text))
        .send()
        .await
        .unwrap();
    let status = resp.status();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(status, 201, "upload failed: {body}");
    body
}

// ============ Health ============

#[tokio::test]
async fn health_reports_ok() {
    let app = spawn_app(true).await;
    let body: Value = app
        .client
        .get(app.url("/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
}

// ============ Games ============

#[tokio::test]
async fn game_crud_flow() {
    let app = spawn_app(true).await;

    let game = create_game(&app, "Wingspan").await;
    let game_id = game["id"].as_i64().unwrap();
    assert_eq!(game["name"], "Wingspan");
    assert!(game["createdAt"].is_string());

    // Read back
    let fetched: Value = app
        .client
        .get(app.url(&format!("/api/games/{game_id}")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fetched["id"], game_id);

    // Partial update keeps other fields
    let updated: Value = app
        .client
        .put(app.url(&format!("/api/games/{game_id}")))
        .json(&json!({"publisher": "Stonemaier"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(updated["publisher"], "Stonemaier");
    assert_eq!(updated["name"], "Wingspan");

    // Paginated list envelope
    let listed: Value = app
        .client
        .get(app.url("/api/games?page=1&limit=10"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed["total"], 1);
    assert_eq!(listed["totalPages"], 1);
    assert_eq!(listed["items"][0]["hasRulesPdf"], false);
    assert_eq!(listed["items"][0]["houseRulesCount"], 0);

    // Delete, then 404
    let resp = app
        .client
        .delete(app.url(&format!("/api/games/{game_id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);

    let resp = app
        .client
        .get(app.url(&format!("/api/games/{game_id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn game_validation_rejected() {
    let app = spawn_app(true).await;

    let resp = app
        .client
        .post(app.url("/api/games"))
        .json(&json!({"name": "   "}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "validation");

    let resp = app
        .client
        .post(app.url("/api/games"))
        .json(&json!({"name": "Bad Counts", "minPlayers": 4, "maxPlayers": 2}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

// ============ Rules upload lifecycle ============

#[tokio::test]
async fn upload_reupload_and_delete_rules() {
    let app = spawn_app(true).await;
    let game = create_game(&app, "Wingspan").await;
    let game_id = game["id"].as_i64().unwrap();

    let text = "Scoring happens at the end of each round and the end of the game. \
                Eggs on cards are worth one point each. Tucked cards score one point. \
                Food tokens left over are worth nothing unless a bonus card says so.";
    let uploaded = upload_rules(&app, game_id, text).await;
    let first_count = uploaded["chunkCount"].as_i64().unwrap();
    assert!(first_count >= 2, "expected multiple chunks, got {first_count}");
    assert!(uploaded["textLength"].as_i64().unwrap() > 0);

    let info: Value = app
        .client
        .get(app.url(&format!("/api/games/{game_id}/rules-info")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(info["hasRulesPdf"], true);
    assert_eq!(info["chunkCount"], first_count);
    assert!(info["lastProcessed"].is_string());

    // Re-upload a shorter document: exactly the new chunk set remains.
    let reuploaded = upload_rules(&app, game_id, "A much shorter rules reference sheet.").await;
    let second_count = reuploaded["chunkCount"].as_i64().unwrap();
    assert!(second_count < first_count);

    let chunks = store::chunks::load_for_game(&app.pool, game_id).await.unwrap();
    assert_eq!(chunks.len() as i64, second_count);
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.chunk_index, i as i64);
    }

    // Delete reports what went away.
    let deleted: Value = app
        .client
        .delete(app.url(&format!("/api/games/{game_id}/rules")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(deleted["embeddingsDeleted"], second_count);
    assert_eq!(deleted["fileDeleted"], true);

    let info: Value = app
        .client
        .get(app.url(&format!("/api/games/{game_id}/rules-info")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(info["hasRulesPdf"], false);
    assert_eq!(info["chunkCount"], 0);
}

#[tokio::test]
async fn upload_rejects_bad_input() {
    let app = spawn_app(true).await;
    let game = create_game(&app, "Catan").await;
    let game_id = game["id"].as_i64().unwrap();

    // Not a PDF
    let resp = app
        .client
        .post(app.url(&format!("/api/games/{game_id}/rules-upload")))
        .body("just some text".as_bytes().to_vec())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 415);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "unsupported_format");

    // Unknown game
    let resp = app
        .client
        .post(app.url("/api/games/9999/rules-upload"))
        .body(make_pdf("some rules"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    // Over the size ceiling
    let mut huge = b"%PDF-1.4\n".to_vec();
    huge.resize(10 * 1024 * 1024 + 100, b'x');
    let resp = app
        .client
        .post(app.url(&format!("/api/games/{game_id}/rules-upload")))
        .body(huge)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 413);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "too_large");
}

// ============ Search ============

#[tokio::test]
async fn search_empty_game_returns_no_results() {
    let app = spawn_app(true).await;
    let game = create_game(&app, "Azul").await;
    let game_id = game["id"].as_i64().unwrap();

    let body: Value = app
        .client
        .get(app.url(&format!(
            "/api/chat/search-rules?gameId={game_id}&query=scoring&limit=3"
        )))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["totalResults"], 0);
    assert_eq!(body["results"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn search_validates_input() {
    let app = spawn_app(true).await;
    let game = create_game(&app, "Azul").await;
    let game_id = game["id"].as_i64().unwrap();

    let resp = app
        .client
        .get(app.url(&format!(
            "/api/chat/search-rules?gameId={game_id}&query=%20%20"
        )))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = app
        .client
        .get(app.url("/api/chat/search-rules?gameId=424242&query=scoring"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn search_returns_ranked_results() {
    let app = spawn_app(true).await;
    let game = create_game(&app, "Wingspan").await;
    let game_id = game["id"].as_i64().unwrap();

    let text = "Scoring points for eggs happens at game end and every egg counts. \
                Movement between habitats costs one action per bird moved there. \
                Setup begins by dealing five bird cards and five food tokens each.";
    upload_rules(&app, game_id, text).await;

    let body: Value = app
        .client
        .get(app.url(&format!(
            "/api/chat/search-rules?gameId={game_id}&query=scoring%20points%20eggs&limit=3"
        )))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let results = body["results"].as_array().unwrap();
    assert!(!results.is_empty());
    assert!(results.len() <= 3);
    assert_eq!(body["totalResults"], results.len() as i64);

    let scores: Vec<f64> = results
        .iter()
        .map(|r| r["score"].as_f64().unwrap())
        .collect();
    for pair in scores.windows(2) {
        assert!(pair[0] >= pair[1], "scores not descending: {scores:?}");
    }
    for score in scores {
        assert!((0.0..=1.0).contains(&score));
    }
    assert!(results[0]["chunkText"].is_string());
    assert_eq!(results[0]["sourceType"], "rules_pdf");
}

// ============ Chat ============

#[tokio::test]
async fn chat_flow_grounds_replies_in_chunks() {
    let app = spawn_app(true).await;
    let game = create_game(&app, "Wingspan").await;
    let game_id = game["id"].as_i64().unwrap();
    upload_rules(
        &app,
        game_id,
        "Scoring points works by counting eggs tucked cards and bonus goals at game end.",
    )
    .await;

    // Session creation requires a real game.
    let resp = app
        .client
        .post(app.url("/api/chat/sessions"))
        .json(&json!({"gameId": 31337}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = app
        .client
        .post(app.url("/api/chat/sessions"))
        .json(&json!({"gameId": game_id, "title": "scoring questions"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let session: Value = resp.json().await.unwrap();
    let session_id = session["id"].as_i64().unwrap();

    let resp = app
        .client
        .post(app.url("/api/chat/message"))
        .json(&json!({"sessionId": session_id, "message": "How do I score points?"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let reply: Value = resp.json().await.unwrap();
    assert_eq!(reply["message"]["role"], "assistant");
    assert!(reply["message"]["content"].as_str().unwrap().contains("scoring"));

    let sources = reply["contextSources"].as_array().unwrap();
    assert!(!sources.is_empty());
    assert!(sources[0]["embeddingId"].is_i64());
    assert!(sources[0]["similarityScore"].is_f64());

    // History is chronological: user then assistant, with recorded context.
    let history: Value = app
        .client
        .get(app.url(&format!("/api/chat/sessions/{session_id}")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let messages = history["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(messages[1]["role"], "assistant");
    assert!(!messages[1]["contextChunks"].as_array().unwrap().is_empty());

    // Session list reflects activity.
    let sessions: Value = app
        .client
        .get(app.url(&format!("/api/chat/sessions?gameId={game_id}")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(sessions["items"][0]["messageCount"], 2);
    assert!(sessions["items"][0]["lastMessageAt"].is_string());
}

#[tokio::test]
async fn chat_message_validation() {
    let app = spawn_app(true).await;
    let game = create_game(&app, "Root").await;
    let game_id = game["id"].as_i64().unwrap();

    let session: Value = app
        .client
        .post(app.url("/api/chat/sessions"))
        .json(&json!({"gameId": game_id}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let session_id = session["id"].as_i64().unwrap();

    let resp = app
        .client
        .post(app.url("/api/chat/message"))
        .json(&json!({"sessionId": session_id, "message": "   "}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = app
        .client
        .post(app.url("/api/chat/message"))
        .json(&json!({"sessionId": 9999, "message": "hello"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn failed_generation_keeps_user_message() {
    let app = spawn_app(false).await;
    let game = create_game(&app, "Wingspan").await;
    let game_id = game["id"].as_i64().unwrap();
    upload_rules(&app, game_id, "Scoring summary for the final round of play.").await;

    let session: Value = app
        .client
        .post(app.url("/api/chat/sessions"))
        .json(&json!({"gameId": game_id}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let session_id = session["id"].as_i64().unwrap();

    let resp = app
        .client
        .post(app.url("/api/chat/message"))
        .json(&json!({"sessionId": session_id, "message": "How do I score?"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 502);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "generation_failed");

    // The user message is durable; no orphaned assistant message.
    let history: Value = app
        .client
        .get(app.url(&format!("/api/chat/sessions/{session_id}")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let messages = history["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["role"], "user");
}

// ============ House rules ============

#[tokio::test]
async fn house_rule_lifecycle_with_embeddings() {
    let app = spawn_app(true).await;
    let game = create_game(&app, "Catan").await;
    let game_id = game["id"].as_i64().unwrap();

    let resp = app
        .client
        .post(app.url("/api/house-rules"))
        .json(&json!({"gameId": game_id, "title": "  ", "description": "x"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = app
        .client
        .post(app.url("/api/house-rules"))
        .json(&json!({
            "gameId": game_id,
            "title": "Friendly robber",
            "description": "The robber cannot target players with two or fewer points.",
            "category": "variant"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let rule: Value = resp.json().await.unwrap();
    let rule_id = rule["id"].as_i64().unwrap();
    assert_eq!(rule["isActive"], true);

    // Active rule text is embedded for retrieval.
    let count = store::chunks::count_for_source(&app.pool, game_id, SourceType::HouseRule)
        .await
        .unwrap();
    assert!(count > 0);

    // Deactivating removes its chunks; the row stays.
    let resp = app
        .client
        .put(app.url(&format!("/api/house-rules/{rule_id}")))
        .json(&json!({"isActive": false}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let count = store::chunks::count_for_source(&app.pool, game_id, SourceType::HouseRule)
        .await
        .unwrap();
    assert_eq!(count, 0);

    let listed: Value = app
        .client
        .get(app.url(&format!("/api/house-rules?gameId={game_id}")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed["total"], 1);

    let resp = app
        .client
        .delete(app.url(&format!("/api/house-rules/{rule_id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);

    let resp = app
        .client
        .get(app.url(&format!("/api/house-rules/{rule_id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

// ============ Cascade ============

#[tokio::test]
async fn deleting_a_game_cascades_everywhere() {
    let app = spawn_app(true).await;
    let game = create_game(&app, "Wingspan").await;
    let game_id = game["id"].as_i64().unwrap();
    upload_rules(&app, game_id, "Scoring rules for every bird card in the game.").await;

    app.client
        .post(app.url("/api/house-rules"))
        .json(&json!({
            "gameId": game_id,
            "title": "Open hands",
            "description": "Play with bird cards face up for teaching games."
        }))
        .send()
        .await
        .unwrap();

    let session: Value = app
        .client
        .post(app.url("/api/chat/sessions"))
        .json(&json!({"gameId": game_id}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let session_id = session["id"].as_i64().unwrap();

    let resp = app
        .client
        .delete(app.url(&format!("/api/games/{game_id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);

    // Everything owned by the game is gone.
    let resp = app
        .client
        .get(app.url(&format!("/api/games/{game_id}/rules-info")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = app
        .client
        .get(app.url(&format!("/api/chat/sessions/{session_id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let chunks = store::chunks::load_for_game(&app.pool, game_id).await.unwrap();
    assert!(chunks.is_empty());

    let rules: Value = app
        .client
        .get(app.url(&format!("/api/house-rules?gameId={game_id}")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(rules["total"], 0);
}
