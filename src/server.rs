//! HTTP tool server: the machine-facing surface for agent runtimes.
//!
//! Exposes the retrieval operations as named tools over JSON:
//!
//! - `GET  /health`        — liveness probe
//! - `GET  /tools/list`    — tool descriptors with parameter schemas
//! - `POST /tools/{name}`  — invoke one tool with a JSON argument object
//!
//! Success responses wrap the payload as `{"result": ...}`; failures as
//! `{"error": {"code", "message"}}` with a matching HTTP status, so a caller
//! can branch on the stable `code` without parsing messages.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;

use crate::config::Config;
use crate::embedding::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::retrieval::RetrievalEngine;
use crate::store::IndexStore;

pub struct AppState {
    pub config: Config,
    pub store: IndexStore,
    pub provider: Box<dyn EmbeddingProvider>,
}

/// Serve the tool API until the process is terminated.
pub async fn serve(
    config: Config,
    store: IndexStore,
    provider: Box<dyn EmbeddingProvider>,
) -> Result<()> {
    let bind = config.server.bind.clone();
    let state = Arc::new(AppState {
        config,
        store,
        provider,
    });

    let app = router(state);

    println!("docdex tool server listening on http://{}", bind);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/tools/list", get(tools_list))
        .route("/tools/{name}", post(call_tool))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

async fn tools_list() -> Json<Value> {
    Json(json!({
        "tools": [
            {
                "name": "search_docs",
                "description": "Semantic search over indexed documentation. Returns ranked chunks with scores, header trails, and chunk ids usable with get_context.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "query": { "type": "string", "description": "Natural-language search query" },
                        "max_results": { "type": "integer", "description": "Maximum hits to return" },
                        "score_threshold": { "type": "number", "description": "Minimum cosine similarity, -1.0 to 1.0" }
                    },
                    "required": ["query"]
                }
            },
            {
                "name": "get_doc_stats",
                "description": "Index statistics: chunk count, document count, embedding model and dimension.",
                "parameters": { "type": "object", "properties": {} }
            },
            {
                "name": "search_by_headers",
                "description": "Find chunks whose section headers match a pattern (case-insensitive substring). No embedding involved.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "header_pattern": { "type": "string", "description": "Substring to match against header titles" },
                        "max_results": { "type": "integer", "description": "Maximum hits to return" }
                    },
                    "required": ["header_pattern"]
                }
            },
            {
                "name": "get_context",
                "description": "Fetch a chunk by id together with its neighboring chunks from the same document.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "chunk_id": { "type": "string", "description": "Chunk id from a previous search result" },
                        "context_size": { "type": "integer", "description": "Neighbors to include on each side" }
                    },
                    "required": ["chunk_id"]
                }
            }
        ]
    }))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SearchParams {
    query: String,
    max_results: Option<usize>,
    score_threshold: Option<f32>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct HeaderParams {
    header_pattern: String,
    max_results: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ContextParams {
    chunk_id: String,
    context_size: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StatsParams {}

async fn call_tool(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(args): Json<Value>,
) -> Response {
    match dispatch(&state, &name, args).await {
        Ok(result) => (StatusCode::OK, Json(json!({ "result": result }))).into_response(),
        Err(err) => error_response(&err),
    }
}

async fn dispatch(state: &AppState, name: &str, args: Value) -> Result<Value> {
    let engine = RetrievalEngine::new(&state.store, state.provider.as_ref(), &state.config);

    match name {
        "search_docs" => {
            let params: SearchParams = parse_params(args)?;
            let k = params
                .max_results
                .unwrap_or(state.config.retrieval.max_results);
            let threshold = params
                .score_threshold
                .unwrap_or(state.config.retrieval.score_threshold);
            let hits = engine.search(&params.query, k, Some(threshold)).await?;
            let matches: Vec<Value> = hits
                .iter()
                .map(|hit| {
                    let mut obj = chunk_payload(&hit.chunk);
                    obj["score"] = json!(hit.score);
                    obj
                })
                .collect();
            Ok(Value::Array(matches))
        }
        "get_doc_stats" => {
            let _params: StatsParams = parse_params(args)?;
            let stats = engine.get_stats().await?;
            Ok(serde_json::to_value(stats)
                .map_err(|e| Error::Provider(format!("stats serialization: {}", e)))?)
        }
        "search_by_headers" => {
            let params: HeaderParams = parse_params(args)?;
            let limit = params
                .max_results
                .unwrap_or(state.config.retrieval.max_results);
            let hits = engine
                .search_by_headers(&params.header_pattern, limit)
                .await?;
            let matches: Vec<Value> = hits.iter().map(chunk_payload).collect();
            Ok(Value::Array(matches))
        }
        "get_context" => {
            let params: ContextParams = parse_params(args)?;
            let size = params
                .context_size
                .unwrap_or(state.config.retrieval.context_size);
            let window = engine.get_context(&params.chunk_id, size).await?;
            Ok(serde_json::to_value(window)
                .map_err(|e| Error::Provider(format!("context serialization: {}", e)))?)
        }
        other => Err(Error::NotFound(format!("unknown tool: {}", other))),
    }
}

/// Flat wire shape for a chunk in tool results.
fn chunk_payload(chunk: &crate::models::Chunk) -> Value {
    json!({
        "chunk_id": chunk.id,
        "document_id": chunk.document_id,
        "text": chunk.text,
        "header_path": chunk.header_path,
    })
}

fn parse_params<T: serde::de::DeserializeOwned>(args: Value) -> Result<T> {
    // An absent body arrives as null; treat it as an empty argument object.
    let args = if args.is_null() { json!({}) } else { args };
    serde_json::from_value(args).map_err(|e| Error::Configuration(format!("bad_request: {}", e)))
}

/// Stable error code and HTTP status for each failure class.
fn error_code(err: &Error) -> (&'static str, StatusCode) {
    match err {
        Error::Configuration(msg) if msg.starts_with("bad_request") => {
            ("bad_request", StatusCode::BAD_REQUEST)
        }
        Error::Configuration(_) => ("configuration", StatusCode::INTERNAL_SERVER_ERROR),
        Error::NotFound(_) => ("not_found", StatusCode::NOT_FOUND),
        Error::EmptyIndex => ("empty_index", StatusCode::CONFLICT),
        Error::ProviderTimeout(_) => ("timeout", StatusCode::REQUEST_TIMEOUT),
        Error::ProviderRateLimit(_) => ("rate_limited", StatusCode::TOO_MANY_REQUESTS),
        _ => ("internal", StatusCode::INTERNAL_SERVER_ERROR),
    }
}

fn error_response(err: &Error) -> Response {
    let (code, status) = error_code(err);
    let body = json!({
        "error": {
            "code": code,
            "message": err.to_string(),
        }
    });
    (status, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::DisabledProvider;
    use crate::models::{Chunk, HeaderSegment, IndexRecord};
    use tempfile::TempDir;

    async fn test_state(seed: bool) -> (TempDir, AppState) {
        let tmp = TempDir::new().unwrap();
        let store = IndexStore::open(&tmp.path().join("test.sqlite"))
            .await
            .unwrap();

        if seed {
            let records: Vec<IndexRecord> = [
                (0i64, "intro text", vec![(1u8, "Guide")]),
                (1, "install steps", vec![(1, "Guide"), (2, "Install")]),
                (2, "config keys", vec![(1, "Guide"), (2, "Configure")]),
            ]
            .iter()
            .map(|(seq, text, headers)| IndexRecord {
                chunk: Chunk {
                    id: crate::chunk::chunk_id("guide.md", text),
                    document_id: "guide.md".to_string(),
                    sequence_index: *seq,
                    text: text.to_string(),
                    header_path: headers
                        .iter()
                        .map(|(level, title)| HeaderSegment {
                            level: *level,
                            title: title.to_string(),
                        })
                        .collect(),
                    start_offset: 0,
                    end_offset: text.len() as i64,
                    oversized: false,
                },
                embedding: None,
            })
            .collect();
            store.upsert(&records, "disabled").await.unwrap();
        }

        let state = AppState {
            config: Config::default(),
            store,
            provider: Box::new(DisabledProvider),
        };
        (tmp, state)
    }

    #[tokio::test]
    async fn test_search_by_headers_result_is_the_match_list() {
        let (_tmp, state) = test_state(true).await;
        let result = dispatch(
            &state,
            "search_by_headers",
            json!({ "header_pattern": "install" }),
        )
        .await
        .unwrap();

        let matches = result.as_array().expect("result is the list itself");
        assert_eq!(matches.len(), 1);
        let hit = &matches[0];
        assert!(hit["chunk_id"].is_string());
        assert_eq!(hit["text"], "install steps");
        assert!(hit["header_path"].is_array());
        assert!(hit.get("score").is_none());
    }

    #[tokio::test]
    async fn test_get_context_result_shape() {
        let (_tmp, state) = test_state(true).await;
        let id = crate::chunk::chunk_id("guide.md", "install steps");
        let result = dispatch(&state, "get_context", json!({ "chunk_id": id }))
            .await
            .unwrap();

        assert!(result["before"].is_array());
        assert_eq!(result["target"]["text"], "install steps");
        assert!(result["after"].is_array());
    }

    #[tokio::test]
    async fn test_search_docs_empty_index_maps_to_conflict() {
        let (_tmp, state) = test_state(false).await;
        let err = dispatch(&state, "search_docs", json!({ "query": "anything" }))
            .await
            .unwrap_err();
        assert_eq!(error_code(&err), ("empty_index", StatusCode::CONFLICT));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_not_found() {
        let (_tmp, state) = test_state(false).await;
        let err = dispatch(&state, "no_such_tool", json!({}))
            .await
            .unwrap_err();
        assert_eq!(error_code(&err), ("not_found", StatusCode::NOT_FOUND));
    }

    #[test]
    fn test_search_params_defaults() {
        let params: SearchParams = parse_params(json!({ "query": "how do I configure" })).unwrap();
        assert_eq!(params.query, "how do I configure");
        assert!(params.max_results.is_none());
        assert!(params.score_threshold.is_none());
    }

    #[test]
    fn test_unknown_field_is_bad_request() {
        let err = parse_params::<SearchParams>(json!({ "query": "x", "limit": 3 })).unwrap_err();
        let (code, status) = error_code(&err);
        assert_eq!(code, "bad_request");
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_missing_required_field_is_bad_request() {
        let err = parse_params::<ContextParams>(json!({ "context_size": 2 })).unwrap_err();
        let (code, _) = error_code(&err);
        assert_eq!(code, "bad_request");
    }

    #[test]
    fn test_null_body_means_no_arguments() {
        let params: StatsParams = parse_params(Value::Null).unwrap();
        let _ = params;
    }

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(
            error_code(&Error::EmptyIndex),
            ("empty_index", StatusCode::CONFLICT)
        );
        assert_eq!(
            error_code(&Error::NotFound("x".into())),
            ("not_found", StatusCode::NOT_FOUND)
        );
        assert_eq!(
            error_code(&Error::ProviderTimeout("t".into())),
            ("timeout", StatusCode::REQUEST_TIMEOUT)
        );
        assert_eq!(
            error_code(&Error::ProviderRateLimit("r".into())),
            ("rate_limited", StatusCode::TOO_MANY_REQUESTS)
        );
        assert_eq!(
            error_code(&Error::Configuration("dims mismatch".into())),
            ("configuration", StatusCode::INTERNAL_SERVER_ERROR)
        );
        assert_eq!(
            error_code(&Error::Provider("boom".into())),
            ("internal", StatusCode::INTERNAL_SERVER_ERROR)
        );
    }
}
