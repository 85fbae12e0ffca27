use std::collections::HashMap;
use std::path::Path;

use axum::Router;
use axum::body::Body;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{FromRequestParts, Query, Request, State};
use axum::handler::HandlerWithoutStateExt;
use axum::response::{Html, IntoResponse, Json, Response};
use axum::routing::get;
use http::{HeaderMap, StatusCode};
use serde::Serialize;
use tower_http::services::{ServeDir, ServeFile};

use crate::error::ProxyError;
use crate::orchestrator::{InboundRequest, Orchestrator, Purpose};
use crate::websocket;

const NOT_FOUND_PAGE: &str = "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>Not Found</title></head>\
<body><h1>404 Not Found</h1><p>The page you requested does not exist.</p><p><a href=\"/\">Back to start</a></p></body></html>\n";

#[derive(Clone)]
struct AppState {
    orchestrator: Orchestrator,
}

/// Body of a successful `/fetch` answer.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FetchResponse {
    content: String,
    final_url: String,
}

/// All inbound routes: the proxy pipeline, the `/fetch` convenience
/// endpoint, a health check and static files for everything else.
pub fn router(orchestrator: Orchestrator, static_dir: &Path) -> Router {
    let static_files = ServeDir::new(static_dir).not_found_service(not_found.into_service());

    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/fetch", get(fetch_route))
        .route("/proxy/{*target}", get(proxy_route))
        .route_service("/home", ServeFile::new(static_dir.join("homepage.html")))
        .route_service("/settings", ServeFile::new(static_dir.join("settings.html")))
        .fallback_service(static_files)
        .with_state(AppState { orchestrator })
}

async fn proxy_route(State(state): State<AppState>, request: Request) -> Response {
    let (mut parts, _body) = request.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| parts.uri.path().to_string());

    if websocket::is_upgrade_request(&parts.headers) {
        let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
            Ok(upgrade) => upgrade,
            Err(rejection) => return rejection.into_response(),
        };
        let access = state.orchestrator.access().clone();
        return match websocket::bridge(upgrade, &path_and_query, &parts.headers, access).await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(path = %path_and_query, %err, "websocket bridge failed");
                err.into_response()
            }
        };
    }

    let request = InboundRequest {
        path_and_query,
        headers: parts.headers,
    };
    match state.orchestrator.handle(request).await {
        Ok(response) => response.map(Body::from).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn fetch_route(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let Some(target) = params
        .get("url")
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
    else {
        return (StatusCode::BAD_REQUEST, "URL parameter is required").into_response();
    };

    match fetch_page(&state.orchestrator, target, &headers).await {
        Ok(body) => Json(body).into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Error fetching website data: {err}"),
        )
            .into_response(),
    }
}

async fn fetch_page(
    orchestrator: &Orchestrator,
    target: &str,
    headers: &HeaderMap,
) -> Result<FetchResponse, ProxyError> {
    let url = url_codec::parse_user_target(target)?;
    let rewritten = orchestrator.serve(&url, headers, Purpose::Page).await?;
    Ok(FetchResponse {
        content: String::from_utf8_lossy(&rewritten.result.body).into_owned(),
        final_url: rewritten.result.final_url.to_string(),
    })
}

async fn not_found() -> (StatusCode, Html<&'static str>) {
    (StatusCode::NOT_FOUND, Html(NOT_FOUND_PAGE))
}
